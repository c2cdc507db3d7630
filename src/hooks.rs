use crate::line_coding::FrameConfig;

/// Consumer of bytes received from the host.
///
/// `deliver` is called from the completion context with each received chunk, in order. The slice
/// is only valid for the duration of the call.
pub trait ByteSink {
    fn deliver(&mut self, data: &[u8]);
}

impl<F: FnMut(&[u8])> ByteSink for F {
    fn deliver(&mut self, data: &[u8]) {
        self(data)
    }
}

/// The UART the line coding is meant to drive.
pub trait UartActuator {
    /// Called with every line coding the host sets and the device accepts.
    fn configure(&mut self, data_rate: u32, frame: FrameConfig);

    /// Called when the device is suspended by the host.
    fn suspend(&mut self) {}

    /// Called when the device is configured again after a suspend.
    fn resume(&mut self) {}
}

/// An actuator that ignores all configuration.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoUart;

impl UartActuator for NoUart {
    fn configure(&mut self, _data_rate: u32, _frame: FrameConfig) {}
}
