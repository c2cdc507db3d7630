//! The boundary to the USB device stack that schedules transfers on behalf of the driver.

use usb_device::endpoint::EndpointAddress;
use usb_device::Result;

/// Completion status of a transfer, as reported by the USB device stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferStatus {
    /// The transfer completed.
    Ok,

    /// The endpoint was stalled.
    Stalled,

    /// The transfer was aborted, e.g. because the endpoint was disabled.
    Aborted,

    /// The bus was reset while the transfer was pending.
    Reset,

    /// The transfer timed out.
    Timeout,
}

impl TransferStatus {
    /// Returns `true` if the transfer completed.
    pub fn is_ok(self) -> bool {
        self == TransferStatus::Ok
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TransferKind {
    Receive,
    Transmit,
    ControlOut,
}

/// Opaque handle for one armed transfer.
///
/// The driver hands a token to the stack when it arms a transfer, and the stack hands the same
/// token back with the completion. Completions carrying a token the driver no longer waits for
/// (because the device was deconfigured in between, for example) are dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransferToken {
    kind: TransferKind,
    seq: u16,
}

impl TransferToken {
    pub(crate) fn new(kind: TransferKind, seq: u16) -> Self {
        TransferToken { kind, seq }
    }
}

/// Transfer scheduling services consumed by [`CdcFunction`](crate::CdcFunction).
///
/// Every method only arms a transfer and returns; completion is reported later by calling back
/// into the driver with the token that was passed in.
pub trait UsbStack {
    /// Arms a bulk OUT transfer of up to `max_len` bytes on `ep`. On completion the stack fills
    /// [`CdcFunction::receive_buffer`](crate::CdcFunction::receive_buffer) and calls
    /// [`CdcFunction::receive_complete`](crate::CdcFunction::receive_complete).
    fn read(&mut self, ep: EndpointAddress, max_len: usize, token: TransferToken) -> Result<()>;

    /// Arms a bulk IN transfer of `data` on `ep`. The stack must copy `data` before returning.
    /// On completion it calls
    /// [`CdcFunction::transmit_complete`](crate::CdcFunction::transmit_complete).
    fn write(&mut self, ep: EndpointAddress, data: &[u8], token: TransferToken) -> Result<()>;

    /// Queues the IN data stage of the control transfer currently being set up.
    fn control_write(&mut self, data: &[u8]) -> Result<()>;

    /// Arms the OUT data stage of the control transfer currently being set up. On completion the
    /// stack fills [`CdcFunction::control_out_buffer`](crate::CdcFunction::control_out_buffer) and
    /// calls [`CdcFunction::control_out_complete`](crate::CdcFunction::control_out_complete).
    fn control_read(&mut self, len: usize, token: TransferToken) -> Result<()>;
}
