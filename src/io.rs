use super::{Buffer, ByteSink, SerialPort, UartActuator};
use core::borrow::BorrowMut;
use core::slice;
use usb_device::bus::UsbBus;
use usb_device::UsbError;

impl<B, WS, K, U> embedded_hal::serial::Write<u8> for SerialPort<'_, B, WS, K, U>
where
    B: UsbBus,
    WS: BorrowMut<[u8]>,
    K: ByteSink,
    U: UartActuator,
{
    type Error = UsbError;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        match <SerialPort<'_, B, WS, K, U>>::queue(self, slice::from_ref(&word)) {
            // store full; start draining it and have the caller retry
            Ok(0) => match <SerialPort<'_, B, WS, K, U>>::flush(self) {
                Ok(()) | Err(UsbError::WouldBlock) => Err(nb::Error::WouldBlock),
                Err(err) => Err(nb::Error::Other(err)),
            },
            Ok(_) => Ok(()),
            Err(UsbError::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(err) => Err(nb::Error::Other(err)),
        }
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        match <SerialPort<'_, B, WS, K, U>>::flush(self) {
            Ok(()) => Ok(()),
            Err(UsbError::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(err) => Err(nb::Error::Other(err)),
        }
    }
}

impl<B, WS, RS, U> embedded_hal::serial::Read<u8> for SerialPort<'_, B, WS, Buffer<RS>, U>
where
    B: UsbBus,
    WS: BorrowMut<[u8]>,
    RS: BorrowMut<[u8]>,
    U: UartActuator,
{
    type Error = UsbError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut buf: u8 = 0;

        match <SerialPort<'_, B, WS, Buffer<RS>, U>>::read(self, slice::from_mut(&mut buf)) {
            Ok(0) | Err(UsbError::WouldBlock) => Err(nb::Error::WouldBlock),
            Ok(_) => Ok(buf),
            Err(err) => Err(nb::Error::Other(err)),
        }
    }
}
