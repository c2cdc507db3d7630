//! CDC-ACM USB function driver for [usb-device](https://crates.io/crates/usb-device).
//!
//! CDC-ACM is a USB class that's supported out of the box by most operating systems and used for
//! implementing modems and generic serial ports. This crate implements the device side of it as
//! a state machine over asynchronous transfers:
//!
//! * [`CdcFunction`] answers the CDC class requests (`GET_LINE_CODING`, `SET_LINE_CODING` and
//!   `SET_CONTROL_LINE_STATE`), keeps one bulk OUT transfer armed while the device is configured
//!   and splits outgoing data into a chain of bulk IN transfers. It talks to the USB device stack
//!   only through the [`UsbStack`] trait and the completion methods the stack calls back.
//! * [`SerialPort`] binds a `CdcFunction` to a usb-device bus as a [`UsbClass`], writing the
//!   CDC-ACM descriptors and mapping endpoint events to transfer completions.
//!
//! [`UsbClass`]: usb_device::class::UsbClass
//!
//! Example
//! =======
//!
//! A full example requires the use of a hardware-driver, but the hardware independent part is as
//! follows:
//!
//! ```no_run
//! # use usb_device::class_prelude::*;
//! # fn dummy(usb_bus: UsbBusAllocator<impl UsbBus>) {
//! use usb_device::prelude::*;
//! use usbd_cdc_function::{SerialPort, USB_CLASS_CDC};
//!
//! let mut serial = SerialPort::new(&usb_bus);
//!
//! let mut usb_dev = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(0x16c0, 0x27dd))
//!     .strings(&[StringDescriptors::new(LangID::EN).product("Serial port")])
//!     .expect("Failed to set strings")
//!     .device_class(USB_CLASS_CDC)
//!     .build();
//!
//! loop {
//!     usb_dev.poll(&mut [&mut serial]);
//!     serial.update_state(usb_dev.state());
//!
//!     let mut buf = [0u8; 64];
//!
//!     match serial.read(&mut buf[..]) {
//!         Ok(count) => {
//!             // echo back what was received in &buf[..count]
//!             serial.send(&buf[..count]).ok();
//!         },
//!         Err(UsbError::WouldBlock) => { /* No data received */ },
//!         Err(err) => { /* An error occurred */ },
//!     };
//! }
//! # }
//! ```

#![no_std]

#[macro_use]
mod log;

mod buffer;
mod control;
mod function;
mod hooks;
mod io;
mod line_coding;
mod serial_port;
mod stack;

pub use crate::buffer::{Buffer, DefaultBufferStore, DefaultTransmitStore};
pub use crate::control::{
    SetupOutcome, REQ_GET_LINE_CODING, REQ_SET_CONTROL_LINE_STATE, REQ_SET_LINE_CODING,
};
pub use crate::function::{CdcConfig, CdcFunction, DeviceState, BULK_MAX_PACKET_SIZE};
pub use crate::hooks::{ByteSink, NoUart, UartActuator};
pub use crate::line_coding::*;
pub use crate::serial_port::*;
pub use crate::stack::{TransferStatus, TransferToken, UsbStack};
pub use usb_device::{Result, UsbError};
