use crate::buffer::{Buffer, DefaultBufferStore, DefaultTransmitStore};
use crate::control::SetupOutcome;
use crate::function::{CdcConfig, CdcFunction, DeviceState, BULK_MAX_PACKET_SIZE};
use crate::hooks::{ByteSink, NoUart, UartActuator};
use crate::line_coding::{LineCoding, LINE_CODING_LEN};
use crate::stack::{TransferStatus, TransferToken, UsbStack};
use core::borrow::BorrowMut;
use usb_device::class_prelude::*;
use usb_device::device::UsbDeviceState;
use usb_device::Result;

/// This should be used as `device_class` when building the `UsbDevice`.
pub const USB_CLASS_CDC: u8 = 0x02;

const USB_CLASS_CDC_DATA: u8 = 0x0a;
const CDC_SUBCLASS_ACM: u8 = 0x02;
const CDC_PROTOCOL_NONE: u8 = 0x00;

const CS_INTERFACE: u8 = 0x24;
const CDC_TYPE_HEADER: u8 = 0x00;
const CDC_TYPE_CALL_MANAGEMENT: u8 = 0x01;
const CDC_TYPE_ACM: u8 = 0x02;
const CDC_TYPE_UNION: u8 = 0x06;

/// bmCapabilities: line coding and serial state requests
const ACM_CAP_LINE_CODING: u8 = 0x02;

/// The data endpoints together with the transfers currently armed on them.
///
/// usb-device endpoints have no notion of an armed transfer, so this remembers which token the
/// next packet on each endpoint completes.
struct Endpoints<'a, B: UsbBus> {
    read_ep: EndpointOut<'a, B>,
    write_ep: EndpointIn<'a, B>,
    armed_read: Option<TransferToken>,
    armed_write: Option<(TransferToken, usize)>,
    control_in: Option<([u8; LINE_CODING_LEN], usize)>,
    control_out: Option<TransferToken>,
}

impl<B: UsbBus> Endpoints<'_, B> {
    fn clear(&mut self) {
        self.armed_read = None;
        self.armed_write = None;
        self.control_in = None;
        self.control_out = None;
    }
}

impl<B: UsbBus> UsbStack for Endpoints<'_, B> {
    fn read(&mut self, ep: EndpointAddress, max_len: usize, token: TransferToken) -> Result<()> {
        if ep != self.read_ep.address() {
            return Err(UsbError::InvalidEndpoint);
        }

        if max_len < usize::from(self.read_ep.max_packet_size()) {
            return Err(UsbError::BufferOverflow);
        }

        self.armed_read = Some(token);
        Ok(())
    }

    fn write(&mut self, ep: EndpointAddress, data: &[u8], token: TransferToken) -> Result<()> {
        if ep != self.write_ep.address() {
            return Err(UsbError::InvalidEndpoint);
        }

        let count = self.write_ep.write(data)?;
        self.armed_write = Some((token, count));
        Ok(())
    }

    fn control_write(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = [0u8; LINE_CODING_LEN];
        buf.get_mut(..data.len())
            .ok_or(UsbError::BufferOverflow)?
            .copy_from_slice(data);

        self.control_in = Some((buf, data.len()));
        Ok(())
    }

    fn control_read(&mut self, len: usize, token: TransferToken) -> Result<()> {
        if len > LINE_CODING_LEN {
            return Err(UsbError::BufferOverflow);
        }

        self.control_out = Some(token);
        Ok(())
    }
}

/// USB serial port (CDC-ACM) class built on [`CdcFunction`].
///
/// Received bytes go to the sink `K`; by default that is a buffer the application drains with
/// [`read`](SerialPort::read). usb-device doesn't report device state changes to classes, so
/// call [`update_state`](SerialPort::update_state) after every poll.
pub struct SerialPort<
    'a,
    B,
    WS = DefaultTransmitStore,
    K = Buffer<DefaultBufferStore>,
    U = NoUart,
> where
    B: UsbBus,
    WS: BorrowMut<[u8]>,
    K: ByteSink,
    U: UartActuator,
{
    comm_if: InterfaceNumber,
    comm_ep: EndpointIn<'a, B>,
    data_if: InterfaceNumber,
    eps: Endpoints<'a, B>,
    function: CdcFunction<WS, K, U>,
    device_state: UsbDeviceState,
}

impl<'a, B: UsbBus> SerialPort<'a, B> {
    /// Creates a new USB serial port with the provided UsbBus.
    pub fn new(alloc: &'a UsbBusAllocator<B>) -> SerialPort<'a, B> {
        Self::new_with_parts(
            alloc,
            BULK_MAX_PACKET_SIZE as u16,
            DefaultTransmitStore::default(),
            Buffer::new(DefaultBufferStore::default()),
            NoUart,
        )
    }
}

impl<'a, B, WS, K, U> SerialPort<'a, B, WS, K, U>
where
    B: UsbBus,
    WS: BorrowMut<[u8]>,
    K: ByteSink,
    U: UartActuator,
{
    /// Creates a new USB serial port with the given transmit store, receive sink and UART
    /// actuator.
    ///
    /// # Panics
    ///
    /// Panics if `max_packet_size` is not a valid full speed bulk packet size, or if the
    /// allocator runs out of interfaces or endpoints.
    pub fn new_with_parts(
        alloc: &'a UsbBusAllocator<B>,
        max_packet_size: u16,
        tx_store: WS,
        sink: K,
        uart: U,
    ) -> SerialPort<'a, B, WS, K, U> {
        let comm_if = alloc.interface();
        let comm_ep: EndpointIn<'a, B> = alloc.interrupt(8, 255);
        let data_if = alloc.interface();
        let read_ep: EndpointOut<'a, B> = alloc.bulk(max_packet_size);
        let write_ep: EndpointIn<'a, B> = alloc.bulk(max_packet_size);

        let config = CdcConfig {
            control_interface: comm_if.into(),
            data_interface: data_if.into(),
            data_out: read_ep.address(),
            data_in: write_ep.address(),
            notify: comm_ep.address(),
            max_packet_size,
        };

        SerialPort {
            comm_if,
            comm_ep,
            data_if,
            eps: Endpoints {
                read_ep,
                write_ep,
                armed_read: None,
                armed_write: None,
                control_in: None,
                control_out: None,
            },
            function: CdcFunction::new(config, tx_store, sink, uart),
            device_state: UsbDeviceState::Default,
        }
    }

    /// Gets the current line coding.
    pub fn line_coding(&self) -> &LineCoding {
        self.function.line_coding()
    }

    /// Gets the driver state behind this port.
    pub fn function(&self) -> &CdcFunction<WS, K, U> {
        &self.function
    }

    /// Gets the sink received bytes are delivered to.
    pub fn sink_mut(&mut self) -> &mut K {
        self.function.sink_mut()
    }

    /// Returns `true` while a previous [`send`](Self::send) is still being transferred.
    pub fn is_sending(&self) -> bool {
        self.function.is_sending()
    }

    /// Starts sending all of `data` to the host. Fails with `WouldBlock` while a previous send
    /// is in flight, with `BufferOverflow` if `data` doesn't fit in the transmit store and with
    /// `InvalidState` while the device is not configured.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.function.send(&mut self.eps, data)
    }

    /// Adds bytes to the transmit store without sending them and returns the number of bytes
    /// stored. Use [`flush`](Self::flush) to send them.
    pub fn queue(&mut self, data: &[u8]) -> Result<usize> {
        self.function.queue(data)
    }

    /// Sends queued bytes. Returns `Err(WouldBlock)` until everything has been transferred.
    pub fn flush(&mut self) -> Result<()> {
        self.function.flush(&mut self.eps)
    }

    /// Forwards the device state to the driver. Call this with `UsbDevice::state()` after every
    /// poll.
    pub fn update_state(&mut self, state: UsbDeviceState) {
        if state == self.device_state {
            return;
        }

        let old = DeviceState::from(self.device_state);
        let new = DeviceState::from(state);
        self.device_state = state;

        if old != new {
            self.function.device_state_changed(&mut self.eps, old, new);
            // a packet may have arrived before the first receive was armed
            self.receive();
        }
    }

    fn receive(&mut self) {
        let Some(token) = self.eps.armed_read else {
            return;
        };

        let Some(buf) = self.function.receive_buffer(token) else {
            self.eps.armed_read = None;
            return;
        };

        let (status, count) = match self.eps.read_ep.read(buf) {
            Ok(count) => (TransferStatus::Ok, count),
            Err(UsbError::WouldBlock) => return,
            Err(_err) => {
                warn!("serial: read failed: {:?}", _err);
                (TransferStatus::Aborted, 0)
            }
        };

        self.eps.armed_read = None;
        self.function
            .receive_complete(&mut self.eps, token, status, count);
    }
}

impl<'a, B, WS, RS, U> SerialPort<'a, B, WS, Buffer<RS>, U>
where
    B: UsbBus,
    WS: BorrowMut<[u8]>,
    RS: BorrowMut<[u8]>,
    U: UartActuator,
{
    /// Reads bytes received from the host into `data` and returns the number of bytes read.
    /// Returns `Err(WouldBlock)` if nothing was received.
    pub fn read(&mut self, data: &mut [u8]) -> Result<usize> {
        let buf = self.function.sink_mut();

        if buf.available_read() == 0 {
            return Err(UsbError::WouldBlock);
        }

        buf.read(data.len(), |buf_data| {
            data[..buf_data.len()].copy_from_slice(buf_data);

            Ok(buf_data.len())
        })
    }
}

impl<B, WS, K, U> UsbClass<B> for SerialPort<'_, B, WS, K, U>
where
    B: UsbBus,
    WS: BorrowMut<[u8]>,
    K: ByteSink,
    U: UartActuator,
{
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> Result<()> {
        writer.interface(
            self.comm_if,
            USB_CLASS_CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_NONE,
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_HEADER, // bDescriptorSubtype
                0x10,
                0x01, // bcdCDC (1.10)
            ],
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_ACM,        // bDescriptorSubtype
                ACM_CAP_LINE_CODING, // bmCapabilities
            ],
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_UNION,      // bDescriptorSubtype
                self.comm_if.into(), // bControlInterface
                self.data_if.into(), // bSubordinateInterface
            ],
        )?;

        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_CALL_MANAGEMENT, // bDescriptorSubtype
                0x00,                     // bmCapabilities
                self.data_if.into(),      // bDataInterface
            ],
        )?;

        writer.endpoint(&self.comm_ep)?;

        writer.interface(self.data_if, USB_CLASS_CDC_DATA, 0x00, 0x00)?;

        writer.endpoint(&self.eps.write_ep)?;
        writer.endpoint(&self.eps.read_ep)?;

        Ok(())
    }

    fn reset(&mut self) {
        debug!("serial: reset");
        self.function.reset();
        self.eps.clear();
        self.device_state = UsbDeviceState::Default;
    }

    fn poll(&mut self) {
        self.receive();
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.eps.read_ep.address() {
            self.receive();
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr != self.eps.write_ep.address() {
            return;
        }

        if let Some((token, count)) = self.eps.armed_write.take() {
            self.function
                .transmit_complete(&mut self.eps, token, TransferStatus::Ok, count);
        }
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();

        match self.function.setup(&mut self.eps, &req) {
            SetupOutcome::Handled => {
                let (buf, len) = self
                    .eps
                    .control_in
                    .take()
                    .unwrap_or(([0; LINE_CODING_LEN], 0));
                xfer.accept_with(&buf[..len]).ok();
            }
            SetupOutcome::Rejected => {
                xfer.reject().ok();
            }
            SetupOutcome::NotMine => {}
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();

        match self.function.setup(&mut self.eps, &req) {
            SetupOutcome::Handled => {
                let Some(token) = self.eps.control_out.take() else {
                    xfer.accept().ok();
                    return;
                };

                // usb-device only calls control_out once the data stage is complete
                let data = xfer.data();
                let count = match self.function.control_out_buffer(token) {
                    Some(buf) if data.len() <= buf.len() => {
                        buf[..data.len()].copy_from_slice(data);
                        data.len()
                    }
                    // longer than a record; fails the length check below
                    _ => data.len(),
                };

                match self
                    .function
                    .control_out_complete(token, TransferStatus::Ok, count)
                {
                    Ok(_) => {
                        xfer.accept().ok();
                    }
                    Err(_) => {
                        xfer.reject().ok();
                    }
                }
            }
            SetupOutcome::Rejected => {
                xfer.reject().ok();
            }
            SetupOutcome::NotMine => {}
        }
    }
}
