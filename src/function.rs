use crate::buffer::Buffer;
use crate::control::{classify, ClassRequest, SetupOutcome};
use crate::hooks::{ByteSink, UartActuator};
use crate::line_coding::{
    FrameConfig, LineCoding, LineCodingStore, RequestError, LINE_CODING_LEN,
};
use crate::stack::{TransferKind, TransferStatus, TransferToken, UsbStack};
use core::borrow::BorrowMut;
use usb_device::control::Request;
use usb_device::device::UsbDeviceState;
use usb_device::endpoint::EndpointAddress;
use usb_device::{Result, UsbError};

/// Largest bulk packet on a full speed bus, and the size of the receive buffer.
pub const BULK_MAX_PACKET_SIZE: usize = 64;

/// Interface numbers, endpoint addresses and packet size of the CDC function.
#[derive(Copy, Clone, Debug)]
pub struct CdcConfig {
    /// Interface class requests must be addressed to.
    pub control_interface: u8,

    /// Informational; the driver only routes requests for the control interface.
    pub data_interface: u8,
    pub data_out: EndpointAddress,
    pub data_in: EndpointAddress,

    /// Informational; the notification endpoint is declared in the descriptors but never
    /// written to.
    pub notify: EndpointAddress,
    pub max_packet_size: u16,
}

impl Default for CdcConfig {
    fn default() -> Self {
        CdcConfig {
            control_interface: 0,
            data_interface: 1,
            data_out: EndpointAddress::from(0x01),
            data_in: EndpointAddress::from(0x81),
            notify: EndpointAddress::from(0x82),
            max_packet_size: BULK_MAX_PACKET_SIZE as u16,
        }
    }
}

/// Device state, as far as the CDC function cares.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceState {
    Unconfigured,
    Configured,
    Suspended,
}

impl From<UsbDeviceState> for DeviceState {
    fn from(state: UsbDeviceState) -> Self {
        match state {
            UsbDeviceState::Configured => DeviceState::Configured,
            UsbDeviceState::Suspend => DeviceState::Suspended,
            _ => DeviceState::Unconfigured,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RxState {
    /// No transfer armed, the buffer is ours.
    Idle,

    /// A transfer into the buffer is armed. The stack may write the buffer.
    Armed(TransferToken),

    /// The buffer is being handed to the sink.
    Delivering,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TxState {
    /// Not currently writing anything.
    Idle,

    /// Writing a short packet (or zero length packet); the transfer is done afterwards.
    Short(TransferToken),

    /// Writing a full packet that needs to be followed by more data or a zero length packet.
    Full(TransferToken),
}

/// CDC-ACM function driver.
///
/// Holds every piece of state shared between the setup, state change and completion callbacks
/// of one USB connection. All entry points take the [`UsbStack`] that arms the next transfer.
pub struct CdcFunction<WS, K, U>
where
    WS: BorrowMut<[u8]>,
    K: ByteSink,
    U: UartActuator,
{
    config: CdcConfig,
    state: DeviceState,
    line_coding: LineCodingStore,
    pending_line_coding: Option<TransferToken>,
    rx_buf: [u8; BULK_MAX_PACKET_SIZE],
    rx_state: RxState,
    tx_buf: Buffer<WS>,
    tx_state: TxState,
    next_seq: u16,
    sink: K,
    uart: U,
}

impl<WS, K, U> CdcFunction<WS, K, U>
where
    WS: BorrowMut<[u8]>,
    K: ByteSink,
    U: UartActuator,
{
    /// Creates the driver. `tx_store` bounds how many bytes a single [`send`](Self::send) can
    /// take.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_packet_size` is zero or larger than [`BULK_MAX_PACKET_SIZE`].
    pub fn new(config: CdcConfig, tx_store: WS, sink: K, uart: U) -> Self {
        assert!(
            config.max_packet_size > 0
                && usize::from(config.max_packet_size) <= BULK_MAX_PACKET_SIZE,
            "invalid bulk max packet size"
        );

        CdcFunction {
            config,
            state: DeviceState::Unconfigured,
            line_coding: LineCodingStore::new(),
            pending_line_coding: None,
            rx_buf: [0; BULK_MAX_PACKET_SIZE],
            rx_state: RxState::Idle,
            tx_buf: Buffer::new(tx_store),
            tx_state: TxState::Idle,
            next_seq: 0,
            sink,
            uart,
        }
    }

    /// Gets the interface and endpoint configuration.
    pub fn config(&self) -> &CdcConfig {
        &self.config
    }

    /// Gets the current device state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Gets the current line coding.
    pub fn line_coding(&self) -> &LineCoding {
        self.line_coding.line_coding()
    }

    /// Gets the current line coding in wire format.
    pub fn line_coding_record(&self) -> [u8; LINE_CODING_LEN] {
        self.line_coding.get()
    }

    /// Gets the sink received bytes are delivered to.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Gets the sink received bytes are delivered to, mutably.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Gets the UART actuator.
    pub fn uart(&self) -> &U {
        &self.uart
    }

    /// Returns `true` while a send is still being transferred.
    pub fn is_sending(&self) -> bool {
        self.tx_state != TxState::Idle
    }

    fn token(&mut self, kind: TransferKind) -> TransferToken {
        self.next_seq = self.next_seq.wrapping_add(1);
        TransferToken::new(kind, self.next_seq)
    }

    fn max_packet_size(&self) -> usize {
        usize::from(self.config.max_packet_size)
    }

    /// Handles a setup packet. Only class requests addressed to the control interface are
    /// considered; everything else is [`SetupOutcome::NotMine`].
    pub fn setup(&mut self, stack: &mut impl UsbStack, req: &Request) -> SetupOutcome {
        match classify(req, self.config.control_interface) {
            Some(ClassRequest::GetLineCoding) => {
                match stack.control_write(&self.line_coding.get()) {
                    Ok(()) => SetupOutcome::Handled,
                    Err(_err) => {
                        warn!("cdc: GET_LINE_CODING data stage failed: {:?}", _err);
                        SetupOutcome::Rejected
                    }
                }
            }
            Some(ClassRequest::SetLineCoding) => {
                let token = self.token(TransferKind::ControlOut);
                match stack.control_read(LINE_CODING_LEN, token) {
                    Ok(()) => {
                        self.pending_line_coding = Some(token);
                        SetupOutcome::Handled
                    }
                    Err(_err) => {
                        warn!("cdc: SET_LINE_CODING data stage failed: {:?}", _err);
                        SetupOutcome::Rejected
                    }
                }
            }
            Some(ClassRequest::SetControlLineState) => {
                debug!("cdc: SET_CONTROL_LINE_STATE {:#06x}", req.value);
                SetupOutcome::Handled
            }
            None => SetupOutcome::NotMine,
        }
    }

    /// Buffer the stack should write the `SET_LINE_CODING` data stage into, while `token` is
    /// pending.
    pub fn control_out_buffer(&mut self, token: TransferToken) -> Option<&mut [u8]> {
        if self.pending_line_coding == Some(token) {
            Some(self.line_coding.staging_mut())
        } else {
            None
        }
    }

    /// Completes the `SET_LINE_CODING` data stage. An error means the stack should stall the
    /// status stage.
    pub fn control_out_complete(
        &mut self,
        token: TransferToken,
        status: TransferStatus,
        count: usize,
    ) -> core::result::Result<FrameConfig, RequestError> {
        if self.pending_line_coding != Some(token) {
            return Err(RequestError::NoPendingRequest);
        }
        self.pending_line_coding = None;

        if !status.is_ok() {
            return Err(RequestError::TransferFailed);
        }

        if count != LINE_CODING_LEN {
            return Err(RequestError::ShortRecord);
        }

        match self.line_coding.commit_staged() {
            Ok(frame) => {
                let data_rate = self.line_coding.line_coding().data_rate();
                debug!("cdc: line coding {} {:?}", data_rate, frame);
                self.uart.configure(data_rate, frame);
                Ok(frame)
            }
            Err(err) => {
                warn!("cdc: line coding rejected: {}", err);
                Err(err)
            }
        }
    }

    /// Reacts to a device state transition reported by the stack.
    pub fn device_state_changed(
        &mut self,
        stack: &mut impl UsbStack,
        old: DeviceState,
        new: DeviceState,
    ) {
        debug!("cdc: state {:?} -> {:?}", old, new);
        self.state = new;

        if new == DeviceState::Configured {
            if old == DeviceState::Suspended {
                self.uart.resume();
            }

            self.start_receive(stack);
        } else if old == DeviceState::Configured && new != DeviceState::Suspended {
            self.stop();
        } else if new == DeviceState::Suspended {
            self.stop();
            self.uart.suspend();
        }
    }

    /// Drops all transfer state, as after a bus reset.
    pub fn reset(&mut self) {
        self.state = DeviceState::Unconfigured;
        self.pending_line_coding = None;
        self.stop();
    }

    fn stop(&mut self) {
        self.rx_state = RxState::Idle;
        self.tx_state = TxState::Idle;
        self.tx_buf.clear();
    }

    fn start_receive(&mut self, stack: &mut impl UsbStack) {
        if let RxState::Armed(_) = self.rx_state {
            return;
        }

        let token = self.token(TransferKind::Receive);
        match stack.read(self.config.data_out, self.max_packet_size(), token) {
            Ok(()) => self.rx_state = RxState::Armed(token),
            Err(_err) => {
                warn!("cdc: arming receive failed: {:?}", _err);
                self.rx_state = RxState::Idle;
            }
        }
    }

    /// Buffer the stack should write received data into, while `token` is armed.
    pub fn receive_buffer(&mut self, token: TransferToken) -> Option<&mut [u8]> {
        if self.rx_state == RxState::Armed(token) {
            let len = self.max_packet_size();
            Some(&mut self.rx_buf[..len])
        } else {
            None
        }
    }

    /// Completes a receive transfer. Received bytes are handed to the sink before the next
    /// transfer is armed.
    pub fn receive_complete(
        &mut self,
        stack: &mut impl UsbStack,
        token: TransferToken,
        status: TransferStatus,
        count: usize,
    ) {
        if self.rx_state != RxState::Armed(token) {
            debug!("cdc: stale receive completion");
            return;
        }

        if status.is_ok() && count > 0 {
            self.rx_state = RxState::Delivering;
            let count = count.min(self.max_packet_size());
            self.sink.deliver(&self.rx_buf[..count]);
        } else if !status.is_ok() {
            debug!("cdc: receive failed: {:?}", status);
        }

        self.rx_state = RxState::Idle;
        if self.state == DeviceState::Configured {
            self.start_receive(stack);
        }
    }

    /// Starts sending `data` to the host and returns its length.
    ///
    /// Only one send may be in flight; while the previous one is still being transferred this
    /// returns `Err(WouldBlock)`. Bytes previously [`queue`](Self::queue)d go out first. Data that
    /// doesn't fit in the transmit store is refused as a whole with `Err(BufferOverflow)`.
    pub fn send(&mut self, stack: &mut impl UsbStack, data: &[u8]) -> Result<usize> {
        if self.state != DeviceState::Configured {
            return Err(UsbError::InvalidState);
        }

        if self.is_sending() {
            return Err(UsbError::WouldBlock);
        }

        if data.is_empty() {
            return Ok(0);
        }

        if data.len() > self.tx_buf.available_write() {
            return Err(UsbError::BufferOverflow);
        }

        self.tx_buf.write(data);
        self.start_transmit(stack)?;

        Ok(data.len())
    }

    /// Appends as much of `data` as fits to the transmit store without starting a transfer and
    /// returns the number of bytes stored. Queued bytes go out on the next [`flush`](Self::flush)
    /// or ahead of the next [`send`](Self::send).
    pub fn queue(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != DeviceState::Configured {
            return Err(UsbError::InvalidState);
        }

        if self.is_sending() {
            return Err(UsbError::WouldBlock);
        }

        Ok(self.tx_buf.write(data))
    }

    /// Sends the queued bytes. Returns `Ok(())` once nothing is queued or in flight and
    /// `Err(WouldBlock)` until then.
    pub fn flush(&mut self, stack: &mut impl UsbStack) -> Result<()> {
        if self.state != DeviceState::Configured {
            return Err(UsbError::InvalidState);
        }

        if self.is_sending() {
            return Err(UsbError::WouldBlock);
        }

        if self.tx_buf.available_read() == 0 {
            return Ok(());
        }

        self.start_transmit(stack)?;
        Err(UsbError::WouldBlock)
    }

    fn start_transmit(&mut self, stack: &mut impl UsbStack) -> Result<()> {
        if let Err(err) = self.write_chunk(stack) {
            self.tx_buf.clear();
            self.tx_state = TxState::Idle;
            return Err(err);
        }

        Ok(())
    }

    fn write_chunk(&mut self, stack: &mut impl UsbStack) -> Result<()> {
        let max_packet_size = self.max_packet_size();
        let token = self.token(TransferKind::Transmit);
        let ep = self.config.data_in;

        // the cursor only advances on completion
        let mut len = 0;
        self.tx_buf.read(max_packet_size, |data| {
            len = data.len();
            stack.write(ep, data, token).map(|_| 0)
        })?;

        self.tx_state = if len == max_packet_size {
            TxState::Full(token)
        } else {
            TxState::Short(token)
        };

        Ok(())
    }

    /// Completes a transmit transfer and arms the next chunk, if any.
    pub fn transmit_complete(
        &mut self,
        stack: &mut impl UsbStack,
        token: TransferToken,
        status: TransferStatus,
        count: usize,
    ) {
        let (armed, full) = match self.tx_state {
            TxState::Full(armed) => (armed, true),
            TxState::Short(armed) => (armed, false),
            TxState::Idle => {
                debug!("cdc: transmit completion while idle");
                return;
            }
        };

        if armed != token {
            debug!("cdc: stale transmit completion");
            return;
        }

        if !status.is_ok() {
            warn!(
                "cdc: transmit aborted ({:?}), dropping {} bytes",
                status,
                self.tx_buf.available_read()
            );
            self.tx_buf.clear();
            self.tx_state = TxState::Idle;
            return;
        }

        self.tx_buf.skip(count);

        if self.tx_buf.available_read() == 0 && !full {
            self.tx_buf.clear();
            self.tx_state = TxState::Idle;
            return;
        }

        // either more data follows, or a full packet ended the data and needs a zero length
        // packet after it
        if let Err(_err) = self.write_chunk(stack) {
            warn!("cdc: arming transmit failed: {:?}", _err);
            self.tx_buf.clear();
            self.tx_state = TxState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::control::tests::class_request;
    use crate::control::{REQ_GET_LINE_CODING, REQ_SET_CONTROL_LINE_STATE, REQ_SET_LINE_CODING};
    use crate::line_coding::{DataBits, LineCodingField, Parity, ParityType, StopBits};
    use std::vec::Vec;
    use usb_device::UsbDirection;

    #[derive(Default)]
    struct MockStack {
        reads: Vec<(EndpointAddress, usize, TransferToken)>,
        writes: Vec<(EndpointAddress, Vec<u8>, TransferToken)>,
        control_in: Vec<Vec<u8>>,
        control_reads: Vec<(usize, TransferToken)>,
        fail_writes: bool,
    }

    impl MockStack {
        fn last_read(&self) -> TransferToken {
            self.reads.last().unwrap().2
        }

        fn last_write(&self) -> (usize, TransferToken) {
            let (_, data, token) = self.writes.last().unwrap();
            (data.len(), *token)
        }
    }

    impl UsbStack for MockStack {
        fn read(
            &mut self,
            ep: EndpointAddress,
            max_len: usize,
            token: TransferToken,
        ) -> Result<()> {
            self.reads.push((ep, max_len, token));
            Ok(())
        }

        fn write(
            &mut self,
            ep: EndpointAddress,
            data: &[u8],
            token: TransferToken,
        ) -> Result<()> {
            if self.fail_writes {
                return Err(UsbError::InvalidEndpoint);
            }
            self.writes.push((ep, data.to_vec(), token));
            Ok(())
        }

        fn control_write(&mut self, data: &[u8]) -> Result<()> {
            self.control_in.push(data.to_vec());
            Ok(())
        }

        fn control_read(&mut self, len: usize, token: TransferToken) -> Result<()> {
            self.control_reads.push((len, token));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Collect(Vec<Vec<u8>>);

    impl ByteSink for Collect {
        fn deliver(&mut self, data: &[u8]) {
            self.0.push(data.to_vec());
        }
    }

    #[derive(Default)]
    struct RecordingUart {
        frames: Vec<(u32, FrameConfig)>,
        suspends: usize,
        resumes: usize,
    }

    impl UartActuator for RecordingUart {
        fn configure(&mut self, data_rate: u32, frame: FrameConfig) {
            self.frames.push((data_rate, frame));
        }

        fn suspend(&mut self) {
            self.suspends += 1;
        }

        fn resume(&mut self) {
            self.resumes += 1;
        }
    }

    type Function = CdcFunction<[u8; 512], Collect, RecordingUart>;

    fn function() -> Function {
        CdcFunction::new(
            CdcConfig::default(),
            [0; 512],
            Collect::default(),
            RecordingUart::default(),
        )
    }

    fn configured() -> (Function, MockStack) {
        let mut f = function();
        let mut stack = MockStack::default();
        f.device_state_changed(&mut stack, DeviceState::Unconfigured, DeviceState::Configured);
        (f, stack)
    }

    /// Lands `data` in the armed receive buffer and completes the transfer.
    fn receive(f: &mut Function, stack: &mut MockStack, data: &[u8]) {
        let token = stack.last_read();
        f.receive_buffer(token).unwrap()[..data.len()].copy_from_slice(data);
        f.receive_complete(stack, token, TransferStatus::Ok, data.len());
    }

    /// Sends the data stage of a SET_LINE_CODING request.
    fn set_line_coding(
        f: &mut Function,
        stack: &mut MockStack,
        record: &[u8],
    ) -> core::result::Result<FrameConfig, RequestError> {
        let req = class_request(UsbDirection::Out, REQ_SET_LINE_CODING, 0, 0, 7);
        assert_eq!(f.setup(stack, &req), SetupOutcome::Handled);

        let (len, token) = *stack.control_reads.last().unwrap();
        assert_eq!(len, 7);
        f.control_out_buffer(token).unwrap()[..record.len()].copy_from_slice(record);
        f.control_out_complete(token, TransferStatus::Ok, record.len())
    }

    #[test]
    fn configured_arms_receive() {
        let (f, stack) = configured();

        assert_eq!(f.state(), DeviceState::Configured);
        assert_eq!(stack.reads.len(), 1);
        assert_eq!(stack.reads[0].0, EndpointAddress::from(0x01));
        assert_eq!(stack.reads[0].1, 64);
    }

    #[test]
    fn receive_delivers_then_rearms_once() {
        let (mut f, mut stack) = configured();

        receive(&mut f, &mut stack, b"hello");

        assert_eq!(f.sink().0, [b"hello".to_vec()]);
        assert_eq!(stack.reads.len(), 2);
        assert_eq!(stack.reads[1].1, 64);
        assert_ne!(stack.reads[0].2, stack.reads[1].2);

        receive(&mut f, &mut stack, b"world");
        assert_eq!(f.sink().0, [b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(stack.reads.len(), 3);
    }

    #[test]
    fn empty_or_failed_receive_rearms_without_delivery() {
        let (mut f, mut stack) = configured();

        let token = stack.last_read();
        f.receive_complete(&mut stack, token, TransferStatus::Ok, 0);
        let token = stack.last_read();
        f.receive_complete(&mut stack, token, TransferStatus::Timeout, 12);

        assert!(f.sink().0.is_empty());
        assert_eq!(stack.reads.len(), 3);
    }

    #[test]
    fn stale_receive_completion_is_ignored() {
        let (mut f, mut stack) = configured();
        let first = stack.last_read();

        receive(&mut f, &mut stack, b"a");
        f.receive_complete(&mut stack, first, TransferStatus::Ok, 1);

        assert_eq!(f.sink().0.len(), 1);
        assert_eq!(stack.reads.len(), 2);
        assert!(f.receive_buffer(first).is_none());
    }

    #[test]
    fn deconfigure_stops_receive_chain() {
        let (mut f, mut stack) = configured();
        let token = stack.last_read();

        f.device_state_changed(&mut stack, DeviceState::Configured, DeviceState::Unconfigured);
        f.receive_complete(&mut stack, token, TransferStatus::Ok, 0);

        assert_eq!(stack.reads.len(), 1);
        assert!(f.receive_buffer(token).is_none());
    }

    #[test]
    fn suspend_and_resume() {
        let (mut f, mut stack) = configured();
        let token = stack.last_read();

        f.device_state_changed(&mut stack, DeviceState::Configured, DeviceState::Suspended);
        assert_eq!(f.uart().suspends, 1);
        f.receive_complete(&mut stack, token, TransferStatus::Ok, 0);
        assert_eq!(stack.reads.len(), 1);

        f.device_state_changed(&mut stack, DeviceState::Suspended, DeviceState::Configured);
        assert_eq!(f.uart().resumes, 1);
        assert_eq!(stack.reads.len(), 2);

        // the late completion from before the suspend must not disturb the new chain
        f.receive_complete(&mut stack, token, TransferStatus::Ok, 3);
        assert_eq!(stack.reads.len(), 2);
        assert!(f.sink().0.is_empty());
    }

    #[test]
    fn repeated_configured_does_not_double_arm() {
        let (mut f, mut stack) = configured();

        f.device_state_changed(&mut stack, DeviceState::Configured, DeviceState::Configured);

        assert_eq!(stack.reads.len(), 1);
    }

    #[test]
    fn other_transitions_are_noops() {
        let mut f = function();
        let mut stack = MockStack::default();

        f.device_state_changed(&mut stack, DeviceState::Unconfigured, DeviceState::Unconfigured);

        assert!(stack.reads.is_empty());
        assert_eq!(f.uart().suspends, 0);
    }

    #[test]
    fn send_chains_packets() {
        let (mut f, mut stack) = configured();
        let data: Vec<u8> = (0..300u16).map(|i| i as u8).collect();

        assert_eq!(f.send(&mut stack, &data), Ok(300));

        while f.is_sending() {
            let (len, token) = stack.last_write();
            f.transmit_complete(&mut stack, token, TransferStatus::Ok, len);
        }

        let sizes: Vec<usize> = stack.writes.iter().map(|(_, d, _)| d.len()).collect();
        assert_eq!(sizes, [64, 64, 64, 64, 44]);
        assert!(stack.writes.iter().all(|(ep, _, _)| *ep == EndpointAddress::from(0x81)));

        let sent: Vec<u8> = stack.writes.iter().flat_map(|(_, d, _)| d.clone()).collect();
        assert_eq!(sent, data);
    }

    #[test]
    fn send_on_packet_boundary_ends_with_zlp() {
        let (mut f, mut stack) = configured();

        assert_eq!(f.send(&mut stack, &[0x55; 128]), Ok(128));
        while f.is_sending() {
            let (len, token) = stack.last_write();
            f.transmit_complete(&mut stack, token, TransferStatus::Ok, len);
        }

        let sizes: Vec<usize> = stack.writes.iter().map(|(_, d, _)| d.len()).collect();
        assert_eq!(sizes, [64, 64, 0]);
    }

    #[test]
    fn partial_completion_resends_remainder() {
        let (mut f, mut stack) = configured();

        f.send(&mut stack, b"0123456789").unwrap();
        let (_, token) = stack.last_write();
        f.transmit_complete(&mut stack, token, TransferStatus::Ok, 4);

        assert_eq!(stack.writes[1].1, b"456789");
    }

    #[test]
    fn failed_transmit_halts_chain() {
        let (mut f, mut stack) = configured();

        f.send(&mut stack, &[1; 300]).unwrap();
        let (len, token) = stack.last_write();
        f.transmit_complete(&mut stack, token, TransferStatus::Ok, len);
        let (_, token) = stack.last_write();
        f.transmit_complete(&mut stack, token, TransferStatus::Aborted, 0);

        assert!(!f.is_sending());
        assert_eq!(stack.writes.len(), 2);

        // a completion for the aborted chain arriving again changes nothing
        f.transmit_complete(&mut stack, token, TransferStatus::Ok, 64);
        assert_eq!(stack.writes.len(), 2);
    }

    #[test]
    fn send_while_in_flight_would_block() {
        let (mut f, mut stack) = configured();

        f.send(&mut stack, b"first").unwrap();

        assert_eq!(f.send(&mut stack, b"second"), Err(UsbError::WouldBlock));
        assert_eq!(stack.writes.len(), 1);
    }

    #[test]
    fn send_requires_configuration() {
        let mut f = function();
        let mut stack = MockStack::default();

        assert_eq!(f.send(&mut stack, b"x"), Err(UsbError::InvalidState));
        assert!(stack.writes.is_empty());
    }

    #[test]
    fn send_larger_than_store_is_refused() {
        let (mut f, mut stack) = configured();

        assert_eq!(f.send(&mut stack, &[7; 513]), Err(UsbError::BufferOverflow));
        assert!(stack.writes.is_empty());
        assert!(!f.is_sending());

        assert_eq!(f.send(&mut stack, &[7; 512]), Ok(512));
        assert_eq!(f.send(&mut stack, &[]), Err(UsbError::WouldBlock));
    }

    #[test]
    fn queued_bytes_go_out_on_flush() {
        let (mut f, mut stack) = configured();

        assert_eq!(f.queue(b"ab"), Ok(2));
        assert_eq!(f.queue(b"c"), Ok(1));
        assert!(stack.writes.is_empty());

        assert_eq!(f.flush(&mut stack), Err(UsbError::WouldBlock));
        assert_eq!(stack.writes.len(), 1);
        assert_eq!(stack.writes[0].1, b"abc");
        assert_eq!(f.queue(b"d"), Err(UsbError::WouldBlock));
        assert_eq!(f.flush(&mut stack), Err(UsbError::WouldBlock));

        let (len, token) = stack.last_write();
        f.transmit_complete(&mut stack, token, TransferStatus::Ok, len);

        assert_eq!(f.flush(&mut stack), Ok(()));
        assert_eq!(stack.writes.len(), 1);
    }

    #[test]
    fn queue_stops_at_store_capacity() {
        let (mut f, mut stack) = configured();

        assert_eq!(f.queue(&[1; 500]), Ok(500));
        assert_eq!(f.queue(&[2; 20]), Ok(12));
        assert_eq!(f.queue(&[3]), Ok(0));
        assert_eq!(f.send(&mut stack, b"x"), Err(UsbError::BufferOverflow));
    }

    #[test]
    fn send_follows_queued_bytes() {
        let (mut f, mut stack) = configured();

        f.queue(b"ab").unwrap();

        assert_eq!(f.send(&mut stack, b"cd"), Ok(2));
        assert_eq!(stack.writes[0].1, b"abcd");
    }

    #[test]
    fn queue_and_flush_require_configuration() {
        let mut f = function();
        let mut stack = MockStack::default();

        assert_eq!(f.queue(b"x"), Err(UsbError::InvalidState));
        assert_eq!(f.flush(&mut stack), Err(UsbError::InvalidState));
    }

    #[test]
    fn deconfigure_drops_queued_bytes() {
        let (mut f, mut stack) = configured();

        f.queue(b"abc").unwrap();
        f.device_state_changed(&mut stack, DeviceState::Configured, DeviceState::Unconfigured);
        f.device_state_changed(&mut stack, DeviceState::Unconfigured, DeviceState::Configured);

        assert_eq!(f.flush(&mut stack), Ok(()));
        assert!(stack.writes.is_empty());
    }

    #[test]
    fn send_reports_arming_failure() {
        let (mut f, mut stack) = configured();
        stack.fail_writes = true;

        assert_eq!(f.send(&mut stack, b"x"), Err(UsbError::InvalidEndpoint));
        assert!(!f.is_sending());
    }

    #[test]
    fn deconfigure_drops_pending_send() {
        let (mut f, mut stack) = configured();

        f.send(&mut stack, &[1; 200]).unwrap();
        let (len, token) = stack.last_write();
        f.device_state_changed(&mut stack, DeviceState::Configured, DeviceState::Unconfigured);
        f.transmit_complete(&mut stack, token, TransferStatus::Ok, len);

        assert!(!f.is_sending());
        assert_eq!(stack.writes.len(), 1);
    }

    #[test]
    fn get_line_coding_returns_record() {
        let mut f = function();
        let mut stack = MockStack::default();
        let req = class_request(UsbDirection::In, REQ_GET_LINE_CODING, 0, 0, 7);

        assert_eq!(f.setup(&mut stack, &req), SetupOutcome::Handled);
        assert_eq!(stack.control_in, [[0x00u8, 0xc2, 0x01, 0x00, 0, 0, 8].to_vec()]);
    }

    #[test]
    fn get_line_coding_mismatch_is_not_mine() {
        let mut f = function();
        let mut stack = MockStack::default();

        for req in [
            class_request(UsbDirection::In, REQ_GET_LINE_CODING, 0, 0, 64),
            class_request(UsbDirection::In, REQ_GET_LINE_CODING, 0, 1, 7),
            class_request(UsbDirection::Out, REQ_GET_LINE_CODING, 0, 0, 7),
        ] {
            assert_eq!(f.setup(&mut stack, &req), SetupOutcome::NotMine);
        }
        assert!(stack.control_in.is_empty());
    }

    #[test]
    fn set_control_line_state_is_accepted() {
        let mut f = function();
        let mut stack = MockStack::default();
        let req = class_request(UsbDirection::Out, REQ_SET_CONTROL_LINE_STATE, 0x0003, 0, 0);

        assert_eq!(f.setup(&mut stack, &req), SetupOutcome::Handled);
        assert!(stack.control_in.is_empty());
        assert!(stack.control_reads.is_empty());
    }

    #[test]
    fn set_then_get_line_coding() {
        let mut f = function();
        let mut stack = MockStack::default();
        let record = [0x80u8, 0x25, 0x00, 0x00, 0, 0, 8];

        let frame = set_line_coding(&mut f, &mut stack, &record).unwrap();

        assert_eq!(frame.data_bits, DataBits::Eight);
        assert_eq!(frame.parity, Parity::None);
        assert_eq!(frame.stop_bits, StopBits::One);
        assert_eq!(f.line_coding().data_rate(), 9600);
        assert_eq!(f.line_coding().parity_type(), ParityType::None);
        assert_eq!(f.uart().frames, [(9600, frame)]);

        let req = class_request(UsbDirection::In, REQ_GET_LINE_CODING, 0, 0, 7);
        assert_eq!(f.setup(&mut stack, &req), SetupOutcome::Handled);
        assert_eq!(stack.control_in, [record.to_vec()]);
    }

    #[test]
    fn rejected_line_coding_keeps_previous() {
        let mut f = function();
        let mut stack = MockStack::default();

        let result = set_line_coding(&mut f, &mut stack, &[0x80, 0x25, 0, 0, 0, 3, 8]);

        assert_eq!(result, Err(RequestError::Unsupported(LineCodingField::Parity)));
        assert_eq!(f.line_coding_record(), [0x00, 0xc2, 0x01, 0x00, 0, 0, 8]);
        assert!(f.uart().frames.is_empty());
    }

    #[test]
    fn short_or_failed_data_stage_is_error() {
        let mut f = function();
        let mut stack = MockStack::default();

        assert_eq!(
            set_line_coding(&mut f, &mut stack, &[0x80, 0x25, 0, 0, 0, 0]),
            Err(RequestError::ShortRecord)
        );

        let req = class_request(UsbDirection::Out, REQ_SET_LINE_CODING, 0, 0, 7);
        f.setup(&mut stack, &req);
        let (_, token) = *stack.control_reads.last().unwrap();
        assert_eq!(
            f.control_out_complete(token, TransferStatus::Stalled, 7),
            Err(RequestError::TransferFailed)
        );
        assert_eq!(
            f.control_out_complete(token, TransferStatus::Ok, 7),
            Err(RequestError::NoPendingRequest)
        );
        assert_eq!(f.line_coding_record(), [0x00, 0xc2, 0x01, 0x00, 0, 0, 8]);
    }

    #[test]
    fn reset_clears_everything() {
        let (mut f, mut stack) = configured();
        let token = stack.last_read();
        f.send(&mut stack, b"abc").unwrap();

        f.reset();

        assert_eq!(f.state(), DeviceState::Unconfigured);
        assert!(!f.is_sending());
        assert!(f.receive_buffer(token).is_none());
    }

    #[test]
    fn state_from_usb_device() {
        assert_eq!(DeviceState::from(UsbDeviceState::Configured), DeviceState::Configured);
        assert_eq!(DeviceState::from(UsbDeviceState::Suspend), DeviceState::Suspended);
        assert_eq!(DeviceState::from(UsbDeviceState::Addressed), DeviceState::Unconfigured);
        assert_eq!(DeviceState::from(UsbDeviceState::Default), DeviceState::Unconfigured);
    }
}
