use core::fmt;

/// Length of the line coding record exchanged in `GET_LINE_CODING` and `SET_LINE_CODING`.
pub const LINE_CODING_LEN: usize = 7;

/// Number of stop bits for LineCoding
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopBits {
    /// 1 stop bit
    One = 0,

    /// 1.5 stop bits
    OnePointFive = 1,

    /// 2 stop bits
    Two = 2,
}

impl StopBits {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StopBits::One),
            1 => Some(StopBits::OnePointFive),
            2 => Some(StopBits::Two),
            _ => None,
        }
    }
}

/// Parity for LineCoding
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParityType {
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

impl ParityType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ParityType::None),
            1 => Some(ParityType::Odd),
            2 => Some(ParityType::Even),
            3 => Some(ParityType::Mark),
            4 => Some(ParityType::Space),
            _ => None,
        }
    }
}

/// Data bits of a UART frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
    Sixteen,
}

impl DataBits {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            16 => Some(DataBits::Sixteen),
            _ => None,
        }
    }

    /// Number of data bits in a frame.
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
            DataBits::Sixteen => 16,
        }
    }
}

/// Parity settings a UART can actually be programmed with. Mark and space parity are valid
/// line coding values but have no counterpart here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for ParityType {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => ParityType::None,
            Parity::Odd => ParityType::Odd,
            Parity::Even => ParityType::Even,
        }
    }
}

/// Frame configuration forwarded to the UART actuator after a line coding was accepted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameConfig {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

/// Line coding field that failed validation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineCodingField {
    DataBits,
    Parity,
    StopBits,
}

/// Error returned for a class request (or its data stage) the device refuses. The USB stack
/// stalls the control transfer in response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestError {
    /// The record holds a value this device does not support. Only the first failing field, in
    /// the order data bits, parity, stop bits, is reported.
    Unsupported(LineCodingField),

    /// The data stage transferred fewer or more bytes than a full record.
    ShortRecord,

    /// The data stage completed with a non-OK status.
    TransferFailed,

    /// A data stage completed that no accepted request is waiting for.
    NoPendingRequest,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Unsupported(LineCodingField::DataBits) => {
                f.write_str("unsupported number of data bits")
            }
            RequestError::Unsupported(LineCodingField::Parity) => {
                f.write_str("unsupported parity type")
            }
            RequestError::Unsupported(LineCodingField::StopBits) => {
                f.write_str("unsupported number of stop bits")
            }
            RequestError::ShortRecord => f.write_str("line coding record has the wrong length"),
            RequestError::TransferFailed => f.write_str("data stage failed"),
            RequestError::NoPendingRequest => f.write_str("no request awaits a data stage"),
        }
    }
}

/// Line coding parameters
///
/// This structure is fixed to 115200 8N1 by default and only changes when the host sends a
/// record that passes [`validate_and_translate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineCoding {
    stop_bits: StopBits,
    data_bits: u8,
    parity_type: ParityType,
    data_rate: u32,
}

impl LineCoding {
    /// Gets the number of stop bits for UART communication.
    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    /// Gets the number of data bits for UART communication.
    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    /// Gets the parity type for UART communication.
    pub fn parity_type(&self) -> ParityType {
        self.parity_type
    }

    /// Gets the data rate in bits per second for UART communication.
    pub fn data_rate(&self) -> u32 {
        self.data_rate
    }

    /// Wire representation, as sent in the data stage of `GET_LINE_CODING`.
    pub fn to_bytes(&self) -> [u8; LINE_CODING_LEN] {
        let rate = self.data_rate.to_le_bytes();
        [
            rate[0],
            rate[1],
            rate[2],
            rate[3],
            self.stop_bits as u8,
            self.parity_type as u8,
            self.data_bits,
        ]
    }

    fn from_frame(data_rate: u32, frame: &FrameConfig) -> Self {
        LineCoding {
            stop_bits: frame.stop_bits,
            data_bits: frame.data_bits.bits(),
            parity_type: frame.parity.into(),
            data_rate,
        }
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            stop_bits: StopBits::One,
            data_bits: 8,
            parity_type: ParityType::None,
            data_rate: 115_200,
        }
    }
}

/// Checks a raw line coding record and translates it into a UART frame configuration.
///
/// The checks run in a fixed order (data bits, parity, stop bits) and stop at the first failure.
pub fn validate_and_translate(
    record: &[u8; LINE_CODING_LEN],
) -> Result<FrameConfig, RequestError> {
    let data_bits = DataBits::from_u8(record[6])
        .ok_or(RequestError::Unsupported(LineCodingField::DataBits))?;

    let parity = match ParityType::from_u8(record[5]) {
        Some(ParityType::None) => Parity::None,
        Some(ParityType::Odd) => Parity::Odd,
        Some(ParityType::Even) => Parity::Even,
        Some(ParityType::Mark) | Some(ParityType::Space) | None => {
            return Err(RequestError::Unsupported(LineCodingField::Parity));
        }
    };

    let stop_bits = StopBits::from_u8(record[4])
        .ok_or(RequestError::Unsupported(LineCodingField::StopBits))?;

    Ok(FrameConfig {
        data_bits,
        parity,
        stop_bits,
    })
}

fn data_rate(record: &[u8; LINE_CODING_LEN]) -> u32 {
    u32::from_le_bytes([record[0], record[1], record[2], record[3]])
}

/// Landing area for the `SET_LINE_CODING` data stage. Seven significant bytes in an aligned
/// eight byte cell, since stacks may DMA straight into it.
#[repr(C, align(4))]
struct RecordCell([u8; 8]);

/// Holds the current line coding and the staging cell the host writes new records into.
pub struct LineCodingStore {
    current: LineCoding,
    staging: RecordCell,
}

impl LineCodingStore {
    /// Creates a store holding the default 115200 8N1 record.
    pub fn new() -> Self {
        LineCodingStore {
            current: LineCoding::default(),
            staging: RecordCell([0; 8]),
        }
    }

    /// Returns the current record in wire format.
    pub fn get(&self) -> [u8; LINE_CODING_LEN] {
        self.current.to_bytes()
    }

    /// Gets the current line coding.
    pub fn line_coding(&self) -> &LineCoding {
        &self.current
    }

    /// Validates `record` and makes it current. A rejected record leaves the store unchanged.
    pub fn set(&mut self, record: &[u8; LINE_CODING_LEN]) -> Result<FrameConfig, RequestError> {
        let frame = validate_and_translate(record)?;
        self.current = LineCoding::from_frame(data_rate(record), &frame);
        Ok(frame)
    }

    pub(crate) fn staging_mut(&mut self) -> &mut [u8] {
        &mut self.staging.0[..LINE_CODING_LEN]
    }

    /// Commits whatever the data stage left in the staging cell.
    pub(crate) fn commit_staged(&mut self) -> Result<FrameConfig, RequestError> {
        let mut record = [0u8; LINE_CODING_LEN];
        record.copy_from_slice(&self.staging.0[..LINE_CODING_LEN]);
        self.set(&record)
    }
}

impl Default for LineCodingStore {
    fn default() -> Self {
        Self::new()
    }
}
