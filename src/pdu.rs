//! Wire format for DUFTP protocol data units.
//!
//! Every PDU occupies exactly [`PDU_LEN`] bytes on the wire no matter what it
//! carries; unused fields are zero. All integers are big-endian.
//!
//! ```text
//!  off  width  field
//!    0      1  msg_type
//!    1      1  protocol_version
//!    2      1  error_code
//!    3      1  reserved (zero)
//!    4      4  seq_num
//!    8      4  data_size
//!   12      8  total_size
//!   20    150  filename (NUL padded)
//!  170   3926  data
//! ```
//!
//! [`Pdu`] is the in-memory value; [`Pdu::encode`] and [`Pdu::decode`] are the
//! only conversions between it and bytes. Decoding never trusts `data_size`
//! beyond [`MAX_DATA_SIZE`].

use thiserror::Error;

pub const PROTOCOL_VERSION: u8 = 1;
pub const PDU_LEN: usize = 4096;
pub const FILENAME_FIELD_LEN: usize = 150;
/// Longest filename that still leaves room for the terminating NUL.
pub const MAX_FILENAME_LEN: usize = FILENAME_FIELD_LEN - 1;
pub const HEADER_LEN: usize = OFF_FILENAME + FILENAME_FIELD_LEN;
pub const MAX_DATA_SIZE: usize = PDU_LEN - HEADER_LEN;

const OFF_MSG_TYPE: usize = 0;
const OFF_VERSION: usize = 1;
const OFF_ERROR_CODE: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_DATA_SIZE: usize = 8;
const OFF_TOTAL_SIZE: usize = 12;
const OFF_FILENAME: usize = 20;
const OFF_DATA: usize = HEADER_LEN;

/// Message type tag as carried in the first byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Filename = 1,
    Data = 2,
    Error = 3,
    Complete = 4,
    Ack = 5,
}

/// Tag reserved for a download request; never produced by this crate.
pub const MSG_REQUEST_RESERVED: u8 = 6;

impl TryFrom<u8> for MsgType {
    /// The unrecognized tag.
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(MsgType::Filename),
            2 => Ok(MsgType::Data),
            3 => Ok(MsgType::Error),
            4 => Ok(MsgType::Complete),
            5 => Ok(MsgType::Ack),
            other => Err(other),
        }
    }
}

/// Error codes reported to the peer in an ERROR PDU.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None = 0,
    FileNotFound = 1,
    Unknown = 2,
    Permission = 3,
    DiskFull = 4,
}

impl ErrorCode {
    /// Unrecognized codes from the wire collapse to `Unknown`.
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => ErrorCode::None,
            1 => ErrorCode::FileNotFound,
            3 => ErrorCode::Permission,
            4 => ErrorCode::DiskFull,
            _ => ErrorCode::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::None => "none",
            ErrorCode::FileNotFound => "file not found",
            ErrorCode::Unknown => "unknown error",
            ErrorCode::Permission => "permission denied",
            ErrorCode::DiskFull => "disk full",
        };
        f.write_str(s)
    }
}

/// Message body; the variant decides which wire fields are meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Filename { name: String, total_size: u64 },
    Data(Vec<u8>),
    Complete,
    Ack,
    Error(ErrorCode),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Filename { .. } => MsgType::Filename,
            Message::Data(_) => MsgType::Data,
            Message::Complete => MsgType::Complete,
            Message::Ack => MsgType::Ack,
            Message::Error(_) => MsgType::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub seq: u32,
    pub message: Message,
}

/// Reasons a PDU cannot be encoded or decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("malformed pdu: wrong length {0}")]
    WrongLength(usize),
    #[error("malformed pdu: unrecognized message type {tag} (seq {seq})")]
    UnknownMsgType { tag: u8, seq: u32 },
    #[error("protocol version mismatch: peer speaks version {0}")]
    VersionMismatch(u8),
    #[error("malformed pdu: data_size {0} exceeds payload capacity")]
    DataSizeOverflow(u32),
    #[error("malformed pdu: DATA with empty payload")]
    EmptyData,
    #[error("malformed pdu: filename is not valid UTF-8")]
    FilenameEncoding,
    #[error("filename of {0} bytes does not fit the filename field")]
    FilenameTooLong(usize),
}

impl Pdu {
    pub fn new(seq: u32, message: Message) -> Self {
        Self { seq, message }
    }

    pub fn msg_type(&self) -> MsgType {
        self.message.msg_type()
    }

    /// Serialize into exactly [`PDU_LEN`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>, PduError> {
        let mut buf = vec![0u8; PDU_LEN];
        buf[OFF_MSG_TYPE] = self.msg_type() as u8;
        buf[OFF_VERSION] = PROTOCOL_VERSION;
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());

        match &self.message {
            Message::Filename { name, total_size } => {
                let bytes = name.as_bytes();
                if bytes.len() > MAX_FILENAME_LEN {
                    return Err(PduError::FilenameTooLong(bytes.len()));
                }
                buf[OFF_TOTAL_SIZE..OFF_TOTAL_SIZE + 8].copy_from_slice(&total_size.to_be_bytes());
                buf[OFF_FILENAME..OFF_FILENAME + bytes.len()].copy_from_slice(bytes);
            }
            Message::Data(payload) => {
                if payload.is_empty() {
                    return Err(PduError::EmptyData);
                }
                if payload.len() > MAX_DATA_SIZE {
                    return Err(PduError::DataSizeOverflow(payload.len() as u32));
                }
                buf[OFF_DATA_SIZE..OFF_DATA_SIZE + 4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
                buf[OFF_DATA..OFF_DATA + payload.len()].copy_from_slice(payload);
            }
            Message::Error(code) => buf[OFF_ERROR_CODE] = *code as u8,
            Message::Complete | Message::Ack => {}
        }
        Ok(buf)
    }

    /// Parse one PDU, validating every remote-controlled field before use.
    pub fn decode(buf: &[u8]) -> Result<Self, PduError> {
        if buf.len() != PDU_LEN {
            return Err(PduError::WrongLength(buf.len()));
        }
        let version = buf[OFF_VERSION];
        if version != PROTOCOL_VERSION {
            return Err(PduError::VersionMismatch(version));
        }
        let seq = read_u32(buf, OFF_SEQ);
        let msg_type = MsgType::try_from(buf[OFF_MSG_TYPE]).map_err(|tag| PduError::UnknownMsgType { tag, seq })?;
        let data_size = read_u32(buf, OFF_DATA_SIZE);
        if data_size as usize > MAX_DATA_SIZE {
            return Err(PduError::DataSizeOverflow(data_size));
        }

        let message = match msg_type {
            MsgType::Filename => {
                let field = &buf[OFF_FILENAME..OFF_FILENAME + FILENAME_FIELD_LEN];
                let end = field.iter().position(|&b| b == 0).unwrap_or(FILENAME_FIELD_LEN);
                let name = std::str::from_utf8(&field[..end]).map_err(|_| PduError::FilenameEncoding)?;
                let total_size = read_u64(buf, OFF_TOTAL_SIZE);
                Message::Filename { name: name.to_string(), total_size }
            }
            MsgType::Data => {
                if data_size == 0 {
                    return Err(PduError::EmptyData);
                }
                Message::Data(buf[OFF_DATA..OFF_DATA + data_size as usize].to_vec())
            }
            MsgType::Error => Message::Error(ErrorCode::from_wire(buf[OFF_ERROR_CODE])),
            MsgType::Complete => Message::Complete,
            MsgType::Ack => Message::Ack,
        };
        Ok(Pdu { seq, message })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_be_bytes(b)
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(HEADER_LEN, 170);
        assert_eq!(MAX_DATA_SIZE, 3926);
        assert_eq!(HEADER_LEN + MAX_DATA_SIZE, PDU_LEN);
    }

    #[test]
    fn every_pdu_encodes_to_fixed_size() {
        let pdus = [
            Pdu::new(0, Message::Filename { name: "a.txt".into(), total_size: 10 }),
            Pdu::new(1, Message::Data(vec![7; 3])),
            Pdu::new(2, Message::Data(vec![7; MAX_DATA_SIZE])),
            Pdu::new(3, Message::Complete),
            Pdu::new(4, Message::Ack),
            Pdu::new(5, Message::Error(ErrorCode::DiskFull)),
        ];
        for pdu in pdus {
            let bytes = pdu.encode().unwrap();
            assert_eq!(bytes.len(), PDU_LEN);
            assert_eq!(Pdu::decode(&bytes).unwrap(), pdu);
        }
    }

    #[test]
    fn filename_fields_land_at_fixed_offsets() {
        let bytes = Pdu::new(0x0102_0304, Message::Filename { name: "x".into(), total_size: 258 }).encode().unwrap();
        assert_eq!(bytes[OFF_MSG_TYPE], 1);
        assert_eq!(bytes[OFF_VERSION], PROTOCOL_VERSION);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[OFF_TOTAL_SIZE + 6..OFF_TOTAL_SIZE + 8], &[1, 2]);
        assert_eq!(bytes[OFF_FILENAME], b'x');
        assert_eq!(bytes[OFF_FILENAME + 1], 0);
        assert!(bytes[OFF_DATA..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_data_size_is_rejected_not_copied() {
        let mut bytes = Pdu::new(1, Message::Data(vec![1; 16])).encode().unwrap();
        bytes[OFF_DATA_SIZE..OFF_DATA_SIZE + 4].copy_from_slice(&(MAX_DATA_SIZE as u32 + 1).to_be_bytes());
        assert_eq!(Pdu::decode(&bytes), Err(PduError::DataSizeOverflow(MAX_DATA_SIZE as u32 + 1)));

        bytes[OFF_DATA_SIZE..OFF_DATA_SIZE + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(Pdu::decode(&bytes), Err(PduError::DataSizeOverflow(u32::MAX)));
    }

    #[test]
    fn data_size_bounds_on_encode() {
        assert_eq!(Pdu::new(0, Message::Data(vec![])).encode(), Err(PduError::EmptyData));
        assert_eq!(
            Pdu::new(0, Message::Data(vec![0; MAX_DATA_SIZE + 1])).encode(),
            Err(PduError::DataSizeOverflow(MAX_DATA_SIZE as u32 + 1))
        );
    }

    #[test]
    fn empty_data_pdu_is_malformed() {
        let mut bytes = Pdu::new(1, Message::Data(vec![1])).encode().unwrap();
        bytes[OFF_DATA_SIZE..OFF_DATA_SIZE + 4].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(Pdu::decode(&bytes), Err(PduError::EmptyData));
    }

    #[test]
    fn unknown_type_and_version_are_rejected() {
        let mut bytes = Pdu::new(9, Message::Ack).encode().unwrap();
        bytes[OFF_MSG_TYPE] = MSG_REQUEST_RESERVED;
        let err = Pdu::decode(&bytes).unwrap_err();
        assert_eq!(err, PduError::UnknownMsgType { tag: MSG_REQUEST_RESERVED, seq: 9 });

        let mut bytes = Pdu::new(0, Message::Ack).encode().unwrap();
        bytes[OFF_VERSION] = PROTOCOL_VERSION + 1;
        let err = Pdu::decode(&bytes).unwrap_err();
        assert_eq!(err, PduError::VersionMismatch(PROTOCOL_VERSION + 1));
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        assert_eq!(Pdu::decode(&[]), Err(PduError::WrongLength(0)));
        assert_eq!(Pdu::decode(&[0u8; PDU_LEN + 1]), Err(PduError::WrongLength(PDU_LEN + 1)));
    }

    #[test]
    fn filename_limits() {
        let max = "f".repeat(MAX_FILENAME_LEN);
        let bytes = Pdu::new(0, Message::Filename { name: max.clone(), total_size: 0 }).encode().unwrap();
        match Pdu::decode(&bytes).unwrap().message {
            Message::Filename { name, .. } => assert_eq!(name, max),
            other => panic!("unexpected {other:?}"),
        }
        let long = "f".repeat(FILENAME_FIELD_LEN);
        assert_eq!(
            Pdu::new(0, Message::Filename { name: long, total_size: 0 }).encode(),
            Err(PduError::FilenameTooLong(FILENAME_FIELD_LEN))
        );
    }

    #[test]
    fn unterminated_filename_field_stays_in_bounds() {
        let mut bytes = Pdu::new(0, Message::Filename { name: "a".into(), total_size: 0 }).encode().unwrap();
        bytes[OFF_FILENAME..OFF_FILENAME + FILENAME_FIELD_LEN].fill(b'z');
        match Pdu::decode(&bytes).unwrap().message {
            Message::Filename { name, .. } => assert_eq!(name.len(), FILENAME_FIELD_LEN),
            other => panic!("unexpected {other:?}"),
        }
        bytes[OFF_FILENAME] = 0xff;
        assert_eq!(Pdu::decode(&bytes), Err(PduError::FilenameEncoding));
    }

    #[test]
    fn unrecognized_error_code_reads_as_unknown() {
        let mut bytes = Pdu::new(0, Message::Error(ErrorCode::None)).encode().unwrap();
        bytes[OFF_ERROR_CODE] = 200;
        assert_eq!(Pdu::decode(&bytes).unwrap().message, Message::Error(ErrorCode::Unknown));
    }
}
