//! The fixed 24-byte memcached binary protocol header.
//!
//! Header decoding performs no semantic validation: any magic or opcode byte
//! is accepted and stored, with symbolic names resolved best-effort. The
//! rendering falls back to the raw numeric value for bytes the protocol
//! tables do not know about.

use std::fmt;

use crate::protocol::bytes::{DecodeError, decode_i32, decode_u16, decode_u64};

/// Length of the fixed protocol header, in bytes.
pub const HEADER_LEN: usize = 24;

/// Direction of an operation: request to a server or response to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Requested,
    Received,
    Other(u8),
}

impl Magic {
    pub const REQUESTED: u8 = 0x80;
    pub const RECEIVED: u8 = 0x81;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::REQUESTED => Magic::Requested,
            Self::RECEIVED => Magic::Received,
            other => Magic::Other(other),
        }
    }

    /// Whether a byte is one of the two defined magic values. The
    /// demultiplexer uses this to decide if a candidate offset starts an
    /// operation at all.
    pub fn is_valid(byte: u8) -> bool {
        byte == Self::REQUESTED || byte == Self::RECEIVED
    }

    pub fn is_received(self) -> bool {
        matches!(self, Magic::Received)
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Magic::Requested => write!(f, "Requested"),
            Magic::Received => write!(f, "Received"),
            Magic::Other(byte) => write!(f, "{byte}"),
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $value:literal),+ $(,)?) => {
        /// Command code of an operation. Unknown bytes stay representable via
        /// `Other`, which keeps the raw value for rendering.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Opcode {
            $($name,)+
            Other(u8),
        }

        impl Opcode {
            pub fn from_byte(byte: u8) -> Self {
                match byte {
                    $($value => Opcode::$name,)+
                    other => Opcode::Other(other),
                }
            }

            pub fn as_byte(self) -> u8 {
                match self {
                    $(Opcode::$name => $value,)+
                    Opcode::Other(byte) => byte,
                }
            }

            /// Best-effort symbolic name; `None` for unrecognized bytes.
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(Opcode::$name => Some(stringify!($name)),)+
                    Opcode::Other(_) => None,
                }
            }
        }
    };
}

opcodes! {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    NoOp = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKq = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    DeleteQ = 0x14,
    IncrementQ = 0x15,
    DecrementQ = 0x16,
    QuitQ = 0x17,
    FlushQ = 0x18,
    AppendQ = 0x19,
    PrependQ = 0x1a,
    Verbosity = 0x1b,
    Touch = 0x1c,
    Gat = 0x1d,
    Gatq = 0x1e,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
    RGet = 0x30,
    RSet = 0x31,
    RSetQ = 0x32,
    RAppend = 0x33,
    RAppendQ = 0x34,
    RPrepend = 0x35,
    RPrependQ = 0x36,
    RDelete = 0x37,
    RDeleteQ = 0x38,
    RIncr = 0x39,
    RIncrQ = 0x3a,
    RDecr = 0x3b,
    RDecrQ = 0x3c,
    SetVBucket = 0x3d,
    GetVBucket = 0x3e,
    DelVBucket = 0x3f,
    TapConnect = 0x40,
    TapMutation = 0x41,
    TapDelete = 0x42,
    TapFlush = 0x43,
    TapOpaque = 0x44,
    TapVBucketSet = 0x45,
    TapCheckpointStart = 0x46,
    TapCheckpointEnd = 0x47,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.as_byte()),
        }
    }
}

/// Server result code carried in the status/vbucket field of response
/// headers. Unknown codes render as the raw number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseStatus(pub u16);

impl ResponseStatus {
    pub fn name(self) -> Option<&'static str> {
        match self.0 {
            0x0000 => Some("NoError"),
            0x0001 => Some("KeyNotFound"),
            0x0002 => Some("KeyExists"),
            0x0003 => Some("ValueTooLarge"),
            0x0004 => Some("InvalidArguments"),
            0x0005 => Some("ItemNotStored"),
            0x0006 => Some("IncrDecrOnNonNumericValue"),
            0x0007 => Some("VbucketBelongsToAnotherServer"),
            0x0008 => Some("AuthenticationError"),
            0x0009 => Some("AuthenticationContinue"),
            0x0081 => Some("UnknownCommand"),
            0x0082 => Some("OutOfMemory"),
            0x0083 => Some("NotSupported"),
            0x0084 => Some("InternalError"),
            0x0085 => Some("Busy"),
            0x0086 => Some("TemporaryFailure"),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}

/// The decoded fixed header. Immutable once parsed.
///
/// `status_or_vbucket` is a status for responses and a virtual bucket id for
/// requests; `total_body_length` counts extras + key + value bytes (the value
/// is never decoded, only skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: Magic,
    pub opcode: Opcode,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub status_or_vbucket: u16,
    pub total_body_length: i32,
    pub opaque: i32,
    pub cas: u64,
}

impl Header {
    /// Decodes the 24-byte header starting at `offset`. Field reads happen in
    /// wire order; bounds violations surface as `DecodeError` for the caller
    /// to fold into its partial-result handling.
    pub fn decode(buffer: &[u8], offset: usize) -> Result<Self, DecodeError> {
        let byte_at = |at: usize| -> Result<u8, DecodeError> {
            buffer.get(at).copied().ok_or(DecodeError::OutOfRange {
                offset: at,
                width: 1,
                len: buffer.len(),
            })
        };

        Ok(Header {
            magic: Magic::from_byte(byte_at(offset)?),
            opcode: Opcode::from_byte(byte_at(offset + 1)?),
            key_length: decode_u16(buffer, offset + 2)?,
            extras_length: byte_at(offset + 4)?,
            data_type: byte_at(offset + 5)?,
            status_or_vbucket: decode_u16(buffer, offset + 6)?,
            total_body_length: decode_i32(buffer, offset + 8)?,
            opaque: decode_i32(buffer, offset + 12)?,
            cas: decode_u64(buffer, offset + 16)?,
        })
    }

    pub fn status(&self) -> ResponseStatus {
        ResponseStatus(self.status_or_vbucket)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.magic == Magic::Requested {
            "TX## "
        } else {
            "RX## "
        };
        write!(
            f,
            "{direction}{} (0x{:02X}) KeyLen: {}, ExtLen: {}, DataType: {}, Status/VBucket: {}, BodyLen: {}, Opaque: {}, CAS: {}",
            self.opcode,
            self.opcode.as_byte(),
            self.key_length,
            self.extras_length,
            self.data_type,
            self.status_or_vbucket,
            self.total_body_length,
            self.opaque,
            self.cas
        )
    }
}
