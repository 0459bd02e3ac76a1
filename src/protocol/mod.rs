/// Types representing the bodies of fixed-size FastCGI records.
pub mod body;
mod fields;
/// An encoder and decoder for FastCGI name-value pairs.
pub mod nv;
/// An encoder and decoder for FastCGI's variable-length integers.
pub mod varint;
mod vars;

pub use fields::*;
pub use vars::*;


/// The fixed FastCGI request ID for management records.
pub const FCGI_NULL_REQUEST_ID: u16 = 0;

/// The largest payload a single FastCGI record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;


/// Decoding failures of individual protocol fields.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("FastCGI version {0} is not supported")]
    UnknownVersion(u8),
    #[error("record type {0} is not defined by FastCGI 1")]
    UnknownRecordType(u8),
    #[error("role {0} is not defined by FastCGI 1")]
    UnknownRole(u16),
    #[error("protocol status {0} is not defined by FastCGI 1")]
    UnknownStatus(u8),
    /// A GetValues query named a variable this crate does not know.
    #[error("unknown FastCGI protocol variable name")]
    UnknownVariable,
    /// A name or value is too long for a name-value length prefix.
    #[error("length exceeds the FastCGI name-value limit of 2^31 - 1 bytes")]
    InvalidVarInt,
}


/// The fixed 8-byte header in front of every FastCGI record.
///
/// Version and type stay raw bytes, so any 8 bytes decode into a header.
/// Consumers decide how to treat unsupported versions and unknown types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader {
    pub version: u8,
    pub rtype: u8,
    pub request_id: u16,
    /// Number of content bytes following the header.
    pub content_length: u16,
    /// Number of ignored bytes following the content.
    pub padding_length: u8,
}

impl RecordHeader {
    /// The size of a header on the wire.
    pub const LEN: usize = 8;

    /// Creates a version 1 header of the given type with empty content.
    #[inline]
    #[must_use]
    pub fn new(rtype: RecordType, request_id: u16) -> Self {
        Self {
            version: Version::V1.into(),
            rtype: rtype.into(),
            request_id,
            content_length: 0,
            padding_length: 0,
        }
    }

    /// Sets the content length and pads the record to the next multiple of
    /// 8 bytes.
    #[inline]
    pub fn set_lengths(&mut self, content_length: u16) {
        self.content_length = content_length;
        // Always below 8
        self.padding_length = (content_length.wrapping_neg() & 7) as u8;
    }

    /// # Errors
    /// Fails for any version other than FastCGI 1.
    #[inline]
    pub fn version(self) -> Result<Version, Error> {
        Version::try_from(self.version)
    }

    /// # Errors
    /// Fails for record types FastCGI 1 does not define.
    #[inline]
    pub fn record_type(self) -> Result<RecordType, Error> {
        RecordType::try_from(self.rtype)
    }

    /// Tests whether this header addresses the connection rather than a
    /// request. BeginRequest never does, even with the null request ID.
    #[inline]
    #[must_use]
    pub fn is_management(self) -> bool {
        self.request_id == FCGI_NULL_REQUEST_ID && self.rtype != u8::from(RecordType::BeginRequest)
    }

    #[must_use]
    pub fn from_bytes(data: [u8; Self::LEN]) -> Self {
        let [version, rtype, id_hi, id_lo, len_hi, len_lo, padding_length, _reserved] = data;
        Self {
            version,
            rtype,
            request_id: u16::from_be_bytes([id_hi, id_lo]),
            content_length: u16::from_be_bytes([len_hi, len_lo]),
            padding_length,
        }
    }

    /// Encodes the header. The reserved last byte is zero.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [id_hi, id_lo] = self.request_id.to_be_bytes();
        let [len_hi, len_lo] = self.content_length.to_be_bytes();
        [self.version, self.rtype, id_hi, id_lo, len_hi, len_lo, self.padding_length, 0]
    }
}
