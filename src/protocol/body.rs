use super::Error as ProtocolError;
use super::{ProtocolStatus, RecordHeader, RecordType, RequestFlags, Role};


/// A complete record with an 8-byte body, header included.
pub type FixedRecord = [u8; RecordHeader::LEN + 8];

/// Prefixes `body` with a header for a record of the given type.
fn frame(rtype: RecordType, request_id: u16, body: [u8; 8]) -> FixedRecord {
    let mut head = RecordHeader::new(rtype, request_id);
    // Already a multiple of 8, so no padding is added
    head.set_lengths(8);

    let mut record = [0; RecordHeader::LEN + 8];
    let (dest_head, dest_body) = record.split_at_mut(RecordHeader::LEN);
    dest_head.copy_from_slice(&head.to_bytes());
    dest_body.copy_from_slice(&body);
    record
}


/// Names a management record type the application does not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownType {
    pub rtype: u8,
}

impl UnknownType {
    pub const LEN: usize = 8;

    #[inline]
    #[must_use]
    pub fn from_bytes([rtype, ..]: [u8; Self::LEN]) -> Self {
        Self { rtype }
    }

    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        [self.rtype, 0, 0, 0, 0, 0, 0, 0]
    }

    /// Frames this body as an Unknown record.
    #[inline]
    #[must_use]
    pub fn to_record(self, request_id: u16) -> FixedRecord {
        frame(RecordType::Unknown, request_id, self.to_bytes())
    }
}


/// Starts a request: its role and whether the connection stays open after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    pub role: Role,
    pub flags: RequestFlags,
}

impl BeginRequest {
    pub const LEN: usize = 8;

    /// Decodes the body. Reserved bytes are ignored.
    ///
    /// # Errors
    /// Fails if the role is not one of the three FastCGI roles.
    pub fn from_bytes([role_hi, role_lo, flags, ..]: [u8; Self::LEN]) -> Result<Self, ProtocolError> {
        let role = Role::try_from(u16::from_be_bytes([role_hi, role_lo]))?;
        Ok(Self { role, flags: flags.into() })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [role_hi, role_lo] = u16::from(self.role).to_be_bytes();
        [role_hi, role_lo, self.flags.into(), 0, 0, 0, 0, 0]
    }

    #[inline]
    #[must_use]
    pub fn to_record(self, request_id: u16) -> FixedRecord {
        frame(RecordType::BeginRequest, request_id, self.to_bytes())
    }
}


/// Ends a request with the application's exit status and the protocol outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    /// Comparable to the exit status of a CGI program.
    pub app_status: i32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    pub const LEN: usize = 8;

    /// # Errors
    /// Fails if the protocol status is undefined.
    pub fn from_bytes(data: [u8; Self::LEN]) -> Result<Self, ProtocolError> {
        let [s0, s1, s2, s3, status, ..] = data;
        Ok(Self {
            app_status: i32::from_be_bytes([s0, s1, s2, s3]),
            protocol_status: status.try_into()?,
        })
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let [s0, s1, s2, s3] = self.app_status.to_be_bytes();
        [s0, s1, s2, s3, self.protocol_status.into(), 0, 0, 0]
    }

    #[inline]
    #[must_use]
    pub fn to_record(self, request_id: u16) -> FixedRecord {
        frame(RecordType::EndRequest, request_id, self.to_bytes())
    }
}
