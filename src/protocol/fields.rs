use std::fmt;

use super::Error as ProtocolError;


/// Implements the conversions between a field enum and its raw wire value.
/// Decoding an undefined value yields the given [`ProtocolError`] variant.
macro_rules! wire_field {
    ($name:ident: $repr:ty, $err:ident) => {
        impl TryFrom<$repr> for $name {
            type Error = ProtocolError;

            #[inline]
            fn try_from(v: $repr) -> Result<Self, Self::Error> {
                Self::from_repr(v).ok_or(ProtocolError::$err(v))
            }
        }

        impl From<$name> for $repr {
            #[inline]
            fn from(v: $name) -> Self {
                v as Self
            }
        }
    };
}


/// The FastCGI protocol versions understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[repr(u8)]
pub enum Version {
    V1 = 1,
}

wire_field!(Version: u8, UnknownVersion);


/// The role an application plays in a request, as announced by BeginRequest.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u16)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

wire_field!(Role: u16, UnknownRole);

impl Role {
    /// Tests whether a request of this role may carry a stream of the given
    /// record type. Only Filter requests receive a Data stream.
    #[must_use]
    pub fn is_stream_ok(self, stream: RecordType) -> bool {
        match stream {
            RecordType::Params | RecordType::Stdin | RecordType::Stdout | RecordType::Stderr => true,
            RecordType::Data => self == Self::Filter,
            _ => false,
        }
    }
}


bitflags::bitflags! {
    /// The flags byte of a BeginRequest body.
    ///
    /// Undefined bits are ignored while decoding.
    #[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestFlags: u8 {
        /// The application must not close the connection after this request.
        const KeepConn = 1;
    }
}

impl From<u8> for RequestFlags {
    #[inline]
    fn from(v: u8) -> Self {
        Self::from_bits_truncate(v)
    }
}

impl From<RequestFlags> for u8 {
    #[inline]
    fn from(v: RequestFlags) -> Self {
        v.bits()
    }
}

impl fmt::Debug for RequestFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestFlags")
            .field(&format_args!("{:#b}", self.bits()))
            .finish()
    }
}


/// The protocol-level outcome of a request, sent in its EndRequest record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u8)]
pub enum ProtocolStatus {
    /// Normal end of the request.
    RequestComplete = 0,
    /// A BeginRequest arrived while another request was active on the same
    /// connection.
    CantMpxConn = 1,
    /// The application ran out of some resource.
    Overloaded = 2,
    /// The requested role is not one the application can play.
    UnknownRole = 3,
}

wire_field!(ProtocolStatus: u8, UnknownStatus);


/// The record types defined by FastCGI 1.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::FromRepr)]
#[cfg_attr(test, derive(strum::EnumIter))]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    Unknown = 11,
}

wire_field!(RecordType: u8, UnknownRecordType);

impl RecordType {
    /// Tests whether records of this type travel from the FastCGI client to
    /// the application as part of a byte stream.
    #[inline]
    #[must_use]
    pub fn is_input_stream(self) -> bool {
        matches!(self, Self::Params | Self::Stdin | Self::Data)
    }
}


#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;
    use super::*;

    #[test]
    fn request_flags() {
        assert_eq!(RequestFlags::from(0x01), RequestFlags::KeepConn);
        assert_eq!(RequestFlags::from(0x81), RequestFlags::KeepConn);
        assert!(RequestFlags::from(0xf0).is_empty());
        assert_eq!(u8::from(RequestFlags::KeepConn), 1);
        assert_eq!(format!("{:?}", RequestFlags::KeepConn), "RequestFlags(0b1)");
        assert_eq!(format!("{:?}", RequestFlags::empty()), "RequestFlags(0b0)");
    }

    #[test]
    fn wire_values() -> Result<(), ProtocolError> {
        assert_eq!(Version::try_from(1)?, Version::V1);
        assert!(matches!(Version::try_from(2), Err(ProtocolError::UnknownVersion(2))));

        for (raw, rtype) in (1u8..).zip(RecordType::iter()) {
            assert_eq!(u8::from(rtype), raw);
            assert_eq!(RecordType::try_from(raw)?, rtype);
        }
        assert!(matches!(RecordType::try_from(12), Err(ProtocolError::UnknownRecordType(12))));

        for (raw, role) in (1u16..).zip(Role::iter()) {
            assert_eq!(Role::try_from(raw)?, role);
        }
        assert!(matches!(Role::try_from(0), Err(ProtocolError::UnknownRole(0))));

        assert_eq!(ProtocolStatus::iter().map(u8::from).collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert!(matches!(ProtocolStatus::try_from(4), Err(ProtocolError::UnknownStatus(4))));
        Ok(())
    }

    #[test]
    fn role_streams() {
        for role in Role::iter() {
            for rtype in RecordType::iter() {
                let expected = match rtype {
                    RecordType::Data => role == Role::Filter,
                    other => matches!(other, RecordType::Params | RecordType::Stdin | RecordType::Stdout | RecordType::Stderr),
                };
                assert_eq!(role.is_stream_ok(rtype), expected, "{role:?} with {rtype:?}");
            }
        }
    }

    #[test]
    fn input_streams() {
        let inputs: Vec<_> = RecordType::iter().filter(|r| r.is_input_stream()).collect();
        assert_eq!(inputs, [RecordType::Params, RecordType::Stdin, RecordType::Data]);
    }
}
