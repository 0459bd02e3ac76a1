use std::io;

use super::Error as ProtocolError;
use super::{nv, RecordHeader, RecordType, FCGI_NULL_REQUEST_ID};


/// Room for a GetValuesResult record answering every known variable.
pub const MGMT_RESPONSE_LEN: usize = 64;


bitflags::bitflags! {
    /// The variables a FastCGI client may query with a GetValues record.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolVariables: u8 {
        const FCGI_MAX_CONNS = 1 << 0;
        const FCGI_MAX_REQS = 1 << 1;
        const FCGI_MPXS_CONNS = 1 << 2;
    }
}

impl ProtocolVariables {
    /// Looks up a single variable by its exact name.
    ///
    /// # Errors
    /// Fails with [`ProtocolError::UnknownVariable`] for any other name.
    pub fn parse_name(name: &[u8]) -> Result<Self, ProtocolError> {
        Self::all()
            .iter_names()
            .find(|(known, _)| known.as_bytes() == name)
            .map(|(_, var)| var)
            .ok_or(ProtocolError::UnknownVariable)
    }

    /// Every connection carries one request at a time and is never
    /// multiplexed.
    fn value(self) -> &'static [u8] {
        if self == Self::FCGI_MPXS_CONNS { b"0" } else { b"1" }
    }

    /// Builds the GetValuesResult record answering these variables in `buf`
    /// and returns its length, padding included.
    ///
    /// # Errors
    /// Fails with [`io::ErrorKind::WriteZero`] if the record exceeds `buf`.
    pub fn write_response(self, buf: &mut [u8; MGMT_RESPONSE_LEN]) -> io::Result<usize> {
        let mut content = &mut buf[RecordHeader::LEN..];
        let room = content.len();
        for (name, var) in self.iter_names() {
            nv::write((name.as_bytes(), var.value()), &mut content)?;
        }
        let content_len = room - content.len();

        let mut head = RecordHeader::new(RecordType::GetValuesResult, FCGI_NULL_REQUEST_ID);
        // Bounded by MGMT_RESPONSE_LEN
        head.set_lengths(content_len as u16);
        let padding = usize::from(head.padding_length);
        content.get_mut(..padding).ok_or(io::ErrorKind::WriteZero)?.fill(0);

        buf[..RecordHeader::LEN].copy_from_slice(&head.to_bytes());
        Ok(RecordHeader::LEN + content_len + padding)
    }
}
