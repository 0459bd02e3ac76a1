use std::io::{self, prelude::*};

use super::Error as ProtocolError;


/// The length prefix of a name or value in a name-value pair.
///
/// Values up to 127 are sent as one byte. Anything longer takes four bytes in
/// network order, with the high bit of the first byte set as a marker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u32);

impl VarInt {
    const MARKER: u32 = 0x8000_0000;
    /// The largest value that fits the four-byte form.
    pub const MAX: Self = Self(Self::MARKER - 1);
    /// Values up to this one use the one-byte form.
    const SHORT_MAX: u32 = 0x7f;

    /// Reads a complete length prefix.
    ///
    /// # Errors
    /// Forwards reader errors. Input ending inside the prefix results in
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn read(mut r: impl Read) -> io::Result<Self> {
        let mut first = [0u8];
        r.read_exact(&mut first)?;
        Self::read_rest(first[0], r)
    }

    /// Reads the remaining bytes of a length prefix starting with `first`.
    ///
    /// # Errors
    /// See [`VarInt::read`].
    pub fn read_rest(first: u8, mut r: impl Read) -> io::Result<Self> {
        if u32::from(first) <= Self::SHORT_MAX {
            return Ok(Self(first.into()));
        }
        let mut long = [first, 0, 0, 0];
        r.read_exact(&mut long[1..])?;
        Ok(Self(u32::from_be_bytes(long) & !Self::MARKER))
    }

    /// The size of this prefix on the wire: 1 or 4 bytes.
    #[inline]
    #[must_use]
    pub fn encoded_len(self) -> usize {
        if self.0 <= Self::SHORT_MAX { 1 } else { 4 }
    }

    /// Writes the prefix, returning the number of bytes used.
    ///
    /// # Errors
    /// Forwards writer errors.
    pub fn write(self, mut w: impl Write) -> io::Result<usize> {
        let long = (self.0 | Self::MARKER).to_be_bytes();
        let encoded = match self.encoded_len() {
            1 => &long[3..],
            _ => &long[..],
        };
        w.write_all(encoded)?;
        Ok(encoded.len())
    }

    #[inline]
    #[must_use]
    pub fn to_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl From<VarInt> for u32 {
    #[inline]
    fn from(v: VarInt) -> Self {
        v.0
    }
}

impl TryFrom<usize> for VarInt {
    type Error = ProtocolError;

    /// Accepts lengths up to [`VarInt::MAX`].
    ///
    /// # Errors
    /// Rejects longer lengths with [`ProtocolError::InvalidVarInt`].
    fn try_from(v: usize) -> Result<Self, Self::Error> {
        match u32::try_from(v) {
            Ok(v) if v <= Self::MAX.0 => Ok(Self(v)),
            _ => Err(ProtocolError::InvalidVarInt),
        }
    }
}
