use std::collections::HashMap;
use std::io::{self, prelude::*};

use smallvec::SmallVec;

use super::varint::VarInt;


const SMALLVEC_BASE_SIZE: usize = std::mem::size_of::<SmallVec<[u8; 0]>>();
// Maximum number of inline bytes before SmallVec exceeds SMALLVEC_BASE_SIZE.
// This derives from SmallVec's layout, which uses 1 usize as discriminant.
const INLINE_BYTES: usize = SMALLVEC_BASE_SIZE - std::mem::size_of::<usize>();

/// An owned byte string which stores short contents inline.
pub type SmallBytes = SmallVec<[u8; INLINE_BYTES]>;

/// A decoded name-value pair.
pub type Pair = (SmallBytes, SmallBytes);


/// Reads exactly `len` bytes from the reader without trusting `len` for
/// up-front allocation.
fn read_bytes(r: impl Read, len: VarInt) -> io::Result<SmallBytes> {
    let len = len.to_usize();
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(SmallBytes::from_vec(buf))
}

/// Decodes the next name-value pair from the reader's input.
///
/// Returns [`None`] if the reader is exhausted before the first byte of a
/// new pair. Once a pair has started, all of its bytes must be present.
///
/// # Errors
/// A pair that is cut short results in [`io::ErrorKind::UnexpectedEof`].
/// Any other errors from the reader are forwarded to the caller.
pub fn read_pair(mut r: impl Read) -> io::Result<Option<Pair>> {
    let mut first = [0u8; 1];
    loop {
        match r.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let name_len = VarInt::read_rest(first[0], &mut r)?;
    let val_len = VarInt::read(&mut r)?;
    let name = read_bytes(&mut r, name_len)?;
    let value = read_bytes(&mut r, val_len)?;
    Ok(Some((name, value)))
}

/// Decodes name-value pairs from the reader until it is exhausted.
///
/// Later occurrences of a name replace the values of earlier ones.
///
/// # Errors
/// See [`read_pair`].
pub fn read_all(mut r: impl Read) -> io::Result<HashMap<SmallBytes, SmallBytes>> {
    let mut pairs = HashMap::new();
    while let Some((name, value)) = read_pair(&mut r)? {
        pairs.insert(name, value);
    }
    Ok(pairs)
}


/// Encodes a name-value pair into the writer's output, returning the number
/// of bytes written.
///
/// Writing into a fixed-size slice (`&mut [u8]`) fails with
/// [`io::ErrorKind::WriteZero`] if the pair does not fit.
///
/// # Errors
/// Any errors from [`Write::write_all`] are forwarded to the caller. Names
/// or values too long to be encoded are rejected with
/// [`io::ErrorKind::InvalidInput`].
pub fn write((name, value): (&[u8], &[u8]), mut w: impl Write) -> io::Result<usize> {
    let invalid = |e| io::Error::new(io::ErrorKind::InvalidInput, e);
    let name_len = VarInt::try_from(name.len()).map_err(invalid)?;
    let val_len = VarInt::try_from(value.len()).map_err(invalid)?;

    let mut written = name_len.write(&mut w)?;
    written += val_len.write(&mut w)?;
    w.write_all(name)?;
    w.write_all(value)?;
    Ok(written + name.len() + value.len())
}
