use std::io;

use crate::protocol as fcgi;

mod input;
mod output;

pub use input::InputStream;
pub(crate) use input::RawInput;
pub use output::OutputStream;


/// A framing violation committed by the FastCGI client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Violation {
    /// The connection ended before the current record or stream was complete.
    #[error("connection closed in the middle of a record or stream")]
    UnexpectedEof,

    /// A record for the active request had a type other than the stream
    /// currently being read.
    #[error("received record type {received} while reading stream {expected:?}")]
    UnexpectedRecord {
        /// The stream being read, if any.
        expected: Option<fcgi::RecordType>,
        /// The raw type of the offending record.
        received: u8,
    },

    /// The header of a BeginRequest record specified a length that is
    /// different from its fixed-size body.
    #[error(
        "BeginRequest record has invalid length {0}, expected {expected}",
        expected = fcgi::body::BeginRequest::LEN,
    )]
    InvalidBeginLength(u16),

    /// A BeginRequest record used the request ID reserved for management
    /// records.
    #[error("BeginRequest record has reserved ID 0, expected nonzero")]
    NullRequestId,
}


/// Errors raised by the FastCGI stream engine.
///
/// Each stream retains only the first error it encounters. See the
/// documentation of [`InputStream`] and [`OutputStream`] for how errors
/// are reported.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A record header carried a version other than FastCGI 1.
    ///
    /// Such a record could have an arbitrary layout and size, so we can neither
    /// parse nor skip past it.
    #[error("cannot parse FastCGI record with unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The FastCGI client violated the record framing rules.
    #[error("FastCGI protocol violation: {0}")]
    Protocol(#[from] Violation),

    /// A name-value pair in a Params or GetValues body was cut short.
    #[error("FastCGI name-value pair is truncated")]
    Params,

    /// The API was used out of order, such as writing to a closed stream.
    #[error("FastCGI call out of sequence: {0}")]
    CallSequence(&'static str),

    /// The underlying connection failed.
    #[error("FastCGI connection failed: {0}")]
    Transport(#[from] io::Error),
}

impl Error {
    /// Returns the [`io::ErrorKind`] this error maps to when reported
    /// through [`std::io`] traits.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::UnsupportedVersion(_) | Self::Protocol(_) | Self::Params => {
                io::ErrorKind::InvalidData
            },
            Self::CallSequence(_) => io::ErrorKind::Other,
            Self::Transport(e) => e.kind(),
        }
    }

    /// Creates an [`io::Error`] describing this error without consuming it.
    fn to_io(&self) -> io::Error {
        io::Error::new(self.kind(), self.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Transport(e) => e,
            e => io::Error::new(e.kind(), e),
        }
    }
}


/// A sticky slot for the first error of a stream.
#[derive(Debug, Default)]
pub(crate) struct Fault {
    error: Option<Error>,
    reported: bool,
}

impl Fault {
    /// Records `error` unless an earlier error is already present.
    pub(crate) fn set(&mut self, error: Error) {
        if self.error.is_some() {
            crate::macros::trace!(%error, "subsequent stream error ignored");
            return;
        }
        tracing::debug!(%error, "stream faulted");
        self.error = Some(error);
    }

    #[inline]
    pub(crate) fn get(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    #[inline]
    pub(crate) fn take(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Returns the recorded error for the first caller only. Later calls
    /// observe a plain end-of-stream.
    pub(crate) fn report(&mut self) -> Option<io::Error> {
        if self.reported {
            return None;
        }
        let e = self.error.as_ref()?.to_io();
        self.reported = true;
        Some(e)
    }
}


/// The capabilities shared by FastCGI input and output streams.
///
/// Reading and writing go through [`std::io::Read`] and [`std::io::Write`].
/// This trait adds the explicit, one-time close that finalizes a stream.
pub trait ByteStream {
    /// Returns the record type carried by this stream, if one is bound.
    fn stream_type(&self) -> Option<fcgi::RecordType>;

    /// Tests whether the stream was closed, either explicitly, by reaching its
    /// end, or because of an error.
    fn is_closed(&self) -> bool;

    /// Returns the first error this stream encountered, if any.
    fn error(&self) -> Option<&Error>;

    /// Closes the stream. Closing an already closed stream does nothing.
    ///
    /// # Errors
    /// Output streams emit their final records here and may fail with any
    /// [`io::Error`] from the underlying connection.
    fn close(&mut self) -> io::Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_first_error() {
        let mut fault = Fault::default();
        assert!(fault.report().is_none());

        fault.set(Error::UnsupportedVersion(2));
        fault.set(Error::Params);
        assert!(matches!(fault.get(), Some(Error::UnsupportedVersion(2))));

        let first = fault.report().expect("first report should carry the error");
        assert_eq!(first.kind(), io::ErrorKind::InvalidData);
        assert!(fault.report().is_none());
        assert!(matches!(fault.take(), Some(Error::UnsupportedVersion(2))));
    }

    #[test]
    fn io_conversion() {
        let e: io::Error = Error::Transport(io::ErrorKind::TimedOut.into()).into();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);

        let e: io::Error = Error::Protocol(Violation::UnexpectedEof).into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
        assert!(e.to_string().contains("connection closed"));
    }

    #[test]
    fn violation_messages() {
        assert_eq!(
            Violation::InvalidBeginLength(3).to_string(),
            "BeginRequest record has invalid length 3, expected 8",
        );
        assert_eq!(
            Error::Protocol(Violation::NullRequestId).to_string(),
            "FastCGI protocol violation: BeginRequest record has reserved ID 0, expected nonzero",
        );
    }
}
