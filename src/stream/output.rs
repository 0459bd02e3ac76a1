use std::cmp::min;
use std::fmt;
use std::io::{self, Write};

use super::{ByteStream, Error, Fault};
use crate::protocol::{self as fcgi, body, RecordHeader, RecordType};
use crate::request::{Phase, Shared};


const HEAD: usize = RecordHeader::LEN;
/// Leaves room for at least a few content bytes behind the header.
const MIN_BUFFER: usize = 2 * HEAD;
const MAX_BUFFER: usize = HEAD + fcgi::MAX_CONTENT_LEN;


/// A FastCGI output stream (Stdout or Stderr) of the current request.
///
/// Written bytes are buffered and emitted as records of the stream's type
/// whenever the buffer is full, on [`Write::flush`] and on
/// [`ByteStream::close`]. Empty records are never emitted before close, as
/// they would terminate the stream early.
///
/// Closing a stream emits its terminating empty record. A Stderr stream that
/// never carried data stays silent. The last of a request's output streams to
/// be closed also emits the EndRequest record.
///
/// The first transport error closes the stream. It is returned from the
/// failing call, or from the next one if the failing write already accepted
/// some bytes. Subsequent writes report zero bytes written.
pub struct OutputStream<W> {
    link: Shared<W>,
    kind: RecordType,
    // Record header followed by buffered content
    buf: Vec<u8>,
    limit: usize,
    written_any: bool,
    closed: bool,
    finalized: bool,
    fault: Fault,
}

impl<W> OutputStream<W> {
    /// Creates a new output stream. The buffer size includes the 8-byte
    /// header and is clamped to what a single record can carry.
    pub(crate) fn new(link: Shared<W>, kind: RecordType, size: usize) -> Self {
        debug_assert!(matches!(kind, RecordType::Stdout | RecordType::Stderr));
        let limit = size.clamp(MIN_BUFFER, MAX_BUFFER);
        let mut buf = Vec::with_capacity(limit);
        buf.extend_from_slice(&[0; HEAD]);
        Self {
            link, kind, buf, limit,
            written_any: false, closed: false, finalized: false,
            fault: Fault::default(),
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.fault.take()
    }

    /// Closes the stream after a transport error.
    fn record_fault(&mut self, e: io::Error) {
        self.closed = true;
        self.fault.set(Error::Transport(e));
    }

    /// Records a transport error and returns it for the failing call.
    fn fail(&mut self, e: io::Error) -> io::Error {
        self.record_fault(e);
        self.fault.report().unwrap_or_else(|| io::ErrorKind::BrokenPipe.into())
    }
}

impl<W: Write> OutputStream<W> {
    /// Frames the buffered content (if any) as a record and writes it to
    /// the connection.
    fn emit_record(&mut self) -> io::Result<()> {
        let content = self.buf.len() - HEAD;
        if content == 0 {
            return Ok(());
        }

        let mut link = self.link.borrow_mut();
        let mut head = RecordHeader::new(self.kind, link.state.id);
        // The buffer never exceeds MAX_BUFFER, so the cast is lossless
        head.content_length = content as u16;
        self.buf[..HEAD].copy_from_slice(&head.to_bytes());
        crate::macros::trace!(?head, "record sent");

        self.written_any = true;
        let res = link.out.write_all(&self.buf);
        self.buf.truncate(HEAD);
        res
    }

    fn finalize(&mut self) -> io::Result<()> {
        let (request_id, app_status, last) = {
            let mut link = self.link.borrow_mut();
            let state = &mut link.state;
            let last = state.writers == 1;
            state.writers = state.writers.saturating_sub(1);
            if state.writers == 0 {
                state.phase = Phase::Completed;
            }
            (state.id, state.app_status, last)
        };

        // Reuse the reserved header slot for the final content record
        let mut frames = std::mem::take(&mut self.buf);
        let content = frames.len() - HEAD;
        if content > 0 {
            let mut head = RecordHeader::new(self.kind, request_id);
            // The buffer never exceeds MAX_BUFFER, so the cast is lossless
            head.content_length = content as u16;
            frames[..HEAD].copy_from_slice(&head.to_bytes());
        } else {
            frames.clear();
        }

        if self.kind != RecordType::Stderr || self.written_any || content > 0 {
            let end_stream = RecordHeader::new(self.kind, request_id).to_bytes();
            frames.extend_from_slice(&end_stream);
        }
        if last {
            let end = body::EndRequest {
                app_status,
                protocol_status: fcgi::ProtocolStatus::RequestComplete,
            };
            frames.extend_from_slice(&end.to_record(request_id));
            tracing::debug!(request_id, app_status, "request completed");
        }

        if frames.is_empty() {
            return Ok(());
        }
        self.written_any = true;
        let mut link = self.link.borrow_mut();
        link.out.write_all(&frames)?;
        link.out.flush()
    }
}

impl<W: Write> Write for OutputStream<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            if let Some(e) = self.fault.report() {
                return Err(e);
            }
            return match self.fault.get() {
                Some(_) => Ok(0),
                None => Err(Error::CallSequence("write to a closed output stream").into()),
            };
        }

        let mut moved = 0;
        while moved < data.len() {
            if self.buf.len() == self.limit {
                match self.emit_record() {
                    Ok(()) => (),
                    // Bytes already taken stay accepted; the error surfaces next call
                    Err(e) if moved > 0 => {
                        self.record_fault(e);
                        return Ok(moved);
                    },
                    Err(e) => return Err(self.fail(e)),
                }
            }
            let n = min(self.limit - self.buf.len(), data.len() - moved);
            self.buf.extend_from_slice(&data[moved..moved + n]);
            moved += n;
        }
        Ok(moved)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return self.fault.report().map_or(Ok(()), Err);
        }
        let res = self.emit_record().and_then(|()| self.link.borrow_mut().out.flush());
        res.map_err(|e| self.fail(e))
    }
}

impl<W: Write> ByteStream for OutputStream<W> {
    #[inline]
    fn stream_type(&self) -> Option<RecordType> {
        Some(self.kind)
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    fn error(&self) -> Option<&Error> {
        self.fault.get()
    }

    /// Emits the remaining content, the stream terminator and, for the last
    /// open output stream of the request, the EndRequest record.
    ///
    /// A stream that failed earlier still counts as closed towards the
    /// EndRequest, but emits nothing.
    fn close(&mut self) -> io::Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if self.closed {
            // Faulted earlier, so the connection is unusable
            let mut link = self.link.borrow_mut();
            link.state.writers = link.state.writers.saturating_sub(1);
            return match self.fault.report() {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }
        self.closed = true;

        let res = self.finalize();
        crate::macros::trace!(stream = ?self.kind, ok = res.is_ok(), "output stream closed");
        res.map_err(|e| self.fail(e))
    }
}

impl<W> fmt::Debug for OutputStream<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("kind", &self.kind)
            .field("buffered", &(self.buf.len().saturating_sub(HEAD)))
            .field("limit", &self.limit)
            .field("written_any", &self.written_any)
            .field("closed", &self.closed)
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}
