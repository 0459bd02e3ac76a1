use std::cmp::min;
use std::fmt;
use std::io::{self, prelude::*};
use std::ops::ControlFlow::{Break, Continue};

use super::{ByteStream, Error, Fault, Violation};
use crate::protocol::{self as fcgi, body, nv, RecordHeader, RecordType};
use crate::request::Shared;


type ControlFlow = std::ops::ControlFlow<()>;


/// The buffered byte source below an [`InputStream`].
///
/// It outlives individual requests, so bytes of the next request that
/// arrived early are not lost between keep-alive requests.
pub(crate) struct RawInput<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
}

impl<R> RawInput<R> {
    pub(crate) fn new(inner: R, size: usize) -> Self {
        Self { inner, buf: vec![0; size].into_boxed_slice(), pos: 0, end: 0 }
    }

    #[inline]
    fn available(&self) -> usize {
        self.end - self.pos
    }

    /// Removes and returns the next `n` buffered bytes.
    #[inline]
    fn take(&mut self, n: usize) -> &[u8] {
        let start = self.pos;
        self.pos += n;
        &self.buf[start..self.pos]
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> RawInput<R> {
    /// Replaces the exhausted buffer with fresh bytes from the connection.
    /// A return value of 0 signals end-of-file.
    fn refill(&mut self) -> io::Result<usize> {
        debug_assert_eq!(self.available(), 0);
        let n = loop {
            match self.inner.read(&mut self.buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                res => break res?,
            }
        };
        crate::macros::trace!(n, "connection input received");
        self.pos = 0;
        self.end = n;
        Ok(n)
    }
}

impl<R> fmt::Debug for RawInput<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawInput")
            .field("capacity", &self.buf.len())
            .field("pos", &self.pos)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}


/// A FastCGI input stream (Params, Stdin or Data) of the current request.
///
/// The stream reassembles the content of consecutive records of its type into
/// a plain byte stream. Padding is never surfaced. Records for other request
/// IDs are skipped, management records are answered directly on the shared
/// output, and a second BeginRequest is rejected with `CantMpxConn` while a
/// request is in progress.
///
/// The first protocol or transport error closes the stream. It is returned
/// once from [`Read::read`] (or [`BufRead::fill_buf`]); afterwards the stream
/// reads as exhausted. The error stays available through
/// [`ByteStream::error`].
pub struct InputStream<R, W> {
    raw: RawInput<R>,
    link: Shared<W>,
    kind: Option<RecordType>,
    // Exposed content bytes at raw.pos
    window: usize,
    content_rem: u16,
    padding_rem: u8,
    skip: bool,
    terminated: bool,
    closed: bool,
    fault: Fault,
}

impl<R, W> InputStream<R, W> {
    /// Creates a stream which is not bound to any record type yet. It consumes
    /// input up to and including the next BeginRequest record.
    pub(crate) fn new(raw: RawInput<R>, link: Shared<W>) -> Self {
        Self {
            raw, link, kind: None, window: 0,
            content_rem: 0, padding_rem: 0,
            skip: false, terminated: false, closed: false,
            fault: Fault::default(),
        }
    }

    /// Binds the stream to a new record type and reopens it, unless an error
    /// occurred earlier.
    ///
    /// Must only be called on a stream which reached its end, as any
    /// remaining bytes of the current record would be misinterpreted.
    pub(crate) fn retype(&mut self, kind: RecordType) {
        debug_assert!(kind.is_input_stream());
        debug_assert!(self.is_finished() || self.kind.is_none());
        crate::macros::trace!(from = ?self.kind, to = ?kind, "input stream retyped");
        self.kind = Some(kind);
        self.window = 0;
        self.content_rem = 0;
        self.padding_rem = 0;
        self.skip = false;
        self.terminated = false;
        self.closed = self.fault.get().is_some();
    }

    /// Tests whether the stream was read up to and including its terminating
    /// record, so no bytes of it remain on the connection.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.closed && self.terminated && self.content_rem == 0 && self.padding_rem == 0
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.fault.take()
    }

    pub(crate) fn into_raw(self) -> RawInput<R> {
        self.raw
    }

    fn set_fault(&mut self, e: Error) {
        self.drop_window();
        self.closed = true;
        self.fault.set(e);
    }

    #[inline]
    fn drop_window(&mut self) {
        self.raw.take(self.window);
        self.window = 0;
    }

    fn skip_record(&mut self, head: RecordHeader) {
        self.content_rem = head.content_length;
        self.padding_rem = head.padding_length;
        // Zero-length records have nothing to skip
        self.skip = head.content_length > 0;
    }
}

impl<R: Read, W: Write> InputStream<R, W> {
    /// Consumes input until stream content is available, the stream ends, or
    /// an error occurs.
    fn fill(&mut self) {
        debug_assert_eq!(self.window, 0);
        let mut head = [0u8; RecordHeader::LEN];
        let mut head_len = 0;

        loop {
            if self.terminated && self.content_rem == 0 && self.padding_rem == 0 {
                crate::macros::trace!(stream = ?self.kind, "input stream ended");
                self.closed = true;
                return;
            }

            if self.raw.available() == 0 {
                match self.raw.refill() {
                    Ok(0) => {
                        let idle = self.kind.is_none() && head_len == 0
                            && self.content_rem == 0 && self.padding_rem == 0;
                        if idle {
                            tracing::debug!("connection input ended between requests");
                            self.closed = true;
                        } else {
                            self.set_fault(Violation::UnexpectedEof.into());
                        }
                        return;
                    },
                    Ok(_) => (),
                    Err(e) => return self.set_fault(Error::Transport(e)),
                }
            }
            let avail = self.raw.available();

            if self.content_rem > 0 {
                let n = min(usize::from(self.content_rem), avail);
                // n <= content_rem, so the cast is lossless
                self.content_rem -= n as u16;
                if !self.skip {
                    self.window = n;
                    return;
                }
                self.raw.take(n);
                if self.content_rem == 0 {
                    self.skip = false;
                }
                continue;
            }

            if self.padding_rem > 0 {
                let n = min(usize::from(self.padding_rem), avail);
                // n <= padding_rem, so the cast is lossless
                self.padding_rem -= n as u8;
                self.raw.take(n);
                continue;
            }

            // Headers may be split across reads from the connection
            let n = min(RecordHeader::LEN - head_len, avail);
            head[head_len..head_len + n].copy_from_slice(self.raw.take(n));
            head_len += n;
            if head_len < RecordHeader::LEN {
                continue;
            }
            head_len = 0;

            if self.dispatch(RecordHeader::from_bytes(head)).is_break() {
                return;
            }
        }
    }

    /// Acts on a complete record header. Breaks if the stream was closed.
    fn dispatch(&mut self, head: RecordHeader) -> ControlFlow {
        crate::macros::trace!(?head, "record received");
        self.skip = false;

        if head.version().is_err() {
            self.set_fault(Error::UnsupportedVersion(head.version));
            return Break(());
        }
        if head.rtype == RecordType::BeginRequest.into() {
            return self.begin_record(head);
        }
        if head.is_management() {
            return self.management_record(head);
        }

        let (active_id, began) = {
            let link = self.link.borrow();
            (link.state.id, link.state.began())
        };
        if !began || head.request_id != active_id {
            crate::macros::trace!(request_id = head.request_id, "record of inactive request skipped");
            self.skip_record(head);
            return Continue(());
        }

        if head.rtype == RecordType::AbortRequest.into() {
            tracing::debug!(request_id = head.request_id, "AbortRequest received and ignored");
            self.skip_record(head);
            return Continue(());
        }

        if self.kind.map(u8::from) != Some(head.rtype) {
            self.set_fault(Violation::UnexpectedRecord {
                expected: self.kind,
                received: head.rtype,
            }.into());
            return Break(());
        }

        self.content_rem = head.content_length;
        self.padding_rem = head.padding_length;
        if head.content_length == 0 {
            self.terminated = true;
        }
        Continue(())
    }

    fn begin_record(&mut self, head: RecordHeader) -> ControlFlow {
        // Never answer on the management ID, even while a request is active
        if head.request_id == fcgi::FCGI_NULL_REQUEST_ID {
            self.set_fault(Violation::NullRequestId.into());
            return Break(());
        }
        if self.link.borrow().state.began() {
            tracing::info!(request_id = head.request_id, "multiplexed request rejected");
            let end = body::EndRequest {
                app_status: 0,
                protocol_status: fcgi::ProtocolStatus::CantMpxConn,
            };
            self.send(&end.to_record(head.request_id))?;
            self.skip_record(head);
            return Continue(());
        }

        if usize::from(head.content_length) != body::BeginRequest::LEN {
            self.set_fault(Violation::InvalidBeginLength(head.content_length).into());
            return Break(());
        }

        let mut data = [0u8; body::BeginRequest::LEN];
        self.read_body(&mut data)?;
        self.padding_rem = head.padding_length;

        match body::BeginRequest::from_bytes(data) {
            Ok(begin) => {
                tracing::debug!(
                    request_id = head.request_id, role = ?begin.role, flags = ?begin.flags,
                    "request began",
                );
                self.link.borrow_mut().state.activate(head.request_id, begin);
                // Ends this stream once the padding is consumed
                self.terminated = true;
            },
            Err(error) => {
                tracing::info!(request_id = head.request_id, %error, "request rejected");
                let end = body::EndRequest {
                    app_status: 0,
                    protocol_status: fcgi::ProtocolStatus::UnknownRole,
                };
                self.send(&end.to_record(head.request_id))?;
            },
        }
        Continue(())
    }

    fn management_record(&mut self, head: RecordHeader) -> ControlFlow {
        let mut data = vec![0u8; head.content_length.into()];
        self.read_body(&mut data)?;
        self.padding_rem = head.padding_length;

        let mut resp = [0u8; fcgi::MGMT_RESPONSE_LEN];
        let len = if head.rtype == RecordType::GetValues.into() {
            let names = match nv::read_all(&*data) {
                Ok(names) => names,
                Err(_) => {
                    self.set_fault(Error::Params);
                    return Break(());
                },
            };
            let vars: fcgi::ProtocolVariables = names
                .keys()
                .filter_map(|name| fcgi::ProtocolVariables::parse_name(name).ok())
                .collect();
            tracing::debug!(?vars, "GetValues answered");

            match vars.write_response(&mut resp) {
                Ok(len) => len,
                Err(e) => {
                    self.set_fault(Error::Transport(e));
                    return Break(());
                },
            }
        } else {
            tracing::info!(rtype = head.rtype, "unknown management record answered");
            let rec = body::UnknownType { rtype: head.rtype }.to_record(fcgi::FCGI_NULL_REQUEST_ID);
            resp[..rec.len()].copy_from_slice(&rec);
            rec.len()
        };

        self.send(&resp[..len])
    }

    /// Fills `dest` with record content that is consumed internally rather
    /// than exposed as stream data.
    fn read_body(&mut self, dest: &mut [u8]) -> ControlFlow {
        let mut filled = 0;
        while filled < dest.len() {
            if self.raw.available() == 0 {
                match self.raw.refill() {
                    Ok(0) => {
                        self.set_fault(Violation::UnexpectedEof.into());
                        return Break(());
                    },
                    Ok(_) => (),
                    Err(e) => {
                        self.set_fault(Error::Transport(e));
                        return Break(());
                    },
                }
            }
            let n = min(dest.len() - filled, self.raw.available());
            dest[filled..filled + n].copy_from_slice(self.raw.take(n));
            filled += n;
        }
        Continue(())
    }

    /// Writes a complete response record to the shared output.
    fn send(&mut self, record: &[u8]) -> ControlFlow {
        let res = {
            let mut link = self.link.borrow_mut();
            link.out.write_all(record).and_then(|()| link.out.flush())
        };
        match res {
            Ok(()) => Continue(()),
            Err(e) => {
                self.set_fault(Error::Transport(e));
                Break(())
            },
        }
    }

    /// Consumes input up to and including the next BeginRequest record.
    /// Only meaningful while the stream is not bound to a record type.
    pub(crate) fn await_begin(&mut self) {
        debug_assert!(self.kind.is_none());
        while !self.closed {
            self.fill();
            // Content of an unbound stream is never exposed
            debug_assert_eq!(self.window, 0);
        }
    }

    /// Skips the unread remainder of the current stream, leaving the
    /// connection at a record boundary.
    pub(crate) fn discard(&mut self) {
        self.drop_window();
        if self.kind.is_none() || self.is_finished() || self.fault.get().is_some() {
            return;
        }
        tracing::debug!(stream = ?self.kind, "discarding unread input");
        // Reopen if the stream was closed early
        self.closed = false;
        while !self.closed {
            self.fill();
            self.drop_window();
        }
    }

    /// Converts the recorded error for the caller that observes it first.
    fn end_of_stream(&mut self) -> io::Result<()> {
        match self.fault.report() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<R: Read, W: Write> Read for InputStream<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut moved = 0;
        loop {
            let n = min(buf.len() - moved, self.window);
            buf[moved..moved + n].copy_from_slice(self.raw.take(n));
            self.window -= n;
            moved += n;

            if moved == buf.len() {
                return Ok(moved);
            }
            if self.closed {
                if moved == 0 {
                    self.end_of_stream()?;
                }
                return Ok(moved);
            }
            self.fill();
        }
    }
}

impl<R: Read, W: Write> BufRead for InputStream<R, W> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.window == 0 && !self.closed {
            self.fill();
        }
        if self.window == 0 {
            self.end_of_stream()?;
        }
        let start = self.raw.pos;
        Ok(&self.raw.buf[start..start + self.window])
    }

    fn consume(&mut self, amt: usize) {
        let amt = min(amt, self.window);
        self.raw.take(amt);
        self.window -= amt;
    }
}

impl<R, W> ByteStream for InputStream<R, W> {
    #[inline]
    fn stream_type(&self) -> Option<RecordType> {
        self.kind
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    fn error(&self) -> Option<&Error> {
        self.fault.get()
    }

    /// Stops exposing stream data. On a kept-alive connection, the unread
    /// remainder is drained when the request is finished.
    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            tracing::debug!(stream = ?self.kind, "input stream closed early");
        }
        self.drop_window();
        self.closed = true;
        Ok(())
    }
}

impl<R, W> fmt::Debug for InputStream<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputStream")
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .field("window", &self.window)
            .field("content_rem", &self.content_rem)
            .field("padding_rem", &self.padding_rem)
            .field("skip", &self.skip)
            .field("terminated", &self.terminated)
            .field("closed", &self.closed)
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}
