use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::iter::FusedIterator;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::Config;
use crate::protocol::{self as fcgi, body, nv::{self, SmallBytes}, RecordType};
use crate::stream::{ByteStream, Error, InputStream, OutputStream, RawInput};


/// The lifecycle phase of a request on its connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for the next BeginRequest record.
    #[default]
    Idle,
    /// A BeginRequest was accepted. Params are being read.
    BeginReceived,
    /// The Params stream was read completely.
    ParamsRead,
    /// The application is reading input and writing output.
    Active,
    /// Both output streams were closed and EndRequest was sent.
    Completed,
    /// The connection will not carry further requests.
    ConnectionClosed,
}


/// Per-request bookkeeping shared by all streams of a connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestState {
    /// The active request ID, or 0 while no request has begun.
    pub(crate) id: u16,
    pub(crate) begin: Option<body::BeginRequest>,
    pub(crate) app_status: i32,
    /// The number of output streams not closed yet.
    pub(crate) writers: u8,
    pub(crate) phase: Phase,
}

impl RequestState {
    #[inline]
    pub(crate) fn began(&self) -> bool {
        self.begin.is_some()
    }

    pub(crate) fn activate(&mut self, id: u16, begin: body::BeginRequest) {
        debug_assert_ne!(id, fcgi::FCGI_NULL_REQUEST_ID);
        self.id = id;
        self.begin = Some(begin);
        self.phase = Phase::BeginReceived;
    }
}


/// The connection's output together with the state of its current request.
#[derive(Debug)]
pub(crate) struct Link<W> {
    pub(crate) out: W,
    pub(crate) state: RequestState,
}

/// Streams of one connection run on a single thread and share its output.
pub(crate) type Shared<W> = Rc<RefCell<Link<W>>>;

impl<W> Link<W> {
    pub(crate) fn shared(out: W) -> Shared<W> {
        Rc::new(RefCell::new(Self { out, state: RequestState::default() }))
    }
}


/// The CGI/1.1 environment of a request, as received in its Params stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<SmallBytes, SmallBytes>);

impl Params {
    /// Returns the number of environment variables.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tests whether the given variable name is part of the environment.
    #[must_use]
    pub fn contains(&self, name: &[u8]) -> bool {
        self.0.contains_key(name)
    }

    /// Retrieves the value stored for the variable name, if there is one.
    #[must_use]
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.0.get(name).map(AsRef::as_ref)
    }

    /// Attempts to retrieve the string value stored for the variable name.
    ///
    /// Returns [`None`] if there is no corresponding value *or if the value
    /// is not valid UTF-8*. Use `Params::get` if you are interested in the
    /// raw bytes and want to decode them manually.
    #[must_use]
    pub fn get_str(&self, name: &[u8]) -> Option<&str> {
        self.get(name).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Returns an iterator over all environment variables.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&[u8], &[u8])>
            + FusedIterator + Clone + Debug + '_
    {
        self.0.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }
}

impl From<HashMap<SmallBytes, SmallBytes>> for Params {
    #[inline]
    fn from(map: HashMap<SmallBytes, SmallBytes>) -> Self {
        Self(map)
    }
}


/// A FastCGI connection between requests.
///
/// The connection is consumed by `Connection::accept`, which waits for the
/// next request. Finishing that request hands the connection back in
/// [`Phase::Idle`] if the FastCGI client asked to keep it open, or in
/// [`Phase::ConnectionClosed`] otherwise.
pub struct Connection<R, W> {
    input: RawInput<R>,
    output: W,
    config: Arc<Config>,
    phase: Phase,
}

impl<R, W> Connection<R, W> {
    /// Creates a new connection from the two halves of a transport.
    pub fn new(input: R, output: W, config: impl Into<Arc<Config>>) -> Self {
        let config = config.into();
        let input = RawInput::new(input, config.input_buffer_size());
        Self { input, output, config, phase: Phase::Idle }
    }

    /// Returns [`Phase::ConnectionClosed`] once the connection must not carry
    /// further requests, and [`Phase::Idle`] before that.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the configuration used for this connection.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Splits the connection into its transport halves. Input that was
    /// already buffered is lost.
    #[must_use]
    pub fn into_parts(self) -> (R, W) {
        (self.input.into_inner(), self.output)
    }
}

impl<R: Read, W: Write> Connection<R, W> {
    /// Waits for the next request on this connection and reads its Params.
    ///
    /// Management records and records of other requests arriving first are
    /// handled internally. Requests for unknown roles are rejected and the
    /// wait continues.
    ///
    /// Returns [`None`] if the FastCGI client closed the connection between
    /// requests, or if the connection is in [`Phase::ConnectionClosed`].
    ///
    /// # Errors
    /// Protocol violations and transport errors end the connection and are
    /// returned to the caller.
    pub fn accept(self) -> Result<Option<Request<R, W>>, Error> {
        if self.phase == Phase::ConnectionClosed {
            tracing::debug!("connection closed after last request");
            return Ok(None);
        }
        let Self { input, output, config, .. } = self;
        let link = Link::shared(output);

        let mut stdin = InputStream::new(input, Rc::clone(&link));
        stdin.await_begin();
        if let Some(e) = stdin.take_error() {
            return Err(e);
        }
        let (request_id, role) = match link.borrow().state.begin {
            Some(begin) => (link.borrow().state.id, begin.role),
            None => return Ok(None),
        };

        stdin.retype(RecordType::Params);
        let params = nv::read_all(&mut stdin);
        if let Some(e) = stdin.take_error() {
            return Err(e);
        }
        let params = params.map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Params,
            _ => Error::Transport(e),
        })?;
        tracing::debug!(request_id, ?role, params = params.len(), "request params received");
        link.borrow_mut().state.phase = Phase::ParamsRead;

        stdin.retype(RecordType::Stdin);
        let stdout = OutputStream::new(Rc::clone(&link), RecordType::Stdout, config.stdout_buffer);
        let stderr = OutputStream::new(Rc::clone(&link), RecordType::Stderr, config.stderr_buffer);
        {
            let mut link = link.borrow_mut();
            link.state.writers = 2;
            link.state.phase = Phase::Active;
        }

        Ok(Some(Request { link, stdin, stdout, stderr, params: params.into(), config }))
    }
}

impl<R, W> Debug for Connection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("input", &self.input)
            .field("config", &self.config)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}


/// An active FastCGI request.
///
/// The request's input arrives on `Request::stdin`, which reads the Stdin
/// stream (or the Data stream, after `Request::open_data`). The response is
/// written to `Request::stdout` and `Request::stderr`.
///
/// A request must be completed with `Request::finish`, which closes both
/// output streams and sends the EndRequest record.
pub struct Request<R, W> {
    link: Shared<W>,
    stdin: InputStream<R, W>,
    stdout: OutputStream<W>,
    stderr: OutputStream<W>,
    params: Params,
    config: Arc<Config>,
}

impl<R, W> Request<R, W> {
    /// Returns the ID of this request.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u16 {
        self.link.borrow().state.id
    }

    fn begin(&self) -> body::BeginRequest {
        self.link.borrow().state.begin.unwrap_or(body::BeginRequest {
            role: fcgi::Role::Responder,
            flags: fcgi::RequestFlags::empty(),
        })
    }

    /// Returns the role of the FastCGI application in this request.
    #[inline]
    #[must_use]
    pub fn role(&self) -> fcgi::Role {
        self.begin().role
    }

    /// Tests whether the connection should be kept open after this request.
    #[inline]
    #[must_use]
    pub fn keep_conn(&self) -> bool {
        self.begin().flags.contains(fcgi::RequestFlags::KeepConn)
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.link.borrow().state.phase
    }

    /// Returns the CGI/1.1 environment of this request.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Retrieves a single environment variable. See [`Params::get`].
    #[inline]
    #[must_use]
    pub fn param(&self, name: &[u8]) -> Option<&[u8]> {
        self.params.get(name)
    }

    #[inline]
    pub fn stdin(&mut self) -> &mut InputStream<R, W> {
        &mut self.stdin
    }

    #[inline]
    pub fn stdout(&mut self) -> &mut OutputStream<W> {
        &mut self.stdout
    }

    #[inline]
    pub fn stderr(&mut self) -> &mut OutputStream<W> {
        &mut self.stderr
    }

    /// Borrows all three streams at once.
    #[inline]
    pub fn streams(&mut self) -> (&mut InputStream<R, W>, &mut OutputStream<W>, &mut OutputStream<W>) {
        (&mut self.stdin, &mut self.stdout, &mut self.stderr)
    }

    /// Returns the application status reported in the EndRequest record.
    #[inline]
    #[must_use]
    pub fn app_status(&self) -> i32 {
        self.link.borrow().state.app_status
    }

    /// Sets the application status, as would be set via exit(3) in regular
    /// CGI. It takes effect when the last output stream is closed.
    #[inline]
    pub fn set_app_status(&mut self, status: i32) {
        self.link.borrow_mut().state.app_status = status;
    }
}

impl<R: Read, W: Write> Request<R, W> {
    /// Switches the input stream from Stdin to the Data stream of a
    /// Filter request.
    ///
    /// # Errors
    /// Fails unless this is a Filter request whose Stdin was read up to its
    /// end.
    pub fn open_data(&mut self) -> Result<(), Error> {
        if !self.role().is_stream_ok(RecordType::Data) {
            return Err(Error::CallSequence("only Filter requests carry a Data stream"));
        }
        if self.stdin.stream_type() != Some(RecordType::Stdin) {
            return Err(Error::CallSequence("the Data stream is already open"));
        }
        if self.stdin.error().is_none() && !self.stdin.is_finished() {
            return Err(Error::CallSequence("Stdin must be read to its end before Data"));
        }
        tracing::debug!(request_id = self.id(), "Data stream opened");
        self.stdin.retype(RecordType::Data);
        Ok(())
    }

    /// Completes the request by closing both output streams, which sends the
    /// EndRequest record with the current application status.
    ///
    /// Hands back the [`Connection`]. Its phase is [`Phase::Idle`] if the
    /// FastCGI client asked to keep it open for the next request, and
    /// [`Phase::ConnectionClosed`] if it should be closed.
    ///
    /// # Errors
    /// The first error encountered by any stream of this request is returned.
    /// The connection is dropped in that case.
    pub fn finish(mut self) -> Result<Connection<R, W>, Error> {
        let request_id = self.id();
        let keep_conn = self.keep_conn();
        for out in [&mut self.stdout, &mut self.stderr] {
            // Recorded in the stream and collected below
            if let Err(error) = out.close() {
                tracing::debug!(%error, "closing output stream failed");
            }
        }

        if keep_conn {
            self.stdin.discard();
        }

        let Self { link, mut stdin, mut stdout, mut stderr, config, .. } = self;
        let fault = stdin.take_error()
            .or_else(|| stdout.take_error())
            .or_else(|| stderr.take_error());
        let input = stdin.into_raw();
        drop((stdout, stderr));

        let Ok(link) = Rc::try_unwrap(link) else {
            return Err(Error::CallSequence("request streams are still in use"));
        };
        let Link { out, .. } = link.into_inner();

        if let Some(e) = fault {
            tracing::warn!(request_id, error = %e, "request failed, closing connection");
            return Err(e);
        }
        let phase = if keep_conn { Phase::Idle } else { Phase::ConnectionClosed };
        tracing::debug!(request_id, ?phase, "request finished");
        Ok(Connection { input, output: out, config, phase })
    }
}

impl<R, W> Debug for Request<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("state", &self.link.borrow().state)
            .field("params", &self.params)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish_non_exhaustive()
    }
}
