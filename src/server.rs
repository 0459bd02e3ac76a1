use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::request::{Connection, Phase, Request};
use crate::stream::Error;


/// A source of FastCGI connections.
///
/// Each accepted connection is split into a read and a write half, as
/// streams of a connection read and write independently.
pub trait Listener {
    /// The read half of an accepted connection.
    type Reader: Read + Send + 'static;
    /// The write half of an accepted connection.
    type Writer: Write + Send + 'static;

    /// Waits for the next connection and applies the transport settings of
    /// `config` to it. Also returns a description of the peer.
    ///
    /// # Errors
    /// Any errors from accepting or configuring the connection are forwarded
    /// to the caller.
    fn accept(&self, config: &Config) -> io::Result<(Self::Reader, Self::Writer, String)>;

    /// Describes the local address this listener is bound to.
    ///
    /// # Errors
    /// Any errors from querying the address are forwarded to the caller.
    fn local_addr(&self) -> io::Result<String>;
}

impl Listener for TcpListener {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn accept(&self, config: &Config) -> io::Result<(TcpStream, TcpStream, String)> {
        let (stream, remote) = TcpListener::accept(self)?;
        // Records are buffered already and should be sent right away
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        let writer = stream.try_clone()?;
        Ok((stream, writer, remote.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        TcpListener::local_addr(self).map(|a| a.to_string())
    }
}

#[cfg(unix)]
impl Listener for std::os::unix::net::UnixListener {
    type Reader = std::os::unix::net::UnixStream;
    type Writer = std::os::unix::net::UnixStream;

    fn accept(&self, config: &Config) -> io::Result<(Self::Reader, Self::Writer, String)> {
        let (stream, remote) = std::os::unix::net::UnixListener::accept(self)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        let writer = stream.try_clone()?;
        Ok((stream, writer, format!("{remote:?}")))
    }

    fn local_addr(&self) -> io::Result<String> {
        std::os::unix::net::UnixListener::local_addr(self).map(|a| format!("{a:?}"))
    }
}


/// A blocking FastCGI server which serves every connection on its own thread.
#[derive(Debug)]
pub struct Server<L> {
    listener: L,
    config: Arc<Config>,
}

impl Server<TcpListener> {
    /// Listens for FastCGI connections on all interfaces at `config.port`.
    ///
    /// # Errors
    /// Any errors from binding the TCP socket are forwarded to the caller.
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port))?;
        Ok(Self::new(listener, config))
    }
}

impl<L: Listener> Server<L> {
    pub fn new(listener: L, config: impl Into<Arc<Config>>) -> Self {
        Self { listener, config: config.into() }
    }

    #[inline]
    #[must_use]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Waits for the next FastCGI connection.
    ///
    /// # Errors
    /// See [`Listener::accept`].
    pub fn accept(&self) -> io::Result<(Connection<L::Reader, L::Writer>, String)> {
        let (reader, writer, remote) = self.listener.accept(&self.config)?;
        Ok((Connection::new(reader, writer, Arc::clone(&self.config)), remote))
    }

    /// Accepts connections forever, handling each on a new thread with
    /// [`serve_connection`].
    ///
    /// Failures to accept a connection are logged and do not stop the server.
    pub fn serve<H>(&self, handler: H)
    where
        H: Fn(&mut Request<L::Reader, L::Writer>) -> io::Result<i32> + Send + Sync + 'static,
    {
        let local = self.listener.local_addr().unwrap_or_default();
        tracing::info!(%local, "server created");
        let handler = Arc::new(handler);

        loop {
            let (conn, remote) = match self.accept() {
                Ok(c) => c,
                Err(e) => {
                    let error: &dyn std::error::Error = &e;
                    tracing::info!(%local, error, "accept failed");
                    continue;
                },
            };

            let span = tracing::error_span!("fastcgi_connection", %local, %remote);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name("fastcgi-connection".into())
                .spawn(move || {
                    let _entered = span.enter();
                    tracing::debug!("new connection accepted");
                    if let Err(error) = serve_connection(conn, &*handler) {
                        tracing::debug!(%error, "connection closed after error");
                    }
                });
            if let Err(e) = spawned {
                let error: &dyn std::error::Error = &e;
                tracing::error!(%remote, error, "spawning connection thread failed");
            }
        }
    }
}


/// Serves sequential requests on a single connection until it is closed.
///
/// The handler's return value becomes the application status of the request.
/// If the handler fails, the request is finished with status 1 and the
/// connection is closed.
///
/// # Errors
/// Protocol violations and transport errors end the connection and are
/// returned to the caller.
pub fn serve_connection<R, W, H>(mut conn: Connection<R, W>, handler: &H) -> Result<(), Error>
where
    R: Read,
    W: Write,
    H: Fn(&mut Request<R, W>) -> io::Result<i32> + ?Sized,
{
    loop {
        let mut request = match conn.accept() {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::debug!("connection closed by peer");
                return Ok(());
            },
            Err(e) => {
                tracing::warn!(error = %e, "reading request failed");
                return Err(e);
            },
        };

        let span = tracing::debug_span!("request", request_id = request.id());
        let _entered = span.enter();
        let healthy = match handler(&mut request) {
            Ok(status) => {
                request.set_app_status(status);
                true
            },
            Err(e) => {
                let error: &dyn std::error::Error = &e;
                tracing::error!(error, "request handler failed");
                request.set_app_status(1);
                false
            },
        };

        match request.finish() {
            Ok(next) if healthy && next.phase() == Phase::Idle => conn = next,
            Ok(_) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
