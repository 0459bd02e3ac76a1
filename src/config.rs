use std::env;
use std::time::Duration;


/// The environment variable which selects FastCGI mode and its TCP port.
pub const PORT_VAR: &str = "FCGI_PORT";


/// Tunables of a FastCGI application server.
///
/// Buffer sizes are given in bytes. Output buffer sizes include the 8-byte
/// record header and are clamped to the largest possible record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// The TCP port to listen on.
    pub port: u16,
    /// The size of the raw input buffer of each connection.
    pub stdin_buffer: usize,
    /// The size of the Stdout record buffer of each request.
    pub stdout_buffer: usize,
    /// The size of the Stderr record buffer of each request.
    pub stderr_buffer: usize,
    /// The read timeout of accepted connections, if any.
    pub read_timeout: Option<Duration>,
    /// The write timeout of accepted connections, if any.
    pub write_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            stdin_buffer: 8192,
            stdout_buffer: 8192,
            stderr_buffer: 512,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl Config {
    /// The smallest usable raw input buffer, which holds one record header.
    const MIN_INPUT_BUFFER: usize = crate::protocol::RecordHeader::LEN;

    /// Creates a default [`Config`] listening on `port`.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self { port, ..Self::default() }
    }

    #[must_use]
    pub fn stdin_buffer(mut self, size: usize) -> Self {
        self.stdin_buffer = size;
        self
    }

    #[must_use]
    pub fn stdout_buffer(mut self, size: usize) -> Self {
        self.stdout_buffer = size;
        self
    }

    #[must_use]
    pub fn stderr_buffer(mut self, size: usize) -> Self {
        self.stderr_buffer = size;
        self
    }

    /// Sets the read timeout. A zero duration disables the timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Sets the write timeout. A zero duration disables the timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    #[inline]
    pub(crate) fn input_buffer_size(&self) -> usize {
        self.stdin_buffer.max(Self::MIN_INPUT_BUFFER)
    }
}


/// An error in the FastCGI environment configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The port variable is present but empty.
    #[error("FCGI_PORT is set but empty")]
    EmptyPort,
    /// The port variable does not hold a valid TCP port.
    #[error("FCGI_PORT value {0:?} is not a valid TCP port")]
    InvalidPort(String),
}


/// How the application was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Serve FastCGI connections with the given configuration.
    FastCgi(Config),
    /// Not started by a FastCGI process manager. The application should
    /// fall back to its regular (e.g. plain CGI) behavior.
    PassThrough,
}

impl Mode {
    /// Determines the mode from the `FCGI_PORT` environment variable.
    ///
    /// # Errors
    /// Returns an error if the variable is set, but does not hold a valid
    /// TCP port.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(PORT_VAR) {
            Ok(v) => Self::from_var(Some(&v)),
            Err(env::VarError::NotPresent) => Self::from_var(None),
            Err(env::VarError::NotUnicode(v)) => {
                Err(ConfigError::InvalidPort(v.to_string_lossy().into_owned()))
            },
        }
    }

    /// Determines the mode from a raw value of the `FCGI_PORT` variable.
    ///
    /// # Errors
    /// See [`Mode::from_env`].
    pub fn from_var(value: Option<&str>) -> Result<Self, ConfigError> {
        let Some(value) = value else {
            tracing::debug!("{PORT_VAR} not set, using pass-through mode");
            return Ok(Self::PassThrough);
        };

        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyPort);
        }
        let port = trimmed.parse().map_err(|_| ConfigError::InvalidPort(value.to_owned()))?;
        tracing::debug!(port, "using FastCGI mode");
        Ok(Self::FastCgi(Config::with_port(port)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.stdin_buffer, 8192);
        assert_eq!(config.stdout_buffer, 8192);
        assert_eq!(config.stderr_buffer, 512);
        assert_eq!(config.read_timeout, None);

        let config = Config::with_port(9000)
            .stdin_buffer(3)
            .read_timeout(Duration::from_secs(5))
            .write_timeout(Duration::ZERO);
        assert_eq!(config.port, 9000);
        assert_eq!(config.input_buffer_size(), 8);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.write_timeout, None);
    }

    #[test]
    fn mode_selection() {
        assert_eq!(Mode::from_var(None), Ok(Mode::PassThrough));
        assert_eq!(Mode::from_var(Some("9000")), Ok(Mode::FastCgi(Config::with_port(9000))));
        assert_eq!(Mode::from_var(Some(" 80\n")), Ok(Mode::FastCgi(Config::with_port(80))));

        assert_eq!(Mode::from_var(Some("")), Err(ConfigError::EmptyPort));
        assert_eq!(Mode::from_var(Some("http")), Err(ConfigError::InvalidPort("http".into())));
        assert_eq!(Mode::from_var(Some("65536")), Err(ConfigError::InvalidPort("65536".into())));
    }
}
