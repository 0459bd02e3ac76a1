//! An application-side FastCGI engine with blocking streams.
//!
//! A FastCGI client (usually an HTTP server) sends requests as framed records
//! over a connection. This crate turns those records into a [`Request`] with
//! its CGI/1.1 environment, a readable Stdin (or Data) stream and writable
//! Stdout and Stderr streams. Each connection carries one request at a time
//! and may be kept alive for subsequent requests.
//!
//! ```no_run
//! use std::io::Write;
//! use fastcgi_app::{Config, Server};
//!
//! let server = Server::bind(Config::with_port(9000))?;
//! server.serve(|request| {
//!     request.stdout().write_all(b"Content-Type: text/plain\r\n\r\nHello!")?;
//!     Ok(0)
//! });
//! # Ok::<(), std::io::Error>(())
//! ```
#![deny(unsafe_code, single_use_lifetimes, unused_lifetimes)]
#![warn(keyword_idents, let_underscore_drop, unreachable_pub, unused_import_braces)]

#![deny(clippy::suspicious, clippy::cargo)]
#![deny(clippy::exit, clippy::semicolon_inside_block, clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::multiple_crate_versions)]
#![allow(clippy::enum_glob_use, clippy::items_after_statements, clippy::module_name_repetitions)]


mod macros;

// Based on the FastCGI specification (especially Section 8)
// See: https://fastcgi-archives.github.io/FastCGI_Specification.html
pub mod protocol;

pub mod config;
pub mod request;
pub mod server;
pub mod stream;

pub use config::{Config, ConfigError, Mode};
pub use request::{Connection, Params, Phase, Request};
pub use server::{serve_connection, Listener, Server};
pub use stream::{ByteStream, Error, InputStream, OutputStream};

#[cfg(test)]
mod test_support;
