use std::io::{self, Read, Write};
use std::process::ExitCode;

use fastcgi_app::protocol as fcgi;
use fastcgi_app::{Mode, Request, Server};


/// Handles a single FastCGI request. The returned value is reported to the
/// FastCGI client as the application status.
fn handler<R: Read, W: Write>(request: &mut Request<R, W>) -> io::Result<i32> {
    if request.role() != fcgi::Role::Responder {
        tracing::warn!(role = ?request.role(), "not a responder request");
        return Ok(1);
    }

    match (request.params().get_str(b"REQUEST_METHOD"), request.params().get_str(b"SCRIPT_NAME")) {
        (Some("POST"), Some("/echo")) => handle_echo(request),
        (Some("GET" | "POST"), _) => handle_env(request),
        _ => fallback(request),
    }
}

/// Print the CGI environment for arbitrary GET and POST requests.
fn handle_env<R: Read, W: Write>(request: &mut Request<R, W>) -> io::Result<i32> {
    let mut env: Vec<_> = request.params().iter()
        .map(|(n, v)| (String::from_utf8_lossy(n).into_owned(), v.to_vec()))
        .collect();
    env.sort_unstable();

    // Output records are buffered, so many small writes are fine
    let out = request.stdout();
    out.write_all(b"Status: 200 OK\r\nContent-Type: text/plain\r\n\r\nHello FastCGI!\n\n")?;
    for (name, val) in env {
        out.write_all(name.as_bytes())?;
        out.write_all(b"=")?;
        out.write_all(&val)?;
        out.write_all(b"\n")?;
    }
    Ok(0)
}

/// Echo the POSTed data back to the client.
fn handle_echo<R: Read, W: Write>(request: &mut Request<R, W>) -> io::Result<i32> {
    let content_len: u64 = request.params().get_str(b"CONTENT_LENGTH")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let (stdin, stdout, stderr) = request.streams();
    stdout.write_all(b"Status: 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n")?;
    let copied = io::copy(stdin, stdout)?;

    // CONTENT_LENGTH *should* match the stream length. If it doesn't,
    // something is wrong either with the webserver or this library.
    if copied != content_len {
        tracing::warn!(read = copied, expected = content_len, "echo input stream ended short");
        writeln!(stderr, "read {copied} bytes, expected {content_len}")?;
    }
    Ok(0)
}

/// Generate an error response for requests without a handler.
fn fallback<R: Read, W: Write>(request: &mut Request<R, W>) -> io::Result<i32> {
    request.stdout().write_all(
        b"Status: 501 Not Implemented\r\nContent-Type: text/plain\r\n\r\nHTTP method not implemented\n",
    )?;
    Ok(0)
}


fn main() -> ExitCode {
    init_tracing();
    // FCGI_PORT is set by the process manager. Without it, act as a plain CGI program.
    let config = match Mode::from_env() {
        Ok(Mode::FastCgi(config)) => config,
        Ok(Mode::PassThrough) => {
            print!("Content-Type: text/plain\r\n\r\nFCGI_PORT is not set, running as plain CGI\n");
            return ExitCode::SUCCESS;
        },
        Err(e) => {
            let error: &dyn std::error::Error = &e;
            tracing::error!(error, "invalid FastCGI configuration");
            return ExitCode::FAILURE;
        },
    };

    let config = config.stdout_buffer(16 * 1024);
    let server = match Server::bind(config) {
        Ok(s) => s,
        Err(e) => {
            let error: &dyn std::error::Error = &e;
            tracing::error!(error, "binding server failed");
            return ExitCode::FAILURE;
        },
    };
    server.serve(handler);
    ExitCode::SUCCESS
}


/// Sets up a basic `tracing` subscriber to stderr. Its verbosity level is
/// configured with the `RUST_LOG` environment variable.
fn init_tracing() {
    use tracing_subscriber::{filter::LevelFilter, fmt};
    let max_level = match std::env::var("RUST_LOG") {
        Ok(var) if !var.is_empty() => match var.parse::<LevelFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Ignoring `RUST_LOG={var}`: {e}");
                LevelFilter::INFO
            },
        },
        Ok(_) | Err(std::env::VarError::NotPresent) => LevelFilter::INFO,
        Err(e) => {
            eprintln!("Ignoring `RUST_LOG`: {e}");
            LevelFilter::INFO
        },
    };

    fmt::fmt()
        .with_timer(fmt::time::uptime())
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();
}
