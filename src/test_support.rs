//! Record builders and I/O doubles shared by the unit tests.
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::iter::repeat_with;
use std::rc::Rc;

use crate::protocol::{self as fcgi, body, RecordHeader, RecordType};


pub(crate) const BYTES: &[u8] = b"\x1f\x9a\xdaM\xeb\x82U\xb8\xfe\xf4\xb0\xc7\x80\x95\xc6\
    \xdf\xa3\xd3O,\xae\xa3\xa8x\x18@\x9a\xf7\x0f\xd6\x18\xbdv\x90\x80I\xa1\x99\xf8\xec";

pub(crate) const PARAMS: &[(&[u8], &[u8])] = &[
    (b"SCRIPT_NAME", b"/index.fcgi"),
    (b"GATEWAY_INTERFACE", b"CGI/1.1"),
    (b"CONTENT_LENGTH", b"67828"),
    (b"REQUEST_METHOD", b"POST"),
    (b"HTTP_AUTHORIZATION", b"Bearer FAKE-xi/atccvRF7tN7p8J4Vw+KJ3AhikzBNhIBo0zQc7be5E"),
    (b"HTTP_X_NOT_UTF8", BYTES),
    (b"QUERY_STRING", b"a=1&b=%20"),
    (b"CONTENT_TYPE", b"text/plain"),
];

pub(crate) const VALS_RESULT_ALL: &[u8] = b"\x01\x0a\0\0\x00\x33\x05\0\x0e\x01FCGI_MAX_CONNS1\
    \x0d\x01FCGI_MAX_REQS1\x0f\x01FCGI_MPXS_CONNS0\0\0\0\0\0";


pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    repeat_with(|| fastrand::u8(..)).take(len).collect()
}

pub(crate) fn add_begin(buf: &mut Vec<u8>, req_id: u16, role: fcgi::Role, flags: fcgi::RequestFlags) {
    buf.extend(body::BeginRequest { role, flags }.to_record(req_id));
}

pub(crate) fn add_abort(buf: &mut Vec<u8>, req_id: u16) {
    buf.extend(RecordHeader::new(RecordType::AbortRequest, req_id).to_bytes());
}

/// Adds a record of arbitrary type and random content.
pub(crate) fn add_raw(buf: &mut Vec<u8>, req_id: u16, rtype: u8, len: u16) {
    let head = RecordHeader {
        rtype, content_length: len,
        ..RecordHeader::new(RecordType::Unknown, req_id)
    };
    buf.extend(head.to_bytes());
    buf.extend(random_bytes(len.into()));
}

pub(crate) fn add_get_values(buf: &mut Vec<u8>, names: &[&[u8]]) {
    let mut payload = Vec::new();
    for &name in names {
        fcgi::nv::write((name, &b""[..]), &mut payload).unwrap();
    }
    let mut head = RecordHeader::new(RecordType::GetValues, fcgi::FCGI_NULL_REQUEST_ID);
    head.content_length = payload.len() as u16;
    buf.extend(head.to_bytes());
    buf.extend(payload);
}

/// Splits `data` into records of the given content lengths, followed by
/// records of maximum size and the terminating empty record.
pub(crate) fn add_stream(buf: &mut Vec<u8>, req_id: u16, stream: RecordType, mut data: &[u8], lens: &[u16]) {
    assert!(stream.is_input_stream());
    let mut head = RecordHeader::new(stream, req_id);
    let mut lens = lens.iter().copied().filter(|&l| l > 0);
    while !data.is_empty() {
        let len = usize::from(lens.next().unwrap_or(u16::MAX)).min(data.len());
        head.content_length = len as u16;
        buf.extend(head.to_bytes());
        buf.extend(&data[..len]);
        data = &data[len..];
    }

    head.content_length = 0;
    buf.extend(head.to_bytes());
}

pub(crate) fn add_params(buf: &mut Vec<u8>, req_id: u16, params: &[(&[u8], &[u8])], lens: &[u16]) {
    let mut payload = Vec::new();
    for &nv in params {
        fcgi::nv::write(nv, &mut payload).unwrap();
    }
    add_stream(buf, req_id, RecordType::Params, &payload, lens);
}

/// Replaces the padding of every record with a random amount of random bytes.
pub(crate) fn randomize_padding(buf: &mut Vec<u8>) {
    let mut head_start = 0;
    while let Some(head) = buf.get_mut(head_start..(head_start + 8)) {
        let payload = u16::from_be_bytes([head[4], head[5]]);
        let old_pad = head[6];
        let new_pad = fastrand::u8(..);
        head[6] = new_pad;

        head_start += 8 + usize::from(payload);
        buf.splice(
            head_start..(head_start + usize::from(old_pad)),
            repeat_with(|| fastrand::u8(..)).take(new_pad.into()),
        );
        head_start += usize::from(new_pad);
    }
}

/// Splits an output byte stream into its records, dropping padding.
pub(crate) fn parse_records(mut out: &[u8]) -> Vec<(RecordHeader, Vec<u8>)> {
    let mut records = Vec::new();
    while !out.is_empty() {
        let head = RecordHeader::from_bytes(out[..8].try_into().unwrap());
        let content_end = 8 + usize::from(head.content_length);
        records.push((head, out[8..content_end].to_vec()));
        out = &out[content_end + usize::from(head.padding_length)..];
    }
    records
}


/// A reader which hands out its input in small chunks.
#[derive(Debug)]
pub(crate) struct Chunked<'a> {
    data: &'a [u8],
    max: usize,
}

impl<'a> Chunked<'a> {
    /// Every read returns between 1 and `max` bytes.
    pub(crate) fn new(data: &'a [u8], max: usize) -> Self {
        assert!(max > 0);
        Self { data, max }
    }
}

impl Read for Chunked<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = fastrand::usize(1..=self.max).min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}


/// A writer whose output remains accessible after it was moved away.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub(crate) fn records(&self) -> Vec<(RecordHeader, Vec<u8>)> {
        parse_records(&self.0.borrow())
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}


/// A writer which fails every operation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Broken;

impl Write for Broken {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::ErrorKind::BrokenPipe.into())
    }
}
