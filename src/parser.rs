// https://redis.io/docs/reference/protocol-spec
//
// simple string: +OK\r\n
// error:         -ERR message\r\n
// integer:       :1000\r\n
// bulk string:   $3\r\nSET\r\n          (binary safe, $-1\r\n is nil)
// array:         *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::{FutureExt, Stream, StreamExt};
use thiserror::Error as ThisError;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, error, trace};

use crate::reply::{ErrorReply, Reply};

static CRLF: &[u8; 2] = b"\r\n";

pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;
pub const DEFAULT_MAX_INLINE_LEN: usize = 64 * 1024;
const MAX_MULTI_BULK_LEN: i64 = 1024 * 1024;
const MAX_BULK_RESERVE: usize = 64 * 1024;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The peer sent bytes that are not valid RESP. Decoding goes on with the next line.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Reading from the peer failed or the stream ended mid-message. Nothing follows it.
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no reply")]
    NoReply,
}

impl Error {
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

/// One decoded message, or the error that was found instead.
pub type Payload = Result<Reply, Error>;

#[derive(Clone, Copy, Debug, PartialEq)]
enum MsgType {
    Bulk,
    Array,
}

#[derive(Debug, Default)]
struct ReadState {
    reading_multi_line: bool,
    expected_args_count: usize,
    msg_type: Option<MsgType>,
    args: Vec<Reply>,
    // Set while a declared-length payload is pending.
    bulk_len: Option<usize>,
    // Bulk payloads carry no trailing CRLF (replication framing).
    reading_raw: bool,
}

impl ReadState {
    fn new(reading_raw: bool) -> ReadState {
        ReadState {
            reading_raw,
            ..Default::default()
        }
    }

    fn is_finished(&self) -> bool {
        self.expected_args_count > 0 && self.args.len() == self.expected_args_count
    }

    fn in_progress(&self) -> bool {
        self.reading_multi_line || self.bulk_len.is_some()
    }
}

enum Step {
    Emit(Payload),
    Continue,
    Incomplete,
}

/// Incremental RESP decoder. Every call to `decode` consumes as many complete lines as it can and
/// yields at most one payload, keeping partial messages in its state until more bytes arrive.
///
/// Protocol errors are yielded as items rather than codec errors so a `FramedRead` keeps going
/// after them. Only I/O failures end the stream.
#[derive(Debug)]
pub struct RespCodec {
    state: ReadState,
    raw: bool,
    max_bulk_len: usize,
    max_inline_len: usize,
}

impl RespCodec {
    pub fn new() -> RespCodec {
        RespCodec::with_limits(DEFAULT_MAX_BULK_LEN, DEFAULT_MAX_INLINE_LEN)
    }

    pub fn with_limits(max_bulk_len: usize, max_inline_len: usize) -> RespCodec {
        RespCodec {
            state: ReadState::default(),
            raw: false,
            max_bulk_len,
            max_inline_len,
        }
    }

    /// Reads bulk payloads without their trailing CRLF, as RDB and AOF transfers send them.
    pub fn raw_bulk(mut self) -> RespCodec {
        self.raw = true;
        self.state = ReadState::new(true);
        self
    }

    fn at_boundary(&self, buf: &BytesMut) -> bool {
        buf.is_empty() && !self.state.in_progress()
    }

    fn eof_error(&self, buf: &BytesMut) -> io::Error {
        let msg = if self.at_boundary(buf) {
            "connection closed by peer"
        } else {
            "stream ended in the middle of a message"
        };
        io::Error::new(io::ErrorKind::UnexpectedEof, msg)
    }

    fn reset(&mut self) {
        self.state = ReadState::new(self.raw);
    }

    fn emit(&mut self, reply: Reply) -> Step {
        self.reset();
        Step::Emit(Ok(reply))
    }

    fn fail(&mut self, msg: impl Into<String>) -> Step {
        let msg = msg.into();
        debug!("protocol error: {}", msg);
        self.reset();
        Step::Emit(Err(Error::Protocol(msg)))
    }

    fn read_line(&mut self, src: &mut BytesMut) -> Step {
        let end = match src.iter().position(|b| *b == b'\n') {
            Some(end) => end,
            None if src.len() > self.max_inline_len => {
                src.clear();
                return self.fail("too big inline request");
            }
            None => return Step::Incomplete,
        };

        let line = src.split_to(end + 1).freeze();
        if line.len() < 2 || line[line.len() - 2] != b'\r' {
            return self.fail(format!(
                "line is missing its CRLF terminator: {}",
                String::from_utf8_lossy(&line).escape_debug()
            ));
        }
        let line = line.slice(..line.len() - CRLF.len());
        trace!("read line {:?}", line);

        if self.state.reading_multi_line {
            return self.read_element(&line);
        }

        match line.first() {
            // Blank lines between commands are ignored.
            None => Step::Continue,
            Some(b'+') => {
                let s = String::from_utf8_lossy(&line[1..]).into_owned();
                self.emit(Reply::Simple(s))
            }
            Some(b'-') => {
                let s = String::from_utf8_lossy(&line[1..]);
                self.emit(Reply::Error(ErrorReply::from_line(&s)))
            }
            Some(b':') => match parse_int(&line[1..]) {
                Some(i) => self.emit(Reply::Integer(i)),
                None => self.fail("invalid integer"),
            },
            Some(b'$') => self.parse_bulk_header(&line),
            Some(b'*') => self.parse_multi_bulk_header(&line),
            Some(_) => self.parse_inline(&line),
        }
    }

    // $<length>
    fn parse_bulk_header(&mut self, line: &[u8]) -> Step {
        let len = match parse_int(&line[1..]) {
            Some(-1) => return self.emit(Reply::NullBulk),
            Some(len) if len >= 0 && len as u64 <= self.max_bulk_len as u64 => len as usize,
            _ => return self.fail("invalid bulk length"),
        };

        self.state.msg_type = Some(MsgType::Bulk);
        self.state.reading_multi_line = true;
        self.state.expected_args_count = 1;
        self.state.bulk_len = Some(len);
        Step::Continue
    }

    // *<number-of-elements>
    fn parse_multi_bulk_header(&mut self, line: &[u8]) -> Step {
        let count = match parse_int(&line[1..]) {
            Some(0) => return self.emit(Reply::EmptyArray),
            Some(-1) => return self.emit(Reply::NullArray),
            Some(count) if count > 0 && count <= MAX_MULTI_BULK_LEN => count as usize,
            _ => return self.fail("invalid multibulk length"),
        };

        self.state.msg_type = Some(MsgType::Array);
        self.state.reading_multi_line = true;
        self.state.expected_args_count = count;
        self.state.args = Vec::with_capacity(count.min(1024));
        Step::Continue
    }

    // A line read while collecting the elements of an array.
    fn read_element(&mut self, line: &[u8]) -> Step {
        match line.first() {
            Some(b'$') => match parse_int(&line[1..]) {
                Some(-1) => self.push_arg(Reply::NullBulk),
                Some(len) if len >= 0 && len as u64 <= self.max_bulk_len as u64 => {
                    self.state.bulk_len = Some(len as usize);
                    Step::Continue
                }
                _ => self.fail("invalid bulk length"),
            },
            Some(b':') => match parse_int(&line[1..]) {
                Some(i) => self.push_arg(Reply::Integer(i)),
                None => self.fail("invalid integer"),
            },
            Some(b'+') => {
                let s = String::from_utf8_lossy(&line[1..]).into_owned();
                self.push_arg(Reply::Simple(s))
            }
            Some(b'-') => {
                let s = String::from_utf8_lossy(&line[1..]);
                self.push_arg(Reply::Error(ErrorReply::from_line(&s)))
            }
            Some(b'*') => self.fail("nested arrays are not supported"),
            Some(&other) => self.fail(format!("expected '$', got '{}'", other as char)),
            None => self.fail("expected '$', got an empty line"),
        }
    }

    fn read_bulk_payload(&mut self, src: &mut BytesMut, len: usize) -> Step {
        let needed = if self.state.reading_raw {
            len
        } else {
            len + CRLF.len()
        };
        if src.len() < needed {
            // The buffer grows as bytes arrive, a declared length alone never allocates it.
            src.reserve((needed - src.len()).min(MAX_BULK_RESERVE));
            return Step::Incomplete;
        }

        let data = src.split_to(len).freeze();
        if !self.state.reading_raw {
            let terminated = &src[..CRLF.len()] == CRLF;
            src.advance(CRLF.len());
            if !terminated {
                return self.fail("bulk payload is missing its CRLF terminator");
            }
        }

        self.state.bulk_len = None;
        self.push_arg(Reply::Bulk(data))
    }

    fn push_arg(&mut self, arg: Reply) -> Step {
        self.state.args.push(arg);
        if !self.state.is_finished() {
            return Step::Continue;
        }

        let mut args = std::mem::take(&mut self.state.args);
        match self.state.msg_type {
            Some(MsgType::Bulk) => match args.pop() {
                Some(reply) => self.emit(reply),
                None => self.fail("missing bulk payload"),
            },
            _ => self.emit(Reply::Array(args)),
        }
    }

    // Inline commands are plain text split on whitespace, e.g. `PING\r\n` typed into telnet.
    fn parse_inline(&mut self, line: &Bytes) -> Step {
        let args: Vec<Bytes> = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| line.slice_ref(part))
            .collect();

        if args.is_empty() {
            return Step::Continue;
        }
        self.emit(Reply::multi_bulk(args))
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RespCodec {
    type Item = Payload;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let step = match self.state.bulk_len {
                Some(len) => self.read_bulk_payload(src, len),
                None => self.read_line(src),
            };

            match step {
                Step::Emit(payload) => return Ok(Some(payload)),
                Step::Continue => continue,
                Step::Incomplete => return Ok(None),
            }
        }
    }

    // The peer closing the stream is an I/O error like any other, reported once.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(payload) => Ok(Some(payload)),
            None => Err(self.eof_error(buf)),
        }
    }
}

fn parse_int(src: &[u8]) -> Option<i64> {
    std::str::from_utf8(src).ok()?.parse::<i64>().ok()
}

/// Receiving end of a stream decoder. Payloads arrive in the order their messages were completed.
/// The producer waits for each payload to be taken before decoding the next one, so a consumer
/// that stops reading stalls the connection.
#[derive(Debug)]
pub struct PayloadStream {
    rx: mpsc::Receiver<Payload>,
}

impl PayloadStream {
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

impl Stream for PayloadStream {
    type Item = Payload;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Decodes `reader` on its own task and returns the stream of payloads it produces.
///
/// A protocol error is reported once and decoding resumes on the next line. An I/O error is
/// reported once and ends the stream. A panic inside the decoder is logged and ends only this
/// stream.
pub fn parse_stream<R>(reader: R) -> PayloadStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    parse_stream_with(reader, RespCodec::new())
}

pub fn parse_stream_with<R>(reader: R, codec: RespCodec) -> PayloadStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let produce = AssertUnwindSafe(produce(reader, codec, tx));
        if let Err(panic) = produce.catch_unwind().await {
            error!("stream decoder panicked: {}", panic_message(&*panic));
        }
    });

    PayloadStream { rx }
}

async fn produce<R>(reader: R, codec: RespCodec, tx: mpsc::Sender<Payload>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, codec);

    loop {
        // Stop reading as soon as nobody is listening anymore.
        let item = tokio::select! {
            item = frames.next() => item,
            _ = tx.closed() => return,
        };
        let Some(item) = item else {
            return;
        };

        let (payload, fatal) = match item {
            Ok(payload) => (payload, false),
            Err(e) => {
                debug!("stream read failed: {}", e);
                (Err(Error::Io(e)), true)
            }
        };

        if !hand_off(&tx, payload).await || fatal {
            return;
        }
    }
}

// Returns false once the consumer is gone.
async fn hand_off(tx: &mpsc::Sender<Payload>, payload: Payload) -> bool {
    if tx.send(payload).await.is_err() {
        return false;
    }
    // The channel holds one payload. Its slot frees up only when the consumer has taken it.
    tx.reserve().await.is_ok()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Decodes exactly one message from `data`.
pub fn parse_one(data: &[u8]) -> Result<Reply, Error> {
    let mut codec = RespCodec::new();
    let mut buf = BytesMut::from(data);

    match codec.decode(&mut buf)? {
        Some(payload) => payload,
        None if codec.at_boundary(&buf) => Err(Error::NoReply),
        None => Err(Error::Io(codec.eof_error(&buf))),
    }
}
