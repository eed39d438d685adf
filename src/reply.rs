// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

static PONG_BYTES: &[u8] = b"+PONG\r\n";
static OK_BYTES: &[u8] = b"+OK\r\n";
static NULL_BULK_BYTES: &[u8] = b"$-1\r\n";
static EMPTY_ARRAY_BYTES: &[u8] = b"*0\r\n";
static NULL_ARRAY_BYTES: &[u8] = b"*-1\r\n";
static NO_BYTES: &[u8] = b"";
static QUEUED_BYTES: &[u8] = b"+QUEUED\r\n";
static UNKNOWN_ERR_BYTES: &[u8] = b"-Err unknown\r\n";
static SYNTAX_ERR_BYTES: &[u8] = b"-Err syntax error\r\n";
static WRONG_TYPE_ERR_BYTES: &[u8] =
    b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";

// Shared instances of the replies that carry no data. They are never mutated, so every
// connection can hand them out without allocating.
pub static PONG: Reply = Reply::Pong;
pub static OK: Reply = Reply::Ok;
pub static NULL_BULK: Reply = Reply::NullBulk;
pub static EMPTY_ARRAY: Reply = Reply::EmptyArray;
pub static NO_REPLY: Reply = Reply::NoReply;
pub static QUEUED: Reply = Reply::Queued;
pub static UNKNOWN_ERR: Reply = Reply::Error(ErrorReply::Unknown);
pub static SYNTAX_ERR: Reply = Reply::Error(ErrorReply::Syntax);
pub static WRONG_TYPE_ERR: Reply = Reply::Error(ErrorReply::WrongType);

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Pong,
    Ok,
    Simple(String),
    Error(ErrorReply),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Reply>),
    EmptyArray,
    NullArray,
    /// Writes nothing at all, used when a command must stay silent.
    NoReply,
    Queued,
}

/// The error kinds a server sends back. Fixed kinds serialize to a constant line, `Other` keeps
/// whatever error line was read from the wire.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum ErrorReply {
    #[error("Err unknown")]
    Unknown,
    #[error("ERR wrong number of arguments for '{0}' command")]
    ArgNum(String),
    #[error("Err syntax error")]
    Syntax,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR Protocol error: '{0}'")]
    Protocol(String),
    #[error("{0}")]
    Other(String),
}

impl ErrorReply {
    /// Maps an error line (without the leading `-` and the trailing CRLF) back to its kind.
    pub fn from_line(line: &str) -> ErrorReply {
        const ARG_NUM_PREFIX: &str = "ERR wrong number of arguments for '";
        const ARG_NUM_SUFFIX: &str = "' command";
        const PROTOCOL_PREFIX: &str = "ERR Protocol error: '";

        match line {
            "Err unknown" => return ErrorReply::Unknown,
            "Err syntax error" => return ErrorReply::Syntax,
            "WRONGTYPE Operation against a key holding the wrong kind of value" => {
                return ErrorReply::WrongType
            }
            _ => {}
        }

        if let Some(cmd) = line
            .strip_prefix(ARG_NUM_PREFIX)
            .and_then(|rest| rest.strip_suffix(ARG_NUM_SUFFIX))
        {
            return ErrorReply::ArgNum(cmd.to_string());
        }

        if let Some(msg) = line
            .strip_prefix(PROTOCOL_PREFIX)
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return ErrorReply::Protocol(msg.to_string());
        }

        ErrorReply::Other(line.to_string())
    }
}

impl Reply {
    pub fn simple(s: impl Into<String>) -> Reply {
        Reply::Simple(s.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }

    pub fn arg_num_err(cmd: impl Into<String>) -> Reply {
        Reply::Error(ErrorReply::ArgNum(cmd.into()))
    }

    pub fn protocol_err(msg: impl Into<String>) -> Reply {
        Reply::Error(ErrorReply::Protocol(msg.into()))
    }

    /// Builds an array of bulk strings, collapsing to the empty array sentinel when there are no
    /// elements.
    pub fn multi_bulk<I, B>(args: I) -> Reply
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let elems: Vec<Reply> = args.into_iter().map(|b| Reply::Bulk(b.into())).collect();
        if elems.is_empty() {
            Reply::EmptyArray
        } else {
            Reply::Array(elems)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Wire bytes of the reply. Replies that carry no data point at static memory.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Reply::Pong => Bytes::from_static(PONG_BYTES),
            Reply::Ok => Bytes::from_static(OK_BYTES),
            Reply::NullBulk => Bytes::from_static(NULL_BULK_BYTES),
            Reply::EmptyArray => Bytes::from_static(EMPTY_ARRAY_BYTES),
            Reply::NullArray => Bytes::from_static(NULL_ARRAY_BYTES),
            Reply::NoReply => Bytes::from_static(NO_BYTES),
            Reply::Queued => Bytes::from_static(QUEUED_BYTES),
            Reply::Error(ErrorReply::Unknown) => Bytes::from_static(UNKNOWN_ERR_BYTES),
            Reply::Error(ErrorReply::Syntax) => Bytes::from_static(SYNTAX_ERR_BYTES),
            Reply::Error(ErrorReply::WrongType) => Bytes::from_static(WRONG_TYPE_ERR_BYTES),
            _ => {
                let mut buf = BytesMut::new();
                self.write_to(&mut buf);
                buf.freeze()
            }
        }
    }

    /// Appends the wire bytes of the reply to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Reply::Simple(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Error(err) => {
                buf.put_u8(b'-');
                buf.put_slice(err.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            // $<length>\r\n<data>\r\n
            Reply::Bulk(data) => {
                let length = data.len().to_string();
                buf.reserve(1 + length.len() + CRLF.len() + data.len() + CRLF.len());
                buf.put_u8(b'$');
                buf.put_slice(length.as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            Reply::Array(elems) => {
                buf.put_u8(b'*');
                buf.put_slice(elems.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for elem in elems {
                    elem.write_to(buf);
                }
            }
            Reply::Pong => buf.put_slice(PONG_BYTES),
            Reply::Ok => buf.put_slice(OK_BYTES),
            Reply::NullBulk => buf.put_slice(NULL_BULK_BYTES),
            Reply::EmptyArray => buf.put_slice(EMPTY_ARRAY_BYTES),
            Reply::NullArray => buf.put_slice(NULL_ARRAY_BYTES),
            Reply::NoReply => {}
            Reply::Queued => buf.put_slice(QUEUED_BYTES),
        }
    }
}

impl From<Reply> for Bytes {
    fn from(reply: Reply) -> Self {
        reply.to_bytes()
    }
}

impl From<Reply> for Vec<u8> {
    fn from(reply: Reply) -> Self {
        reply.to_bytes().to_vec()
    }
}

impl From<ErrorReply> for Reply {
    fn from(err: ErrorReply) -> Self {
        Reply::Error(err)
    }
}

// Rendered for logs only, bulk payloads are shown lossily.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Pong => write!(f, "+PONG"),
            Reply::Ok => write!(f, "+OK"),
            Reply::Simple(s) => write!(f, "+{}", s),
            Reply::Error(err) => write!(f, "-{}", err),
            Reply::Integer(i) => write!(f, ":{}", i),
            Reply::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Reply::NullBulk => write!(f, "$-1"),
            Reply::Array(elems) => {
                write!(f, "*{}", elems.len())?;
                for elem in elems {
                    write!(f, " {}", elem)?;
                }
                Ok(())
            }
            Reply::EmptyArray => write!(f, "*0"),
            Reply::NullArray => write!(f, "*-1"),
            Reply::NoReply => Ok(()),
            Reply::Queued => write!(f, "+QUEUED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_fixed_replies() {
        assert_eq!(PONG.to_bytes(), &b"+PONG\r\n"[..]);
        assert_eq!(OK.to_bytes(), &b"+OK\r\n"[..]);
        assert_eq!(NULL_BULK.to_bytes(), &b"$-1\r\n"[..]);
        assert_eq!(EMPTY_ARRAY.to_bytes(), &b"*0\r\n"[..]);
        assert_eq!(NO_REPLY.to_bytes(), &b""[..]);
        assert_eq!(QUEUED.to_bytes(), &b"+QUEUED\r\n"[..]);
        assert_eq!(Reply::NullArray.to_bytes(), &b"*-1\r\n"[..]);
    }

    #[test]
    fn serialize_errors() {
        assert_eq!(UNKNOWN_ERR.to_bytes(), &b"-Err unknown\r\n"[..]);
        assert_eq!(SYNTAX_ERR.to_bytes(), &b"-Err syntax error\r\n"[..]);
        assert_eq!(
            WRONG_TYPE_ERR.to_bytes(),
            &b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"[..]
        );
        assert_eq!(
            Reply::arg_num_err("get").to_bytes(),
            &b"-ERR wrong number of arguments for 'get' command\r\n"[..]
        );
        assert_eq!(
            Reply::protocol_err("invalid multibulk length").to_bytes(),
            &b"-ERR Protocol error: 'invalid multibulk length'\r\n"[..]
        );
    }

    #[test]
    fn error_display_matches_wire_line() {
        let err: &dyn std::error::Error = &ErrorReply::ArgNum("echo".to_string());
        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'echo' command"
        );
        assert_eq!(ErrorReply::Other("MOVED 1 a:1".to_string()).to_string(), "MOVED 1 a:1");
        assert_eq!(ErrorReply::Syntax.to_string(), "Err syntax error");
    }

    #[test]
    fn serialize_simple_and_integer() {
        assert_eq!(Reply::simple("OK").to_bytes(), &b"+OK\r\n"[..]);
        assert_eq!(Reply::Integer(-42).to_bytes(), &b":-42\r\n"[..]);
        assert_eq!(Reply::Integer(0).to_bytes(), &b":0\r\n"[..]);
    }

    #[test]
    fn serialize_bulk_is_binary_safe() {
        let reply = Reply::bulk(Bytes::from_static(b"a\r\nb\x00"));
        assert_eq!(reply.to_bytes(), &b"$5\r\na\r\nb\x00\r\n"[..]);

        assert_eq!(Reply::bulk("").to_bytes(), &b"$0\r\n\r\n"[..]);
    }

    #[test]
    fn serialize_array() {
        let reply = Reply::Array(vec![
            Reply::bulk("SET"),
            Reply::Integer(1),
            Reply::NullBulk,
            Reply::Array(vec![Reply::simple("nested")]),
        ]);

        assert_eq!(
            reply.to_bytes(),
            &b"*4\r\n$3\r\nSET\r\n:1\r\n$-1\r\n*1\r\n+nested\r\n"[..]
        );
    }

    #[test]
    fn serialize_is_deterministic() {
        let reply = Reply::multi_bulk(["SET", "key", "value"]);
        assert_eq!(reply.to_bytes(), reply.clone().to_bytes());
        assert_eq!(Vec::<u8>::from(reply.clone()), reply.to_bytes().to_vec());
    }

    #[test]
    fn multi_bulk_without_elements_is_empty_array() {
        let args: Vec<Bytes> = vec![];
        assert_eq!(Reply::multi_bulk(args), Reply::EmptyArray);
    }

    #[test]
    fn classify_error_lines() {
        for err in [
            ErrorReply::Unknown,
            ErrorReply::Syntax,
            ErrorReply::WrongType,
            ErrorReply::ArgNum("set".to_string()),
            ErrorReply::Protocol("bad length".to_string()),
        ] {
            assert_eq!(ErrorReply::from_line(&err.to_string()), err);
        }

        assert_eq!(
            ErrorReply::from_line("ERR something else"),
            ErrorReply::Other("ERR something else".to_string())
        );
    }
}
