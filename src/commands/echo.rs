use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::connection::Connection;
use crate::reply::Reply;
use crate::Error;

/// Returns `message`.
///
/// Ref: <https://redis.io/docs/latest/commands/echo>
#[derive(Debug, PartialEq)]
pub struct Echo {
    pub message: Bytes,
}

impl Executable for Echo {
    fn exec<C: Connection>(self, _conn: &mut C) -> Result<Reply, Error> {
        Ok(Reply::Bulk(self.message))
    }
}

impl TryFrom<&mut CommandParser> for Echo {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = parser.next_bytes()?;
        Ok(Self { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::connection::Conn;

    #[test]
    fn binary_message() {
        let request = Reply::Array(vec![
            Reply::bulk("ECHO"),
            Reply::bulk(Bytes::from_static(b"a\r\n\x00")),
        ]);
        let cmd = Command::try_from(request).unwrap();

        let mut conn = Conn::new(Vec::<u8>::new());
        let res = cmd.exec(&mut conn).unwrap();

        assert_eq!(res.to_bytes(), &b"$4\r\na\r\n\x00\r\n"[..]);
    }

    #[test]
    fn missing_message() {
        let err = Command::try_from(Reply::multi_bulk(["ECHO"])).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::WrongArity {
                command: "echo".to_string()
            }
        );
    }
}
