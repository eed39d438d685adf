use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::connection::Connection;
use crate::reply::{self, Reply};
use crate::Error;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub payload: Option<Bytes>,
}

impl Executable for Ping {
    fn exec<C: Connection>(self, _conn: &mut C) -> Result<Reply, Error> {
        let res = self
            .payload
            .map_or_else(|| reply::PONG.clone(), Reply::Bulk);

        Ok(res)
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let payload = match parser.next_bytes() {
            Ok(payload) => Some(payload),
            Err(CommandParserError::WrongArity { .. }) => None,
            Err(e) => return Err(e),
        };

        Ok(Self { payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::connection::Conn;

    #[test]
    fn without_payload() {
        let cmd = Command::try_from(Reply::multi_bulk(["PING"])).unwrap();
        assert_eq!(cmd, Command::Ping(Ping { payload: None }));

        let mut conn = Conn::new(Vec::<u8>::new());
        let res = cmd.exec(&mut conn).unwrap();

        assert_eq!(res, Reply::Pong);
        assert_eq!(res.to_bytes(), &b"+PONG\r\n"[..]);
    }

    #[test]
    fn with_payload() {
        let cmd = Command::try_from(Reply::multi_bulk(["PING", "hello"])).unwrap();

        let mut conn = Conn::new(Vec::<u8>::new());
        let res = cmd.exec(&mut conn).unwrap();

        assert_eq!(res, Reply::bulk("hello"));
    }
}
