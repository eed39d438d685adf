use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::connection::Connection;
use crate::reply::{self, ErrorReply, Reply};
use crate::Error;

/// Number of logical databases a connection may select from.
pub const DATABASES: i64 = 16;

/// Select the logical database having the specified zero-based numeric index. New connections
/// always use the database 0.
///
/// Ref: <https://redis.io/docs/latest/commands/select>
#[derive(Debug, PartialEq)]
pub struct Select {
    pub index: i64,
}

impl Executable for Select {
    fn exec<C: Connection>(self, conn: &mut C) -> Result<Reply, Error> {
        if !(0..DATABASES).contains(&self.index) {
            return Ok(Reply::Error(ErrorReply::Other(
                "ERR DB index is out of range".to_string(),
            )));
        }

        conn.select_db(self.index as usize);
        Ok(reply::OK.clone())
    }
}

impl TryFrom<&mut CommandParser> for Select {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let index = parser.next_integer()?;
        Ok(Self { index })
    }
}
