pub mod echo;
pub mod executable;
pub mod ping;
pub mod select;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::connection::Connection;
use crate::reply::{self, Reply};
use crate::Error;

use echo::Echo;
use ping::Ping;
use select::Select;

/// The handful of connection level commands served directly by the transport. Anything else is
/// answered with the unknown command error.
#[derive(Debug, PartialEq)]
pub enum Command {
    Echo(Echo),
    Ping(Ping),
    Select(Select),
}

impl Executable for Command {
    fn exec<C: Connection>(self, conn: &mut C) -> Result<Reply, Error> {
        match self {
            Command::Echo(cmd) => cmd.exec(conn),
            Command::Ping(cmd) => cmd.exec(conn),
            Command::Select(cmd) => cmd.exec(conn),
        }
    }
}

impl TryFrom<Reply> for Command {
    type Error = CommandParserError;

    fn try_from(request: Reply) -> Result<Self, Self::Error> {
        // Clients send commands to the server as RESP arrays.
        let parts = match request {
            Reply::Array(parts) => parts,
            request => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: request,
                })
            }
        };

        let parser = &mut CommandParser {
            command: String::new(),
            parts: parts.into_iter(),
        };

        let command_name = parser.parse_command_name()?;

        let command = match &command_name[..] {
            "echo" => Echo::try_from(&mut *parser).map(Command::Echo),
            "ping" => Ping::try_from(&mut *parser).map(Command::Ping),
            "select" => Select::try_from(&mut *parser).map(Command::Select),
            _ => Err(CommandParserError::UnknownCommand {
                command: command_name,
            }),
        }?;

        parser.finish()?;
        Ok(command)
    }
}

pub struct CommandParser {
    command: String,
    parts: vec::IntoIter<Reply>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        let name = match command_name {
            Reply::Simple(s) => s.to_lowercase(),
            Reply::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String)?,
            reply => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "simple or bulk string".to_string(),
                    actual: reply,
                })
            }
        };

        self.command = name.clone();
        Ok(name)
    }

    fn wrong_arity(&self) -> CommandParserError {
        CommandParserError::WrongArity {
            command: self.command.clone(),
        }
    }

    pub(crate) fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        let part = self.parts.next().ok_or_else(|| self.wrong_arity())?;

        match part {
            Reply::Integer(i) => Ok(i),
            Reply::Simple(ref s) => s
                .parse::<i64>()
                .map_err(|_| self.invalid_argument(s)),
            Reply::Bulk(ref bytes) => {
                let s = str::from_utf8(&bytes[..]).map_err(CommandParserError::InvalidUTF8String)?;
                s.parse::<i64>().map_err(|_| self.invalid_argument(s))
            }
            reply => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: reply,
            }),
        }
    }

    pub(crate) fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let part = self.parts.next().ok_or_else(|| self.wrong_arity())?;

        match part {
            // Both `Simple` and `Bulk` representation may be strings.
            Reply::Simple(s) => Ok(Bytes::from(s)),
            Reply::Bulk(bytes) => Ok(bytes),
            reply => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: reply,
            }),
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        self.parts.len() > 0
    }

    fn invalid_argument(&self, argument: &str) -> CommandParserError {
        CommandParserError::InvalidCommandArgument {
            command: self.command.clone(),
            argument: argument.to_string(),
        }
    }

    // Every argument must have been consumed by the command.
    fn finish(&self) -> Result<(), CommandParserError> {
        if self.has_next() {
            return Err(self.wrong_arity());
        }
        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("protocol error; invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Reply },
    #[error("protocol error; unknown command {command}")]
    UnknownCommand { command: String },
    #[error("protocol error; invalid command argument {command} {argument}")]
    InvalidCommandArgument { command: String, argument: String },
    #[error("protocol error; wrong number of arguments for {command}")]
    WrongArity { command: String },
    #[error("protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("protocol error; attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
}

impl From<CommandParserError> for Reply {
    fn from(err: CommandParserError) -> Self {
        match err {
            CommandParserError::UnknownCommand { .. } => reply::UNKNOWN_ERR.clone(),
            CommandParserError::WrongArity { command } => Reply::arg_num_err(command),
            CommandParserError::InvalidCommandArgument { .. } => reply::SYNTAX_ERR.clone(),
            err => Reply::protocol_err(err.to_string()),
        }
    }
}
