use clap::Parser;
use tokio::time::Duration;

use crate::parser::{DEFAULT_MAX_BULK_LEN, DEFAULT_MAX_INLINE_LEN};

const BIND: &str = "127.0.0.1";
const PORT: u16 = 6379;

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(name = "redwire", version, about)]
pub struct Config {
    /// The address to bind to
    #[arg(short, long, env = "REDWIRE_BIND", default_value = BIND)]
    pub bind: String,

    /// The port to listen on
    #[arg(short, long, env = "REDWIRE_PORT", default_value_t = PORT)]
    pub port: u16,

    /// Largest bulk string a client may send, in bytes
    #[arg(long, env = "REDWIRE_MAX_BULK_LEN", default_value_t = DEFAULT_MAX_BULK_LEN)]
    pub max_bulk_len: usize,

    /// Largest inline command a client may send, in bytes
    #[arg(long, env = "REDWIRE_MAX_INLINE_LEN", default_value_t = DEFAULT_MAX_INLINE_LEN)]
    pub max_inline_len: usize,

    /// How long shutdown waits for open connections, in milliseconds. 0 waits until they are all
    /// closed.
    #[arg(long, env = "REDWIRE_SHUTDOWN_TIMEOUT_MS", default_value_t = 0)]
    pub shutdown_timeout_ms: u64,
}

impl Config {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        match self.shutdown_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: BIND.to_string(),
            port: PORT,
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            max_inline_len: DEFAULT_MAX_INLINE_LEN,
            shutdown_timeout_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn defaults() {
        let config = Config::try_parse_from(["redwire"]).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.address(), "127.0.0.1:6379");
        assert_eq!(config.shutdown_timeout(), None);
    }

    #[test]
    #[serial]
    fn flags() {
        let config = Config::try_parse_from([
            "redwire",
            "--bind",
            "0.0.0.0",
            "-p",
            "7000",
            "--shutdown-timeout-ms",
            "1500",
        ])
        .unwrap();

        assert_eq!(config.address(), "0.0.0.0:7000");
        assert_eq!(config.shutdown_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    #[serial]
    fn environment() {
        env::set_var("REDWIRE_PORT", "6380");
        env::set_var("REDWIRE_MAX_BULK_LEN", "1024");
        let config = Config::try_parse_from(["redwire"]);
        env::remove_var("REDWIRE_PORT");
        env::remove_var("REDWIRE_MAX_BULK_LEN");

        let config = config.unwrap();
        assert_eq!(config.port, 6380);
        assert_eq!(config.max_bulk_len, 1024);
    }

    #[test]
    #[serial]
    fn invalid_port() {
        assert!(Config::try_parse_from(["redwire", "--port", "not-a-port"]).is_err());
    }
}
