use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::{Conn, Connection, TcpConnection};
use crate::parser::{self, RespCodec, DEFAULT_MAX_BULK_LEN, DEFAULT_MAX_INLINE_LEN};
use crate::reply::{self, Reply};
use crate::server::Handler;
use crate::Error;

/// Speaks RESP on every connection: requests are decoded, run as commands and answered in order.
///
/// A malformed request gets a protocol error reply and the connection stays usable. Closing the
/// handler interrupts every connection it is serving.
pub struct RespHandler {
    closing: CancellationToken,
    closed: AtomicBool,
    active: AtomicUsize,
    max_bulk_len: usize,
    max_inline_len: usize,
}

impl RespHandler {
    pub fn new() -> RespHandler {
        RespHandler::with_limits(DEFAULT_MAX_BULK_LEN, DEFAULT_MAX_INLINE_LEN)
    }

    pub fn with_limits(max_bulk_len: usize, max_inline_len: usize) -> RespHandler {
        RespHandler {
            closing: CancellationToken::new(),
            closed: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            max_bulk_len,
            max_inline_len,
        }
    }

    pub fn from_config(config: &Config) -> RespHandler {
        RespHandler::with_limits(config.max_bulk_len, config.max_inline_len)
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    // True only for the call that moves the handler into the closing state.
    fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    #[instrument(
        name = "connection",
        skip(self, stream),
        fields(connection_id, client_address)
    )]
    async fn serve(&self, stream: TcpStream, client_address: SocketAddr) -> Result<(), Error> {
        let (reader, writer) = stream.into_split();
        let mut conn: TcpConnection = Conn::with_address(writer, client_address);

        tracing::Span::current()
            .record("connection_id", conn.id.to_string())
            .record("client_address", client_address.to_string());

        let codec = RespCodec::with_limits(self.max_bulk_len, self.max_inline_len);
        let mut payloads = parser::parse_stream_with(reader, codec);

        loop {
            let payload = tokio::select! {
                _ = self.closing.cancelled() => {
                    info!("Closing connection on shutdown");
                    break;
                }
                payload = payloads.recv() => payload,
            };

            let res = match payload {
                None => break,
                Some(Ok(Reply::EmptyArray)) => continue,
                Some(Ok(request)) => {
                    info!("Received request from client: {}", request);
                    execute(request, &mut conn)
                }
                Some(Err(parser::Error::Protocol(msg))) => Reply::protocol_err(msg),
                Some(Err(e)) => {
                    debug!("Connection read failed: {}", e);
                    break;
                }
            };

            info!("Sending response to client: {}", res);
            conn.write(&res.to_bytes()).await?;
        }

        info!("Connection closed");
        Ok(())
    }
}

impl Default for RespHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for RespHandler {
    async fn handle(self: Arc<Self>, stream: TcpStream, client_address: SocketAddr) {
        if self.is_closing() {
            debug!("Rejecting connection from {:?} while shutting down", client_address);
            return;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.serve(stream, client_address).await {
            debug!("Connection from {:?} ended with error: {}", client_address, e);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn close(&self) {
        if !self.begin_close() {
            return;
        }
        info!(
            "Closing handler with {} active connection(s)",
            self.active_connections()
        );
        self.closing.cancel();
    }
}

fn execute<C: Connection>(request: Reply, conn: &mut C) -> Reply {
    let cmd = match Command::try_from(request) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("Failed to parse command: {}", e);
            return e.into();
        }
    };

    match cmd.exec(conn) {
        Ok(res) => res,
        Err(e) => {
            error!("Failed to execute command: {}", e);
            reply::UNKNOWN_ERR.clone()
        }
    }
}
