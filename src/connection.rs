use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use uuid::Uuid;

/// What the command layer needs from a client connection, regardless of what carries the bytes.
pub trait Connection {
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Zero-based index of the logical database the client has selected.
    fn db_index(&self) -> usize;

    fn select_db(&mut self, index: usize);
}

/// A connection writing to any async byte sink. New connections always use the database 0.
pub struct Conn<W> {
    pub id: Uuid,
    pub client_address: Option<SocketAddr>,
    writer: W,
    db_index: usize,
}

pub type TcpConnection = Conn<OwnedWriteHalf>;

impl<W> Conn<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Conn<W> {
        Conn {
            id: Uuid::new_v4(),
            client_address: None,
            writer,
            db_index: 0,
        }
    }

    pub fn with_address(writer: W, client_address: SocketAddr) -> Conn<W> {
        Conn {
            client_address: Some(client_address),
            ..Conn::new(writer)
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Connection for Conn<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    fn db_index(&self) -> usize {
        self.db_index
    }

    fn select_db(&mut self, index: usize) {
        self.db_index = index;
    }
}
