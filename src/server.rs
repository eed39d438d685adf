use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::signal;
use crate::wait::Wait;

/// Serves the connections accepted by a `Server`.
pub trait Handler: Send + Sync + 'static {
    /// Owns the connection for its whole lifetime, returning once it is closed.
    fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        client_address: SocketAddr,
    ) -> impl Future<Output = ()> + Send;

    /// Releases handler wide resources and asks in-flight `handle` calls to wrap up. Must be safe
    /// to call more than once and while connections are being served.
    fn close(&self);
}

/// Lifecycle of a server, it only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Listening,
    Accepting,
    ShuttingDown,
    Closed,
}

pub struct Server<H> {
    listener: TcpListener,
    handler: Arc<H>,
    wait: Wait,
    shutdown_timeout: Option<Duration>,
    state: watch::Sender<State>,
}

impl<H: Handler> Server<H> {
    pub async fn bind(addr: impl ToSocketAddrs, handler: H) -> io::Result<Server<H>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Redis server listening on {}", listener.local_addr()?);

        let (state, _) = watch::channel(State::Listening);

        Ok(Server {
            listener,
            handler: Arc::new(handler),
            wait: Wait::new(),
            shutdown_timeout: None,
            state,
        })
    }

    /// Bounds how long shutdown waits for open connections. `None` waits until all are closed.
    pub fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Server<H> {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handler(&self) -> Arc<H> {
        self.handler.clone()
    }

    pub fn state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Accepts connections until `shutdown` resolves or accepting fails, then closes the listener
    /// and the handler and waits for every connection task to finish.
    ///
    /// Returns true when the shutdown timeout elapsed first. Tasks still running at that point are
    /// left alone.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> bool {
        let Server {
            listener,
            handler,
            wait,
            shutdown_timeout,
            state,
        } = self;

        state.send_replace(State::Accepting);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                res = listener.accept() => match res {
                    Ok((stream, client_address)) => {
                        debug!("Accepted connection from {:?}", client_address);
                        wait.spawn(handler.clone().handle(stream, client_address));
                    }
                    Err(e) if is_connection_error(&e) => {
                        debug!("Dropped connection before accepting it: {}", e);
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutting down listener");
                    break;
                }
            }
        }

        state.send_replace(State::ShuttingDown);
        drop(listener);
        handler.close();

        let timed_out = match shutdown_timeout {
            Some(timeout) => wait.wait_with_timeout(timeout).await,
            None => {
                wait.wait().await;
                false
            }
        };

        if timed_out {
            warn!(
                "Gave up waiting for {} connection(s) to close after {:?}",
                wait.len(),
                shutdown_timeout.unwrap_or_default()
            );
        }

        state.send_replace(State::Closed);
        info!("Server closed");
        timed_out
    }
}

// Errors that concern one pending connection rather than the listener itself.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

/// Binds the configured address and serves `handler` until a hangup, quit, interrupt or terminate
/// signal arrives. Failing to bind is the only error returned.
pub async fn listen_and_serve_with_signal<H: Handler>(
    config: &Config,
    handler: H,
) -> io::Result<bool> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let server = Server::bind(config.address(), handler)
        .await?
        .with_shutdown_timeout(config.shutdown_timeout());

    Ok(server.run(signal::shutdown_signal()).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{oneshot, Notify};

    /// Keeps every connection open until `close` is called, then lingers for `linger`.
    struct HoldingHandler {
        closed: AtomicBool,
        close_calls: AtomicUsize,
        notify: Notify,
        started: AtomicUsize,
        finished: AtomicUsize,
        linger: Duration,
    }

    impl HoldingHandler {
        fn new(linger: Duration) -> HoldingHandler {
            HoldingHandler {
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
                notify: Notify::new(),
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                linger,
            }
        }
    }

    impl Handler for HoldingHandler {
        async fn handle(self: Arc<Self>, _stream: TcpStream, _client_address: SocketAddr) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let notified = self.notify.notified();
            if !self.closed.load(Ordering::SeqCst) {
                notified.await;
            }
            tokio::time::sleep(self.linger).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    async fn open_connections(addr: SocketAddr, n: usize, handler: &HoldingHandler) -> Vec<TcpStream> {
        let mut streams = Vec::new();
        for _ in 0..n {
            streams.push(TcpStream::connect(addr).await.unwrap());
        }
        while handler.started.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        streams
    }

    #[tokio::test]
    async fn shutdown_waits_for_every_connection() {
        let server = Server::bind("127.0.0.1:0", HoldingHandler::new(Duration::from_millis(50)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handler = server.handler();
        let mut state = server.state();

        let (tx, rx) = oneshot::channel::<()>();
        let run = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        let _streams = open_connections(addr, 3, &handler).await;
        assert_eq!(*state.borrow_and_update(), State::Accepting);
        assert_eq!(handler.finished.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        let timed_out = run.await.unwrap();

        assert!(!timed_out);
        assert_eq!(handler.finished.load(Ordering::SeqCst), 3);
        assert_eq!(handler.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), State::Closed);
    }

    #[tokio::test]
    async fn shutdown_timeout_reports_timed_out() {
        let server = Server::bind("127.0.0.1:0", HoldingHandler::new(Duration::from_millis(300)))
            .await
            .unwrap()
            .with_shutdown_timeout(Some(Duration::from_millis(20)));
        let addr = server.local_addr().unwrap();
        let handler = server.handler();

        let (tx, rx) = oneshot::channel::<()>();
        let run = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        let _streams = open_connections(addr, 2, &handler).await;

        tx.send(()).unwrap();
        assert!(run.await.unwrap());
        assert_eq!(handler.finished.load(Ordering::SeqCst), 0);

        // The connections are left to finish on their own.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handler.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn listener_is_closed_on_shutdown() {
        let server = Server::bind("127.0.0.1:0", HoldingHandler::new(Duration::ZERO))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        assert!(!server.run(async {}).await);

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[test]
    fn per_connection_accept_errors_are_skipped() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert!(is_connection_error(&io::Error::from(kind)));
        }

        // Listener failures such as running out of descriptors still end the loop.
        assert!(!is_connection_error(&io::Error::from_raw_os_error(24)));
        assert!(!is_connection_error(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let res = Server::bind(addr, HoldingHandler::new(Duration::ZERO)).await;

        assert!(res.is_err());
    }
}
