//! Listening side of the proxy
//!
//! The acceptor owns the listening socket. Each accepted connection becomes a
//! [`Bridge`] on its own task, which then dials upstream, while the
//! acceptor immediately waits for the next connection, so exactly one accept is
//! outstanding while the loop runs.

use crate::bridge::Bridge;
use crate::config::ProxyConfig;
use crate::error::{ErrorKind, ProxyError};
use crate::tracker::BridgeTracker;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const LISTEN_BACKLOG: i32 = 1024;

pub struct Acceptor {
    config: ProxyConfig,
    listener: TcpListener,
    tracker: BridgeTracker,
    bridge_slots: Option<Arc<Semaphore>>,
}

impl Acceptor {
    /// Bind and listen on the configured local address.
    ///
    /// No connection is accepted until [`Acceptor::start`] is called. Must be
    /// called from within a tokio runtime.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ProxyError::RuntimeUnavailable);
        }

        let std_listener = bind_listener(config.bind_socket_addr())?;
        let listener = TcpListener::from_std(std_listener)?;
        let bridge_slots = config.max_bridges.map(|n| Arc::new(Semaphore::new(n)));

        Ok(Self {
            config,
            listener,
            tracker: BridgeTracker::new(),
            bridge_slots,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Counters shared with every bridge this acceptor creates
    pub fn tracker(&self) -> BridgeTracker {
        self.tracker.clone()
    }

    /// Arm the accept loop on the current runtime.
    ///
    /// The returned handle resolves only if the loop stops on a fatal accept
    /// error; bridges already running are not affected.
    pub fn start(self) -> Result<JoinHandle<Result<(), ProxyError>>, ProxyError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ProxyError::RuntimeUnavailable)?;
        Ok(runtime.spawn(self.accept_loop()))
    }

    async fn accept_loop(self) -> Result<(), ProxyError> {
        let local_addr = self.listener.local_addr()?;
        let upstream_addr = self.config.upstream_socket_addr();

        info!(
            "TCP proxy listening on {} forwarding to {}",
            local_addr, upstream_addr
        );

        loop {
            // hold a slot before accepting so a full proxy leaves clients in the backlog
            let permit = match &self.bridge_slots {
                Some(slots) => slots.clone().acquire_owned().await.ok(),
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let guard = self.tracker.register();
                    let bridge_id = guard.id();
                    debug!(bridge_id, peer = %peer_addr, "Accepted connection");

                    let buffer_size = self.config.buffer_size;
                    tokio::spawn(async move {
                        let _permit = permit;
                        // buffers are allocated on the bridge's own task, not the accept loop
                        let bridge = Bridge::new(stream, peer_addr, guard, buffer_size);
                        if let Err(e) = bridge.start(upstream_addr).await {
                            log_bridge_error(bridge_id, peer_addr, &e);
                        }
                    });
                }
                Err(e) if is_transient(&e) => {
                    warn!("Transient accept error, accepting again: {}", e);
                }
                Err(e) => {
                    let e = ProxyError::AcceptError(e);
                    error!(kind = ?e.kind(), "{}, no longer accepting", e);
                    return Err(e);
                }
            }
        }
    }
}

/// Dial failures only cost one client; anything else on a bridge task is unexpected
fn log_bridge_error(bridge_id: u64, peer: SocketAddr, e: &ProxyError) {
    match e.kind() {
        ErrorKind::Dial => warn!(bridge_id, %peer, "{}", e),
        kind => error!(bridge_id, %peer, ?kind, "{}", e),
    }
}

/// Errors that concern one half-open connection rather than the listener
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener, ProxyError> {
    let bind_error = |e: io::Error| ProxyError::BindError {
        address: addr.ip().to_string(),
        port: addr.port(),
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;

    // Allow quick restarts while old connections sit in TIME_WAIT
    #[cfg(unix)]
    socket.set_reuse_address(true).map_err(bind_error)?;

    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|source| ProxyError::ListenError {
            address: addr.to_string(),
            source,
        })?;

    Ok(socket.into())
}
