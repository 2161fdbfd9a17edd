//! Bridge between one client connection and the upstream server
//!
//! A bridge owns the accepted (downstream) socket, dials the upstream socket,
//! then runs both pumps concurrently until either side closes or fails. The
//! first pump to stop closes the bridge, which shuts down both sockets and
//! wakes the sibling pump. Descriptors are released when the bridge is dropped.

use crate::error::ProxyError;
use crate::pump::{pump, Direction, PumpOutcome};
use crate::teardown::{BridgeState, TeardownCoordinator};
use crate::tracker::BridgeGuard;
use socket2::SockRef;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Totals reported once a bridge has closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSummary {
    pub bridge_id: u64,
    /// Bytes forwarded client -> upstream
    pub bytes_upstream: u64,
    /// Bytes forwarded upstream -> client
    pub bytes_downstream: u64,
    pub duration: Duration,
}

pub struct Bridge {
    peer_addr: SocketAddr,
    downstream: TcpStream,
    /// Filled by downstream reads, drained by upstream writes
    downstream_buf: Vec<u8>,
    /// Filled by upstream reads, drained by downstream writes
    upstream_buf: Vec<u8>,
    teardown: TeardownCoordinator,
    // dropped last, after the sockets above
    guard: BridgeGuard,
}

impl Bridge {
    pub fn new(
        downstream: TcpStream,
        peer_addr: SocketAddr,
        guard: BridgeGuard,
        buffer_size: usize,
    ) -> Self {
        Self {
            peer_addr,
            downstream,
            downstream_buf: vec![0u8; buffer_size],
            upstream_buf: vec![0u8; buffer_size],
            teardown: TeardownCoordinator::new(),
            guard,
        }
    }

    pub fn id(&self) -> u64 {
        self.guard.id()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> BridgeState {
        self.teardown.state()
    }

    /// Dial the upstream server, then forward in both directions until the
    /// bridge closes.
    ///
    /// A failed dial closes the client connection and is returned as
    /// [`ProxyError::DialError`]; transfer errors are logged here and end the
    /// bridge normally.
    pub async fn start(mut self, upstream_addr: SocketAddr) -> Result<BridgeSummary, ProxyError> {
        let started = Instant::now();
        let bridge_id = self.id();

        let upstream = match TcpStream::connect(upstream_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                self.guard.tracker().record_dial_failure();
                close(&self.teardown, &self.downstream, None);
                self.teardown.finish();
                return Err(ProxyError::DialError {
                    address: upstream_addr.to_string(),
                    source: e,
                });
            }
        };

        self.teardown.mark_running();
        debug!(
            bridge_id,
            peer = %self.peer_addr,
            upstream = %upstream_addr,
            "Connected to upstream"
        );

        let (to_upstream, to_downstream) = self.run(&upstream).await;

        for outcome in [&to_upstream, &to_downstream] {
            log_pump_end(bridge_id, self.peer_addr, outcome);
        }
        self.teardown.finish();

        let summary = BridgeSummary {
            bridge_id,
            bytes_upstream: to_upstream.bytes,
            bytes_downstream: to_downstream.bytes,
            duration: started.elapsed(),
        };

        info!(
            bridge_id,
            peer = %self.peer_addr,
            bytes_upstream = summary.bytes_upstream,
            bytes_downstream = summary.bytes_downstream,
            duration_ms = summary.duration.as_millis() as u64,
            "Bridge closed"
        );

        Ok(summary)
    }

    /// Run both pumps; returns (client -> upstream, upstream -> client)
    async fn run(&mut self, upstream: &TcpStream) -> (PumpOutcome, PumpOutcome) {
        let downstream = &self.downstream;
        let teardown = &self.teardown;
        let downstream_buf = &mut self.downstream_buf;
        let upstream_buf = &mut self.upstream_buf;

        let client_to_upstream = async move {
            let outcome = pump(
                Direction::Upstream,
                downstream,
                upstream,
                downstream_buf,
                teardown,
            )
            .await;
            close(teardown, downstream, Some(upstream));
            outcome
        };

        let upstream_to_client = async move {
            let outcome = pump(
                Direction::Downstream,
                upstream,
                downstream,
                upstream_buf,
                teardown,
            )
            .await;
            close(teardown, downstream, Some(upstream));
            outcome
        };

        tokio::join!(client_to_upstream, upstream_to_client)
    }
}

/// Shut down both sockets, once per bridge
fn close(teardown: &TeardownCoordinator, downstream: &TcpStream, upstream: Option<&TcpStream>) -> bool {
    teardown.close(|| {
        shutdown_socket(downstream);
        if let Some(upstream) = upstream {
            shutdown_socket(upstream);
        }
    })
}

fn shutdown_socket(stream: &TcpStream) {
    if let Err(e) = SockRef::from(stream).shutdown(Shutdown::Both) {
        if e.kind() != std::io::ErrorKind::NotConnected {
            debug!("Socket shutdown failed: {}", e);
        }
    }
}

fn log_pump_end(bridge_id: u64, peer: SocketAddr, outcome: &PumpOutcome) {
    let direction = outcome.direction;
    if outcome.end.is_abnormal() {
        warn!(bridge_id, %peer, %direction, "{}", outcome.end);
    } else {
        debug!(bridge_id, %peer, %direction, "{}", outcome.end);
    }
}
