//! Datagram transport - OSC over UDP to the host's listener
//!
//! UDP gives no delivery guarantees, so this adapter owns:
//! - a request id for correlation, increasing from 1 and wrapping back to 1
//!   after `i32::MAX` so ids on the wire are always positive
//! - a per-request timeout
//! - a background reader that routes replies to waiting callers
//!
//! Delivery is at-most-once from the caller's side: a timed-out request is
//! never resent here, and a reply arriving after its timeout is discarded.
//! Whether to try again is the retry policy's decision.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::codec::{self, Reply};
use super::{HostCall, Transport, TransportError};
use crate::host::HostBridge;
use crate::path::LivePath;

const MTU: usize = 65536;

/// Error a listener sends back when the real reply would not fit a datagram
pub const REPLY_TOO_LARGE: &str = "Reply too large for one datagram";

type PendingMap = DashMap<i32, oneshot::Sender<Result<Value, String>>>;

/// OSC/UDP client for a host listener
pub struct UdpTransport {
    name: String,
    socket: Arc<UdpSocket>,
    pending: Arc<PendingMap>,
    next_id: AtomicI32,
    timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind a local socket, connect it to the host and start the reply reader
    pub async fn connect(bind: &str, host_addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        info!("🎛️  Connecting to host listener at {}", host_addr);

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| TransportError::Io(format!("binding {}: {}", bind, e)))?;
        socket
            .connect(host_addr)
            .await
            .map_err(|e| TransportError::Io(format!("connecting to {}: {}", host_addr, e)))?;

        let socket = Arc::new(socket);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let name = "udp".to_string();

        let reader = tokio::spawn(recv_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            name.clone(),
        ));

        info!("✅ UDP transport ready (timeout {:?})", timeout);
        Ok(Self {
            name,
            socket,
            pending,
            next_id: AtomicI32::new(1),
            timeout,
            reader: Mutex::new(Some(reader)),
        })
    }

    fn next_request_id(&self) -> i32 {
        let step = |id: i32| Some(if id >= i32::MAX { 1 } else { id + 1 });
        match self.next_id.fetch_update(Ordering::Relaxed, Ordering::Relaxed, step) {
            Ok(id) | Err(id) => id,
        }
    }

    /// Requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, pending: Arc<PendingMap>, name: String) {
    let mut buffer = vec![0u8; MTU];

    loop {
        let len = match socket.recv(&mut buffer).await {
            Ok(len) => len,
            Err(e) => {
                // ICMP port unreachable surfaces here on some platforms; keep listening
                debug!("{}: receive error: {}", name, e);
                continue;
            }
        };

        match codec::decode_reply(&buffer[..len]) {
            Ok(Reply {
                request_id,
                outcome,
            }) => match pending.remove(&request_id) {
                Some((_, waiter)) => {
                    trace!("{}: reply for request {}", name, request_id);
                    let _ = waiter.send(outcome);
                }
                None => {
                    debug!("{}: discarding orphan reply for request {}", name, request_id);
                }
            },
            Err(e) => warn!("{}: undecodable datagram: {}", name, e),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, path: &LivePath, call: &HostCall) -> Result<Value, TransportError> {
        let request_id = self.next_request_id();
        let bytes = codec::encode_call(request_id, path, call)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        trace!("{}: request {} → {} {}", self.name, request_id, path, call.method);
        if let Err(e) = self.socket.send(&bytes).await {
            self.pending.remove(&request_id);
            return Err(TransportError::Io(e.to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(TransportError::Host),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                debug!("{}: request {} timed out", self.name, request_id);
                Err(TransportError::Timeout {
                    request_id,
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // Fail anything still waiting
        self.pending.clear();
        info!("{}: transport shut down", self.name);
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Host-side listener: answer datagram calls from a [`HostBridge`].
///
/// Used by the simulator mode and by tests; a real session runs its own
/// listener inside the DAW. A call that cannot be answered gets a short
/// error reply and the listener keeps serving.
pub async fn serve(socket: UdpSocket, host: Arc<dyn HostBridge>) -> Result<(), TransportError> {
    let mut buffer = vec![0u8; MTU];
    info!(
        "Host listener serving on {}",
        socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string())
    );

    loop {
        let (len, peer) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(e) => {
                debug!("listener: receive error: {}", e);
                continue;
            }
        };

        let request = match codec::decode_call(&buffer[..len]) {
            Ok(request) => request,
            Err(e) => {
                warn!("listener: dropping undecodable call from {}: {}", peer, e);
                continue;
            }
        };

        let outcome = match LivePath::parse(&request.path) {
            Ok(path) => host.call(&path, &request.call),
            Err(e) => Err(format!("Invalid path: {}", e)),
        };
        let reply = match codec::encode_reply(request.request_id, &outcome) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    "listener: cannot answer request {} ({} {}): {}",
                    request.request_id, request.path, request.call.method, e
                );
                match codec::encode_reply(request.request_id, &Err(REPLY_TOO_LARGE.to_string())) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("listener: dropping reply {}: {}", request.request_id, e);
                        continue;
                    }
                }
            }
        };
        if let Err(e) = socket.send_to(&reply, peer).await {
            warn!("listener: reply {} to {} failed: {}", request.request_id, peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemorySession;
    use crate::path::PathComponents;
    use crate::transform::Note;
    use serde_json::json;

    async fn spawn_listener(host: Arc<dyn HostBridge>) -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        tokio::spawn(serve(socket, host));
        addr
    }

    #[tokio::test]
    async fn test_round_trip_through_listener() {
        let session = Arc::new(MemorySession::demo());
        let addr = spawn_listener(session).await;

        let transport = UdpTransport::connect("127.0.0.1:0", &addr, Duration::from_secs(2))
            .await
            .unwrap();

        let root = LivePath::root();
        let count = transport.call(&root, &HostCall::get("track_count")).await.unwrap();
        assert_eq!(count, json!(3));

        let clip = PathComponents::clip(0, 0).build().unwrap();
        let notes = transport
            .call(&clip, &HostCall::method("get_notes", vec![]))
            .await
            .unwrap();
        assert!(notes.as_array().map(|n| !n.is_empty()).unwrap_or(false));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_host_error_is_forwarded_verbatim() {
        let session = Arc::new(MemorySession::demo());
        let addr = spawn_listener(session).await;

        let transport = UdpTransport::connect("127.0.0.1:0", &addr, Duration::from_secs(2))
            .await
            .unwrap();

        let empty = PathComponents::clip(0, 7).build().unwrap();
        let err = transport
            .call(&empty, &HostCall::get("length"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Host(ref m) if m.contains("No clip")), "{:?}", err);
    }

    #[tokio::test]
    async fn test_listener_survives_oversized_reply() {
        let session = Arc::new(MemorySession::demo());
        let notes = (0..2000u32)
            .map(|i| Note::new(60, f64::from(i) * 0.25, 0.25, 100))
            .collect();
        session.set_midi_clip(1, 1, 500.0, notes);
        let addr = spawn_listener(session).await;

        let transport = UdpTransport::connect("127.0.0.1:0", &addr, Duration::from_secs(2))
            .await
            .unwrap();

        let big = PathComponents::clip(1, 1).build().unwrap();
        let err = transport
            .call(&big, &HostCall::method("get_notes", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Host(REPLY_TOO_LARGE.to_string()));

        let count = transport
            .call(&LivePath::root(), &HostCall::get("track_count"))
            .await
            .unwrap();
        assert_eq!(count, json!(3));
    }

    #[tokio::test]
    async fn test_oversized_request_never_sent() {
        let session = Arc::new(MemorySession::demo());
        let addr = spawn_listener(session.clone()).await;

        let transport = UdpTransport::connect("127.0.0.1:0", &addr, Duration::from_secs(2))
            .await
            .unwrap();

        let notes: Vec<Note> = (0..2000u32)
            .map(|i| Note::new(60, f64::from(i) * 0.25, 0.25, 100))
            .collect();
        let clip = PathComponents::clip(0, 0).build().unwrap();
        let call = HostCall::method("set_notes", vec![serde_json::to_value(&notes).unwrap()]);

        let err = transport.call(&clip, &call).await.unwrap_err();
        assert!(matches!(err, TransportError::Oversized { .. }), "{:?}", err);
        assert_eq!(transport.pending_count(), 0);
        assert_eq!(session.call_count(), 0);
    }

    #[tokio::test]
    async fn test_request_ids_wrap_to_one() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap().to_string();
        let transport = UdpTransport::connect("127.0.0.1:0", &addr, Duration::from_millis(50))
            .await
            .unwrap();

        transport.next_id.store(i32::MAX - 1, Ordering::Relaxed);
        assert_eq!(transport.next_request_id(), i32::MAX - 1);
        assert_eq!(transport.next_request_id(), i32::MAX);
        assert_eq!(transport.next_request_id(), 1);
        assert_eq!(transport.next_request_id(), 2);
    }

    #[tokio::test]
    async fn test_silent_host_times_out() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap().to_string();

        let transport = UdpTransport::connect("127.0.0.1:0", &addr, Duration::from_millis(50))
            .await
            .unwrap();

        let err = transport
            .call(&LivePath::root(), &HostCall::get("track_count"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { request_id: 1, .. }));
        assert_eq!(transport.pending_count(), 0);

        // ids keep increasing after a timeout
        let err = transport
            .call(&LivePath::root(), &HostCall::get("track_count"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { request_id: 2, .. }));
    }
}
