// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`Transport`] that carries frames over TCP, length-delimited and
//! `postcard`-encoded, one persistent duplex connection per peer locality.
//!
//! No single address-space-bound IPC design carries over wholesale once a
//! peer might be a different process on a different host, so this is
//! grounded on a hosted-service `tokio`/async-everywhere style (background
//! accept loop, `tokio::sync` channels, `tracing` spans per connection) for
//! the idiom, while keeping the same request/reply correlation shape used
//! for the in-process transport: [`shad_wire::Frame`] is the struct that
//! would otherwise be marshalled directly onto a lease, just serialized with
//! `postcard` instead of cast as raw bytes, since a TCP byte stream has no
//! MPU to enforce a fixed layout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shad_runtime::{Dispatcher, RemoteAddr, Transport};
use shad_wire::{Frame, FrameResponse, Locality, RuntimeError, TaskDoneNotice};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Serialize, Deserialize)]
enum Envelope {
    /// First message sent on every connection, in either direction,
    /// identifying which locality dialed or accepted it — TCP itself has no
    /// notion of locality identity, so the protocol supplies one.
    Hello(Locality),
    Request { id: u64, body: RequestBody },
    Response { id: u64, body: ResponseBody },
}

#[derive(Serialize, Deserialize)]
enum RequestBody {
    Dispatch(Frame),
    Notify(TaskDoneNotice),
    DmaPut { remote_addr: RemoteAddr, offset: usize, bytes: Vec<u8> },
    DmaGet { remote_addr: RemoteAddr, offset: usize, len: usize },
    /// Rendezvous handshake sent by `initialize()`: the dialing locality
    /// reports its catalog checksum so the peer can detect a memory-layout
    /// mismatch before any real action runs.
    Handshake { checksum: u64 },
}

#[derive(Serialize, Deserialize)]
enum ResponseBody {
    Dispatch(FrameResponse),
    Unit(Result<(), RuntimeError>),
    Bytes(Result<Vec<u8>, RuntimeError>),
    HandshakeAck { checksum: u64 },
}

struct PeerConn {
    outbox: mpsc::UnboundedSender<Bytes>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ResponseBody>>>,
    /// The writer and reader background tasks `spawn_connection` started for
    /// this peer. Aborted on `shutdown()` so a torn-down transport doesn't
    /// leave sockets or pending requests dangling past `finalize()`.
    tasks: Mutex<Vec<tokio::task::AbortHandle>>,
}

impl PeerConn {
    fn send_envelope(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        let bytes = postcard::to_allocvec(envelope)
            .map_err(|e| RuntimeError::TransportFailure(format!("encode: {e}")))?;
        self.outbox
            .send(bytes.into())
            .map_err(|_| RuntimeError::TransportFailure("connection closed".into()))
    }

    async fn request(&self, id: u64, body: RequestBody) -> Result<ResponseBody, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        if let Err(e) = self.send_envelope(&Envelope::Request { id, body }) {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }
        rx.await
            .map_err(|_| RuntimeError::TransportFailure("connection closed before reply".into()))
    }
}

/// TCP-backed [`Transport`]: one `TcpTransport` per process, one
/// [`PeerConn`] per peer locality it has talked to, dialed lazily.
pub struct TcpTransport {
    this: Locality,
    listen_addr: SocketAddr,
    peer_addrs: HashMap<u32, SocketAddr>,
    connections: Mutex<HashMap<u32, Arc<PeerConn>>>,
    dispatcher: OnceLock<Dispatcher>,
    next_request_id: AtomicU64,
    /// Lets background tasks spawned by `spawn_connection` re-obtain an
    /// owned `Arc<TcpTransport>` even though the `Transport` trait only
    /// ever hands them `&self`. Set once at construction via
    /// `Arc::new_cyclic`.
    self_weak: Weak<TcpTransport>,
    /// Handle to the background accept loop started by `bind`, so
    /// `shutdown()` can stop it from taking on new inbound connections.
    accept_task: Mutex<Option<tokio::task::AbortHandle>>,
}

impl TcpTransport {
    pub fn new(this: Locality, listen_addr: SocketAddr, peer_addrs: HashMap<u32, SocketAddr>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            this,
            listen_addr,
            peer_addrs,
            connections: Mutex::new(HashMap::new()),
            dispatcher: OnceLock::new(),
            next_request_id: AtomicU64::new(1),
            self_weak: weak.clone(),
            accept_task: Mutex::new(None),
        })
    }

    fn arc(&self) -> Arc<TcpTransport> {
        self.self_weak.upgrade().expect("transport dropped while still in use")
    }

    /// Finishes wiring this transport to the `Dispatcher` it serves and
    /// starts the background accept loop. Must be called exactly once,
    /// after `Dispatcher::new(..., transport.clone())` — mirrors the
    /// two-phase construction `shad-transport-inproc::InprocCluster` also
    /// needs, for the same reason: a transport can't know its dispatcher
    /// until the dispatcher exists, and the dispatcher can't exist without
    /// a transport.
    pub async fn bind(&self, dispatcher: Dispatcher) -> std::io::Result<()> {
        self.dispatcher
            .set(dispatcher)
            .unwrap_or_else(|_| panic!("TcpTransport::bind called twice"));
        let listener = TcpListener::bind(self.listen_addr).await?;
        let this = self.arc();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let this = Arc::clone(&this);
                        tokio::spawn(async move {
                            if let Err(e) = this.accept_connection(stream).await {
                                tracing::warn!(%peer_addr, error = %e, "inbound connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept loop stopped");
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap() = Some(accept_task.abort_handle());
        Ok(())
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
            .get()
            .expect("TcpTransport used before bind()")
    }

    async fn accept_connection(&self, stream: TcpStream) -> Result<(), RuntimeError> {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let first = framed
            .next()
            .await
            .ok_or_else(|| RuntimeError::TransportFailure("connection closed before hello".into()))?
            .map_err(|e| RuntimeError::TransportFailure(e.to_string()))?;
        let peer = match postcard::from_bytes::<Envelope>(&first) {
            Ok(Envelope::Hello(loc)) => loc,
            _ => return Err(RuntimeError::TransportFailure("expected hello".into())),
        };
        let conn = self.spawn_connection(framed);
        self.connections.lock().unwrap().insert(peer.id(), conn);
        Ok(())
    }

    async fn connection(&self, target: Locality) -> Result<Arc<PeerConn>, RuntimeError> {
        if let Some(conn) = self.connections.lock().unwrap().get(&target.id()) {
            return Ok(Arc::clone(conn));
        }
        let addr = *self
            .peer_addrs
            .get(&target.id())
            .ok_or(RuntimeError::InvalidLocality(target))?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RuntimeError::TransportFailure(format!("connect to {addr}: {e}")))?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let hello = postcard::to_allocvec(&Envelope::Hello(self.this))
            .map_err(|e| RuntimeError::TransportFailure(format!("encode hello: {e}")))?;
        framed
            .send(hello.into())
            .await
            .map_err(|e| RuntimeError::TransportFailure(e.to_string()))?;
        let conn = self.spawn_connection(framed);
        self.connections.lock().unwrap().insert(target.id(), Arc::clone(&conn));
        Ok(conn)
    }

    fn spawn_connection(&self, framed: Framed<TcpStream, LengthDelimitedCodec>) -> Arc<PeerConn> {
        let (mut sink, mut stream) = framed.split();
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Bytes>();
        let conn = Arc::new(PeerConn {
            outbox: outbox_tx,
            pending: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(async move {
            while let Some(bytes) = outbox_rx.recv().await {
                if sink.send(bytes).await.is_err() {
                    break;
                }
            }
        });

        let conn2 = Arc::clone(&conn);
        let this = self.arc();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let bytes = match frame {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = %e, "connection read error");
                        break;
                    }
                };
                match postcard::from_bytes::<Envelope>(&bytes) {
                    Ok(Envelope::Response { id, body }) => {
                        if let Some(tx) = conn2.pending.lock().unwrap().remove(&id) {
                            let _ = tx.send(body);
                        }
                    }
                    Ok(Envelope::Request { id, body }) => {
                        let this = Arc::clone(&this);
                        let conn3 = Arc::clone(&conn2);
                        tokio::spawn(async move {
                            let body = this.handle_request(body).await;
                            let _ = conn3.send_envelope(&Envelope::Response { id, body });
                        });
                    }
                    Ok(Envelope::Hello(_)) => {}
                    Err(e) => tracing::warn!(error = %e, "failed to decode envelope"),
                }
            }
        });

        conn.tasks.lock().unwrap().extend([writer.abort_handle(), reader.abort_handle()]);
        conn
    }

    async fn handle_request(&self, body: RequestBody) -> ResponseBody {
        match body {
            RequestBody::Dispatch(frame) => {
                let status = self.dispatcher().handle_inbound(frame).await;
                ResponseBody::Dispatch(FrameResponse { status })
            }
            RequestBody::Notify(notice) => {
                self.dispatcher().deliver_task_done(notice);
                ResponseBody::Unit(Ok(()))
            }
            RequestBody::DmaPut { remote_addr, offset, bytes } => {
                let result = self.dispatcher().dma_registry().write(remote_addr, offset, &bytes);
                ResponseBody::Unit(result)
            }
            RequestBody::DmaGet { remote_addr, offset, len } => {
                let result = self.dispatcher().dma_registry().read(remote_addr, offset, len);
                ResponseBody::Bytes(result)
            }
            RequestBody::Handshake { checksum: _ } => ResponseBody::HandshakeAck {
                checksum: self.dispatcher().catalog_checksum(),
            },
        }
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// `initialize()`'s rendezvous: blocks until every configured peer
    /// agrees on the process group by dialing each one, exchanging catalog
    /// checksums, and failing if any peer reports a different one — a
    /// memory-layout mismatch for a typed action between localities.
    /// Must be called after [`Self::bind`].
    pub async fn rendezvous(&self, local_checksum: u64) -> Result<(), RuntimeError> {
        for &peer_id in self.peer_addrs.keys() {
            let id = self.next_id();
            let conn = self.connection(Locality::new(peer_id)).await?;
            match conn.request(id, RequestBody::Handshake { checksum: local_checksum }).await? {
                ResponseBody::HandshakeAck { checksum } if checksum == local_checksum => {}
                ResponseBody::HandshakeAck { checksum } => {
                    return Err(RuntimeError::TransportFailure(format!(
                        "catalog checksum mismatch with locality {peer_id}: {local_checksum:#x} != {checksum:#x}"
                    )));
                }
                _ => return Err(RuntimeError::TransportFailure("unexpected response shape".into())),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn this_locality(&self) -> Locality {
        self.this
    }

    async fn send(&self, target: Locality, frame: Frame) -> Result<FrameResponse, RuntimeError> {
        let id = self.next_id();
        let conn = self.connection(target).await?;
        match conn.request(id, RequestBody::Dispatch(frame)).await? {
            ResponseBody::Dispatch(resp) => Ok(resp),
            _ => Err(RuntimeError::TransportFailure("unexpected response shape".into())),
        }
    }

    async fn notify_task_done(&self, notice: TaskDoneNotice) -> Result<(), RuntimeError> {
        let id = self.next_id();
        let conn = self.connection(notice.handle.owner).await?;
        match conn.request(id, RequestBody::Notify(notice)).await? {
            ResponseBody::Unit(r) => r,
            _ => Err(RuntimeError::TransportFailure("unexpected response shape".into())),
        }
    }

    async fn dma_put(
        &self,
        target: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        bytes: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let id = self.next_id();
        let conn = self.connection(target).await?;
        match conn.request(id, RequestBody::DmaPut { remote_addr, offset, bytes }).await? {
            ResponseBody::Unit(r) => r,
            _ => Err(RuntimeError::TransportFailure("unexpected response shape".into())),
        }
    }

    async fn dma_get(
        &self,
        source: Locality,
        remote_addr: RemoteAddr,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, RuntimeError> {
        let id = self.next_id();
        let conn = self.connection(source).await?;
        match conn.request(id, RequestBody::DmaGet { remote_addr, offset, len }).await? {
            ResponseBody::Bytes(r) => r,
            _ => Err(RuntimeError::TransportFailure("unexpected response shape".into())),
        }
    }

    /// Stops the accept loop, then drains every peer connection: pending
    /// in-flight requests are resolved as a closed connection (matching what
    /// a genuine mid-flight disconnect looks like to a caller) and the
    /// connection's writer/reader tasks are aborted, which drops their
    /// socket halves.
    async fn shutdown(&self) -> Result<(), RuntimeError> {
        if let Some(accept_task) = self.accept_task.lock().unwrap().take() {
            accept_task.abort();
        }
        let conns: Vec<Arc<PeerConn>> = self.connections.lock().unwrap().drain().map(|(_, c)| c).collect();
        for conn in conns {
            conn.pending.lock().unwrap().clear();
            for task in conn.tasks.lock().unwrap().drain(..) {
                task.abort();
            }
        }
        Ok(())
    }
}

