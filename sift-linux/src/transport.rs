//! TCP transport for the discovery RPCs: one handshake, one encrypted request and one encrypted
//! response per connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sift_core::identity::{
    decrypt_frame, derive_session_key, encrypt_frame, session_nonce, Direction, SESSION_NONCE_SIZE,
};
use sift_core::wire::MAX_FRAME_LEN;
use sift_core::{
    decode_frame, encode_frame, sample_peers, DiscoveryRpc, Keypair, Message, PeerId, PeerRecord,
    PeerStore, PublicKey, RoutingTable, RpcError, PROTOCOL_VERSION, SAMPLE_LIMIT,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

// version + peer_id + public_key + nonce
const HANDSHAKE_SIZE: usize = 1 + 16 + 32 + SESSION_NONCE_SIZE;
const LEN_SIZE: usize = 4;
const TAG_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Inbound,
    Outbound,
}

/// Open RPC connections per remote peer, for telemetry.
#[derive(Default)]
pub struct StreamTracker {
    inbound: Mutex<HashMap<PeerId, usize>>,
    outbound: Mutex<HashMap<PeerId, usize>>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: StreamKind) -> &Mutex<HashMap<PeerId, usize>> {
        match kind {
            StreamKind::Inbound => &self.inbound,
            StreamKind::Outbound => &self.outbound,
        }
    }

    /// Count a stream as open until the returned guard is dropped.
    pub fn open(&self, kind: StreamKind, peer: PeerId) -> StreamGuard<'_> {
        *self.map(kind).lock().entry(peer).or_insert(0) += 1;
        StreamGuard {
            tracker: self,
            kind,
            peer,
        }
    }

    pub fn peers(&self, kind: StreamKind) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.map(kind).lock().keys().copied().collect();
        peers.sort();
        peers
    }
}

pub struct StreamGuard<'a> {
    tracker: &'a StreamTracker,
    kind: StreamKind,
    peer: PeerId,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.tracker.map(self.kind).lock();
        if let Some(n) = map.get_mut(&self.peer) {
            *n -= 1;
            if *n == 0 {
                map.remove(&self.peer);
            }
        }
    }
}

/// RPC client: dials a peer at one of its stored addresses.
pub struct TcpRpc {
    keypair: Arc<Keypair>,
    store: Arc<dyn PeerStore>,
    streams: Arc<StreamTracker>,
    timeout: Duration,
}

impl TcpRpc {
    pub fn new(
        keypair: Arc<Keypair>,
        store: Arc<dyn PeerStore>,
        streams: Arc<StreamTracker>,
        timeout: Duration,
    ) -> Self {
        Self {
            keypair,
            store,
            streams,
            timeout,
        }
    }

    /// Ping an address without knowing who is there. Returns the peer ID from the handshake.
    pub async fn probe(&self, addr: SocketAddr) -> Result<PeerId, RpcError> {
        let attempt = async {
            let stream = TcpStream::connect(addr).await?;
            let (peer, response) = self.exchange(stream, None, &Message::Ping).await?;
            match response {
                Message::Pong => Ok(peer),
                _ => Err(RpcError::UnexpectedResponse),
            }
        };
        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| RpcError::Timeout)?
    }

    async fn call(&self, peer: &PeerId, request: Message) -> Result<Message, RpcError> {
        let info = self.store.peer_info(peer);
        if info.is_addressless() {
            return Err(RpcError::NoAddress(*peer));
        }
        tokio::time::timeout(self.timeout, self.dial_and_exchange(peer, &info.addrs, &request))
            .await
            .map_err(|_| RpcError::Timeout)?
    }

    async fn dial_and_exchange(
        &self,
        peer: &PeerId,
        addrs: &[SocketAddr],
        request: &Message,
    ) -> Result<Message, RpcError> {
        let mut last_err = RpcError::NoAddress(*peer);
        for addr in addrs {
            let attempt = match TcpStream::connect(addr).await {
                Ok(stream) => self.exchange(stream, Some(*peer), request).await,
                Err(e) => Err(RpcError::Io(e)),
            };
            match attempt {
                Ok((_, response)) => return Ok(response),
                Err(e) => {
                    trace!(%peer, %addr, error = %e, "rpc attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn exchange(
        &self,
        mut stream: TcpStream,
        expected: Option<PeerId>,
        request: &Message,
    ) -> Result<(PeerId, Message), RpcError> {
        let (peer, session_key) =
            handshake(&mut stream, self.keypair.as_ref(), Direction::Dialer).await?;
        if let Some(expected) = expected {
            if expected != peer {
                return Err(RpcError::PeerMismatch {
                    expected,
                    actual: peer,
                });
            }
        }
        let _open = self.streams.open(StreamKind::Outbound, peer);
        write_message(&mut stream, &session_key, Direction::Dialer, request).await?;
        let response = read_message(&mut stream, &session_key, Direction::Listener).await?;
        Ok((peer, response))
    }
}

#[async_trait]
impl DiscoveryRpc for TcpRpc {
    async fn sample(&self, peer: &PeerId) -> Result<Vec<PeerRecord>, RpcError> {
        match self.call(peer, Message::SampleRequest).await? {
            Message::SampleResponse { mut peers } => {
                peers.truncate(SAMPLE_LIMIT);
                Ok(peers)
            }
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    async fn ping(&self, peer: &PeerId) -> Result<(), RpcError> {
        match self.call(peer, Message::Ping).await? {
            Message::Pong => Ok(()),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }
}

/// Everything the RPC server reads to answer requests.
#[derive(Clone)]
pub struct ServerContext {
    pub keypair: Arc<Keypair>,
    pub table: Arc<dyn RoutingTable>,
    pub store: Arc<dyn PeerStore>,
    pub streams: Arc<StreamTracker>,
    /// Per-connection deadline.
    pub timeout: Duration,
}

/// Accept RPC connections until cancelled.
pub async fn serve(
    listener: TcpListener,
    ctx: ServerContext,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    loop {
        let (stream, from) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ctx.timeout, handle_connection(stream, &ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(%from, error = %e, "rpc connection failed"),
                Err(_) => debug!(%from, "rpc connection timed out"),
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<(), RpcError> {
    let (peer, session_key) =
        handshake(&mut stream, ctx.keypair.as_ref(), Direction::Listener).await?;
    let _open = ctx.streams.open(StreamKind::Inbound, peer);
    let request = read_message(&mut stream, &session_key, Direction::Dialer).await?;
    let response = match request {
        Message::SampleRequest => Message::SampleResponse {
            peers: sample_peers(
                &ctx.keypair.peer_id(),
                &peer,
                ctx.table.as_ref(),
                ctx.store.as_ref(),
                SAMPLE_LIMIT,
            ),
        },
        Message::Ping => Message::Pong,
        _ => return Err(RpcError::UnexpectedResponse),
    };
    write_message(&mut stream, &session_key, Direction::Listener, &response).await
}

/// Both sides send `version | peer_id | public_key | nonce` and check what they receive.
/// The session key mixes both nonces, dialer's first.
async fn handshake(
    stream: &mut TcpStream,
    keypair: &Keypair,
    role: Direction,
) -> Result<(PeerId, [u8; 32]), RpcError> {
    let nonce = session_nonce();
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..17].copy_from_slice(keypair.peer_id().as_bytes());
    out[17..49].copy_from_slice(keypair.public_key().as_bytes());
    out[49..].copy_from_slice(&nonce);
    stream.write_all(&out).await?;
    stream.flush().await?;

    let mut buf = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut buf).await?;
    if buf[0] != PROTOCOL_VERSION {
        return Err(RpcError::Version(buf[0]));
    }
    let mut peer_id = [0u8; 16];
    peer_id.copy_from_slice(&buf[1..17]);
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&buf[17..49]);
    let peer = PeerId::from_bytes(peer_id);
    let peer_public = PublicKey::from_bytes(public_key);
    if PeerId::from_public_key(&peer_public) != peer {
        return Err(RpcError::BadIdentity);
    }
    let mut peer_nonce = [0u8; SESSION_NONCE_SIZE];
    peer_nonce.copy_from_slice(&buf[49..]);
    let secret = keypair.shared_secret(&peer_public);
    let key = match role {
        Direction::Dialer => derive_session_key(&secret, &nonce, &peer_nonce),
        Direction::Listener => derive_session_key(&secret, &peer_nonce, &nonce),
    };
    Ok((peer, key))
}

async fn write_message(
    stream: &mut TcpStream,
    key: &[u8; 32],
    direction: Direction,
    msg: &Message,
) -> Result<(), RpcError> {
    let frame = encode_frame(msg)?;
    let cipher = encrypt_frame(key, direction, 0, &frame)?;
    stream.write_all(&(cipher.len() as u32).to_le_bytes()).await?;
    stream.write_all(&cipher).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_message(
    stream: &mut TcpStream,
    key: &[u8; 32],
    direction: Direction,
) -> Result<Message, RpcError> {
    let mut len_buf = [0u8; LEN_SIZE];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN as usize + LEN_SIZE + TAG_SIZE {
        return Err(sift_core::FrameDecodeError::TooLarge.into());
    }
    let mut cipher = vec![0u8; len];
    stream.read_exact(&mut cipher).await?;
    let plain = decrypt_frame(key, direction, 0, &cipher)?;
    let (msg, _) = decode_frame(&plain)?;
    Ok(msg)
}
