//! Node identity and session crypto: keypairs, peer ID, session keys, frame encryption.

use std::fmt;
use std::str::FromStr;

use chacha20poly1305::aead::{Aead, KeyInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Node public key (32 bytes, X25519). Sent in the transport handshake.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "bytes_32")] [u8; 32]);

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

/// Peer ID: truncated SHA-256 of the public key. Names a node in the routing table and peer store.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(#[serde(with = "bytes_16")] [u8; 16]);

mod bytes_16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

impl PeerId {
    /// Derive the peer ID for a public key (same as Keypair does).
    pub fn from_public_key(public: &PublicKey) -> Self {
        let digest = Sha256::digest(public.as_bytes());
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        PeerId(id)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Random ID not tied to any key. Handy for tests and simulations.
    pub fn random() -> Self {
        PeerId(rand::random())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let id: [u8; 16] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| PeerIdParseError::Length(b.len()))?;
        Ok(PeerId(id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerIdParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected 16 bytes, got {0}")]
    Length(usize),
}

/// X25519 keypair. Keep secret key private; expose only public key and peer ID.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
    peer_id: PeerId,
}

impl Keypair {
    /// Generate a new random keypair and derive the peer ID from its public key.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        let peer_id = PeerId::from_public_key(&public);
        Self {
            secret,
            public,
            peer_id,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Shared secret with another node's public key. Used to derive the session key.
    pub fn shared_secret(&self, other_public: &PublicKey) -> [u8; 32] {
        let other = X25519PublicKey::from(other_public.0);
        self.secret.diffie_hellman(&other).to_bytes()
    }
}

/// Size of the random nonce each side contributes to a connection's session key.
pub const SESSION_NONCE_SIZE: usize = 32;

/// Fresh per-connection nonce, sent in the handshake.
pub fn session_nonce() -> [u8; SESSION_NONCE_SIZE] {
    let mut nonce = [0u8; SESSION_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive a 32-byte session key (for ChaCha20-Poly1305) from the static shared secret and both
/// sides' handshake nonces. Each connection gets its own key, so frame counters may restart at
/// zero and recorded frames do not decrypt on a later connection.
pub fn derive_session_key(
    shared_secret: &[u8; 32],
    dialer_nonce: &[u8; SESSION_NONCE_SIZE],
    listener_nonce: &[u8; SESSION_NONCE_SIZE],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"sift-session-v2");
    hasher.update(shared_secret);
    hasher.update(dialer_nonce);
    hasher.update(listener_nonce);
    hasher.finalize().into()
}

/// Which side of a connection wrote a frame. Part of the nonce, so both
/// directions can count from zero under one session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Dialer,
    Listener,
}

fn nonce_bytes(direction: Direction, counter: u64) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0] = match direction {
        Direction::Dialer => 0,
        Direction::Listener => 1,
    };
    out[4..12].copy_from_slice(&counter.to_le_bytes());
    out
}

/// Frame encryption: ChaCha20-Poly1305. Never reuse a (direction, counter) pair.
pub fn encrypt_frame(
    key: &[u8; 32],
    direction: Direction,
    counter: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce = nonce_bytes(direction, counter);
    cipher
        .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| WireCryptoError::Encrypt)
}

pub fn decrypt_frame(
    key: &[u8; 32],
    direction: Direction,
    counter: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce = nonce_bytes(direction, counter);
    cipher
        .decrypt(chacha20poly1305::Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| WireCryptoError::Decrypt)
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_peer_id_derivation() {
        let kp = Keypair::generate();
        assert_eq!(PeerId::from_public_key(kp.public_key()), kp.peer_id());
    }

    #[test]
    fn key_exchange_symmetric() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_eq!(
            a.shared_secret(b.public_key()),
            b.shared_secret(a.public_key())
        );
    }

    #[test]
    fn directions_do_not_share_nonces() {
        let key = derive_session_key(&[7u8; 32], &[1u8; 32], &[2u8; 32]);
        let from_dialer = encrypt_frame(&key, Direction::Dialer, 0, b"ping").unwrap();
        let from_listener = encrypt_frame(&key, Direction::Listener, 0, b"ping").unwrap();
        assert_ne!(from_dialer, from_listener);
        assert!(decrypt_frame(&key, Direction::Listener, 0, &from_dialer).is_err());
        let plain = decrypt_frame(&key, Direction::Dialer, 0, &from_dialer).unwrap();
        assert_eq!(plain.as_slice(), b"ping");
    }

    #[test]
    fn session_key_depends_on_both_nonces() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let secret = a.shared_secret(b.public_key());
        let (n1, n2) = (session_nonce(), session_nonce());
        assert_ne!(n1, n2);

        let key = derive_session_key(&secret, &n1, &n2);
        assert_eq!(key, derive_session_key(&b.shared_secret(a.public_key()), &n1, &n2));
        assert_ne!(key, derive_session_key(&secret, &n2, &n1));
        assert_ne!(key, derive_session_key(&secret, &n1, &session_nonce()));

        let frame = encrypt_frame(&key, Direction::Listener, 0, b"pong").unwrap();
        let later = derive_session_key(&secret, &session_nonce(), &session_nonce());
        assert!(decrypt_frame(&later, Direction::Listener, 0, &frame).is_err());
    }

    #[test]
    fn peer_id_hex_display_parses_back() {
        let id = PeerId::random();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<PeerId>().unwrap(), id);
        assert!(matches!(
            "abcd".parse::<PeerId>(),
            Err(PeerIdParseError::Length(2))
        ));
        assert!("zz".parse::<PeerId>().is_err());
    }
}
