//! Encrypted connection establishment.
//!
//! The initiator writes a fixed 64-byte prelude in the clear:
//! `node_id (32) || pow_nonce (32, little-endian)`, or the anonymous sentinel
//! with a zero nonce. Everything after the prelude is AES-GCM frames:
//! `[len: u32 BE] [nonce (12) || ciphertext || tag (16)]` keyed by the
//! ECDH-derived shared secret. Each frame carries a fresh random nonce, which
//! supplies the per-connection randomness the deterministic key exchange
//! lacks.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use cql_core::{verify_node_id, NodeId, Uint256, ANONYMOUS_NODE_ID};
use cql_crypto::{Cipher, NONCE_LEN, TAG_LEN};
use cql_kms::Kms;

use crate::{Result, TransportError};

/// Length of the clear-text identity prelude
pub const PRELUDE_LEN: usize = 64;

/// Maximum plaintext payload of a single frame
pub const MAX_FRAME_PAYLOAD: usize = 4 * 1024 * 1024;

/// Reading half of an encrypted connection
pub struct CryptoReader {
    inner: OwnedReadHalf,
    cipher: Arc<Cipher>,
}

/// Writing half of an encrypted connection
pub struct CryptoWriter {
    inner: OwnedWriteHalf,
    cipher: Arc<Cipher>,
}

impl CryptoReader {
    /// Read and decrypt one frame. Authentication failure is terminal for the
    /// connection.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        self.inner.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > MAX_FRAME_PAYLOAD + NONCE_LEN + TAG_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut sealed = vec![0u8; len];
        self.inner.read_exact(&mut sealed).await?;

        self.cipher.open(&sealed).map_err(|_| TransportError::StreamCorrupt)
    }
}

impl CryptoWriter {
    /// Encrypt and write one frame as a single write so a dying connection
    /// never leaves the peer mid-frame.
    pub async fn write_frame(&mut self, plaintext: &[u8]) -> Result<()> {
        if plaintext.len() > MAX_FRAME_PAYLOAD {
            return Err(TransportError::FrameTooLarge(plaintext.len()));
        }
        let sealed = self
            .cipher
            .seal(plaintext)
            .map_err(|_| TransportError::StreamCorrupt)?;

        let mut buf = Vec::with_capacity(4 + sealed.len());
        buf.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
        buf.extend_from_slice(&sealed);

        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

fn wrap(stream: TcpStream, key: [u8; 32]) -> (CryptoReader, CryptoWriter) {
    let cipher = Arc::new(Cipher::new(&key));
    let (read_half, write_half) = stream.into_split();
    (
        CryptoReader {
            inner: read_half,
            cipher: cipher.clone(),
        },
        CryptoWriter {
            inner: write_half,
            cipher,
        },
    )
}

/// Dial a remote node and complete the identity prelude.
///
/// Anonymous dials present the sentinel identity and a zero nonce; the shared
/// secret is then derived from the well-known anonymous keypair.
pub async fn dial_conn(
    kms: &Kms,
    remote_id: &NodeId,
    is_anonymous: bool,
) -> Result<(CryptoReader, CryptoWriter)> {
    let key = kms.get_shared_secret_with(remote_id, is_anonymous)?;
    let addr = kms.get_node_addr(remote_id)?;

    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;

    let mut prelude = [0u8; PRELUDE_LEN];
    if is_anonymous {
        prelude[..32].copy_from_slice(ANONYMOUS_NODE_ID.as_bytes());
        // second half stays zero
    } else {
        let local_id = kms.local_node_id()?;
        let nonce = kms.local_nonce()?;
        prelude[..32].copy_from_slice(local_id.as_bytes());
        prelude[32..].copy_from_slice(&nonce.to_bytes());
    }

    let mut stream = stream;
    stream.write_all(&prelude).await?;
    stream.flush().await?;

    debug!(remote = %remote_id, addr = %addr, anonymous = is_anonymous, "dialed node");
    Ok(wrap(stream, key))
}

/// Accept side of the handshake.
///
/// Reads the prelude, verifies the proof-of-work identity unless the
/// anonymous sentinel is presented, and derives the matching transport key.
/// Returns the authenticated remote id alongside the wrapped connection.
pub async fn accept_conn(
    kms: &Kms,
    mut stream: TcpStream,
    difficulty: usize,
) -> Result<(NodeId, CryptoReader, CryptoWriter)> {
    let mut prelude = [0u8; PRELUDE_LEN];
    stream.read_exact(&mut prelude).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::HandshakeTruncated
        } else {
            TransportError::Io(e)
        }
    })?;

    let mut id_bytes = [0u8; 32];
    id_bytes.copy_from_slice(&prelude[..32]);
    let remote_id = NodeId(id_bytes);

    let mut nonce_bytes = [0u8; 32];
    nonce_bytes.copy_from_slice(&prelude[32..]);
    let nonce = Uint256::from_bytes(&nonce_bytes);

    if !remote_id.is_anonymous() {
        let node = kms
            .get_node(&remote_id)
            .map_err(|_| TransportError::UnknownPeer(remote_id))?;
        if !verify_node_id(&node.public_key, &nonce, &remote_id, difficulty) {
            return Err(TransportError::IdentityRejected(remote_id));
        }
    }

    let key = kms.get_shared_secret_with(&remote_id, false)?;
    stream.set_nodelay(true)?;

    debug!(remote = %remote_id, "accepted node connection");
    let (reader, writer) = wrap(stream, key);
    Ok((remote_id, reader, writer))
}
