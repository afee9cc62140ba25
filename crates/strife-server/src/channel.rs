//! One TCP listener per logical channel (general/chats/files): accepts
//! connections, performs the RSA/AES handshake, frames incoming ciphertext
//! onto a shared queue, and exposes `send`/`send_to_many` for replies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use dashmap::DashMap;
use strife_crypto::rsa::RsaKeypair;
use strife_crypto::{aes, rsa};
use strife_protocol::codec::{encode_frame, try_decode_frame};
use strife_protocol::opcodes::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const RSA_CIPHERTEXT_LEN: usize = 256; // PKCS#1 v1.5 with a 2048-bit key.
const PEM_END_MARKER: &str = "-----END RSA PUBLIC KEY-----";
const MAX_HANDSHAKE_PEM_LEN: usize = 4096;

struct Connection {
    session_key: String,
    write_tx: mpsc::Sender<Vec<u8>>,
}

/// A decoded, still-encrypted-in-transit frame handed to the dispatcher:
/// `None` payload is the disconnect sentinel.
pub struct IncomingFrame {
    pub channel: Channel,
    pub peer: SocketAddr,
    pub payload: Option<String>,
}

/// Shared handle for sending replies on one channel; cheap to clone.
#[derive(Clone)]
pub struct ChannelHandle {
    pub channel: Channel,
    connections: Arc<DashMap<SocketAddr, Connection>>,
}

impl ChannelHandle {
    pub async fn send(&self, payload: &str, dst: SocketAddr) {
        let Some(conn) = self.connections.get(&dst) else {
            debug!(channel = ?self.channel, %dst, "send to unknown peer skipped");
            return;
        };
        let framed = match encrypt_and_frame(self.channel, &conn.session_key, payload) {
            Ok(f) => f,
            Err(e) => {
                warn!(channel = ?self.channel, %dst, "failed to encrypt outgoing frame: {e}");
                return;
            }
        };
        if conn.write_tx.send(framed).await.is_err() {
            drop(conn);
            self.connections.remove(&dst);
        }
    }

    pub async fn send_to_many(&self, payload: &str, dsts: impl IntoIterator<Item = SocketAddr>) {
        for dst in dsts {
            self.send(payload, dst).await;
        }
    }

    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.connections.contains_key(&peer)
    }

    /// Addresses a reply by source IP rather than full socket address: the
    /// general, chats and files connections for one end user are three
    /// separate sockets from the same host on three different ports, and
    /// this is how a handler reaches "this user's chats connection" having
    /// only their general-channel session.
    pub async fn send_by_ip(&self, payload: &str, ip: std::net::IpAddr) {
        let Some(dst) = self.connections.iter().find(|e| e.key().ip() == ip).map(|e| *e.key())
        else {
            debug!(channel = ?self.channel, %ip, "send_by_ip: no matching connection");
            return;
        };
        self.send(payload, dst).await;
    }

    pub fn is_ip_connected(&self, ip: std::net::IpAddr) -> bool {
        self.connections.iter().any(|e| e.key().ip() == ip)
    }
}

fn encrypt_and_frame(channel: Channel, session_key: &str, payload: &str) -> Result<Vec<u8>> {
    let ciphertext_b64 = aes::encrypt(session_key, payload)?;
    Ok(encode_frame(ciphertext_b64.as_bytes(), channel.length_prefix_digits()))
}

/// Binds `bind_addr`, starts the accept loop as a background task, and
/// returns a sender handle plus the queue frames are pushed onto.
///
/// One RSA keypair is generated per listener and shared across every
/// connection it accepts, matching `ServerCom.__init__: self.rsa = RSACipher()`.
pub fn spawn_listener(
    channel: Channel,
    listener: TcpListener,
) -> Result<(ChannelHandle, mpsc::Receiver<IncomingFrame>)> {
    let connections: Arc<DashMap<SocketAddr, Connection>> = Arc::new(DashMap::new());
    let (queue_tx, queue_rx) = mpsc::channel(256);
    let keypair = Arc::new(RsaKeypair::generate()?);

    let handle = ChannelHandle { channel, connections: connections.clone() };

    tokio::spawn(accept_loop(channel, listener, connections, queue_tx, keypair));

    Ok((handle, queue_rx))
}

async fn accept_loop(
    channel: Channel,
    listener: TcpListener,
    connections: Arc<DashMap<SocketAddr, Connection>>,
    queue_tx: mpsc::Sender<IncomingFrame>,
    keypair: Arc<RsaKeypair>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(?channel, "accept error: {e}");
                continue;
            }
        };

        let connections = connections.clone();
        let queue_tx = queue_tx.clone();
        let keypair = keypair.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&stream, &keypair)).await {
                Ok(Ok(session_key)) => {
                    info!(?channel, %peer, "handshake complete");
                    run_connection(channel, stream, peer, session_key, connections, queue_tx).await;
                }
                Ok(Err(e)) => warn!(?channel, %peer, "handshake failed: {e}"),
                Err(_) => warn!(?channel, %peer, "handshake timed out"),
            }
        });
    }
}

/// Lock-step RSA key exchange: send our public key, read the peer's, wrap a
/// fresh AES session key under it and send the wrapped key back.
async fn handshake(stream: &TcpStream, keypair: &RsaKeypair) -> Result<String> {
    let our_pem = keypair.public_key_pem()?;

    loop {
        stream.writable().await?;
        match stream.try_write(our_pem.as_bytes()) {
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let peer_pem = read_peer_public_key(stream).await?;
    let session_key = aes::generate_key();
    let wrapped = rsa::encrypt_with_public_key_pem(&peer_pem, session_key.as_bytes())?;

    if wrapped.len() != RSA_CIPHERTEXT_LEN {
        bail!("unexpected RSA ciphertext length {}", wrapped.len());
    }

    let mut sent = 0;
    while sent < wrapped.len() {
        stream.writable().await?;
        match stream.try_write(&wrapped[sent..]) {
            Ok(n) => sent += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(session_key)
}

async fn read_peer_public_key(stream: &TcpStream) -> Result<String> {
    let mut buf = Vec::with_capacity(512);
    loop {
        if buf.len() > MAX_HANDSHAKE_PEM_LEN {
            bail!("peer public key exceeds handshake size limit");
        }
        stream.readable().await?;
        let mut chunk = [0u8; 512];
        match stream.try_read(&mut chunk) {
            Ok(0) => bail!("peer closed connection during handshake"),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find(PEM_END_MARKER) {
                    return Ok(text[..end + PEM_END_MARKER.len()].to_string());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

async fn run_connection(
    channel: Channel,
    stream: TcpStream,
    peer: SocketAddr,
    session_key: String,
    connections: Arc<DashMap<SocketAddr, Connection>>,
    queue_tx: mpsc::Sender<IncomingFrame>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(64);

    connections.insert(peer, Connection { session_key: session_key.clone(), write_tx });

    let writer = tokio::spawn(async move {
        while let Some(frame) = write_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let prefix_digits = channel.length_prefix_digits();
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut read_half = read_half;

    'outer: loop {
        match read_half.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(?channel, %peer, "read error: {e}");
                break;
            }
        }

        loop {
            match try_decode_frame(&mut buf, prefix_digits) {
                Ok(Some(ciphertext)) => {
                    let Ok(b64) = std::str::from_utf8(&ciphertext) else {
                        warn!(?channel, %peer, "ciphertext frame is not valid UTF-8");
                        break 'outer;
                    };
                    match aes::decrypt(&session_key, b64) {
                        Ok(plaintext) => {
                            let frame = IncomingFrame { channel, peer, payload: Some(plaintext) };
                            if queue_tx.send(frame).await.is_err() {
                                break 'outer;
                            }
                        }
                        Err(e) => {
                            warn!(?channel, %peer, "decrypt failed: {e}");
                            break 'outer;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(?channel, %peer, "frame decode error: {e}");
                    break 'outer;
                }
            }
        }
    }

    connections.remove(&peer);
    writer.abort();
    let _ = queue_tx.send(IncomingFrame { channel, peer, payload: None }).await;
    info!(?channel, %peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypts_and_frames_a_payload() {
        let key = aes::generate_key();
        let framed = encrypt_and_frame(Channel::General, &key, "01@hello").unwrap();
        assert_eq!(&framed[..4].iter().all(u8::is_ascii_digit), &true);
    }
}
