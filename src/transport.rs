//! Connection provider.
//!
//! A [`Channel`] is one reliable, ordered, connection-oriented pipe carrying
//! whole PDUs. It can sit on a TCP stream, a QUIC bidirectional stream or any
//! in-memory `AsyncRead`/`AsyncWrite` pair. Since every PDU has the same wire
//! size, framing is simply "read exactly [`PDU_LEN`] bytes".

use anyhow::{Context, Result};
use quinn::{Connecting, Connection, Endpoint};
use serde::{Deserialize, Serialize};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{error::TransferError, identity, pdu::{Pdu, PDU_LEN}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Quic,
}

type BoxRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Keeps the QUIC endpoint and connection alive while their stream is in use.
struct QuicHold {
    _endpoint: Option<Endpoint>,
    _connection: Connection,
}

pub struct Channel {
    reader: BoxRead,
    writer: BoxWrite,
    peer: String,
    recv_timeout: Option<Duration>,
    _quic: Option<QuicHold>,
}

fn is_closed_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

impl Channel {
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { reader: Box::new(reader), writer: Box::new(writer), peer: peer.into(), recv_timeout: None, _quic: None }
    }

    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        Ok(Self::new(r, w, peer))
    }

    /// Bound every receive; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send_pdu(&mut self, pdu: &Pdu) -> Result<(), TransferError> {
        let bytes = pdu.encode()?;
        let sent = async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        }
        .await;
        match sent {
            Ok(()) => {
                log::debug!("{} <- {:?} seq={}", self.peer, pdu.msg_type(), pdu.seq);
                Ok(())
            }
            Err(e) if is_closed_kind(e.kind()) => Err(TransferError::ClosedByPeer),
            Err(e) => Err(e.into()),
        }
    }

    /// Next PDU, or `None` once the peer has closed the connection.
    pub async fn recv_pdu(&mut self) -> Result<Option<Pdu>, TransferError> {
        let frame = match self.recv_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_frame())
                .await
                .map_err(|_| TransferError::Timeout(limit))??,
            None => self.read_frame().await?,
        };
        let Some(frame) = frame else { return Ok(None) };
        let pdu = Pdu::decode(&frame)?;
        log::debug!("{} -> {:?} seq={}", self.peer, pdu.msg_type(), pdu.seq);
        Ok(Some(pdu))
    }

    async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; PDU_LEN];
        let mut filled = 0;
        while filled < PDU_LEN {
            match self.reader.read(&mut buf[filled..]).await {
                Ok(0) => {
                    if filled > 0 {
                        log::warn!("{} closed mid-pdu after {} bytes", self.peer, filled);
                    }
                    return Ok(None);
                }
                Ok(n) => filled += n,
                Err(e) if is_closed_kind(e.kind()) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(Some(buf))
    }

    /// Graceful close of our sending half. Errors only mean the peer is
    /// already gone.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            log::debug!("{}: shutdown: {}", self.peer, e);
        }
    }
}

/// Client side: open a channel to `host:port`.
pub async fn connect(kind: TransportKind, host: &str, port: u16) -> Result<Channel> {
    match kind {
        TransportKind::Tcp => {
            let stream = TcpStream::connect((host, port)).await.with_context(|| format!("connect to {host}:{port}"))?;
            Ok(Channel::from_tcp(stream)?)
        }
        TransportKind::Quic => {
            let addr = tokio::net::lookup_host((host, port))
                .await?
                .next()
                .ok_or_else(|| anyhow::anyhow!("{host} did not resolve"))?;
            let local: SocketAddr = if addr.is_ipv6() { "[::]:0".parse()? } else { "0.0.0.0:0".parse()? };
            let mut endpoint = Endpoint::client(local)?;
            endpoint.set_default_client_config(identity::make_client_config());
            let connection = endpoint.connect(addr, "localhost")?.await.with_context(|| format!("quic connect to {addr}"))?;
            let (send, recv) = connection.open_bi().await?;
            let mut channel = Channel::new(recv, send, addr.to_string());
            channel._quic = Some(QuicHold { _endpoint: Some(endpoint), _connection: connection });
            Ok(channel)
        }
    }
}

pub enum Listener {
    Tcp(TcpListener),
    Quic(Endpoint),
}

/// An accepted connection whose handshake has not been awaited yet.
pub enum Incoming {
    Tcp(TcpStream),
    Quic(Connecting),
}

impl Listener {
    pub async fn bind(kind: TransportKind, port: u16) -> Result<Self> {
        let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
        match kind {
            TransportKind::Tcp => Ok(Listener::Tcp(TcpListener::bind(addr).await.with_context(|| format!("bind {addr}"))?)),
            TransportKind::Quic => Self::bind_quic(identity::make_server_config(&identity::state_dir()?)?, addr),
        }
    }

    pub fn bind_quic(config: quinn::ServerConfig, addr: SocketAddr) -> Result<Self> {
        let endpoint = Endpoint::server(config, addr).with_context(|| format!("bind {addr}"))?;
        Ok(Listener::Quic(endpoint))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(match self {
            Listener::Tcp(l) => l.local_addr()?,
            Listener::Quic(e) => e.local_addr()?,
        })
    }

    /// Wait for the next connection; `None` once the listener is closed.
    pub async fn accept(&self) -> Result<Option<Incoming>> {
        match self {
            Listener::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Some(Incoming::Tcp(stream)))
            }
            Listener::Quic(e) => Ok(e.accept().await.map(Incoming::Quic)),
        }
    }
}

impl Incoming {
    /// Finish the handshake and wait for the peer's stream.
    pub async fn open(self) -> Result<Channel> {
        match self {
            Incoming::Tcp(stream) => Ok(Channel::from_tcp(stream)?),
            Incoming::Quic(connecting) => {
                let connection = connecting.await?;
                let peer = connection.remote_address().to_string();
                let (send, recv) = connection.accept_bi().await?;
                let mut channel = Channel::new(recv, send, peer);
                channel._quic = Some(QuicHold { _endpoint: None, _connection: connection });
                Ok(channel)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::Message;

    #[tokio::test]
    async fn pdus_cross_an_in_memory_pipe() {
        let (a, b) = tokio::io::duplex(PDU_LEN * 2);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let mut left = Channel::new(ar, aw, "left");
        let mut right = Channel::new(br, bw, "right");

        let pdu = Pdu::new(3, Message::Data(b"abc".to_vec()));
        left.send_pdu(&pdu).await.unwrap();
        assert_eq!(right.recv_pdu().await.unwrap(), Some(pdu));

        left.disconnect().await;
        assert_eq!(right.recv_pdu().await.unwrap(), None);
    }

    #[tokio::test]
    async fn receive_timeout_is_an_error() {
        let (a, _b) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(a);
        let mut ch = Channel::new(r, w, "idle").with_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(ch.recv_pdu().await, Err(TransferError::Timeout(_))));
    }

    #[tokio::test]
    async fn tcp_loopback_round_trip() {
        let listener = Listener::bind(TransportKind::Tcp, 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let incoming = listener.accept().await.unwrap().unwrap();
            let mut ch = incoming.open().await.unwrap();
            let got = ch.recv_pdu().await.unwrap().unwrap();
            ch.send_pdu(&Pdu::new(0, Message::Ack)).await.unwrap();
            ch.disconnect().await;
            got
        });

        let mut ch = connect(TransportKind::Tcp, "127.0.0.1", port).await.unwrap();
        ch.send_pdu(&Pdu::new(0, Message::Complete)).await.unwrap();
        assert_eq!(ch.recv_pdu().await.unwrap(), Some(Pdu::new(0, Message::Ack)));
        assert_eq!(server.await.unwrap(), Pdu::new(0, Message::Complete));
    }

    #[tokio::test]
    async fn quic_loopback_round_trip() {
        let certs = tempfile::tempdir().unwrap();
        let config = identity::make_server_config(certs.path()).unwrap();
        let listener = Listener::bind_quic(config, "127.0.0.1:0".parse().unwrap()).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let incoming = listener.accept().await.unwrap().unwrap();
            let mut ch = incoming.open().await.unwrap();
            let got = ch.recv_pdu().await.unwrap().unwrap();
            ch.send_pdu(&Pdu::new(0, Message::Ack)).await.unwrap();
            // stay up until the client has read the reply and finished its stream
            assert_eq!(ch.recv_pdu().await.unwrap(), None);
            got
        });

        let mut ch = connect(TransportKind::Quic, "127.0.0.1", port).await.unwrap();
        ch.send_pdu(&Pdu::new(0, Message::Filename { name: "q.txt".into(), total_size: 1 })).await.unwrap();
        assert_eq!(ch.recv_pdu().await.unwrap(), Some(Pdu::new(0, Message::Ack)));
        ch.disconnect().await;
        assert_eq!(server.await.unwrap(), Pdu::new(0, Message::Filename { name: "q.txt".into(), total_size: 1 }));
    }
}
