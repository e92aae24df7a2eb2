//! TCP transport with optional TLS.
//!
//! The listener accepts plain TCP and, when configured with a certificate
//! and key, upgrades every accepted socket with rustls before the session
//! runs. TLS 1.2 and 1.3 are offered; client certificates are not
//! requested, matching what the disassembler client expects.
//!
//! In plaintext mode the first three bytes of each connection are peeked
//! before the protocol parser ever runs: a TLS ClientHello record header
//! means the client was configured for TLS against a plaintext server, and
//! feeding its ciphertext to the packet parser would hang the session on a
//! garbage length field. Such connections are dropped with an error log and
//! no reply.

use std::{
    io,
    net::SocketAddr,
    path::Path,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpSocket, TcpStream},
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

use crate::error::ServerError;

/// Record header of a TLS ClientHello: handshake record, TLS 1.0 legacy
/// version bytes.
const TLS_CLIENT_HELLO: [u8; 3] = [0x16, 0x03, 0x01];

/// Load a rustls server configuration from PEM certificate and key files.
///
/// No client authentication is requested. Protocol versions are rustls
/// defaults (TLS 1.2 and 1.3).
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<rustls::ServerConfig>, ServerError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ServerError::Config(format!("failed to read cert '{}': {e}", cert_path.display()))
    })?;

    let key_pem = std::fs::read(key_path).map_err(|e| {
        ServerError::Config(format!("failed to read key '{}': {e}", key_path.display()))
    })?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    Ok(Arc::new(config))
}

/// TCP listener with an optional TLS acceptor.
pub struct Listener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind to `addr`. With a TLS config every accepted socket is upgraded;
    /// without one the handler runs in plaintext.
    ///
    /// `SO_REUSEADDR` is set so a restart does not trip over sockets still
    /// in TIME_WAIT from the previous run.
    pub async fn bind(
        addr: SocketAddr,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Result<Self, ServerError> {
        let config_err =
            |e: io::Error| ServerError::Config(format!("failed to bind {addr}: {e}"));

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(config_err)?;

        socket.set_reuseaddr(true).map_err(config_err)?;
        socket.bind(addr).map_err(config_err)?;
        let listener = socket.listen(1024).map_err(config_err)?;

        Ok(Self { listener, acceptor: tls.map(TlsAcceptor::from) })
    }

    /// Whether accepted sockets will be TLS-upgraded.
    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Accept one connection.
    ///
    /// Only the TCP accept happens here; the TLS handshake (or the
    /// plaintext guard) runs in [`Incoming::establish`] so one slow
    /// handshake cannot stall the accept loop.
    pub async fn accept(&self) -> Result<Incoming, ServerError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))?;

        Ok(Incoming { stream, peer, acceptor: self.acceptor.clone() })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// An accepted connection that has not completed session setup yet.
pub struct Incoming {
    stream: TcpStream,
    /// Remote peer address, for logging
    pub peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
}

impl Incoming {
    /// Finish setup: TLS handshake when configured, otherwise the
    /// plaintext ClientHello guard.
    pub async fn establish(self) -> Result<ClientStream, ServerError> {
        let peer = self.peer;

        match self.acceptor {
            Some(acceptor) => {
                tracing::debug!(%peer, "starting TLS session");
                let stream = acceptor.accept(self.stream).await.map_err(|e| {
                    ServerError::Transport(format!("TLS handshake with {peer} failed: {e}"))
                })?;
                Ok(ClientStream::Tls(Box::new(stream)))
            },
            None => {
                tracing::debug!(%peer, "starting plaintext session");
                reject_stray_client_hello(&self.stream, peer).await?;
                Ok(ClientStream::Plain(self.stream))
            },
        }
    }
}

/// Peek the first bytes of a plaintext connection and refuse TLS clients.
///
/// Without this, a client configured for TLS would make the packet parser
/// interpret ciphertext as a frame and stall on its bogus length.
async fn reject_stray_client_hello(stream: &TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
    let mut first = [0u8; 3];
    let n = stream
        .peek(&mut first)
        .await
        .map_err(|e| ServerError::Transport(format!("peek on {peer} failed: {e}")))?;

    if n == first.len() && first == TLS_CLIENT_HELLO {
        return Err(ServerError::Transport(format!(
            "TLS ClientHello from {peer} on a plaintext listener, check the client TLS setting and cert"
        )));
    }
    Ok(())
}

/// One established client connection, plaintext or TLS.
///
/// The session handler is generic over `AsyncRead + AsyncWrite`, so both
/// variants flow through the same code path.
#[derive(Debug)]
pub enum ClientStream {
    /// Cleartext TCP
    Plain(TcpStream),
    /// TLS-upgraded TCP
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn listener_binds_ephemeral_port() {
        let listener =
            Listener::bind("127.0.0.1:0".parse().unwrap(), None).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert!(!listener.is_tls());
    }

    #[tokio::test]
    async fn plaintext_guard_drops_tls_clients() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), None).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&TLS_CLIENT_HELLO).await.unwrap();

        let incoming = listener.accept().await.unwrap();
        let err = incoming.establish().await.unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)));
    }

    #[tokio::test]
    async fn plaintext_guard_passes_protocol_bytes() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), None).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        // A legitimate frame starts with the BE length field
        client.write_all(&[0x00, 0x00, 0x00, 0x0D, 0x0D]).await.unwrap();

        let incoming = listener.accept().await.unwrap();
        assert!(incoming.establish().await.is_ok());
    }
}
