//! Single-client TCP listener

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Listening socket that accepts one audio client at a time
pub struct StreamListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    recv_buffer_bytes: usize,
}

impl StreamListener {
    /// Bind and listen on the configured address
    pub fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let addr = (config.bind_address.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?
            .next()
            .ok_or_else(|| NetworkError::BindFailed(format!("no address for {}", config.bind_address)))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        socket
            .listen(1)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr().unwrap_or(addr);

        tracing::info!("Listening on port {}", local_addr.port());

        Ok(Self {
            listener,
            local_addr,
            recv_buffer_bytes: config.recv_buffer_bytes,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until a client connects
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr), NetworkError> {
        let (client, peer) = self
            .listener
            .accept()
            .map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;
        prepare_client(&client, peer, self.recv_buffer_bytes);
        Ok((client, peer))
    }

    /// Switch to a tokio listener so waiting for a client can be cancelled
    pub fn into_async(self) -> Result<AsyncStreamListener, NetworkError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let listener = tokio::net::TcpListener::from_std(self.listener)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        Ok(AsyncStreamListener {
            listener,
            recv_buffer_bytes: self.recv_buffer_bytes,
        })
    }
}

/// Listener for use on a tokio runtime
///
/// Accepted connections are handed back as blocking std streams, ready for
/// the frame source.
pub struct AsyncStreamListener {
    listener: tokio::net::TcpListener,
    recv_buffer_bytes: usize,
}

impl AsyncStreamListener {
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), NetworkError> {
        let (client, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;

        let client = client
            .into_std()
            .map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;
        client
            .set_nonblocking(false)
            .map_err(|e| NetworkError::AcceptFailed(e.to_string()))?;

        prepare_client(&client, peer, self.recv_buffer_bytes);
        Ok((client, peer))
    }
}

fn prepare_client(client: &TcpStream, peer: SocketAddr, recv_buffer_bytes: usize) {
    if recv_buffer_bytes > 0 {
        if let Err(e) = SockRef::from(client).set_recv_buffer_size(recv_buffer_bytes) {
            tracing::warn!("Failed to set receive buffer to {} bytes: {}", recv_buffer_bytes, e);
        }
    }
    tracing::info!("Client connected from {}", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    fn loopback() -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_accepts_one_client() {
        let listener = StreamListener::bind(&loopback()).unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"pcm!").unwrap();
        });

        let (mut stream, _peer) = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pcm!");
        client.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_accept_returns_blocking_stream() {
        let listener = StreamListener::bind(&loopback()).unwrap();
        let addr = listener.local_addr();
        let listener = listener.into_async().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&[7u8; 16]).unwrap();
        });

        let (stream, _peer) = listener.accept().await.unwrap();
        let mut stream = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 16];
            let mut reader = stream;
            reader.read_exact(&mut buf).unwrap();
            assert_eq!(buf, [7u8; 16]);
            reader
        })
        .await
        .unwrap();

        client.join().unwrap();
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    }
}
