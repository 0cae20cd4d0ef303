//! PCM sender: writes back-to-back chunks to a receiver

use bytes::{Buf, BytesMut};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use crate::error::NetworkError;

/// Outgoing PCM stream that only ever writes whole chunks
pub struct PcmSender<W> {
    writer: W,
    frame_bytes: usize,
    pending: BytesMut,
    frames_sent: u64,
    bytes_sent: u64,
}

impl PcmSender<TcpStream> {
    /// Connect to a receiver
    pub fn connect(addr: SocketAddr, frame_bytes: usize) -> Result<Self, NetworkError> {
        let stream = TcpStream::connect(addr).map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to disable Nagle: {}", e);
        }
        tracing::info!("Connected to {}", addr);
        Ok(Self::new(stream, frame_bytes))
    }
}

impl<W: Write> PcmSender<W> {
    pub fn new(writer: W, frame_bytes: usize) -> Self {
        Self {
            writer,
            frame_bytes,
            pending: BytesMut::with_capacity(frame_bytes * 2),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Queue bytes and send every complete chunk
    /// Returns the number of chunks written
    pub fn push(&mut self, data: &[u8]) -> Result<usize, NetworkError> {
        self.pending.extend_from_slice(data);

        let mut sent = 0;
        while self.pending.len() >= self.frame_bytes {
            self.writer
                .write_all(&self.pending[..self.frame_bytes])
                .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
            self.pending.advance(self.frame_bytes);
            self.frames_sent += 1;
            self.bytes_sent += self.frame_bytes as u64;
            sent += 1;
        }
        Ok(sent)
    }

    /// Flush the writer; a trailing partial chunk is kept, never sent
    pub fn finish(mut self) -> Result<SenderStats, NetworkError> {
        self.writer
            .flush()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        if !self.pending.is_empty() {
            tracing::debug!("Discarding {} trailing bytes", self.pending.len());
        }
        Ok(self.stats())
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            pending_bytes: self.pending.len(),
        }
    }
}

/// Sender statistics
#[derive(Debug, Clone)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub pending_bytes: usize,
}
