//! Frame source: one fixed-size chunk per call from a byte stream
//!
//! The stream has no framing of its own, so a chunk is only ever handed on
//! when every one of its bytes arrived. A connection that ends part way
//! through a chunk ends the stream; the partial chunk is dropped.

use std::io::{ErrorKind, Read};

use crate::audio::buffer::AudioBuffer;
use crate::config::ReadStrategy;
use crate::error::NetworkError;

/// Outcome of a single chunk read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRead {
    /// The buffer holds a full chunk of this many bytes
    Complete(usize),
    /// The peer closed the connection; `partial` bytes were discarded
    Ended { partial: usize },
}

/// Pulls fixed-size chunks off a blocking reader
pub struct FrameSource<R> {
    reader: Option<R>,
    strategy: ReadStrategy,
    frames_read: u64,
    bytes_read: u64,
}

impl<R: Read> FrameSource<R> {
    pub fn new(reader: R, strategy: ReadStrategy) -> Self {
        Self {
            reader: Some(reader),
            strategy,
            frames_read: 0,
            bytes_read: 0,
        }
    }

    /// Fill `buffer` with exactly one chunk
    ///
    /// Blocks until the chunk is complete, the peer closes, or the read
    /// fails. Never returns `Complete` for a short chunk.
    pub fn read_frame(&mut self, buffer: &mut AudioBuffer) -> Result<FrameRead, NetworkError> {
        buffer.clear();
        let Some(reader) = self.reader.as_mut() else {
            return Ok(FrameRead::Ended { partial: 0 });
        };

        let outcome = match self.strategy {
            ReadStrategy::ReadExact => read_exact(reader, buffer),
            ReadStrategy::Accumulate => accumulate(reader, buffer),
        }?;

        match outcome {
            FrameRead::Complete(n) => {
                self.frames_read += 1;
                self.bytes_read += n as u64;
            }
            FrameRead::Ended { partial } => {
                if partial > 0 {
                    tracing::debug!("Dropping {} bytes of an incomplete chunk", partial);
                }
                buffer.clear();
            }
        }
        Ok(outcome)
    }

    /// Complete chunks delivered so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Bytes delivered in complete chunks
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Drop the underlying connection; later reads report end of stream
    pub fn close(&mut self) {
        self.reader = None;
    }
}

fn read_exact<R: Read>(reader: &mut R, buffer: &mut AudioBuffer) -> Result<FrameRead, NetworkError> {
    let len = buffer.capacity();
    match reader.read_exact(buffer.data_mut()) {
        Ok(()) => {
            buffer.set_filled(len);
            Ok(FrameRead::Complete(len))
        }
        // read_exact does not say how much it got before the end
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(FrameRead::Ended { partial: 0 }),
        Err(e) => Err(NetworkError::ReceiveFailed(e.to_string())),
    }
}

fn accumulate<R: Read>(reader: &mut R, buffer: &mut AudioBuffer) -> Result<FrameRead, NetworkError> {
    while !buffer.is_complete() {
        match reader.read(buffer.spare_mut()) {
            Ok(0) => {
                return Ok(FrameRead::Ended {
                    partial: buffer.len(),
                })
            }
            Ok(n) => buffer.advance(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }
    Ok(FrameRead::Complete(buffer.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::BufferPool;
    use std::io::{self, Cursor};

    /// Reader that hands out at most `step` bytes per call, with an
    /// interruption between calls
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
        interrupt: bool,
    }

    impl Trickle {
        fn new(data: Vec<u8>, step: usize) -> Self {
            Self {
                data,
                pos: 0,
                step,
                interrupt: false,
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::ConnectionReset))
        }
    }

    fn collect<R: Read>(source: &mut FrameSource<R>, pool: &mut BufferPool) -> (Vec<u8>, FrameRead) {
        let mut out = Vec::new();
        let mut seq = 0;
        loop {
            let mut buffer = pool.acquire_slot(seq, seq).unwrap();
            let outcome = source.read_frame(&mut buffer).unwrap();
            if let FrameRead::Complete(n) = outcome {
                assert_eq!(n, buffer.capacity());
                assert!(buffer.is_complete());
                out.extend_from_slice(buffer.as_bytes());
                pool.release(buffer);
                seq += 1;
            } else {
                assert!(buffer.is_empty());
                pool.release(buffer);
                return (out, outcome);
            }
        }
    }

    #[test]
    fn test_strategies_agree() {
        let data: Vec<u8> = (0..40u32).map(|i| (i * 7) as u8).collect();

        let mut pool = BufferPool::new(2, 8, 4).unwrap();
        let mut exact = FrameSource::new(Cursor::new(data.clone()), ReadStrategy::ReadExact);
        let mut trickle = FrameSource::new(Trickle::new(data.clone(), 3), ReadStrategy::Accumulate);

        let (a, end_a) = collect(&mut exact, &mut pool);
        let (b, end_b) = collect(&mut trickle, &mut pool);

        assert_eq!(a, data);
        assert_eq!(a, b);
        assert_eq!(end_a, FrameRead::Ended { partial: 0 });
        assert_eq!(end_b, FrameRead::Ended { partial: 0 });
        assert_eq!(exact.frames_read(), 5);
        assert_eq!(trickle.bytes_read(), 40);
    }

    #[test]
    fn test_short_tail_is_dropped() {
        let data = vec![9u8; 8 * 3 + 5];
        let mut pool = BufferPool::new(1, 8, 4).unwrap();

        let mut exact = FrameSource::new(Cursor::new(data.clone()), ReadStrategy::ReadExact);
        let (a, _) = collect(&mut exact, &mut pool);
        assert_eq!(a.len(), 24);

        let mut accumulate = FrameSource::new(Cursor::new(data), ReadStrategy::Accumulate);
        let (b, end) = collect(&mut accumulate, &mut pool);
        assert_eq!(b.len(), 24);
        assert_eq!(end, FrameRead::Ended { partial: 5 });
    }

    #[test]
    fn test_empty_stream_ends_without_spinning() {
        let mut pool = BufferPool::new(1, 8, 4).unwrap();
        let mut buffer = pool.acquire_slot(0, 0).unwrap();
        let mut source = FrameSource::new(Cursor::new(Vec::new()), ReadStrategy::Accumulate);
        assert_eq!(source.read_frame(&mut buffer).unwrap(), FrameRead::Ended { partial: 0 });
    }

    #[test]
    fn test_read_error_is_reported() {
        let mut pool = BufferPool::new(1, 8, 4).unwrap();
        let mut buffer = pool.acquire_slot(0, 0).unwrap();

        for strategy in [ReadStrategy::ReadExact, ReadStrategy::Accumulate] {
            let mut source = FrameSource::new(Failing, strategy);
            assert!(matches!(
                source.read_frame(&mut buffer),
                Err(NetworkError::ReceiveFailed(_))
            ));
        }
    }

    #[test]
    fn test_closed_source_reports_end() {
        let mut pool = BufferPool::new(1, 8, 4).unwrap();
        let mut buffer = pool.acquire_slot(0, 0).unwrap();
        let mut source = FrameSource::new(Cursor::new(vec![1u8; 16]), ReadStrategy::ReadExact);
        source.close();
        assert!(source.is_closed());
        assert_eq!(source.read_frame(&mut buffer).unwrap(), FrameRead::Ended { partial: 0 });
    }
}
