//! Fixed pool of reusable audio buffers
//!
//! Buffers are allocated once when the stream starts and cycle between the
//! pool and the playback sink by move. A slot is handed out again only
//! after the sink has returned its buffer through the [`BufferRecycler`],
//! so a buffer still being played can never be written.

use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

use crate::error::PoolError;

/// Fixed-capacity block holding one network chunk of PCM bytes
pub struct AudioBuffer {
    /// Pool slot this buffer belongs to
    slot: usize,
    /// Backing storage, never resized after allocation
    data: Box<[u8]>,
    /// Number of valid bytes at the front of `data`
    filled: usize,
    /// Bytes per multi-channel sample instant
    bytes_per_frame: usize,
    /// Submission sequence number of the current occupant
    sequence: u64,
}

impl AudioBuffer {
    fn allocate(slot: usize, capacity: usize, bytes_per_frame: usize) -> Option<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).ok()?;
        data.resize(capacity, 0u8);

        Some(Self {
            slot,
            data: data.into_boxed_slice(),
            filled: 0,
            bytes_per_frame,
            sequence: 0,
        })
    }

    /// Get the slot index this buffer cycles through
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Get capacity in bytes (one network chunk)
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Get the number of valid bytes
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// True once every byte of the chunk has been written
    pub fn is_complete(&self) -> bool {
        self.filled == self.data.len()
    }

    /// Sample frames carried by a full buffer
    pub fn frame_count(&self) -> usize {
        self.data.len() / self.bytes_per_frame
    }

    /// Valid bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Unwritten tail of the buffer
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Whole backing block, for readers that fill it in one call
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Mark `n` more bytes as written
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.data.len());
        self.filled = (self.filled + n).min(self.data.len());
    }

    /// Mark the buffer as holding exactly `n` valid bytes
    pub fn set_filled(&mut self, n: usize) {
        debug_assert!(n <= self.data.len());
        self.filled = n.min(self.data.len());
    }

    /// Forget the current contents
    pub fn clear(&mut self) {
        self.filled = 0;
    }

    /// Get the submission sequence number of the current occupant
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("slot", &self.slot)
            .field("capacity", &self.data.len())
            .field("filled", &self.filled)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Return path from the playback sink back to the pool
///
/// Lock-free and allocation-free, so it is safe to call from an audio
/// callback.
#[derive(Clone)]
pub struct BufferRecycler {
    queue: Arc<ArrayQueue<AudioBuffer>>,
}

impl BufferRecycler {
    /// Hand a finished buffer back to its pool
    /// Returns false if the return queue is full, which means a buffer was
    /// returned twice
    pub fn recycle(&self, buffer: AudioBuffer) -> bool {
        self.queue.push(buffer).is_ok()
    }

    /// Buffers returned but not yet collected by the pool
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Fixed ring of N reusable buffers indexed by `sequence % N`
pub struct BufferPool {
    slots: Vec<Option<AudioBuffer>>,
    returned: Arc<ArrayQueue<AudioBuffer>>,
    frame_bytes: usize,
    released: bool,
}

impl BufferPool {
    /// Allocate `count` buffers of `frame_bytes` bytes each
    ///
    /// `frame_bytes` must be a non-zero multiple of `bytes_per_frame` so a
    /// chunk never splits a sample instant.
    pub fn new(count: usize, frame_bytes: usize, bytes_per_frame: usize) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidGeometry("pool needs at least one buffer".into()));
        }
        if bytes_per_frame == 0 || frame_bytes == 0 || frame_bytes % bytes_per_frame != 0 {
            return Err(PoolError::InvalidGeometry(format!(
                "frame size {} is not a non-zero multiple of {} bytes",
                frame_bytes, bytes_per_frame
            )));
        }

        let allocation_failed = || PoolError::Allocation {
            count,
            bytes: frame_bytes,
        };

        let mut slots = Vec::new();
        slots.try_reserve_exact(count).map_err(|_| allocation_failed())?;
        for slot in 0..count {
            let buffer =
                AudioBuffer::allocate(slot, frame_bytes, bytes_per_frame).ok_or_else(allocation_failed)?;
            slots.push(Some(buffer));
        }

        tracing::debug!("Allocated {} buffers of {} bytes", count, frame_bytes);

        Ok(Self {
            slots,
            returned: Arc::new(ArrayQueue::new(count)),
            frame_bytes,
            released: false,
        })
    }

    /// Get the number of slots (N)
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Get the chunk size in bytes
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Get a return handle for the playback sink
    pub fn recycler(&self) -> BufferRecycler {
        BufferRecycler {
            queue: self.returned.clone(),
        }
    }

    /// Slot used by submission `sequence`
    pub fn slot_index(&self, sequence: u64) -> usize {
        (sequence % self.slots.len() as u64) as usize
    }

    /// Take the buffer for submission `submitted_seq`, valid for writing
    ///
    /// Returns `None` while the slot's previous occupant is still in flight:
    /// either `submitted_seq - completed` has reached N, or the sink has not
    /// yet handed the buffer back. `None` is a wait condition, not a failure.
    pub fn acquire_slot(&mut self, submitted_seq: u64, completed: u64) -> Option<AudioBuffer> {
        if self.released {
            return None;
        }

        let in_flight = submitted_seq.saturating_sub(completed);
        if in_flight >= self.slots.len() as u64 {
            return None;
        }

        self.collect_returned();

        let index = self.slot_index(submitted_seq);
        let mut buffer = self.slots[index].take()?;
        buffer.clear();
        Some(buffer)
    }

    /// Put a buffer back into its slot without submitting it
    pub fn release(&mut self, buffer: AudioBuffer) {
        let slot = buffer.slot();
        debug_assert!(self.slots[slot].is_none(), "slot {} returned twice", slot);
        if !self.released {
            self.slots[slot] = Some(buffer);
        }
    }

    /// Buffers currently owned by the pool
    pub fn available(&mut self) -> usize {
        self.collect_returned();
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Free every buffer the pool owns; later acquisitions return `None`
    /// Returns the number of buffers freed
    pub fn release_all(&mut self) -> usize {
        self.collect_returned();
        let freed = self.slots.iter_mut().filter_map(Option::take).count();
        self.released = true;
        freed
    }

    fn collect_returned(&mut self) {
        while let Some(buffer) = self.returned.pop() {
            self.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_geometry_validation() {
        assert!(matches!(
            BufferPool::new(0, 4096, 4),
            Err(PoolError::InvalidGeometry(_))
        ));
        assert!(matches!(
            BufferPool::new(3, 4094, 4),
            Err(PoolError::InvalidGeometry(_))
        ));
        assert!(matches!(
            BufferPool::new(3, 0, 4),
            Err(PoolError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_pool_allocation_failure() {
        let result = BufferPool::new(2, usize::MAX - 3, 4);
        assert!(matches!(result, Err(PoolError::Allocation { count: 2, .. })));
    }

    #[test]
    fn test_buffer_frame_count() {
        let mut pool = BufferPool::new(6, 4096, 4).unwrap();
        let buffer = pool.acquire_slot(0, 0).unwrap();
        assert_eq!(buffer.capacity(), 4096);
        assert_eq!(buffer.frame_count(), 1024);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_acquire_blocks_at_capacity() {
        let mut pool = BufferPool::new(3, 16, 4).unwrap();

        let mut in_flight = Vec::new();
        for seq in 0..3 {
            let buffer = pool.acquire_slot(seq, 0).unwrap();
            assert_eq!(buffer.slot(), seq as usize);
            in_flight.push(buffer);
        }

        // Three submitted, none completed
        assert!(pool.acquire_slot(3, 0).is_none());

        // Completion counted but buffer not yet handed back
        assert!(pool.acquire_slot(3, 1).is_none());

        let recycler = pool.recycler();
        assert!(recycler.recycle(in_flight.remove(0)));
        let buffer = pool.acquire_slot(3, 1).unwrap();
        assert_eq!(buffer.slot(), 0);
    }

    #[test]
    fn test_release_returns_slot() {
        let mut pool = BufferPool::new(2, 8, 4).unwrap();
        let mut buffer = pool.acquire_slot(0, 0).unwrap();
        buffer.data_mut().copy_from_slice(&[1; 8]);
        buffer.set_filled(8);
        pool.release(buffer);

        // Reacquired buffers come back empty
        let buffer = pool.acquire_slot(0, 0).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_slot_index_never_resets_counter() {
        let pool = BufferPool::new(6, 8, 4).unwrap();
        assert_eq!(pool.slot_index(5), 5);
        assert_eq!(pool.slot_index(6), 0);
        assert_eq!(pool.slot_index(u64::MAX), (u64::MAX % 6) as usize);
    }

    #[test]
    fn test_release_all() {
        let mut pool = BufferPool::new(4, 8, 4).unwrap();
        let held = pool.acquire_slot(0, 0).unwrap();
        pool.recycler().recycle(held);

        assert_eq!(pool.release_all(), 4);
        assert!(pool.acquire_slot(0, 0).is_none());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_partial_fill_tracking() {
        let mut pool = BufferPool::new(1, 8, 4).unwrap();
        let mut buffer = pool.acquire_slot(0, 0).unwrap();
        buffer.spare_mut()[..3].copy_from_slice(&[1, 2, 3]);
        buffer.advance(3);
        assert_eq!(buffer.as_bytes(), &[1, 2, 3]);
        assert!(!buffer.is_complete());
        assert_eq!(buffer.spare_mut().len(), 5);
    }
}
