//! Byte buffers and the arena they are pooled in.

use std::fmt;
use std::sync::Mutex;

use crate::util::lock;

/// A fixed capacity byte buffer with a get index and a put index.
///
/// Bytes between the two indexes are the content. Bytes after the put index
/// are free to be written to. Space before the get index is reclaimed by
/// [`compact()`](Buffer::compact).
#[derive(Default)]
pub struct Buffer {
    data: Vec<u8>,
    get: usize,
    put: usize,
}

impl Buffer {
    /// New empty buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Buffer {
            data: vec![0; capacity],
            get: 0,
            put: 0,
        }
    }

    /// Total number of bytes this buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of content bytes.
    pub fn len(&self) -> usize {
        self.put - self.get
    }

    pub fn is_empty(&self) -> bool {
        self.get == self.put
    }

    pub fn has_content(&self) -> bool {
        !self.is_empty()
    }

    /// Free space, counting what a compact would reclaim.
    pub fn space(&self) -> usize {
        self.capacity() - self.len()
    }

    /// The content bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.get..self.put]
    }

    /// The free tail of the buffer. Compacts first if that frees more space.
    ///
    /// Follow up with [`advance()`](Buffer::advance) for the bytes written.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.get > 0 {
            self.compact();
        }
        &mut self.data[self.put..]
    }

    /// Mark `n` bytes written to [`spare_mut()`](Buffer::spare_mut) as content.
    pub fn advance(&mut self, n: usize) {
        assert!(self.put + n <= self.capacity(), "advance past capacity");
        self.put += n;
    }

    /// Drop `n` bytes from the front of the content.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume more than content");
        self.get += n;
        if self.get == self.put {
            self.get = 0;
            self.put = 0;
        }
    }

    /// Move the content to the start of the buffer.
    pub fn compact(&mut self) {
        if self.get == 0 {
            return;
        }
        self.data.copy_within(self.get..self.put, 0);
        self.put -= self.get;
        self.get = 0;
    }

    /// Copy as much of `src` as fits. Returns the number of bytes copied.
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let spare = self.spare_mut();
        let n = spare.len().min(src.len());
        spare[..n].copy_from_slice(&src[..n]);
        self.put += n;
        n
    }

    /// Move as much content as fits from `other` into this buffer.
    pub fn transfer_from(&mut self, other: &mut Buffer) -> usize {
        let n = self.put_slice(other.as_slice());
        other.consume(n);
        n
    }

    /// Discard all content.
    pub fn clear(&mut self) {
        self.get = 0;
        self.put = 0;
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        let put = data.len();
        Buffer { data, get: 0, put }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Bounded pool of [`Buffer`]s.
///
/// One arena is meant to be shared (via `Arc`) by the adapters and codecs
/// run by a worker. Buffers are handed back with [`release()`](BufferArena::release)
/// once drained.
pub struct BufferArena {
    free: Mutex<Vec<Buffer>>,
    max_pooled: usize,
}

impl BufferArena {
    /// New arena keeping at most `max_pooled` idle buffers.
    pub fn new(max_pooled: usize) -> Self {
        BufferArena {
            free: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Take a buffer of at least `capacity` bytes, reusing a pooled one if possible.
    pub fn acquire(&self, capacity: usize) -> Buffer {
        let mut free = lock(&self.free);
        if let Some(idx) = free.iter().position(|b| b.capacity() >= capacity) {
            return free.swap_remove(idx);
        }
        drop(free);
        trace!("Allocate buffer: {}", capacity);
        Buffer::new(capacity)
    }

    /// Give a buffer back. Any content is discarded.
    pub fn release(&self, mut buffer: Buffer) {
        if buffer.capacity() == 0 {
            return;
        }
        buffer.clear();
        let mut free = lock(&self.free);
        if free.len() < self.max_pooled {
            free.push(buffer);
        }
    }

    /// Number of idle buffers currently pooled.
    pub fn pooled(&self) -> usize {
        lock(&self.free).len()
    }
}

impl fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferArena")
            .field("pooled", &self.pooled())
            .field("max_pooled", &self.max_pooled)
            .finish()
    }
}
