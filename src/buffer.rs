//! Report ring buffer.
//!
//! A fixed number of fixed-size report blocks shared by one writer (the device's reader
//! thread) and any number of readers, each reading through its own cursor.
//!
//! ## Sequence numbers
//! Blocks are addressed by a monotonically increasing sequence number; the slot is
//! `seq % capacity`. The buffer retains the sequence range `start..end`, with
//! `end - start <= capacity`. A cursor stores the sequence number it reads next.
//!
//! When the writer overruns a slow reader, the oldest block is dropped and the cursor
//! is pulled forward to `start` the next time it is touched. The number of blocks it
//! skipped is remembered and can be collected with [`RingBuffer::take_dropped`].
//!
//! ## Locking
//! Every operation takes the internal mutex for its whole duration and never blocks
//! otherwise. Waiting for data is the caller's business.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::BufferError;

/// Number of blocks a new buffer holds.
pub const BASE_CAPACITY: usize = 32;
pub const MIN_BUFFER_SIZE: usize = 2;
pub const MAX_BUFFER_SIZE: usize = 512;

const INITIAL_CURSORS: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next: u64,
    dropped: u64,
}

#[derive(Debug)]
struct Inner {
    data: Vec<u8>,
    capacity: usize,
    start: u64,
    end: u64,
    cursors: Vec<Option<Cursor>>,
}

impl Inner {
    fn cursor_mut(&mut self, id: usize) -> Result<&mut Cursor, BufferError> {
        let start = self.start;
        let cursor = self
            .cursors
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(BufferError::InvalidCursor(id))?;

        if cursor.next < start {
            let skipped = start - cursor.next;
            debug!(cursor = id, skipped, "report buffer overran cursor");
            cursor.dropped += skipped;
            cursor.next = start;
        }
        Ok(cursor)
    }

    fn slot(&self, seq: u64, block_size: usize) -> &[u8] {
        let offset = (seq % self.capacity as u64) as usize * block_size;
        &self.data[offset..offset + block_size]
    }
}

fn allocate(capacity: usize, block_size: usize) -> Result<Vec<u8>, BufferError> {
    let len = capacity
        .checked_mul(block_size)
        .ok_or(BufferError::NoMemory)?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| BufferError::NoMemory)?;
    data.resize(len, 0);
    Ok(data)
}

/// Lock-protected circular store of report blocks. See the module docs.
#[derive(Debug)]
pub struct RingBuffer {
    block_size: usize,
    inner: Mutex<Inner>,
}

impl RingBuffer {
    /// Creates a buffer of [`BASE_CAPACITY`] blocks of `block_size` bytes.
    pub fn new(block_size: usize) -> Result<Self, BufferError> {
        let data = allocate(BASE_CAPACITY, block_size)?;
        let mut cursors = Vec::new();
        cursors
            .try_reserve_exact(INITIAL_CURSORS)
            .map_err(|_| BufferError::NoMemory)?;
        cursors.resize(INITIAL_CURSORS, None);

        Ok(Self {
            block_size,
            inner: Mutex::new(Inner {
                data,
                capacity: BASE_CAPACITY,
                start: 0,
                end: 0,
                cursors,
            }),
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Changes the number of blocks held.
    ///
    /// ### Behavior
    /// - `n` outside `MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE`: `InvalidCapacity`, nothing changes.
    /// - Otherwise all buffered reports are discarded and every open cursor is moved to
    ///   the (empty) end, so it only sees reports written afterwards.
    /// - Allocation failure returns `NoMemory` and keeps the previous contents.
    pub fn set_capacity(&self, n: usize) -> Result<(), BufferError> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&n) {
            return Err(BufferError::InvalidCapacity(n));
        }
        let data = allocate(n, self.block_size)?;

        let mut inner = self.inner.lock();
        inner.data = data;
        inner.capacity = n;
        inner.start = inner.end;
        let end = inner.end;
        for cursor in inner.cursors.iter_mut().flatten() {
            cursor.next = end;
        }
        debug!(capacity = n, "report buffer resized");
        Ok(())
    }

    /// Appends one report, dropping the oldest when full.
    ///
    /// `block` is zero padded or truncated to the block size.
    pub fn write(&self, block: &[u8]) {
        let block_size = self.block_size;
        let mut inner = self.inner.lock();

        let offset = (inner.end % inner.capacity as u64) as usize * block_size;
        let slot = &mut inner.data[offset..offset + block_size];
        let n = block.len().min(block_size);
        slot[..n].copy_from_slice(&block[..n]);
        slot[n..].fill(0);

        inner.end += 1;
        if inner.end - inner.start > inner.capacity as u64 {
            inner.start += 1;
        }
    }

    /// Opens a cursor positioned at the current end.
    pub fn add_cursor(&self) -> Result<usize, BufferError> {
        let mut inner = self.inner.lock();
        let cursor = Cursor {
            next: inner.end,
            dropped: 0,
        };

        if let Some(id) = inner.cursors.iter().position(Option::is_none) {
            inner.cursors[id] = Some(cursor);
            return Ok(id);
        }

        let id = inner.cursors.len();
        let grown = (id * 2).max(INITIAL_CURSORS);
        inner
            .cursors
            .try_reserve_exact(grown - id)
            .map_err(|_| BufferError::NoMemory)?;
        inner.cursors.resize(grown, None);
        inner.cursors[id] = Some(cursor);
        Ok(id)
    }

    /// Marks a cursor unused. Unknown ids are ignored.
    pub fn remove_cursor(&self, id: usize) {
        if let Some(slot) = self.inner.lock().cursors.get_mut(id) {
            *slot = None;
        }
    }

    /// Copies the next unread report into `out` and advances the cursor.
    ///
    /// Returns the number of bytes copied, 0 when the cursor has nothing new.
    pub fn read_new(&self, id: usize, out: &mut [u8]) -> Result<usize, BufferError> {
        let block_size = self.block_size;
        let mut inner = self.inner.lock();
        let end = inner.end;
        let seq = inner.cursor_mut(id)?.next;
        if seq == end {
            return Ok(0);
        }

        let n = out.len().min(block_size);
        out[..n].copy_from_slice(&inner.slot(seq, block_size)[..n]);
        inner.cursor_mut(id)?.next = seq + 1;
        Ok(n)
    }

    /// Copies the most recent report without consuming it.
    ///
    /// A cursor that is behind is moved to the end; a caught-up cursor stays put.
    /// Returns 0 when nothing was written since the last capacity change.
    pub fn read_latest(&self, id: usize, out: &mut [u8]) -> Result<usize, BufferError> {
        let block_size = self.block_size;
        let mut inner = self.inner.lock();
        let (start, end) = (inner.start, inner.end);
        let cursor = inner.cursor_mut(id)?;
        if cursor.next < end {
            cursor.next = end;
        }
        if start == end {
            return Ok(0);
        }

        let n = out.len().min(block_size);
        out[..n].copy_from_slice(&inner.slot(end - 1, block_size)[..n]);
        Ok(n)
    }

    /// Reports buffered for this cursor.
    pub fn pending(&self, id: usize) -> Result<usize, BufferError> {
        let mut inner = self.inner.lock();
        let end = inner.end;
        let cursor = inner.cursor_mut(id)?;
        Ok((end - cursor.next) as usize)
    }

    /// Skips every buffered report for this cursor.
    pub fn flush_cursor(&self, id: usize) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        let end = inner.end;
        inner.cursor_mut(id)?.next = end;
        Ok(())
    }

    /// Reports this cursor lost to overruns since the last call.
    pub fn take_dropped(&self, id: usize) -> Result<u64, BufferError> {
        let mut inner = self.inner.lock();
        let cursor = inner.cursor_mut(id)?;
        Ok(std::mem::take(&mut cursor.dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(n: u8) -> [u8; 4] {
        [n, n, n, n]
    }

    #[test]
    fn each_cursor_reads_in_order_and_latest_peeks() {
        let buffer = RingBuffer::new(4).unwrap();
        buffer.set_capacity(4).unwrap();
        let first = buffer.add_cursor().unwrap();
        let second = buffer.add_cursor().unwrap();

        for n in 1..=3 {
            buffer.write(&block(n));
        }

        let mut out = [0u8; 4];
        for n in 1..=3 {
            assert_eq!(buffer.read_new(first, &mut out).unwrap(), 4);
            assert_eq!(out, block(n));
        }
        assert_eq!(buffer.read_new(first, &mut out).unwrap(), 0);

        assert_eq!(buffer.read_latest(second, &mut out).unwrap(), 4);
        assert_eq!(out, block(3));
        // read_latest moved the lagging cursor to the end
        assert_eq!(buffer.read_new(second, &mut out).unwrap(), 0);
        // caught up: still peeks the latest
        assert_eq!(buffer.read_latest(second, &mut out).unwrap(), 4);
        assert_eq!(out, block(3));
    }

    #[test]
    fn overrun_drops_oldest_and_counts_it() {
        let buffer = RingBuffer::new(4).unwrap();
        buffer.set_capacity(4).unwrap();
        let cursor = buffer.add_cursor().unwrap();

        for n in 1..=5 {
            buffer.write(&block(n));
        }
        assert_eq!(buffer.pending(cursor).unwrap(), 4);

        let mut out = [0u8; 4];
        let mut seen = Vec::new();
        while buffer.read_new(cursor, &mut out).unwrap() != 0 {
            seen.push(out[0]);
        }
        assert_eq!(seen, vec![2, 3, 4, 5]);
        assert_eq!(buffer.take_dropped(cursor).unwrap(), 1);
        assert_eq!(buffer.take_dropped(cursor).unwrap(), 0);
    }

    #[test]
    fn new_cursor_only_sees_future_writes() {
        let buffer = RingBuffer::new(2).unwrap();
        buffer.write(&[1, 1]);
        let cursor = buffer.add_cursor().unwrap();

        let mut out = [0u8; 2];
        assert_eq!(buffer.read_new(cursor, &mut out).unwrap(), 0);
        buffer.write(&[2, 2]);
        assert_eq!(buffer.read_new(cursor, &mut out).unwrap(), 2);
        assert_eq!(out, [2, 2]);
    }

    #[test]
    fn capacity_out_of_range_is_rejected_without_change() {
        let buffer = RingBuffer::new(1).unwrap();
        assert_eq!(buffer.set_capacity(1), Err(BufferError::InvalidCapacity(1)));
        assert_eq!(
            buffer.set_capacity(MAX_BUFFER_SIZE + 1),
            Err(BufferError::InvalidCapacity(MAX_BUFFER_SIZE + 1))
        );
        assert_eq!(buffer.capacity(), BASE_CAPACITY);
    }

    #[test]
    fn set_capacity_discards_history() {
        let buffer = RingBuffer::new(1).unwrap();
        let cursor = buffer.add_cursor().unwrap();
        buffer.write(&[7]);
        buffer.set_capacity(MIN_BUFFER_SIZE).unwrap();

        let mut out = [0u8; 1];
        assert_eq!(buffer.read_new(cursor, &mut out).unwrap(), 0);
        assert_eq!(buffer.read_latest(cursor, &mut out).unwrap(), 0);
        assert_eq!(buffer.capacity(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn cursor_table_grows_and_reuses_slots() {
        let buffer = RingBuffer::new(1).unwrap();
        let ids: Vec<_> = (0..5).map(|_| buffer.add_cursor().unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        buffer.remove_cursor(2);
        assert_eq!(buffer.add_cursor().unwrap(), 2);
        assert_eq!(
            buffer.read_new(9, &mut [0u8; 1]),
            Err(BufferError::InvalidCursor(9))
        );
    }

    #[test]
    fn short_blocks_are_zero_padded() {
        let buffer = RingBuffer::new(3).unwrap();
        let cursor = buffer.add_cursor().unwrap();
        buffer.write(&[9, 9, 9]);
        buffer.write(&[5]);

        let mut out = [0u8; 3];
        buffer.flush_cursor(cursor).unwrap();
        buffer.read_latest(cursor, &mut out).unwrap();
        assert_eq!(out, [5, 0, 0]);
    }
}
