//! Pre-buffer (§4.4): a bounded per-stream ring of recent packets, kept around
//! so an event-triggered recording can be started with a short look-back
//! window. Single writer (the owning stream thread), many readers, guarded by
//! a `Mutex` around a `VecDeque` per the same `Arc<Mutex<...>>` newtype
//! idiom used by the shutdown and stream-state registries -- `ffmpeg_next::Packet`
//! is not `Sync`, so sharing it across threads needs the lock even for reads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::prelude::*;

pub const DEFAULT_PREBUFFER_CAPACITY: usize = 150;

struct Inner {
    capacity: usize,
    entries: Mutex<VecDeque<PreBufferEntry>>,
}

/// Cheap to clone; all clones share the same ring.
#[derive(Clone)]
pub struct PreBuffer {
    inner: Arc<Inner>,
}

impl PreBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                entries: Mutex::new(VecDeque::with_capacity(capacity)),
            }),
        }
    }

    /// Inserts `entry`, evicting the oldest one first if the ring is at
    /// capacity (§3 Pre-buffer Entry invariant).
    pub fn push(&self, entry: PreBufferEntry) {
        let mut guard = self.inner.entries.lock().unwrap();
        if guard.len() >= self.inner.capacity {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    /// A consistent clone of every entry currently held, oldest first. Used by
    /// event-triggered recording to seed a new mp4 segment with look-back
    /// packets before live packets start arriving.
    pub fn snapshot(&self) -> Vec<PreBufferEntry> {
        self.inner.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaKind, OwnedPacket, StreamDescriptor};
    use bytes::Bytes;
    use ffmpeg_next::{codec::Id, Rational};
    use std::time::Instant;

    fn entry() -> PreBufferEntry {
        PreBufferEntry {
            packet: OwnedPacket {
                payload: Bytes::from_static(b"frame"),
                pts: Some(0),
                dts: Some(0),
                is_keyframe: true,
            },
            descriptor: StreamDescriptor {
                kind: MediaKind::Video,
                stream_index: 0,
                time_base: Rational::new(1, 90_000),
                codec_id: Id::H264,
                extradata: None,
            },
            arrived_at: Instant::now(),
        }
    }

    #[test]
    fn evicts_oldest_entry_once_at_capacity() {
        let buffer = PreBuffer::new(2);
        buffer.push(entry());
        buffer.push(entry());
        buffer.push(entry());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn snapshot_is_independent_of_subsequent_pushes() {
        let buffer = PreBuffer::new(4);
        buffer.push(entry());
        let snapshot = buffer.snapshot();
        buffer.push(entry());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn clear_empties_the_ring() {
        let buffer = PreBuffer::new(4);
        buffer.push(entry());
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let buffer = PreBuffer::new(0);
        buffer.push(entry());
        buffer.push(entry());
        assert_eq!(buffer.len(), 1);
    }
}
