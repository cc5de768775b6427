use std::ops;
use std::sync::Arc;

use fnv::FnvHashMap;
use slab::Slab;

use crate::frame::StreamId;

use super::buffer::Deque;
use super::control::{DataFrame, HeaderFrame};
use super::quota::WriteQuota;

/// A frame queued on a single stream: payload bytes, or the trailing
/// HEADERS that must follow all of them.
pub(crate) enum StreamItem {
    Data(DataFrame),
    Trailers(HeaderFrame),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum OutStreamState {
    /// Nothing queued.
    Empty,
    /// Queued items and an open stream-level window.
    Active,
    /// Queued items, but the stream-level window is exhausted; reactivated
    /// by a window update or a larger INITIAL_WINDOW_SIZE.
    WaitingOnStreamQuota,
}

/// Send-side bookkeeping for one established stream.
pub(crate) struct OutStream {
    pub(crate) id: StreamId,
    pub(crate) state: OutStreamState,
    /// Pending DATA (and possibly trailers) for this stream, pooled in the
    /// write loop's shared buffer.
    pub(crate) queue: Deque,
    /// Bytes written ahead of the peer's acknowledgment. May exceed the
    /// window if the peer shrinks INITIAL_WINDOW_SIZE retroactively, and
    /// may go negative transiently on over-generous updates.
    pub(crate) bytes_outstanding: i64,
    pub(crate) wq: Option<Arc<WriteQuota>>,

    // Active-list links. All list operations happen on the write loop's
    // task, so none of this is synchronized.
    next: Option<usize>,
    prev: Option<usize>,
    queued: bool,
}

impl OutStream {
    pub(crate) fn new(id: StreamId, wq: Option<Arc<WriteQuota>>) -> Self {
        Self {
            id,
            state: OutStreamState::Empty,
            queue: Deque::new(),
            bytes_outstanding: 0,
            wq,
            next: None,
            prev: None,
            queued: false,
        }
    }
}

/// Storage for every established stream that has not been cleaned up yet.
///
/// On the client side these are streams whose request HEADERS went out; on
/// the server side, streams whose request HEADERS came in.
pub(crate) struct Store {
    slab: Slab<OutStream>,
    ids: FnvHashMap<StreamId, usize>,
}

impl Store {
    pub(crate) fn new() -> Self {
        Self {
            slab: Slab::new(),
            ids: FnvHashMap::default(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn insert(&mut self, stream: OutStream) -> usize {
        let id = stream.id;
        let key = self.slab.insert(stream);
        let replaced = self.ids.insert(id, key);
        debug_assert!(replaced.is_none(), "stream {id:?} registered twice");
        key
    }

    pub(crate) fn key_of(&self, id: StreamId) -> Option<usize> {
        self.ids.get(&id).copied()
    }

    /// Remove a stream from the store. The caller unlinks it from the
    /// active list and drains its queue first.
    pub(crate) fn remove(&mut self, id: StreamId) -> Option<OutStream> {
        let key = self.ids.remove(&id)?;
        let stream = self.slab.remove(key);
        debug_assert!(!stream.queued);
        debug_assert!(stream.queue.is_empty());
        Some(stream)
    }

    /// Keys of all streams, oldest insertion first.
    pub(crate) fn keys(&self) -> Vec<usize> {
        self.slab.iter().map(|(key, _)| key).collect()
    }
}

impl ops::Index<usize> for Store {
    type Output = OutStream;

    fn index(&self, key: usize) -> &Self::Output {
        self.slab.index(key)
    }
}

impl ops::IndexMut<usize> for Store {
    fn index_mut(&mut self, key: usize) -> &mut Self::Output {
        self.slab.index_mut(key)
    }
}

/// The round-robin list of streams with data to send and stream-level
/// quota to send it.
///
/// Doubly linked through the streams' own `prev`/`next` keys, so any
/// stream can be unlinked in O(1) no matter where it sits.
#[derive(Debug, Default)]
pub(crate) struct ActiveStreams {
    head: Option<usize>,
    tail: Option<usize>,
}

impl ActiveStreams {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_back(&mut self, store: &mut Store, key: usize) {
        let tail = {
            let stream = &mut store[key];
            if stream.queued {
                return;
            }
            stream.queued = true;
            stream.prev = self.tail;
            stream.next = None;
            self.tail
        };

        match tail {
            Some(t) => store[t].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
    }

    pub(crate) fn pop_front(&mut self, store: &mut Store) -> Option<usize> {
        let key = self.head?;
        self.remove(store, key);
        Some(key)
    }

    /// Unlink `key` if it is queued; a no-op otherwise.
    pub(crate) fn remove(&mut self, store: &mut Store, key: usize) {
        let (prev, next) = {
            let stream = &mut store[key];
            if !stream.queued {
                return;
            }
            stream.queued = false;
            (stream.prev.take(), stream.next.take())
        };

        match prev {
            Some(p) => store[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => store[n].prev = prev,
            None => self.tail = prev,
        }
    }

    #[cfg(test)]
    pub(crate) fn iter_keys(&self, store: &Store) -> Vec<usize> {
        let mut keys = Vec::new();
        let mut curr = self.head;
        while let Some(key) = curr {
            keys.push(key);
            curr = store[key].next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(ids: &[u32]) -> (Store, Vec<usize>) {
        let mut store = Store::new();
        let keys = ids
            .iter()
            .map(|&id| store.insert(OutStream::new(id, None)))
            .collect();
        (store, keys)
    }

    #[test]
    fn round_robin_order() {
        let (mut store, keys) = store_with(&[1, 3, 5]);
        let mut active = ActiveStreams::new();

        for &key in &keys {
            active.push_back(&mut store, key);
        }

        assert_eq!(active.iter_keys(&store), keys);

        let first = active.pop_front(&mut store).unwrap();
        assert_eq!(first, keys[0]);
        active.push_back(&mut store, first);

        assert_eq!(active.iter_keys(&store), vec![keys[1], keys[2], keys[0]]);
    }

    #[test]
    fn remove_from_middle() {
        let (mut store, keys) = store_with(&[1, 3, 5]);
        let mut active = ActiveStreams::new();

        for &key in &keys {
            active.push_back(&mut store, key);
        }

        active.remove(&mut store, keys[1]);
        assert_eq!(active.iter_keys(&store), vec![keys[0], keys[2]]);

        // Removing an unqueued stream is a no-op.
        active.remove(&mut store, keys[1]);
        assert_eq!(active.iter_keys(&store), vec![keys[0], keys[2]]);

        active.remove(&mut store, keys[0]);
        active.remove(&mut store, keys[2]);
        assert!(active.pop_front(&mut store).is_none());
    }

    #[test]
    fn double_push_is_ignored() {
        let (mut store, keys) = store_with(&[1]);
        let mut active = ActiveStreams::new();

        active.push_back(&mut store, keys[0]);
        active.push_back(&mut store, keys[0]);

        assert_eq!(active.pop_front(&mut store), Some(keys[0]));
        assert_eq!(active.pop_front(&mut store), None);
    }

    #[test]
    fn store_removal() {
        let (mut store, _) = store_with(&[1, 3]);
        assert_eq!(store.len(), 2);

        let removed = store.remove(1).unwrap();
        assert_eq!(removed.id, 1);
        assert!(store.remove(1).is_none());
        assert!(store.key_of(1).is_none());
        assert_eq!(store.len(), 1);
    }
}
