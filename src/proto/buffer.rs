use slab::Slab;

/// Buffers queued items for multiple streams.
///
/// One slab backs every queue, so a connection with many streams pays for
/// one allocation pool instead of one ring buffer per stream.
#[derive(Debug)]
pub(crate) struct Buffer<T> {
    slab: Slab<Slot<T>>,
}

/// A FIFO sequence of items in a `Buffer`.
#[derive(Debug)]
pub(crate) struct Deque {
    indices: Option<Indices>,
}

/// Tracks the head & tail for a sequence of items in a `Buffer`.
#[derive(Debug, Default, Copy, Clone)]
struct Indices {
    head: usize,
    tail: usize,
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    next: Option<usize>,
}

impl<T> Buffer<T> {
    pub(crate) fn new() -> Self {
        Self { slab: Slab::new() }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

impl Deque {
    pub(crate) fn new() -> Self {
        Self { indices: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.indices.is_none()
    }

    pub(crate) fn push_back<T>(&mut self, buf: &mut Buffer<T>, value: T) {
        let key = buf.slab.insert(Slot { value, next: None });

        match self.indices {
            Some(ref mut idxs) => {
                buf.slab[idxs.tail].next = Some(key);
                idxs.tail = key;
            }
            None => {
                self.indices = Some(Indices {
                    head: key,
                    tail: key,
                });
            }
        }
    }

    /// Borrow the first item without removing it.
    pub(crate) fn front_mut<'a, T>(&self, buf: &'a mut Buffer<T>) -> Option<&'a mut T> {
        self.indices
            .map(move |idxs| &mut buf.slab[idxs.head].value)
    }

    pub(crate) fn pop_front<T>(&mut self, buf: &mut Buffer<T>) -> Option<T> {
        match self.indices {
            Some(mut idxs) => {
                let mut slot = buf.slab.remove(idxs.head);

                if idxs.head == idxs.tail {
                    debug_assert!(slot.next.is_none());
                    self.indices = None;
                } else if let Some(ptr) = slot.next.take() {
                    idxs.head = ptr;
                    self.indices = Some(idxs);
                } else {
                    tracing::warn!(
                        "queue slot without a next ptr where one was expected; dropping the rest of the queue"
                    );
                    self.indices = None;
                }

                Some(slot.value)
            }
            None => None,
        }
    }
}
