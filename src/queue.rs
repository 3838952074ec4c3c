//! Fixed-capacity ring buffer shared between one interrupt-side producer and
//! one foreground consumer.
//!
//! The queue itself carries no synchronization. Each instance lives inside a
//! driver behind the driver's lock: interrupt context holds the lock for the
//! whole enqueue, foreground context takes it with interrupts disabled, so
//! neither side can observe a half-updated `write`/`count` pair.

/// Bounded FIFO of `N` events.
///
/// `count <= N` and both indices stay below `N` at all times. Pushing into a
/// full queue hands the event back instead of blocking or growing.
pub struct EventQueue<T: Copy, const N: usize> {
    slots: [T; N],
    read: usize,
    write: usize,
    count: usize,
}

impl<T: Copy, const N: usize> EventQueue<T, N> {
    /// Creates an empty queue; `blank` only fills unused slots.
    pub const fn new(blank: T) -> Self {
        EventQueue {
            slots: [blank; N],
            read: 0,
            write: 0,
            count: 0,
        }
    }

    /// Appends an event, or returns it unchanged when the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.write] = item;
        self.write = (self.write + 1) % N;
        self.count += 1;
        Ok(())
    }

    /// Removes the oldest event.
    pub fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.read];
        self.read = (self.read + 1) % N;
        self.count -= 1;
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == N
    }
}
