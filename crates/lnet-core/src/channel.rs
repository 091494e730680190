//! Bounded MPMC channel used as the backing store for event queues.
//!
//! Generalized from the teacher's GVThread-payload channel: same ring
//! buffer + waiter bookkeeping, but carries an arbitrary `T` and parks
//! the calling OS thread (via `Condvar`) instead of yielding a green
//! thread, since nothing in this crate runs GVThreads.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{LnetError, Result};

struct Inner<T> {
    buffer: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
    closed: Mutex<bool>,
}

/// Sending half of a channel.
pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

/// Receiving half of a channel.
pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        not_empty: Condvar::new(),
        capacity: capacity.max(1),
        closed: Mutex::new(false),
    });
    (Sender { inner: inner.clone() }, Receiver { inner })
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender { inner: self.inner.clone() }
    }
}

impl<T> Sender<T> {
    /// Non-blocking send; fails if the channel is full or closed.
    pub fn try_send(&self, value: T) -> Result<()> {
        if *self.inner.closed.lock().unwrap() {
            return Err(LnetError::Shutdown { detail: "event channel closed".into() });
        }
        let mut buf = self.inner.buffer.lock().unwrap();
        if buf.len() >= self.inner.capacity {
            return Err(LnetError::ResourceExhausted { detail: "event channel full".into() });
        }
        buf.push_back(value);
        drop(buf);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    pub fn close(&self) {
        *self.inner.closed.lock().unwrap() = true;
        self.inner.not_empty.notify_all();
    }
}

impl<T> Receiver<T> {
    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.buffer.lock().unwrap().pop_front()
    }

    /// Blocking receive; returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let mut buf = self.inner.buffer.lock().unwrap();
        loop {
            if let Some(v) = buf.pop_front() {
                return Some(v);
            }
            if *self.inner.closed.lock().unwrap() {
                return None;
            }
            buf = self.inner.not_empty.wait(buf).unwrap();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_recv_fifo() {
        let (tx, rx) = channel(4);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn full_channel_rejects() {
        let (tx, _rx) = channel::<i32>(1);
        tx.try_send(1).unwrap();
        assert!(tx.try_send(2).is_err());
    }

    #[test]
    fn closed_channel_drains_then_none() {
        let (tx, rx) = channel(2);
        tx.try_send(1).unwrap();
        tx.close();
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), None);
    }
}
