/*!
Bounded hand-off queue between the acquisition thread and the control loop.

A full queue drops the *incoming* frame: what is already queued stays, the
newest sample is lost. Neither side ever blocks the other past a timeout.
*/

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::frame::DataFrame;

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue full (or consumer gone); frame discarded
    Dropped,
}

/// Fixed-capacity FIFO of [`DataFrame`]s; clones share the same queue
#[derive(Debug, Clone)]
pub struct BoundedQueue {
    tx: Sender<DataFrame>,
    rx: Receiver<DataFrame>,
    capacity: usize,
}

impl BoundedQueue {
    /// Capacity is at least one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue without waiting
    pub fn push(&self, frame: DataFrame) -> PushOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => PushOutcome::Dropped,
        }
    }

    /// Wait up to `timeout` for the oldest frame
    pub fn poll(&self, timeout: Duration) -> Option<DataFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Oldest frame if one is queued
    pub fn try_pop(&self) -> Option<DataFrame> {
        self.rx.try_recv().ok()
    }

    /// Discard everything queued; returns how many frames were dropped
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
