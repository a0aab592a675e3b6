//! Cooperative cancellation for the pump thread.
//!
//! An [`Interrupt`] is a cloneable token. Raising it sets a flag that
//! condition-variable waits check after every wakeup, and disconnects a
//! channel that `crossbeam_channel::select!` can wait on next to a blocking
//! send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

#[derive(Debug)]
struct Inner {
    raised: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Cancellation token shared between the pump thread and its owner.
#[derive(Debug, Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    /// A token that has not been raised.
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                raised: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Raise the interrupt. Idempotent.
    ///
    /// Threads parked on a condition variable still need a notify from
    /// their owner; see [`StepQueue::wake_all`](crate::step_queue::StepQueue::wake_all).
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects `signal`, waking every select
        self.inner.trigger.lock().take();
    }

    /// True once [`raise`](Self::raise) has been called
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) when the interrupt is raised.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}
