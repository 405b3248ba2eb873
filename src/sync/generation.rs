//! Generation tokens for discarding superseded async results.
//!
//! Every epoch (a feed filter, a comment load) owns a [`GenerationCounter`].
//! Work issued under an epoch carries the [`Generation`] it was issued with;
//! when the result comes back as a [`Tagged`] value, it is applied only if
//! that generation is still current. Nothing is ever cancelled on the wire:
//! a stale response is received and dropped.
//!
//! [`DeferredTask`] adds delayed scheduling on top: scheduling again bumps
//! the generation and aborts the previous task.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One epoch identifier. Monotonically increasing within its counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: Generation,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Generation {
        self.current
    }

    /// Start a new epoch, invalidating everything issued before.
    pub fn bump(&mut self) -> Generation {
        self.current = Generation(self.current.0.wrapping_add(1));
        self.current
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current == generation
    }
}

/// A value produced under a given generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub generation: Generation,
    pub value: T,
}

impl<T> Tagged<T> {
    pub fn new(generation: Generation, value: T) -> Self {
        Self { generation, value }
    }

    /// Unwrap the value if its generation is still current, otherwise drop it.
    pub fn accept(self, counter: &GenerationCounter) -> Option<T> {
        if counter.is_current(self.generation) {
            Some(self.value)
        } else {
            tracing::debug!(
                expected = %counter.current(),
                got = %self.generation,
                "Ignoring stale result (generation mismatch)"
            );
            None
        }
    }
}

/// Deferred work with cancel-on-superseded semantics.
///
/// `schedule` waits `delay`, runs the future on the tokio runtime, and sends
/// the tagged result over the channel. Scheduling again (or calling
/// [`DeferredTask::supersede`]) bumps the generation and aborts the old task;
/// if the old result was already in the channel, [`DeferredTask::accept`]
/// drops it.
#[derive(Debug, Default)]
pub struct DeferredTask {
    counter: GenerationCounter,
    handle: Option<JoinHandle<()>>,
}

impl DeferredTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Generation {
        self.counter.current()
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.counter.is_current(generation)
    }

    /// Invalidate any scheduled or running work and open a new epoch.
    ///
    /// Use directly when the caller runs the work inline instead of
    /// scheduling it.
    pub fn supersede(&mut self) -> Generation {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::trace!("Aborted superseded deferred task");
        }
        self.counter.bump()
    }

    pub fn schedule<F, T>(
        &mut self,
        delay: Duration,
        task: F,
        tx: mpsc::Sender<Tagged<T>>,
    ) -> Generation
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let generation = self.supersede();
        self.handle = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let value = task.await;
            if let Err(e) = tx.send(Tagged::new(generation, value)).await {
                tracing::warn!(error = %e, %generation, "Deferred result send failed (receiver dropped)");
            }
        }));
        generation
    }

    pub fn accept<T>(&self, tagged: Tagged<T>) -> Option<T> {
        tagged.accept(&self.counter)
    }

    /// Abort outstanding work without scheduling anything new.
    pub fn cancel(&mut self) {
        self.supersede();
    }

    pub fn is_scheduled(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
