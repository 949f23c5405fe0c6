//! Tracking and collection of asynchronous effects
//!
//! Every async effect runs on its own thread. The scheduler never waits for
//! one during a step: it partitions the in-flight set into finished and
//! still-running work, then applies the finished continuations in launch
//! order, each to the state produced by the one before it.

use crate::effect::{Completion, Continuation};
use crate::{Error, Result};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};

/// An async effect whose continuation has not been applied yet
pub struct InFlightEffect<S, M> {
    seq: u64,
    name: Cow<'static, str>,
    handle: JoinHandle<Continuation<S, M>>,
}

impl<S, M> InFlightEffect<S, M> {
    /// Launch sequence number (lower launched earlier)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Diagnostic name of the originating effect
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the completion has produced its continuation
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the continuation
    ///
    /// A panic inside the completion is re-raised on the calling thread.
    pub fn resolve(self) -> Continuation<S, M> {
        match self.handle.join() {
            Ok(continuation) => continuation,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl<S, M> std::fmt::Debug for InFlightEffect<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightEffect")
            .field("seq", &self.seq)
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Outstanding async effects, kept in launch order
pub struct Scheduler<S, M> {
    in_flight: Vec<InFlightEffect<S, M>>,
    next_seq: u64,
}

impl<S: 'static, M: 'static> Scheduler<S, M> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            in_flight: Vec::new(),
            next_seq: 0,
        }
    }

    /// Start `completion` on a new thread without waiting for it
    pub fn launch(&mut self, name: Cow<'static, str>, completion: Completion<S, M>) -> Result<u64> {
        let seq = self.next_seq;
        let handle = thread::Builder::new()
            .name(format!("reel-effect-{}", seq))
            .spawn(completion)
            .map_err(Error::Spawn)?;
        self.next_seq += 1;
        tracing::debug!(seq, effect = %name, "Launched async effect");
        self.in_flight.push(InFlightEffect { seq, name, handle });
        Ok(seq)
    }

    /// Remove and return every finished effect, in launch order
    ///
    /// Unfinished effects stay tracked; this never blocks.
    pub fn poll_completed(&mut self) -> Vec<InFlightEffect<S, M>> {
        let (resolved, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(InFlightEffect::is_finished);
        self.in_flight = pending;
        resolved
    }

    /// Apply every finished continuation to `state`, enqueuing their messages
    pub fn collect(&mut self, state: S, messages: &mut VecDeque<M>) -> S {
        let resolved = self.poll_completed();
        Self::apply_in_order(resolved, state, messages)
    }

    /// Block until every in-flight effect finishes, then apply them all
    pub fn drain_blocking(&mut self, state: S, messages: &mut VecDeque<M>) -> S {
        let all = std::mem::take(&mut self.in_flight);
        Self::apply_in_order(all, state, messages)
    }

    fn apply_in_order(
        resolved: Vec<InFlightEffect<S, M>>,
        mut state: S,
        messages: &mut VecDeque<M>,
    ) -> S {
        for effect in resolved {
            let seq = effect.seq;
            let continuation = effect.resolve();
            let (next, message) = continuation(state);
            state = next;
            tracing::debug!(seq, has_message = message.is_some(), "Collected async effect");
            messages.extend(message);
        }
        state
    }

}

impl<S, M> Scheduler<S, M> {
    /// Number of effects still tracked
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Check if nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Whether every tracked effect has finished (vacuously true when empty)
    pub fn all_finished(&self) -> bool {
        self.in_flight.iter().all(InFlightEffect::is_finished)
    }

    /// Tracked effects in launch order
    pub fn in_flight(&self) -> impl Iterator<Item = &InFlightEffect<S, M>> {
        self.in_flight.iter()
    }
}

impl<S: 'static, M: 'static> Default for Scheduler<S, M> {
    fn default() -> Self {
        Self::new()
    }
}
