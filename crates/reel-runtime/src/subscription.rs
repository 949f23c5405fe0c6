//! Identity-tracked subscription lifecycle
//!
//! Each step the program re-declares the subscriptions it wants. Identity is
//! decided by the platform's subscription id, not by descriptor equality: a
//! descriptor re-derived with different contents under the same id keeps the
//! original descriptor and, more importantly, its handler state.
//!
//! A handler is moved out of the set only while it is being polled. If a
//! poll panics, that one handler is lost and the set reports itself
//! poisoned; the other handlers stay in place.

use indexmap::IndexMap;
use std::fmt::Debug;
use std::hash::Hash;

/// What a reconciliation pass changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation<Id> {
    /// Newly started ids, in declaration order
    pub started: Vec<Id>,
    /// Stopped ids, in the order they had been started
    pub stopped: Vec<Id>,
}

impl<Id> Reconciliation<Id> {
    /// Check if nothing was started or stopped
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Active subscriptions keyed by id, kept in start order
#[derive(Debug)]
pub struct SubscriptionSet<Id, D, H> {
    // `None` only while polling, or after that poll panicked
    active: IndexMap<Id, (D, Option<H>)>,
}

impl<Id, D, H> SubscriptionSet<Id, D, H>
where
    Id: Clone + Eq + Hash + Debug,
{
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            active: IndexMap::new(),
        }
    }

    /// Bring the active set in line with `desired`
    ///
    /// Stops run before starts. When `desired` repeats an id, the first
    /// descriptor wins.
    pub fn reconcile<FId, FStart, FStop>(
        &mut self,
        desired: Vec<D>,
        mut id_of: FId,
        mut start: FStart,
        mut stop: FStop,
    ) -> Reconciliation<Id>
    where
        FId: FnMut(&D) -> Id,
        FStart: FnMut(&D) -> H,
        FStop: FnMut(H),
    {
        let mut wanted: IndexMap<Id, D> = IndexMap::with_capacity(desired.len());
        for descriptor in desired {
            wanted.entry(id_of(&descriptor)).or_insert(descriptor);
        }

        let stopped: Vec<Id> = self
            .active
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        for id in &stopped {
            if let Some((_, handler)) = self.active.shift_remove(id) {
                tracing::debug!(sub_id = ?id, "Stopping subscription");
                stop_handler(handler, &mut stop);
            }
        }

        let mut started = Vec::new();
        for (id, descriptor) in wanted {
            if self.active.contains_key(&id) {
                continue;
            }
            tracing::debug!(sub_id = ?id, "Starting subscription");
            let handler = start(&descriptor);
            self.active.insert(id.clone(), (descriptor, Some(handler)));
            started.push(id);
        }

        Reconciliation { started, stopped }
    }

    /// Poll every active subscription once, in start order
    pub fn poll_all<M, F>(&mut self, mut poll: F) -> Vec<M>
    where
        F: FnMut(H) -> (H, Option<M>),
    {
        let mut messages = Vec::new();
        for (_, slot) in self.active.values_mut() {
            let Some(handler) = slot.take() else {
                continue;
            };
            let (handler, message) = poll(handler);
            *slot = Some(handler);
            messages.extend(message);
        }
        messages
    }

    /// Stop everything, returning the stopped ids
    pub fn stop_all<F>(&mut self, mut stop: F) -> Vec<Id>
    where
        F: FnMut(H),
    {
        let mut stopped = Vec::with_capacity(self.active.len());
        for (id, (_, handler)) in self.active.drain(..) {
            tracing::debug!(sub_id = ?id, "Stopping subscription");
            stop_handler(handler, &mut stop);
            stopped.push(id);
        }
        stopped
    }

    /// Check if a handler was lost to a panicking poll
    pub fn is_poisoned(&self) -> bool {
        self.active.values().any(|(_, handler)| handler.is_none())
    }

    /// Descriptor stored for `id`
    pub fn descriptor(&self, id: &Id) -> Option<&D> {
        self.active.get(id).map(|(descriptor, _)| descriptor)
    }

    /// Handler state stored for `id`
    pub fn handler(&self, id: &Id) -> Option<&H> {
        self.active.get(id).and_then(|(_, handler)| handler.as_ref())
    }

    /// Active ids in start order
    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.active.keys()
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if no subscription is active
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

fn stop_handler<H, F: FnMut(H)>(handler: Option<H>, stop: &mut F) {
    match handler {
        Some(handler) => stop(handler),
        None => tracing::warn!("Dropping subscription whose handler was lost"),
    }
}

impl<Id, D, H> Default for SubscriptionSet<Id, D, H>
where
    Id: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
