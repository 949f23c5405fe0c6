//! Effect outcomes and deferred continuations

/// Applied to the runner state that is current when an async effect is
/// collected, never to the state seen at dispatch
pub type Continuation<S, M> = Box<dyn FnOnce(S) -> (S, Option<M>) + Send>;

/// Work that runs on its own thread and yields a [`Continuation`]
pub type Completion<S, M> = Box<dyn FnOnce() -> Continuation<S, M> + Send>;

/// Result of dispatching one effect
pub enum EffectOutcome<S, M> {
    /// Finished during dispatch
    Sync { state: S, message: Option<M> },
    /// Still running; `state` is applied now, `completion` later
    Async {
        state: S,
        completion: Completion<S, M>,
    },
}

impl<S, M> EffectOutcome<S, M> {
    /// Finished with no follow-up message
    pub fn done(state: S) -> Self {
        EffectOutcome::Sync {
            state,
            message: None,
        }
    }

    /// Finished with a follow-up message
    pub fn reply(state: S, message: M) -> Self {
        EffectOutcome::Sync {
            state,
            message: Some(message),
        }
    }

    /// Run `work` on a background thread, then apply its continuation
    pub fn spawn<F>(state: S, work: F) -> Self
    where
        F: FnOnce() -> Continuation<S, M> + Send + 'static,
    {
        EffectOutcome::Async {
            state,
            completion: Box::new(work),
        }
    }

    /// Check if the outcome is deferred
    pub fn is_async(&self) -> bool {
        matches!(self, EffectOutcome::Async { .. })
    }
}

/// Box a continuation
pub fn continuation<S, M, F>(f: F) -> Continuation<S, M>
where
    F: FnOnce(S) -> (S, Option<M>) + Send + 'static,
{
    Box::new(f)
}

impl<S, M> std::fmt::Debug for EffectOutcome<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EffectOutcome::Sync { message, .. } => f
                .debug_struct("Sync")
                .field("has_message", &message.is_some())
                .finish(),
            EffectOutcome::Async { .. } => f.write_str("Async"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_builders() {
        let done: EffectOutcome<i32, &str> = EffectOutcome::done(1);
        assert!(matches!(done, EffectOutcome::Sync { state: 1, message: None }));

        let reply: EffectOutcome<i32, &str> = EffectOutcome::reply(2, "hi");
        assert!(matches!(reply, EffectOutcome::Sync { state: 2, message: Some("hi") }));

        let spawned: EffectOutcome<i32, &str> =
            EffectOutcome::spawn(3, || continuation(|s: i32| (s + 1, None)));
        assert!(spawned.is_async());
        if let EffectOutcome::Async { state, completion } = spawned {
            assert_eq!(state, 3);
            let (next, message) = completion()(10);
            assert_eq!(next, 11, "continuation must see the state it is given");
            assert!(message.is_none());
        }
    }
}
