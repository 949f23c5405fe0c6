//! Step-cycle orchestrator
//!
//! The [`Runner`] owns the platform state, the program model and the work
//! queues. Each [`Runner::step`] runs these phases in order:
//!
//! 1. `start_of_update_cycle`
//! 2. collect finished async effects
//! 3. reconcile subscriptions against the current model
//! 4. poll every active subscription once
//! 5. process queued messages one at a time (one log line each)
//! 6. dispatch queued effects
//! 7. `end_of_update_cycle`
//!
//! Reconciliation comes right before polling, so a subscription declared by
//! an update in one step is first polled in the next.
//!
//! A step that fails on a log write can be retried. The retry resumes at the
//! interrupted phase, so the cycle hooks run once per completed step and
//! every message still gets its own update line.

use crate::effect::EffectOutcome;
use crate::program::{Platform, Program};
use crate::scheduler::Scheduler;
use crate::subscription::{Reconciliation, SubscriptionSet};
use crate::{Error, Result};
use reel_journal::{LogConfig, LoggingSession};
use serde::Serialize;
use std::collections::VecDeque;

/// A running program bound to a platform
pub struct Runner<P, A>
where
    P: Program,
    A: Platform<P::Message, Effect = P::Effect, Subscription = P::Subscription>,
{
    platform: A,
    program: P,
    runner_state: Option<A::State>,
    program_state: Option<P::Model>,
    pending_messages: VecDeque<P::Message>,
    pending_effects: VecDeque<P::Effect>,
    scheduler: Scheduler<A::State, P::Message>,
    subscriptions: SubscriptionSet<A::SubscriptionId, P::Subscription, A::Handler>,
    session: Option<LoggingSession>,
    resume: Option<Resume<A::SubscriptionId>>,
    steps: u64,
}

/// Phase an interrupted step picks up from
#[derive(Debug)]
enum Resume<Id> {
    /// Subscriptions were reconciled but the change was not logged
    SubscriptionChange(Reconciliation<Id>),
    /// The message at the front of the queue was not logged
    Messages,
    /// Some queued effects were not dispatched
    Dispatch,
}

impl<P, A> Runner<P, A>
where
    P: Program,
    P::Model: Clone + Serialize,
    P::Message: Clone + Serialize + 'static,
    P::Effect: Serialize,
    P::Subscription: Serialize,
    A: Platform<P::Message, Effect = P::Effect, Subscription = P::Subscription>,
    A::State: 'static,
    A::SubscriptionId: Serialize,
{
    /// Start configuring a runner
    pub fn builder(platform: A, program: P) -> RunnerBuilder<P, A> {
        RunnerBuilder::new(platform, program)
    }

    /// Initialize the platform and program, log the init entry and start the
    /// first set of subscriptions
    ///
    /// Bootstrap effects are queued, not dispatched; the first step runs them.
    pub fn init(
        platform: A,
        program: P,
        platform_args: &[String],
        program_args: &[String],
        mut session: Option<LoggingSession>,
    ) -> Result<Self> {
        let runner_state = platform.init_state(platform_args);
        let (model, effects) = program.init(program_args);
        if let Some(session) = session.as_mut() {
            session.emit_init(&model, &effects)?;
        }
        tracing::debug!(effects = effects.len(), "Runner initialized");

        let mut runner = Self {
            platform,
            program,
            runner_state: Some(runner_state),
            program_state: Some(model),
            pending_messages: VecDeque::new(),
            pending_effects: effects.into(),
            scheduler: Scheduler::new(),
            subscriptions: SubscriptionSet::new(),
            session,
            resume: None,
            steps: 0,
        };
        let change = runner.reconcile_subscriptions()?;
        if let Err(e) = runner.log_subscription_change(&change) {
            // The runner is never handed out, so release what was started
            let platform = &runner.platform;
            runner
                .subscriptions
                .stop_all(|handler| platform.stop_subscription(handler));
            return Err(e);
        }
        Ok(runner)
    }

    /// Run one full update cycle
    ///
    /// A log write failure returns the error with the runner left at its
    /// last logged transition: the message whose line failed is still queued
    /// and the model is rolled back to before its update. Calling `step`
    /// again resumes the interrupted cycle instead of starting a new one.
    /// Panics from platform or program callbacks propagate and poison the
    /// runner.
    pub fn step(&mut self) -> Result<()> {
        let span = tracing::debug_span!("step", n = self.steps);
        let _guard = span.enter();

        if self.is_poisoned() {
            return Err(Error::Poisoned);
        }

        let resume = self.resume.take();
        if let Some(resume) = &resume {
            tracing::debug!(?resume, "Resuming interrupted step");
        }
        let change = match resume {
            None => {
                let state = self.take_runner_state()?;
                self.runner_state = Some(self.platform.start_of_update_cycle(state));
                self.collect_effects()?;
                Some(self.reconcile_subscriptions()?)
            }
            Some(Resume::SubscriptionChange(change)) => Some(change),
            Some(Resume::Messages) => None,
            Some(Resume::Dispatch) => {
                self.dispatch_effects()?;
                return self.finish_step();
            }
        };
        if let Some(change) = change {
            if let Err(e) = self.log_subscription_change(&change) {
                self.resume = Some(Resume::SubscriptionChange(change));
                return Err(e);
            }
            self.poll_subscriptions()?;
        }

        if let Err(e) = self.process_messages() {
            self.resume = Some(Resume::Messages);
            return Err(e);
        }
        self.dispatch_effects()?;
        self.finish_step()
    }

    /// Queue a message from outside the program; the next step processes it
    pub fn send(&mut self, message: P::Message) {
        self.pending_messages.push_back(message);
    }

    /// Stop every subscription, wait for in-flight effects and hand back the
    /// final platform state and model
    ///
    /// Messages produced by the drained effects are discarded with the runner.
    pub fn shutdown(mut self) -> Result<(A::State, P::Model)> {
        let platform = &self.platform;
        let stopped = self
            .subscriptions
            .stop_all(|handler| platform.stop_subscription(handler));
        if !stopped.is_empty() {
            if let Some(session) = self.session.as_mut() {
                session.emit_subscription_change(&[] as &[P::Subscription], &stopped)?;
            }
        }

        let state = self.take_runner_state()?;
        let outstanding = self.scheduler.len();
        let state = self
            .scheduler
            .drain_blocking(state, &mut self.pending_messages);
        tracing::debug!(
            stopped = stopped.len(),
            drained = outstanding,
            "Runner shut down"
        );

        if let Some(session) = self.session.as_mut() {
            session.flush()?;
        }
        let model = self.program_state.take().ok_or(Error::Poisoned)?;
        Ok((state, model))
    }

    fn take_runner_state(&mut self) -> Result<A::State> {
        self.runner_state.take().ok_or(Error::Poisoned)
    }

    fn collect_effects(&mut self) -> Result<()> {
        if self.scheduler.is_empty() {
            return Ok(());
        }
        let state = self.take_runner_state()?;
        let state = self.scheduler.collect(state, &mut self.pending_messages);
        self.runner_state = Some(state);
        Ok(())
    }

    fn finish_step(&mut self) -> Result<()> {
        let state = self.take_runner_state()?;
        self.runner_state = Some(self.platform.end_of_update_cycle(state));
        self.steps += 1;
        Ok(())
    }

    fn reconcile_subscriptions(&mut self) -> Result<Reconciliation<A::SubscriptionId>> {
        if self.subscriptions.is_poisoned() {
            return Err(Error::Poisoned);
        }
        let model = self.program_state.as_ref().ok_or(Error::Poisoned)?;
        let desired = self.program.subscriptions(model);

        let platform = &self.platform;
        let change = self.subscriptions.reconcile(
            desired,
            |subscription| platform.subscription_id(subscription),
            |subscription| platform.start_subscription(subscription),
            |handler| platform.stop_subscription(handler),
        );
        if !change.is_empty() {
            tracing::debug!(
                started = change.started.len(),
                stopped = change.stopped.len(),
                "Subscriptions changed"
            );
        }
        Ok(change)
    }

    fn log_subscription_change(&mut self, change: &Reconciliation<A::SubscriptionId>) -> Result<()> {
        if change.is_empty() {
            return Ok(());
        }
        if let Some(session) = self.session.as_mut() {
            let started: Vec<&P::Subscription> = change
                .started
                .iter()
                .filter_map(|id| self.subscriptions.descriptor(id))
                .collect();
            session.emit_subscription_change(&started, &change.stopped)?;
        }
        Ok(())
    }

    fn poll_subscriptions(&mut self) -> Result<()> {
        if self.subscriptions.is_poisoned() {
            return Err(Error::Poisoned);
        }
        let platform = &self.platform;
        let messages = self
            .subscriptions
            .poll_all(|handler| platform.poll_subscription(handler));
        self.pending_messages.extend(messages);
        Ok(())
    }

    /// Apply queued messages one at a time
    ///
    /// A message leaves the queue, and its model and effects become visible,
    /// only once its update line is written.
    fn process_messages(&mut self) -> Result<()> {
        while let Some(front) = self.pending_messages.front() {
            let message = if self.session.is_some() {
                front.clone()
            } else {
                match self.pending_messages.pop_front() {
                    Some(message) => message,
                    None => break,
                }
            };

            let model = self.program_state.take().ok_or(Error::Poisoned)?;
            let before = self.session.as_ref().map(|_| model.clone());
            tracing::trace!("Processing message");
            let (model, effects) = self.program.update(message, model);

            let logged = match (self.session.as_mut(), self.pending_messages.front()) {
                (Some(session), Some(message)) => session.emit_update(message, &model, &effects),
                _ => Ok(()),
            };
            if let Err(e) = logged {
                self.program_state = before;
                tracing::debug!(queued = self.pending_messages.len(), "Update rolled back");
                return Err(e.into());
            }

            self.program_state = Some(model);
            self.pending_effects.extend(effects);
            if before.is_some() {
                self.pending_messages.pop_front();
            }
        }
        Ok(())
    }

    fn dispatch_effects(&mut self) -> Result<()> {
        while let Some(effect) = self.pending_effects.pop_front() {
            let state = self.take_runner_state()?;
            let name = self.platform.effect_name(&effect);
            match self.platform.dispatch(state, effect) {
                EffectOutcome::Sync { state, message } => {
                    self.runner_state = Some(state);
                    self.pending_messages.extend(message);
                }
                EffectOutcome::Async { state, completion } => {
                    self.runner_state = Some(state);
                    if let Err(e) = self.scheduler.launch(name, completion) {
                        self.resume = Some(Resume::Dispatch);
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<P, A> Runner<P, A>
where
    P: Program,
    A: Platform<P::Message, Effect = P::Effect, Subscription = P::Subscription>,
{
    /// Platform state, `None` only after a callback panicked mid-phase
    pub fn runner_state(&self) -> Option<&A::State> {
        self.runner_state.as_ref()
    }

    /// Program model, `None` only after a callback panicked mid-phase
    pub fn program_state(&self) -> Option<&P::Model> {
        self.program_state.as_ref()
    }

    /// Check if a callback panic left the runner without its state
    ///
    /// A poisoned runner fails every further step with [`Error::Poisoned`].
    pub fn is_poisoned(&self) -> bool {
        self.runner_state.is_none()
            || self.program_state.is_none()
            || self.subscriptions.is_poisoned()
    }

    /// Check if the last step failed and the next call resumes it
    pub fn is_interrupted(&self) -> bool {
        self.resume.is_some()
    }

    /// Messages waiting for the next message phase, oldest first
    pub fn pending_messages(&self) -> &VecDeque<P::Message> {
        &self.pending_messages
    }

    /// Effects waiting for the next dispatch phase, in request order
    pub fn pending_effects(&self) -> &VecDeque<P::Effect> {
        &self.pending_effects
    }

    /// Number of async effects not yet collected
    pub fn in_flight(&self) -> usize {
        self.scheduler.len()
    }

    /// Async effects launched but not yet collected
    pub fn scheduler(&self) -> &Scheduler<A::State, P::Message> {
        &self.scheduler
    }

    /// Active subscription ids in start order
    pub fn subscription_ids(&self) -> impl Iterator<Item = &A::SubscriptionId> {
        self.subscriptions.ids()
    }

    /// Active subscriptions with their descriptors and handler state
    pub fn subscriptions(&self) -> &SubscriptionSet<A::SubscriptionId, P::Subscription, A::Handler> {
        &self.subscriptions
    }

    /// The debug log session, if logging is enabled
    pub fn session(&self) -> Option<&LoggingSession> {
        self.session.as_ref()
    }

    /// Number of completed steps
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The platform this runner drives
    pub fn platform(&self) -> &A {
        &self.platform
    }

    /// The program this runner drives
    pub fn program(&self) -> &P {
        &self.program
    }
}

impl<P, A> std::fmt::Debug for Runner<P, A>
where
    P: Program,
    A: Platform<P::Message, Effect = P::Effect, Subscription = P::Subscription>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("steps", &self.steps)
            .field("pending_messages", &self.pending_messages.len())
            .field("pending_effects", &self.pending_effects.len())
            .field("in_flight", &self.scheduler.len())
            .field("subscriptions", &self.subscriptions.len())
            .field("session", &self.session)
            .field("interrupted", &self.resume.is_some())
            .finish()
    }
}

/// Builder for [`Runner`]
pub struct RunnerBuilder<P, A> {
    platform: A,
    program: P,
    platform_args: Vec<String>,
    program_args: Vec<String>,
    session: Option<LoggingSession>,
    log_config: Option<LogConfig>,
}

impl<P, A> RunnerBuilder<P, A>
where
    P: Program,
    P::Model: Clone + Serialize,
    P::Message: Clone + Serialize + 'static,
    P::Effect: Serialize,
    P::Subscription: Serialize,
    A: Platform<P::Message, Effect = P::Effect, Subscription = P::Subscription>,
    A::State: 'static,
    A::SubscriptionId: Serialize,
{
    /// Create a builder with no arguments and logging disabled
    pub fn new(platform: A, program: P) -> Self {
        Self {
            platform,
            program,
            platform_args: Vec::new(),
            program_args: Vec::new(),
            session: None,
            log_config: None,
        }
    }

    /// Arguments passed to `Platform::init_state`
    pub fn platform_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.platform_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments passed to `Program::init`
    pub fn program_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.program_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Log to an already open session
    pub fn with_session(mut self, session: LoggingSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Open a session from config when the runner is built
    ///
    /// Ignored if a session was supplied with [`Self::with_session`].
    pub fn with_log_config(mut self, config: LogConfig) -> Self {
        self.log_config = Some(config);
        self
    }

    /// Initialize the runner
    pub fn build(self) -> Result<Runner<P, A>> {
        let session = match (self.session, &self.log_config) {
            (Some(session), _) => Some(session),
            (None, Some(config)) => LoggingSession::from_config(config)?,
            (None, None) => None,
        };
        Runner::init(
            self.platform,
            self.program,
            &self.platform_args,
            &self.program_args,
            session,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::continuation;
    use reel_core::Value;
    use reel_journal::testing::{FailingSink, FlakySink, SharedBuffer};
    use reel_journal::Replayer;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    type Trace = Arc<Mutex<Vec<String>>>;

    fn record(trace: &Trace, event: impl Into<String>) {
        trace.lock().unwrap().push(event.into());
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Model {
        count: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(tag = "_type")]
    enum Msg {
        Increment { by: i64 },
        Noop,
        Echo { by: i64 },
        Launch,
        Observed { value: i64 },
        Tick { timer: String },
        Explode,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(tag = "_type")]
    enum Fx {
        Echo { by: i64 },
        BumpLater,
        ReportLater,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Timer {
        name: String,
        interval_ms: u64,
    }

    fn clock(interval_ms: u64) -> Timer {
        Timer {
            name: "clock".into(),
            interval_ms,
        }
    }

    struct Counter {
        trace: Trace,
        timers: fn(&Model) -> Vec<Timer>,
    }

    impl Program for Counter {
        type Model = Model;
        type Message = Msg;
        type Effect = Fx;
        type Subscription = Timer;

        fn init(&self, _args: &[String]) -> (Model, Vec<Fx>) {
            (Model { count: 0 }, vec![])
        }

        fn update(&self, message: Msg, model: Model) -> (Model, Vec<Fx>) {
            record(&self.trace, format!("update:{:?}", message));
            match message {
                Msg::Increment { by } => (Model { count: model.count + by }, vec![]),
                Msg::Echo { by } => (model, vec![Fx::Echo { by }]),
                Msg::Launch => (model, vec![Fx::BumpLater, Fx::ReportLater]),
                Msg::Observed { value } => (Model { count: value }, vec![]),
                Msg::Noop | Msg::Tick { .. } => (model, vec![]),
                Msg::Explode => panic!("update exploded"),
            }
        }

        fn subscriptions(&self, model: &Model) -> Vec<Timer> {
            (self.timers)(model)
        }
    }

    #[derive(Debug, Default)]
    struct HostState {
        counter: i64,
    }

    #[derive(Debug)]
    struct TimerHandler {
        name: String,
        polls: u32,
    }

    struct Host {
        trace: Trace,
    }

    impl Platform<Msg> for Host {
        type State = HostState;
        type Effect = Fx;
        type Subscription = Timer;
        type SubscriptionId = String;
        type Handler = TimerHandler;

        fn init_state(&self, _args: &[String]) -> HostState {
            HostState::default()
        }

        fn start_of_update_cycle(&self, state: HostState) -> HostState {
            record(&self.trace, "start");
            state
        }

        fn end_of_update_cycle(&self, state: HostState) -> HostState {
            record(&self.trace, "end");
            state
        }

        fn dispatch(&self, state: HostState, effect: Fx) -> EffectOutcome<HostState, Msg> {
            record(&self.trace, format!("dispatch:{:?}", effect));
            match effect {
                Fx::Echo { by } => EffectOutcome::reply(state, Msg::Increment { by }),
                Fx::BumpLater => EffectOutcome::spawn(state, || {
                    continuation(|mut s: HostState| {
                        s.counter += 1;
                        (s, None)
                    })
                }),
                Fx::ReportLater => EffectOutcome::spawn(state, || {
                    continuation(|s: HostState| {
                        let value = s.counter;
                        (s, Some(Msg::Observed { value }))
                    })
                }),
            }
        }

        fn subscription_id(&self, timer: &Timer) -> String {
            timer.name.clone()
        }

        fn start_subscription(&self, timer: &Timer) -> TimerHandler {
            record(&self.trace, format!("start-sub:{}", timer.name));
            TimerHandler {
                name: timer.name.clone(),
                polls: 0,
            }
        }

        fn stop_subscription(&self, handler: TimerHandler) {
            record(&self.trace, format!("stop-sub:{}", handler.name));
        }

        fn poll_subscription(&self, mut handler: TimerHandler) -> (TimerHandler, Option<Msg>) {
            if handler.name == "bomb" {
                panic!("poll exploded");
            }
            handler.polls += 1;
            record(&self.trace, format!("poll:{}", handler.name));
            let message = Msg::Tick {
                timer: handler.name.clone(),
            };
            (handler, Some(message))
        }
    }

    fn no_timers(_: &Model) -> Vec<Timer> {
        vec![]
    }

    fn always_clock(_: &Model) -> Vec<Timer> {
        vec![clock(100)]
    }

    /// Same id every tick, but the interval is re-derived from the model
    fn drifting_clock(model: &Model) -> Vec<Timer> {
        vec![clock(100 + model.count as u64)]
    }

    fn clock_once_positive(model: &Model) -> Vec<Timer> {
        if model.count > 0 {
            vec![clock(100)]
        } else {
            vec![]
        }
    }

    fn clock_below_three(model: &Model) -> Vec<Timer> {
        if model.count < 3 {
            vec![clock(100)]
        } else {
            vec![]
        }
    }

    /// A clock plus a timer whose every poll panics
    fn clock_and_bomb(_: &Model) -> Vec<Timer> {
        vec![
            clock(100),
            Timer {
                name: "bomb".into(),
                interval_ms: 100,
            },
        ]
    }

    fn build(
        timers: fn(&Model) -> Vec<Timer>,
        session: LoggingSession,
    ) -> (Result<Runner<Counter, Host>>, Trace) {
        let trace = Trace::default();
        let runner = Runner::builder(
            Host {
                trace: trace.clone(),
            },
            Counter {
                trace: trace.clone(),
                timers,
            },
        )
        .with_session(session.with_clock(|| 1000))
        .build();
        (runner, trace)
    }

    fn start(
        timers: fn(&Model) -> Vec<Timer>,
        compression: bool,
    ) -> (Runner<Counter, Host>, SharedBuffer, Trace) {
        let buffer = SharedBuffer::new();
        let (runner, trace) = build(timers, LoggingSession::new(buffer.clone(), compression));
        (runner.unwrap(), buffer, trace)
    }

    /// Uncompressed runner whose log rejects the numbered writes
    fn start_flaky(
        timers: fn(&Model) -> Vec<Timer>,
        failing: impl IntoIterator<Item = usize>,
    ) -> (Runner<Counter, Host>, FlakySink, Trace) {
        let sink = FlakySink::failing_on(failing);
        let (runner, trace) = build(timers, LoggingSession::new(sink.clone(), false));
        (runner.unwrap(), sink, trace)
    }

    fn wait_for_effects(runner: &Runner<Counter, Host>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !runner.scheduler().all_finished() {
            assert!(Instant::now() < deadline, "async effects did not finish in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn parse(line: &str) -> serde_json::Value {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_counter_init_then_increment_log() {
        let (mut runner, buffer, _) = start(no_timers, false);
        runner.send(Msg::Increment { by: 5 });
        runner.step().unwrap();

        assert_eq!(
            buffer.lines(),
            vec![
                r#"{"type":"init","timestamp":1000,"modelDiff":[{"op":"add","path":"/count","value":0}],"effects":[]}"#,
                r#"{"type":"update","timestamp":1000,"message":{"_type":"Increment","by":5},"modelDiff":[{"op":"replace","path":"/count","value":5}],"effects":[]}"#,
            ]
        );
        assert_eq!(runner.program_state(), Some(&Model { count: 5 }));
        assert_eq!(runner.steps(), 1);
    }

    #[test]
    fn test_noop_update_logs_empty_diff() {
        let (mut runner, buffer, _) = start(no_timers, false);
        runner.send(Msg::Noop);
        runner.step().unwrap();

        let update = parse(&buffer.lines()[1]);
        assert_eq!(update["type"], "update");
        assert_eq!(update["modelDiff"], json!([]));
    }

    #[test]
    fn test_each_message_gets_its_own_update_line() {
        let (mut runner, buffer, _) = start(no_timers, false);
        runner.send(Msg::Increment { by: 1 });
        runner.send(Msg::Increment { by: 2 });
        runner.step().unwrap();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 3, "one init line and one update line per message");
        assert_eq!(parse(&lines[1])["modelDiff"][0]["value"], 1);
        assert_eq!(parse(&lines[2])["modelDiff"][0]["value"], 3);
    }

    #[test]
    fn test_update_line_lists_only_new_effects() {
        let (mut runner, buffer, _) = start(no_timers, false);
        runner.send(Msg::Echo { by: 2 });
        runner.send(Msg::Noop);
        runner.step().unwrap();

        let lines = buffer.lines();
        assert_eq!(parse(&lines[1])["effects"], json!([{"_type": "Echo", "by": 2}]));
        assert_eq!(parse(&lines[2])["effects"], json!([]));
    }

    #[test]
    fn test_sync_reply_is_processed_next_step() {
        let (mut runner, _, _) = start(no_timers, false);
        runner.send(Msg::Echo { by: 2 });
        runner.step().unwrap();
        assert_eq!(runner.program_state(), Some(&Model { count: 0 }));
        assert_eq!(runner.pending_messages().len(), 1);

        runner.step().unwrap();
        assert_eq!(runner.program_state(), Some(&Model { count: 2 }));
    }

    #[test]
    fn test_async_continuation_observes_earlier_result() {
        let (mut runner, buffer, _) = start(no_timers, false);
        runner.send(Msg::Launch);
        runner.step().unwrap();
        assert_eq!(runner.in_flight(), 2);
        assert!(runner.pending_effects().is_empty());

        wait_for_effects(&runner);
        runner.step().unwrap();

        assert_eq!(runner.in_flight(), 0);
        assert_eq!(runner.runner_state().map(|s| s.counter), Some(1));
        assert_eq!(
            runner.program_state(),
            Some(&Model { count: 1 }),
            "ReportLater must see the counter BumpLater produced"
        );
        let last = parse(buffer.lines().last().unwrap());
        assert_eq!(last["message"], json!({"_type": "Observed", "value": 1}));
    }

    #[test]
    fn test_phase_order_within_a_step() {
        let (mut runner, _, trace) = start(always_clock, false);
        trace.lock().unwrap().clear();

        runner.send(Msg::Echo { by: 2 });
        runner.step().unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "start",
                "poll:clock",
                "update:Echo { by: 2 }",
                r#"update:Tick { timer: "clock" }"#,
                "dispatch:Echo { by: 2 }",
                "end",
            ]
        );
    }

    #[test]
    fn test_subscription_identity_survives_descriptor_changes() {
        let (mut runner, _, trace) = start(drifting_clock, false);
        runner.send(Msg::Increment { by: 7 });
        for _ in 0..3 {
            runner.step().unwrap();
        }

        let id = "clock".to_string();
        let handler = runner.subscriptions().handler(&id).unwrap();
        assert_eq!(handler.polls, 3, "poll count keeps growing on the same handler");
        assert_eq!(
            runner.subscriptions().descriptor(&id),
            Some(&clock(100)),
            "the descriptor is not refreshed under an unchanged id"
        );

        let trace = trace.lock().unwrap();
        assert_eq!(trace.iter().filter(|e| e.starts_with("start-sub")).count(), 1);
        assert!(!trace.iter().any(|e| e.starts_with("stop-sub")));
    }

    #[test]
    fn test_subscription_declared_by_update_is_polled_next_step() {
        let (mut runner, _, trace) = start(clock_once_positive, false);
        runner.send(Msg::Increment { by: 1 });
        runner.step().unwrap();
        assert_eq!(runner.subscription_ids().count(), 0);
        assert!(!trace.lock().unwrap().iter().any(|e| e.starts_with("poll")));

        trace.lock().unwrap().clear();
        runner.step().unwrap();
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "start",
                "start-sub:clock",
                "poll:clock",
                r#"update:Tick { timer: "clock" }"#,
                "end",
            ]
        );
    }

    #[test]
    fn test_subscription_change_lines() {
        let (mut runner, buffer, _) = start(clock_below_three, false);
        runner.step().unwrap();
        runner.step().unwrap();

        let changes: Vec<String> = buffer
            .lines()
            .into_iter()
            .filter(|l| l.contains("subscriptionChange"))
            .collect();
        assert_eq!(
            changes,
            vec![
                r#"{"type":"subscriptionChange","timestamp":1000,"started":[{"name":"clock","interval_ms":100}],"stopped":[]}"#
            ],
            "an unchanged set logs nothing"
        );

        runner.send(Msg::Increment { by: 5 });
        runner.step().unwrap();
        runner.step().unwrap();
        assert_eq!(
            buffer.lines().iter().filter(|l| l.contains("subscriptionChange")).last().map(String::as_str),
            Some(r#"{"type":"subscriptionChange","timestamp":1000,"started":[],"stopped":["clock"]}"#)
        );
        assert_eq!(runner.subscriptions().len(), 0);
    }

    #[test]
    fn test_shutdown_stops_subscriptions_and_drains_effects() {
        let (mut runner, buffer, trace) = start(always_clock, false);
        runner.send(Msg::Launch);
        runner.step().unwrap();

        let (state, model) = runner.shutdown().unwrap();
        assert_eq!(state.counter, 1);
        assert_eq!(model, Model { count: 0 });
        assert!(trace.lock().unwrap().contains(&"stop-sub:clock".to_string()));
        assert_eq!(
            buffer.lines().last().map(String::as_str),
            Some(r#"{"type":"subscriptionChange","timestamp":1000,"started":[],"stopped":["clock"]}"#)
        );
    }

    #[test]
    fn test_runs_without_logging() {
        let trace = Trace::default();
        let mut runner = Runner::builder(
            Host {
                trace: trace.clone(),
            },
            Counter {
                trace,
                timers: no_timers,
            },
        )
        .with_log_config(LogConfig::default())
        .build()
        .unwrap();
        assert!(runner.session().is_none());

        runner.send(Msg::Increment { by: 4 });
        runner.step().unwrap();
        assert_eq!(runner.program_state(), Some(&Model { count: 4 }));
    }

    #[test]
    fn test_compressed_log_replays_to_final_model() {
        let (mut runner, buffer, _) = start(always_clock, true);
        runner.send(Msg::Increment { by: 2 });
        runner.send(Msg::Echo { by: 3 });
        for _ in 0..3 {
            runner.step().unwrap();
        }
        assert!(runner.session().is_some_and(|s| s.is_compressed()));

        let replayer = Replayer::from_reader(Cursor::new(buffer.contents())).unwrap();
        let last = replayer.frames().last().unwrap();
        assert_eq!(last.model, Value::from(json!({"count": 5})));
        assert_eq!(replayer.subscription_events().len(), 1);
        assert_eq!(
            replayer.subscription_events()[0].started,
            vec![Value::from(json!({"name": "clock", "interval_ms": 100}))]
        );
    }

    #[test]
    fn test_log_failure_mid_step_keeps_message_queued() {
        // Write 1 is the init line, write 2 the first update line
        let (mut runner, _, _) = start_flaky(no_timers, [2]);
        runner.send(Msg::Increment { by: 5 });
        runner.send(Msg::Increment { by: 1 });

        let result = runner.step();
        assert!(matches!(result, Err(Error::Journal(_))));
        assert_eq!(
            runner.program_state(),
            Some(&Model { count: 0 }),
            "an unlogged update must be rolled back"
        );
        assert_eq!(runner.pending_messages().len(), 2);
        assert_eq!(runner.pending_messages().front(), Some(&Msg::Increment { by: 5 }));
        assert_eq!(runner.steps(), 0);
        assert!(runner.is_interrupted());
        assert!(!runner.is_poisoned());
    }

    #[test]
    fn test_log_failure_mid_step_retry_logs_each_message() {
        let (mut runner, sink, trace) = start_flaky(no_timers, [2]);
        runner.send(Msg::Increment { by: 5 });
        runner.send(Msg::Increment { by: 1 });
        assert!(runner.step().is_err());
        runner.step().unwrap();

        assert_eq!(
            sink.buffer().lines(),
            vec![
                r#"{"type":"init","timestamp":1000,"modelDiff":[{"op":"add","path":"/count","value":0}],"effects":[]}"#,
                r#"{"type":"update","timestamp":1000,"message":{"_type":"Increment","by":5},"modelDiff":[{"op":"replace","path":"/count","value":5}],"effects":[]}"#,
                r#"{"type":"update","timestamp":1000,"message":{"_type":"Increment","by":1},"modelDiff":[{"op":"replace","path":"/count","value":6}],"effects":[]}"#,
            ]
        );
        assert_eq!(sink.attempts(), 4);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                "start",
                "update:Increment { by: 5 }",
                "update:Increment { by: 5 }",
                "update:Increment { by: 1 }",
                "end",
            ],
            "the retry resumes the cycle instead of opening a second one"
        );
        assert_eq!(runner.program_state(), Some(&Model { count: 6 }));
        assert_eq!(runner.steps(), 1);
        assert!(!runner.is_interrupted());
    }

    #[test]
    fn test_log_failure_discards_effects_of_rolled_back_update() {
        let (mut runner, sink, trace) = start_flaky(no_timers, [2]);
        runner.send(Msg::Echo { by: 2 });
        assert!(runner.step().is_err());
        assert!(runner.pending_effects().is_empty());

        runner.step().unwrap();
        let dispatched = trace
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("dispatch"))
            .count();
        assert_eq!(dispatched, 1);
        let update = parse(&sink.buffer().lines()[1]);
        assert_eq!(update["effects"], json!([{"_type": "Echo", "by": 2}]));
    }

    #[test]
    fn test_log_failure_during_reconcile_resumes_without_restarting() {
        // Writes: init, update, then the subscriptionChange line fails
        let (mut runner, sink, trace) = start_flaky(clock_once_positive, [3]);
        runner.send(Msg::Increment { by: 1 });
        runner.step().unwrap();

        trace.lock().unwrap().clear();
        assert!(matches!(runner.step(), Err(Error::Journal(_))));
        assert_eq!(*trace.lock().unwrap(), vec!["start", "start-sub:clock"]);
        assert!(runner.is_interrupted());

        trace.lock().unwrap().clear();
        runner.step().unwrap();
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["poll:clock", r#"update:Tick { timer: "clock" }"#, "end"]
        );
        let changes: Vec<String> = sink
            .buffer()
            .lines()
            .into_iter()
            .filter(|l| l.contains("subscriptionChange"))
            .collect();
        assert_eq!(
            changes,
            vec![
                r#"{"type":"subscriptionChange","timestamp":1000,"started":[{"name":"clock","interval_ms":100}],"stopped":[]}"#
            ]
        );
        assert_eq!(runner.steps(), 2);
    }

    #[test]
    fn test_log_failure_during_init_is_surfaced() {
        let (runner, trace) = build(always_clock, LoggingSession::new(FailingSink, false));
        assert!(matches!(runner, Err(Error::Journal(_))));
        assert!(trace.lock().unwrap().is_empty(), "nothing starts before init is logged");
    }

    #[test]
    fn test_log_failure_during_init_stops_started_subscriptions() {
        let sink = FlakySink::failing_on([2]);
        let (runner, trace) = build(always_clock, LoggingSession::new(sink, false));
        assert!(matches!(runner, Err(Error::Journal(_))));
        assert_eq!(*trace.lock().unwrap(), vec!["start-sub:clock", "stop-sub:clock"]);
    }

    #[test]
    #[should_panic(expected = "update exploded")]
    fn test_panicking_update_poisons_runner() {
        let (mut runner, _, _) = start(no_timers, false);
        runner.send(Msg::Explode);
        let _ = runner.step();
    }

    #[test]
    fn test_step_after_panicking_update_is_poisoned() {
        let (mut runner, _, _) = start(no_timers, false);
        runner.send(Msg::Explode);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runner.step()));
        assert!(outcome.is_err());

        assert!(runner.is_poisoned());
        assert!(runner.program_state().is_none());
        assert!(matches!(runner.step(), Err(Error::Poisoned)));
    }

    #[test]
    fn test_panicking_poll_poisons_runner_without_restarts() {
        let (mut runner, _, trace) = start(clock_and_bomb, false);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runner.step()));
        assert!(outcome.is_err());
        assert!(runner.is_poisoned());
        assert_eq!(runner.subscriptions().len(), 2);

        trace.lock().unwrap().clear();
        assert!(matches!(runner.step(), Err(Error::Poisoned)));
        assert!(
            trace.lock().unwrap().is_empty(),
            "a poisoned runner must not run hooks or restart subscriptions"
        );

        runner.shutdown().unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["stop-sub:clock"]);
    }
}
