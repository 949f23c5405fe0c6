//! Collaborator contracts the runner drives
//!
//! A [`Program`] is pure application logic: it owns the model and decides
//! which effects and subscriptions it wants. A [`Platform`] executes those
//! requests. Both sides agree on the effect and subscription types, which are
//! ordinarily closed enums so dispatch is an exhaustive `match`.

use crate::effect::EffectOutcome;
use std::borrow::Cow;
use std::fmt::Debug;
use std::hash::Hash;

/// Application logic in Elm style
pub trait Program {
    /// Application state
    type Model;
    /// Inputs that drive `update`
    type Message;
    /// Side effects the program may request
    type Effect;
    /// Long-lived message sources the program may declare
    type Subscription;

    /// Build the initial model and bootstrap effects
    fn init(&self, args: &[String]) -> (Self::Model, Vec<Self::Effect>);

    /// Fold one message into the model
    fn update(&self, message: Self::Message, model: Self::Model) -> (Self::Model, Vec<Self::Effect>);

    /// Subscriptions that should be active for `model`
    fn subscriptions(&self, model: &Self::Model) -> Vec<Self::Subscription>;
}

/// Host side of the runtime: executes effects and drives subscriptions
///
/// `M` is the program's message type; effect handlers and subscription polls
/// produce messages of that type.
pub trait Platform<M> {
    /// Platform-owned state threaded through every phase
    type State;
    /// Effect requests this platform can execute
    type Effect;
    /// Subscription descriptors this platform can run
    type Subscription;
    /// Stable identity of a subscription across ticks
    type SubscriptionId: Clone + Eq + Hash + Debug;
    /// Per-subscription state kept while it is active
    type Handler;

    /// Build the initial platform state
    fn init_state(&self, args: &[String]) -> Self::State;

    /// Runs first in every step
    fn start_of_update_cycle(&self, state: Self::State) -> Self::State {
        state
    }

    /// Runs last in every step
    fn end_of_update_cycle(&self, state: Self::State) -> Self::State {
        state
    }

    /// Execute one effect
    ///
    /// Returning [`EffectOutcome::Async`] hands a completion to the scheduler;
    /// its continuation will later receive whatever state is current then.
    fn dispatch(&self, state: Self::State, effect: Self::Effect) -> EffectOutcome<Self::State, M>;

    /// Name used for diagnostics of in-flight effects
    fn effect_name(&self, _effect: &Self::Effect) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self::Effect>())
    }

    /// Identity of a subscription; equal ids mean "the same subscription"
    fn subscription_id(&self, subscription: &Self::Subscription) -> Self::SubscriptionId;

    /// Begin a subscription
    fn start_subscription(&self, subscription: &Self::Subscription) -> Self::Handler;

    /// End a subscription
    fn stop_subscription(&self, handler: Self::Handler);

    /// Poll an active subscription once
    fn poll_subscription(&self, handler: Self::Handler) -> (Self::Handler, Option<M>);
}
