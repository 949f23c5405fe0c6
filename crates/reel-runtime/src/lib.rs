//! Reel Runtime - Elm-style step-cycle orchestrator
//!
//! A [`Program`] owns pure application logic; a [`Platform`] executes the
//! effects and subscriptions it asks for. The [`Runner`] ties them together:
//!
//! - **Runner**: owns platform state, model and queues; advances one
//!   [`Runner::step`] at a time
//! - **Scheduler**: runs async effects on their own threads and applies
//!   their continuations to the state current at collection time
//! - **SubscriptionSet**: starts and stops subscriptions by identity
//!
//! Every transition can be recorded with a [`reel_journal::LoggingSession`].
//!
//! # Example
//!
//! ```
//! use reel_runtime::{EffectOutcome, Platform, Program, Runner};
//!
//! struct Counter;
//!
//! impl Program for Counter {
//!     type Model = i64;
//!     type Message = i64;
//!     type Effect = ();
//!     type Subscription = ();
//!
//!     fn init(&self, _args: &[String]) -> (i64, Vec<()>) {
//!         (0, vec![])
//!     }
//!     fn update(&self, by: i64, count: i64) -> (i64, Vec<()>) {
//!         (count + by, vec![])
//!     }
//!     fn subscriptions(&self, _count: &i64) -> Vec<()> {
//!         vec![]
//!     }
//! }
//!
//! struct Host;
//!
//! impl Platform<i64> for Host {
//!     type State = ();
//!     type Effect = ();
//!     type Subscription = ();
//!     type SubscriptionId = ();
//!     type Handler = ();
//!
//!     fn init_state(&self, _args: &[String]) {}
//!     fn dispatch(&self, state: (), _effect: ()) -> EffectOutcome<(), i64> {
//!         EffectOutcome::done(state)
//!     }
//!     fn subscription_id(&self, _subscription: &()) {}
//!     fn start_subscription(&self, _subscription: &()) {}
//!     fn stop_subscription(&self, _handler: ()) {}
//!     fn poll_subscription(&self, handler: ()) -> ((), Option<i64>) {
//!         (handler, None)
//!     }
//! }
//!
//! let mut runner = Runner::builder(Host, Counter).build().unwrap();
//! runner.send(5);
//! runner.step().unwrap();
//! assert_eq!(runner.program_state(), Some(&5));
//! ```

pub mod effect;
mod error;
mod program;
pub mod runner;
pub mod scheduler;
pub mod subscription;

pub use effect::{continuation, Completion, Continuation, EffectOutcome};
pub use error::{Error, Result};
pub use program::{Platform, Program};
pub use runner::{Runner, RunnerBuilder};
pub use scheduler::{InFlightEffect, Scheduler};
pub use subscription::{Reconciliation, SubscriptionSet};
