//! Background tasks: stream consumers driving onboarding and the expired
//! token sweeper. All stop on a shared `CancellationToken`.

pub mod event_consumer;
pub mod token_sweeper;

pub use event_consumer::{Delivery, EventConsumer, EventDispatcher, Subscription};
pub use token_sweeper::TokenSweeper;
