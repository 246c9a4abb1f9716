//! Change notification for the validating store.
//!
//! - [`event`]: [`ChangeEvent`] enum.
//! - [`notifier`]: synchronous fan-out to subscribers ([`Notifier<T>`]).

pub mod event;
pub mod notifier;

pub use event::ChangeEvent;
pub use notifier::Notifier;

/// An owned one-shot closure that removes a subscription when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;
