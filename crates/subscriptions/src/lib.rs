//! Subscription bookkeeping for backends.
//!
//! The [`SubscriptionRegistry`] finds every [`Subscription`] interested in a
//! changed resource. Each subscription can buffer change events while an
//! initial snapshot is being sent, so a subscriber never sees a live update
//! before the state it applies to.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod registry;
mod subscription;

pub use registry::SubscriptionRegistry;
pub use subscription::Subscription;
