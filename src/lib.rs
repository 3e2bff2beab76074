//! A single-shot promise: a value that is unknown at creation, becomes
//! known exactly once (fulfilled or rejected), and notifies its observers
//! when it does.
//!
//! [`Promise::new`] runs a producer closure synchronously and hands it a
//! [`Producer`] settle handle. Observers chain on the promise with
//! [`Promise::then`] and [`Promise::catch`], combine a batch of promises
//! with [`Promise::all`], or wait from async code through
//! [`Promise::waiter`].
//!
//! ```
//! use promise_source::Promise;
//!
//! let promise = Promise::<i32, String>::new(|producer| {
//!     let _ = producer.resolve(5);
//!     Ok(())
//! });
//! let doubled = promise.then(|n| Ok(n * 2));
//! assert_eq!(doubled.value(), Some(10));
//! ```
use thiserror::Error;

pub mod all;
pub mod promise;

pub use all::Entry;
pub use promise::{Producer, Promise, Waiter};

/// Returned by a settle handle used after the promise has already settled.
/// The first settlement always stands; later attempts never change state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettleError {
    #[error("promise already settled")]
    AlreadySettled,
}
