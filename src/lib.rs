//! Callback-driven promises with a single `then` operation.
//!
//! A [`Promise`] starts pending and settles exactly once, fulfilled with a
//! `T` or rejected with an `E`. Continuations registered through
//! [`Promise::then`] are delivered in registration order, always from the
//! [`Scheduler`] of the promise's [`Host`] and never from the stack that
//! settled the promise or registered the continuation. Resolving with another
//! promise or with a foreign [`Thenable`] adopts its eventual outcome.
//!
//! # Examples
//!
//! ```
//! use promise_then::{handler, Error, Host, Promise, Resolution, TaskQueue};
//! let queue = TaskQueue::new();
//! let host = Host::new(queue.clone());
//! let nested = Promise::<i32, Error>::resolve(
//!     &host,
//!     Resolution::Promise(Promise::resolve(&host, Resolution::Promise(Promise::resolve(&host, 5.into())))),
//! );
//! let plus_one = nested.then(handler(|v: i32| Ok(Resolution::Value(v + 1))), None);
//! queue.run_until_idle();
//! assert_eq!(plus_one.result(), Some(Ok(6)));
//! ```
//!
//! Promises are also `std::future::Future`s, so a `futures` `LocalPool` can
//! both run the deferred work and wait for an outcome:
//!
//! ```
//! use futures::executor::LocalPool;
//! use promise_then::{Error, Host, Promise};
//! let mut pool = LocalPool::new();
//! let host = Host::new(pool.spawner());
//! let promise = Promise::<&str, Error>::resolve(&host, "🍓".into()).then(None, None);
//! assert_eq!(pool.run_until(promise), Ok("🍓"));
//! ```
pub mod config;
mod error;
mod promise;
mod resolution;
pub mod scheduler;

pub use config::Config;
pub use error::Error;
pub use promise::{Promise, Reject, Resolve, State};
pub use resolution::{
    handler, thenable, Handler, OnFulfilled, OnRejected, Resolution, ThenFn, ThenMember, Thenable,
};
pub use scheduler::{Host, Scheduler, Task, TaskQueue};
