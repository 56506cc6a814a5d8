//! What resolving a promise with a value means, and how queued
//! continuations reach their child promises.
use std::rc::Rc;

use tracing::{debug, trace};

use crate::promise::{Promise, Reject, Resolve};
use crate::Error;

/// A continuation passed to [`Promise::then`]. `Err` rejects the promise
/// `then` returned.
pub type Handler<A, U, E> = Box<dyn FnOnce(A) -> Result<Resolution<U, E>, E>>;

/// Boxes `f` for either slot of [`Promise::then`].
pub fn handler<A, U, E, F>(f: F) -> Handler<A, U, E>
where
    F: FnOnce(A) -> Result<Resolution<U, E>, E> + 'static,
{
    Box::new(f)
}

/// The fulfillment slot of [`Promise::then`].
///
/// A [`Handler`] may map `T` to any `U`. `None` passes the value through,
/// which is only possible when the returned promise has the same value type.
pub trait OnFulfilled<T, U, E> {
    fn into_handler(self) -> Handler<T, U, E>;
}

impl<T, U, E> OnFulfilled<T, U, E> for Handler<T, U, E> {
    fn into_handler(self) -> Handler<T, U, E> {
        self
    }
}

impl<T: 'static, E: 'static> OnFulfilled<T, T, E> for Option<Handler<T, T, E>> {
    fn into_handler(self) -> Handler<T, T, E> {
        match self {
            Some(on_fulfilled) => on_fulfilled,
            None => Box::new(|value| Ok(Resolution::Value(value))),
        }
    }
}

/// The rejection slot of [`Promise::then`]. `None` passes the reason
/// through unchanged.
pub trait OnRejected<U, E> {
    fn into_handler(self) -> Handler<E, U, E>;
}

impl<U, E> OnRejected<U, E> for Handler<E, U, E> {
    fn into_handler(self) -> Handler<E, U, E> {
        self
    }
}

impl<U: 'static, E: 'static> OnRejected<U, E> for Option<Handler<E, U, E>> {
    fn into_handler(self) -> Handler<E, U, E> {
        match self {
            Some(on_rejected) => on_rejected,
            None => Box::new(|reason| Err(reason)),
        }
    }
}

/// Anything a promise can be resolved with.
pub enum Resolution<T, E> {
    /// Fulfills directly.
    Value(T),
    /// Settles the way the other promise settles.
    Promise(Promise<T, E>),
    /// A foreign object exposing a `then` entry point, adopted through a
    /// wrapper promise of this crate.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

/// The executor-shaped `then` entry point of a thenable.
pub type ThenFn<T, E> = Box<dyn FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>>;

/// What looking up `then` on a foreign object produced.
pub enum ThenMember<T, E> {
    /// A callable `then`; it is invoked like an executor.
    Callable(ThenFn<T, E>),
    /// No callable `then` after all. The object itself is the value.
    Plain(T),
}

/// A foreign promise-like object.
///
/// The lookup is separate from the call so that an object whose `then`
/// cannot even be read (`Err`) rejects the promise it was resolved into.
/// Whatever the callable does with its capabilities is subject to the usual
/// settle-once rules, and its `Err` is treated like an executor's.
pub trait Thenable<T, E> {
    fn then_member(self: Box<Self>) -> Result<ThenMember<T, E>, E>;
}

struct FnThenable<F>(F);

impl<T, E, F> Thenable<T, E> for FnThenable<F>
where
    F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E> + 'static,
{
    fn then_member(self: Box<Self>) -> Result<ThenMember<T, E>, E> {
        Ok(ThenMember::Callable(Box::new(self.0)))
    }
}

/// A thenable whose `then` is `then`.
///
/// # Examples
///
/// ```
/// use promise_then::{thenable, Error, Host, Promise, TaskQueue};
/// let queue = TaskQueue::new();
/// let host = Host::new(queue.clone());
/// let promise = Promise::<i32, Error>::resolve(&host, thenable(|resolve, _| {
///     resolve.resolve(42.into());
///     Ok(())
/// }));
/// queue.run_until_idle();
/// assert_eq!(promise.result(), Some(Ok(42)));
/// ```
pub fn thenable<T, E, F>(then: F) -> Resolution<T, E>
where
    T: 'static,
    E: 'static,
    F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E> + 'static,
{
    Resolution::Thenable(Box::new(FnThenable(then)))
}

/// A queued record, consumed exactly once against its parent's outcome.
pub(crate) trait Deliver<T, E> {
    fn deliver(self: Box<Self>, outcome: Result<T, E>);
}

/// The record `then` queues on its parent.
pub(crate) struct Continuation<T, U, E> {
    pub(crate) on_fulfilled: Handler<T, U, E>,
    pub(crate) on_rejected: Handler<E, U, E>,
    pub(crate) resolve: Resolve<U, E>,
    pub(crate) reject: Reject<U, E>,
}

impl<T, U, E> Deliver<T, E> for Continuation<T, U, E>
where
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn deliver(self: Box<Self>, outcome: Result<T, E>) {
        let Continuation {
            on_fulfilled,
            on_rejected,
            resolve,
            reject,
        } = *self;
        let next = match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        };
        match next {
            Ok(value) => resolve.resolve(value),
            Err(reason) => reject.reject(reason),
        }
    }
}

/// Settles `target` the way the promise it was queued on settled.
struct Adoption<T, E> {
    target: Promise<T, E>,
}

impl<T, E> Deliver<T, E> for Adoption<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn deliver(self: Box<Self>, outcome: Result<T, E>) {
        self.target.transition(outcome);
    }
}

/// Schedules a drain of `promise`'s queue. The promise must be settled.
pub(crate) fn deliver_all<T, E>(promise: &Promise<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let host = promise.host();
    let promise = promise.clone();
    host.defer(Box::new(move || flush(&promise)));
}

/// Delivers queued records one at a time, oldest first, including records
/// queued by the deliveries themselves.
fn flush<T, E>(promise: &Promise<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let mut delivered = 0usize;
    loop {
        let next = {
            let inner = &mut *promise.inner.borrow_mut();
            match inner.outcome {
                Some(ref outcome) => inner
                    .callbacks
                    .pop_front()
                    .map(|record| (record, outcome.clone())),
                None => None,
            }
        };
        let Some((record, outcome)) = next else {
            break;
        };
        record.deliver(outcome);
        delivered += 1;
    }
    trace!(delivered, "continuations flushed");
}

/// Resolves `promise` with `value`. Only the fulfill path comes through
/// here; rejections never unwrap their reason.
pub(crate) fn adopt<T, E>(promise: &Promise<T, E>, value: Resolution<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match value {
        Resolution::Value(value) => promise.transition(Ok(value)),
        Resolution::Promise(other) if other.ptr_eq(promise) => {
            debug!("promise resolved with itself");
            promise.transition(Err(Error::SelfResolution.into()));
        }
        Resolution::Promise(other) => {
            follow(promise, &other);
            other.subscribe(Box::new(Adoption {
                target: promise.clone(),
            }));
        }
        Resolution::Thenable(thenable) => match thenable.then_member() {
            Ok(ThenMember::Callable(then)) => adopt_thenable(promise, then),
            Ok(ThenMember::Plain(value)) => promise.transition(Ok(value)),
            Err(reason) => promise.transition(Err(reason)),
        },
    }
}

/// Records that `promise` now waits on `next`, one adoption hop further
/// down the chain.
///
/// `next` may already be adopting something of its own (a promise built by
/// `Promise::resolve` adopts its value right away), so the new depth is
/// pushed down every pending promise of that chain. Depths only grow, and
/// stop growing one past the limit, which also ends the walk on a cycle.
fn follow<T, E>(promise: &Promise<T, E>, next: &Promise<T, E>) {
    let limit = promise.host().config().max_adoption_depth;
    let mut depth = {
        let mut inner = promise.inner.borrow_mut();
        inner.adopting = Some(Rc::downgrade(&next.inner));
        inner.depth
    };
    let mut node = Some(next.inner.clone());
    while let Some(current) = node.take() {
        depth = (depth + 1).min(limit.saturating_add(1));
        let mut inner = current.borrow_mut();
        if inner.outcome.is_some() || inner.depth >= depth {
            break;
        }
        inner.depth = depth;
        node = inner.adopting.as_ref().and_then(|next| next.upgrade());
    }
}

/// Runs a foreign `then` as the executor of a wrapper promise and adopts the
/// wrapper. The executor runs from the scheduler, so thenables resolving to
/// further thenables are unwound one task at a time instead of recursing.
///
/// The depth limit is checked when the executor is about to run, since the
/// wrapper's depth can still grow while it waits in the scheduler.
fn adopt_thenable<T, E>(promise: &Promise<T, E>, then: ThenFn<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let host = promise.host();
    let limit = host.config().max_adoption_depth;
    let wrapper: Promise<T, E> = Promise::pending(host.clone(), 0);
    follow(promise, &wrapper);
    wrapper.subscribe(Box::new(Adoption {
        target: promise.clone(),
    }));
    host.defer(Box::new(move || {
        let depth = wrapper.depth();
        if depth > limit {
            debug!(depth, limit, "thenable adoption limit reached");
            wrapper.transition(Err(Error::AdoptionDepthExceeded { depth: limit }.into()));
        } else {
            wrapper.run_executor(then);
        }
    }));
}
