use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, Waker},
};

use tracing::trace;

use crate::resolution::{self, Continuation, Deliver, OnFulfilled, OnRejected, Resolution};
use crate::{Error, Host};

/// Where a promise is in its lifecycle.
///
/// `Pending` moves to exactly one of the other two, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// A value of type `T`, or a rejection reason of type `E`, that is not
/// available yet.
///
/// A `Promise` is a cheap handle; clones observe the same state. Results are
/// read through [`Promise::then`], which never calls back synchronously.
///
/// # Examples
///
/// ```
/// use promise_then::{handler, Error, Host, Promise, Resolution, TaskQueue};
/// use std::{cell::RefCell, rc::Rc};
///
/// let queue = TaskQueue::new();
/// let host = Host::new(queue.clone());
/// let later = Rc::new(RefCell::new(None));
/// let slot = later.clone();
/// let promise = Promise::<i32, Error>::new(&host, move |resolve, _reject| {
///     *slot.borrow_mut() = Some(resolve);
///     Ok(())
/// });
/// let next = promise.then(handler(|v: i32| Ok(Resolution::Value(v + 1))), None);
///
/// later.borrow_mut().take().unwrap().resolve(1.into());
/// queue.run_until_idle();
/// assert_eq!(next.result(), Some(Ok(2)));
/// ```
pub struct Promise<T, E> {
    pub(crate) inner: Rc<RefCell<Inner<T, E>>>,
}

pub(crate) struct Inner<T, E> {
    /// `None` while pending. Never written twice.
    pub(crate) outcome: Option<Result<T, E>>,
    pub(crate) callbacks: VecDeque<Box<dyn Deliver<T, E>>>,
    wakers: Vec<Waker>,
    host: Host,
    /// Adoption hops between this promise and the promise first resolved.
    pub(crate) depth: usize,
    /// The promise this one is waiting on, while it adopts.
    pub(crate) adopting: Option<Weak<RefCell<Inner<T, E>>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Promise<T, E> {
    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> State {
        match self.inner.borrow().outcome {
            None => State::Pending,
            Some(Ok(_)) => State::Fulfilled,
            Some(Err(_)) => State::Rejected,
        }
    }

    pub fn host(&self) -> Host {
        self.inner.borrow().host.clone()
    }

    pub(crate) fn depth(&self) -> usize {
        self.inner.borrow().depth
    }

    pub(crate) fn pending(host: Host, depth: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                callbacks: VecDeque::new(),
                wakers: vec![],
                host,
                depth,
                adopting: None,
            })),
        }
    }

    /// A fresh resolve/reject pair. The pair shares one latch, so only the
    /// first call on either has any effect.
    pub(crate) fn capabilities(&self) -> (Resolve<T, E>, Reject<T, E>) {
        let latch = Rc::new(Cell::new(false));
        (
            Resolve {
                promise: self.clone(),
                latch: latch.clone(),
            },
            Reject {
                promise: self.clone(),
                latch,
            },
        )
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// The fulfillment value or rejection reason, once settled.
    pub fn result(&self) -> Option<Result<T, E>> {
        self.inner.borrow().outcome.clone()
    }

    /// Fixes the outcome unless one is already fixed, then wakes pollers and
    /// schedules delivery of queued continuations.
    pub(crate) fn transition(&self, outcome: Result<T, E>) {
        let (wakers, queued) = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(outcome);
            inner.adopting = None;
            (std::mem::take(&mut inner.wakers), inner.callbacks.len())
        };
        trace!(state = ?self.state(), queued, "promise settled");
        for waker in wakers {
            waker.wake();
        }
        if queued > 0 {
            resolution::deliver_all(self);
        }
    }

    /// Queues `record`. On an already settled promise the queue is flushed
    /// right away, still asynchronously.
    pub(crate) fn subscribe(&self, record: Box<dyn Deliver<T, E>>) {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            inner.callbacks.push_back(record);
            inner.outcome.is_some()
        };
        trace!(settled, "continuation registered");
        if settled {
            resolution::deliver_all(self);
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Runs `executor` synchronously with this promise's resolve and reject
    /// capabilities.
    ///
    /// An `Err` returned by the executor rejects the promise, unless one of
    /// the capabilities was already used.
    pub fn new<F>(host: &Host, executor: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending(host.clone(), 0);
        promise.run_executor(executor);
        promise
    }

    pub(crate) fn run_executor<F>(&self, executor: F)
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let (resolve, reject) = self.capabilities();
        if let Err(reason) = executor(resolve, reject.clone()) {
            reject.reject(reason);
        }
    }

    /// A promise resolved with `value`. Promises and thenables are adopted,
    /// so `Promise::resolve(host, Resolution::Promise(p))` settles like `p`.
    pub fn resolve(host: &Host, value: Resolution<T, E>) -> Self {
        Self::new(host, move |resolve, _| {
            resolve.resolve(value);
            Ok(())
        })
    }

    /// A promise rejected with `reason`, as is.
    pub fn reject(host: &Host, reason: E) -> Self {
        Self::new(host, move |_, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Registers continuations and returns the promise of their outcome.
    ///
    /// When this promise fulfills, `on_fulfilled` maps the value, possibly to
    /// another type; `None` passes it through. When it rejects,
    /// `on_rejected` may recover (an `Ok` fulfills the returned promise);
    /// without it the reason passes through unchanged. An `Err` from either
    /// handler rejects the returned promise. Handlers always run from the
    /// scheduler, never from inside `then`.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_then::{handler, Error, Host, Promise, Resolution, TaskQueue};
    /// let queue = TaskQueue::new();
    /// let host = Host::new(queue.clone());
    /// let failed = Promise::<i32, Error>::reject(&host, Error::SelfResolution);
    /// let recovered = failed
    ///     .then(None, None)
    ///     .then(None, handler(|_: Error| Ok(Resolution::Value(0))));
    /// let label = recovered.then(handler(|v: i32| Ok(Resolution::Value(format!("#{v}")))), None);
    /// queue.run_until_idle();
    /// assert_eq!(label.result(), Some(Ok("#0".to_string())));
    /// ```
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: OnFulfilled<T, U, E>,
        R: OnRejected<U, E>,
    {
        let child = Promise::pending(self.host(), 0);
        let (resolve, reject) = child.capabilities();
        self.subscribe(Box::new(Continuation {
            on_fulfilled: on_fulfilled.into_handler(),
            on_rejected: on_rejected.into_handler(),
            resolve,
            reject,
        }));
        child
    }
}

impl<T, E> fmt::Debug for Promise<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Promise")
            .field("outcome", &inner.outcome)
            .field("queued", &inner.callbacks.len())
            .field("depth", &inner.depth)
            .finish()
    }
}

/// Awaiting a promise yields its outcome. Some other task must keep the
/// promise's scheduler running, e.g. a `LocalPool` driving both.
impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &mut *self.inner.borrow_mut();
        match inner.outcome {
            Some(ref outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The fulfill capability handed to an executor.
pub struct Resolve<T, E> {
    promise: Promise<T, E>,
    latch: Rc<Cell<bool>>,
}

/// The reject capability handed to an executor.
pub struct Reject<T, E> {
    promise: Promise<T, E>,
    latch: Rc<Cell<bool>>,
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            latch: self.latch.clone(),
        }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            latch: self.latch.clone(),
        }
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Resolves the promise with `value`, adopting it first if it is a
    /// promise or a thenable. Ignored if this pair was already used, even if
    /// the promise itself is still pending on an earlier adoption.
    pub fn resolve(&self, value: Resolution<T, E>) {
        if self.latch.replace(true) {
            trace!("ignoring resolve on a used capability");
            return;
        }
        resolution::adopt(&self.promise, value);
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Rejects the promise with `reason`. Ignored if this pair was already
    /// used.
    pub fn reject(&self, reason: E) {
        if self.latch.replace(true) {
            trace!("ignoring reject on a used capability");
            return;
        }
        self.promise.transition(Err(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler, TaskQueue};

    #[derive(Debug, Clone, PartialEq)]
    enum Reason {
        Engine(Error),
        Thrown(&'static str),
    }

    impl From<Error> for Reason {
        fn from(err: Error) -> Self {
            Reason::Engine(err)
        }
    }

    type P = Promise<i32, Reason>;

    fn host() -> (TaskQueue, Host) {
        let queue = TaskQueue::new();
        let host = Host::new(queue.clone());
        (queue, host)
    }

    #[test]
    fn test_new_starts_pending() {
        let (_queue, host) = host();
        let promise = P::new(&host, |_, _| Ok(()));
        assert_eq!(promise.state(), State::Pending);
        assert_eq!(promise.result(), None);
    }

    #[test]
    fn test_executor_runs_synchronously() {
        let (_queue, host) = host();
        let ran = Cell::new(false);
        let _promise = P::new(&host, |_, _| {
            ran.set(true);
            Ok(())
        });
        assert!(ran.get());
    }

    #[test]
    fn test_executor_error_rejects() {
        let (_queue, host) = host();
        let promise = P::new(&host, |_, _| Err(Reason::Thrown("executor")));
        assert_eq!(promise.result(), Some(Err(Reason::Thrown("executor"))));
    }

    #[test]
    fn test_executor_error_after_resolve_is_ignored() {
        let (_queue, host) = host();
        let promise = P::new(&host, |resolve, _| {
            resolve.resolve(3.into());
            Err(Reason::Thrown("late"))
        });
        assert_eq!(promise.result(), Some(Ok(3)));
    }

    #[test]
    fn test_first_call_wins() {
        let (_queue, host) = host();
        let promise = P::new(&host, |resolve, reject| {
            reject.reject(Reason::Thrown("first"));
            resolve.resolve(1.into());
            reject.reject(Reason::Thrown("second"));
            Ok(())
        });
        assert_eq!(promise.result(), Some(Err(Reason::Thrown("first"))));
    }

    #[test]
    fn test_latch_holds_while_adopting() {
        let (queue, host) = host();
        let later = Rc::new(RefCell::new(None));
        let slot = later.clone();
        let slow = P::new(&host, move |resolve, _| {
            *slot.borrow_mut() = Some(resolve);
            Ok(())
        });
        let fast = P::resolve(&host, 2.into());
        let promise = P::new(&host, |resolve, reject| {
            resolve.resolve(Resolution::Promise(slow.clone()));
            resolve.resolve(Resolution::Promise(fast.clone()));
            reject.reject(Reason::Thrown("ignored"));
            Ok(())
        });
        queue.run_until_idle();
        assert_eq!(fast.state(), State::Fulfilled);
        assert_eq!(promise.state(), State::Pending);

        let resolve_slow = later.borrow_mut().take().unwrap();
        resolve_slow.resolve(1.into());
        queue.run_until_idle();
        assert_eq!(promise.result(), Some(Ok(1)));
    }

    #[test]
    fn test_then_is_never_synchronous() {
        let (queue, host) = host();
        let promise = P::resolve(&host, 5.into());
        let seen = Rc::new(RefCell::new(vec![]));
        let log = seen.clone();
        let _child = promise.then(
            handler(move |v: i32| {
                log.borrow_mut().push(v);
                Ok(Resolution::Value(v))
            }),
            None,
        );
        assert!(seen.borrow().is_empty());
        assert_eq!(queue.len(), 1);
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![5]);
    }

    #[test]
    fn test_settle_without_continuations_schedules_nothing() {
        let (queue, host) = host();
        let promise = P::resolve(&host, 5.into());
        assert_eq!(promise.state(), State::Fulfilled);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let (_queue, host) = host();
        let promise = P::reject(&host, Reason::Thrown("no"));
        let other = promise.clone();
        assert!(promise.ptr_eq(&other));
        assert_eq!(other.state(), State::Rejected);
        assert!(!promise.ptr_eq(&P::reject(&host, Reason::Thrown("no"))));
    }

    #[test]
    fn test_then_changes_value_type() {
        let (queue, host) = host();
        let promise = P::resolve(&host, 7.into());
        let text = promise.then(handler(|v: i32| Ok(Resolution::Value(v.to_string()))), None);
        let length = text.then(handler(|s: String| Ok(Resolution::Value(s.len()))), None);
        queue.run_until_idle();
        assert_eq!(text.result(), Some(Ok("7".to_string())));
        assert_eq!(length.result(), Some(Ok(1usize)));
    }

    #[test]
    fn test_then_changes_type_of_rejection_passthrough() {
        let (queue, host) = host();
        let promise = P::reject(&host, Reason::Thrown("parse"));
        let text = promise.then(handler(|v: i32| Ok(Resolution::Value(v.to_string()))), None);
        queue.run_until_idle();
        assert_eq!(text.result(), Some(Err(Reason::Thrown("parse"))));
    }

    #[test]
    fn test_settling_ends_adoption_link() {
        let (queue, host) = host();
        let target = P::resolve(&host, 1.into());
        let promise = P::resolve(&host, Resolution::Promise(target));
        assert!(promise.inner.borrow().adopting.is_some());
        queue.run_until_idle();
        assert_eq!(promise.result(), Some(Ok(1)));
        assert!(promise.inner.borrow().adopting.is_none());
    }
}
