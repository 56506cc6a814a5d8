//! Deferred execution.
//!
//! Promises never run continuations on the stack that settled them or that
//! registered them. Every piece of deferred work goes through a
//! [`Scheduler`], which only has to promise one thing: the task runs later,
//! after the current synchronous execution has unwound.
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;
use tracing::{debug, warn};

use crate::Config;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Host-provided "run this later" capability.
///
/// Implementations must never run `task` before `defer` returns, and tasks
/// deferred from the same call stack must run in the order they were
/// deferred.
pub trait Scheduler {
    fn defer(&self, task: Task);
}

/// A manually driven FIFO of tasks.
///
/// Nothing runs until the owner calls [`TaskQueue::run_until_idle`] or
/// [`TaskQueue::run_once`], which makes it the natural scheduler for
/// deterministic tests and for embedding in a host event loop.
///
/// A queued task usually owns a promise, and every promise owns a [`Host`]
/// pointing back at this queue. Dropping the last handle while tasks are
/// still queued therefore leaks them; run the queue dry or call
/// [`TaskQueue::clear`] first.
///
/// # Examples
///
/// ```
/// use promise_then::{handler, Error, Host, Promise, Resolution, State, TaskQueue};
/// let queue = TaskQueue::new();
/// let host = Host::new(queue.clone());
/// let promise = Promise::<i32, Error>::resolve(&host, 7.into());
/// assert_eq!(promise.state(), State::Fulfilled);
/// let doubled = promise.then(handler(|v: i32| Ok(Resolution::Value(v * 2))), None);
/// assert_eq!(doubled.state(), State::Pending);
/// queue.run_until_idle();
/// assert_eq!(doubled.result(), Some(Ok(14)));
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the oldest task. Returns `false` if there was nothing to run.
    pub fn run_once(&self) -> bool {
        // The borrow must end before the task runs: tasks defer more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including those deferred while running, until the queue
    /// is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }

    /// Drops every queued task without running it. Returns how many were
    /// dropped.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut *self.tasks.borrow_mut());
        let count = dropped.len();
        // Tasks may own the last handle to this queue; drop them unborrowed.
        drop(dropped);
        if count > 0 {
            debug!(count, "dropped queued tasks");
        }
        count
    }
}

impl Scheduler for TaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("pending", &self.len()).finish()
    }
}

/// Runs deferred work as tasks of a `futures` [`LocalPool`](futures::executor::LocalPool).
impl Scheduler for LocalSpawner {
    fn defer(&self, task: Task) {
        if let Err(err) = self.spawn_local(async move { task() }) {
            warn!(%err, "local pool refused deferred promise work");
        }
    }
}

/// The scheduler and configuration a family of promises runs on.
///
/// Promises created through `then` inherit the host of their parent.
#[derive(Clone)]
pub struct Host {
    scheduler: Rc<dyn Scheduler>,
    config: Config,
}

impl Host {
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self::with_config(scheduler, Config::default())
    }

    pub fn with_config(scheduler: impl Scheduler + 'static, config: Config) -> Self {
        Self {
            scheduler: Rc::new(scheduler),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn defer(&self, task: Task) {
        self.scheduler.defer(task)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_queue_is_fifo_and_deferred() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(vec![]));
        for i in 0..3 {
            let log = log.clone();
            queue.defer(Box::new(move || log.borrow_mut().push(i)));
        }
        assert!(log.borrow().is_empty());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(!queue.run_once());
    }

    #[test]
    fn test_task_queue_runs_nested_deferrals() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(vec![]));
        let (inner_queue, inner_log) = (queue.clone(), log.clone());
        queue.defer(Box::new(move || {
            inner_log.borrow_mut().push("outer");
            let log = inner_log.clone();
            inner_queue.defer(Box::new(move || log.borrow_mut().push("inner")));
        }));
        assert_eq!(queue.run_until_idle(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_clear_drops_tasks_and_their_captures() {
        let queue = TaskQueue::new();
        let host = Host::new(queue.clone());
        let captured = Rc::new(());
        let weak = Rc::downgrade(&captured);
        let promise = crate::Promise::<i32, crate::Error>::new(&host, |_, _| Ok(()));
        let tasks = queue.clone();
        host.defer(Box::new(move || {
            let _keep = (captured, promise, tasks);
        }));
        drop(host);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert!(weak.upgrade().is_none());
        assert!(!queue.run_once());
    }

    #[test]
    fn test_local_spawner_defers() {
        let mut pool = futures::executor::LocalPool::new();
        let host = Host::new(pool.spawner());
        let hit = Rc::new(RefCell::new(false));
        let flag = hit.clone();
        host.defer(Box::new(move || *flag.borrow_mut() = true));
        assert!(!*hit.borrow());
        pool.run_until_stalled();
        assert!(*hit.borrow());
    }
}
