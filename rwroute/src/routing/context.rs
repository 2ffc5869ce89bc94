//! Per-task storage for the active [`RoutingDecision`].
//!
//! Decisions live on a stack so nested units of work restore the enclosing decision
//! when they finish. The stack is held in one of two places:
//!
//! - a tokio task-local frame, installed by [`RoutingContext::scope`]. The frame follows
//!   the logical task across worker threads, and every scope gets its own frame, so
//!   futures joined inside one task cannot observe each other's decisions.
//! - a thread-local fallback for synchronous code that runs outside any routed task
//!   scope (plain threads, `spawn_blocking` closures, [`UnitOfWork::run_blocking`]).
//!
//! Runtime worker threads are shared by unrelated tasks, so async code must declare its
//! decision with [`UnitOfWork::run`] or [`RoutingContext::scope`]. On a thread driven by a
//! tokio runtime, [`RoutingContext::set`] outside any frame is ignored rather than written
//! where the next task on that thread would pick it up.
//!
//! [`UnitOfWork::run`]: crate::routing::UnitOfWork::run
//! [`UnitOfWork::run_blocking`]: crate::routing::UnitOfWork::run_blocking
//!
//! Every operation is a constant-time, lock-free access to storage owned by the
//! calling task or thread.

use std::cell::RefCell;
use std::future::Future;

use tracing::warn;

use super::decision::RoutingDecision;

/// Saved copy of a context's decisions, restored by [`RoutingContext::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DecisionStack(Vec<RoutingDecision>);

impl DecisionStack {
    const fn new() -> Self {
        Self(Vec::new())
    }

    fn top(&self) -> Option<RoutingDecision> {
        self.0.last().copied()
    }

    fn push(&mut self, decision: RoutingDecision) {
        self.0.push(decision);
    }

    fn pop(&mut self) -> Option<RoutingDecision> {
        self.0.pop()
    }

    fn set(&mut self, decision: RoutingDecision) {
        match self.0.last_mut() {
            Some(top) => *top = decision,
            None => self.0.push(decision),
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

tokio::task_local! {
    static TASK_DECISIONS: RefCell<DecisionStack>;
}

thread_local! {
    static THREAD_DECISIONS: RefCell<DecisionStack> = const { RefCell::new(DecisionStack::new()) };
}

fn with_stack<R>(f: impl FnOnce(&mut DecisionStack) -> R) -> R {
    if RoutingContext::is_task_scoped() {
        TASK_DECISIONS.with(|stack| f(&mut stack.borrow_mut()))
    } else {
        THREAD_DECISIONS.with(|stack| f(&mut stack.borrow_mut()))
    }
}

/// Whether a direct write may go to the current storage.
///
/// The thread-local stack of a runtime thread is only writable while a synchronous unit
/// of work on that thread has pushed a frame that it will restore.
fn is_writable() -> bool {
    RoutingContext::is_task_scoped()
        || tokio::runtime::Handle::try_current().is_err()
        || THREAD_DECISIONS.with(|stack| stack.borrow().len() > 0)
}

/// Access point for the routing decision of the calling task.
///
/// With nothing stored, [`RoutingContext::get`] returns [`RoutingDecision::Write`].
pub struct RoutingContext;

impl RoutingContext {
    /// Returns the active decision, or `Write` if none is set.
    pub fn get() -> RoutingDecision {
        with_stack(|stack| stack.top()).unwrap_or_default()
    }

    /// Overwrites the active decision for the calling context.
    ///
    /// Async code outside any unit of work has no per-task storage: on a runtime thread
    /// the call is ignored (with a warning) and the decision stays `Write`.
    pub fn set(decision: RoutingDecision) {
        if !is_writable() {
            warn!(%decision, "RoutingContext::set outside a unit of work on a runtime thread is ignored; use UnitOfWork::run");
            return;
        }
        with_stack(|stack| stack.set(decision));
    }

    /// Removes the active decision, exposing the enclosing one (if any).
    pub fn clear() {
        if !is_writable() {
            return;
        }
        with_stack(|stack| {
            stack.pop();
        });
    }

    pub(crate) fn push(decision: RoutingDecision) {
        with_stack(|stack| stack.push(decision));
    }

    pub(crate) fn pop() -> Option<RoutingDecision> {
        with_stack(|stack| stack.pop())
    }

    /// Copies the calling context's decisions.
    pub(crate) fn snapshot() -> DecisionStack {
        with_stack(|stack| stack.clone())
    }

    /// Puts back decisions saved by [`RoutingContext::snapshot`], whatever happened since.
    pub(crate) fn restore(saved: DecisionStack) {
        with_stack(|stack| *stack = saved);
    }

    /// Number of decisions currently stacked for the calling context.
    pub fn depth() -> usize {
        with_stack(|stack| stack.len())
    }

    /// Whether the caller runs inside a task-local frame installed by [`RoutingContext::scope`].
    pub fn is_task_scoped() -> bool {
        TASK_DECISIONS.try_with(|_| ()).is_ok()
    }

    /// Runs `future` in a fresh task-local frame holding the caller's stack plus `decision`.
    ///
    /// The enclosing stack is captured when this is called. The frame is discarded when the
    /// future completes or is dropped, so the caller's decision is never disturbed.
    pub fn scope<F>(decision: RoutingDecision, future: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let mut stack = with_stack(|stack| stack.clone());
        stack.push(decision);
        TASK_DECISIONS.scope(RefCell::new(stack), future)
    }
}
