//! Ambient session binding for the current unit of work.
//!
//! Two bindings exist side by side:
//! - a tokio task-local, set for the duration of a future by
//!   [`SessionContext::scope`];
//! - a thread-local, set by [`SessionContext::bind`] for synchronous code
//!   running on a worker thread and released when the guard drops.
//!
//! A thread binding belongs to the tokio task that made it (or to no task,
//! on a plain thread). Other tasks polled on the same thread, as happens on
//! a current-thread runtime or a `LocalSet`, never see it.
//!
//! Tokio does not carry task-locals into spawned tasks or blocking threads.
//! Use [`spawn_in_session`] and [`spawn_blocking_in_session`] to hand the
//! current binding to a child explicitly.

use std::{cell::RefCell, future::Future, marker::PhantomData};

use tokio::task::{self, JoinHandle};

use crate::SessionId;

tokio::task_local! {
    static TASK_SESSION: SessionId;
}

thread_local! {
    static THREAD_SESSION: RefCell<ThreadBindings> = const {
        RefCell::new(ThreadBindings {
            next_key: 0,
            stack: Vec::new(),
        })
    };
}

#[derive(Debug)]
struct ThreadBinding {
    key: u64,
    owner: Option<task::Id>,
    session_id: SessionId,
}

/// Bindings made on this thread, innermost last.
#[derive(Debug)]
struct ThreadBindings {
    next_key: u64,
    stack: Vec<ThreadBinding>,
}

impl ThreadBindings {
    fn push(&mut self, owner: Option<task::Id>, session_id: SessionId) -> u64 {
        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);
        self.stack.push(ThreadBinding {
            key,
            owner,
            session_id,
        });
        key
    }

    fn remove(&mut self, key: u64) {
        if let Some(pos) = self.stack.iter().rposition(|b| b.key == key) {
            self.stack.remove(pos);
        }
    }

    fn innermost(&self, owner: Option<task::Id>) -> Option<SessionId> {
        self.stack
            .iter()
            .rev()
            .find(|b| b.owner == owner)
            .map(|b| b.session_id.clone())
    }
}

/// Accessors for the ambient session slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionContext;

impl SessionContext {
    /// Run `future` with `session_id` bound for everything it awaits.
    ///
    /// The binding ends when the future completes, is cancelled or panics.
    pub async fn scope<F>(session_id: impl Into<SessionId>, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_SESSION.scope(session_id.into(), future).await
    }

    /// Bind `session_id` on the current thread until the guard drops.
    ///
    /// Meant for synchronous code. The binding is visible only to the task
    /// (or plain thread) that made it.
    pub fn bind(session_id: impl Into<SessionId>) -> SessionGuard {
        let session_id = session_id.into();
        let key = THREAD_SESSION.with(|slot| slot.borrow_mut().push(task::try_id(), session_id));
        SessionGuard {
            key,
            _not_send: PhantomData,
        }
    }

    /// Release a binding made by [`SessionContext::bind`].
    pub fn unbind(guard: SessionGuard) {
        drop(guard);
    }

    /// Session bound to the current unit of work, if any.
    ///
    /// A thread binding made by this unit of work is the innermost scope, so
    /// it takes precedence over the task binding.
    #[must_use]
    pub fn current() -> Option<SessionId> {
        let owner = task::try_id();
        THREAD_SESSION
            .try_with(|slot| slot.borrow().innermost(owner))
            .ok()
            .flatten()
            .or_else(|| TASK_SESSION.try_with(Clone::clone).ok())
    }

    /// Wrap a closure so that it runs with the current binding re-established.
    ///
    /// Useful for `std::thread::spawn` or thread pools outside tokio.
    pub fn propagate<F, R>(f: F) -> impl FnOnce() -> R + Send + 'static
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let session_id = Self::current();
        move || {
            let _guard = session_id.map(Self::bind);
            f()
        }
    }
}

/// Token returned by [`SessionContext::bind`].
///
/// Dropping it releases the binding, including on unwinding; whatever was
/// bound before becomes visible again.
#[must_use = "dropping the guard immediately unbinds the session"]
#[derive(Debug)]
pub struct SessionGuard {
    key: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let key = self.key;
        let _ = THREAD_SESSION.try_with(|slot| slot.borrow_mut().remove(key));
    }
}

/// Spawn a task that inherits the current session binding.
pub fn spawn_in_session<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match SessionContext::current() {
        Some(session_id) => tokio::spawn(TASK_SESSION.scope(session_id, future)),
        None => tokio::spawn(future),
    }
}

/// Run blocking code on tokio's blocking pool with the current binding.
pub fn spawn_blocking_in_session<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(SessionContext::propagate(f))
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn test_current_is_absent_outside_scope() {
        assert_eq!(SessionContext::current(), None);
    }

    #[test]
    fn test_bind_unbind_restores_previous() {
        let outer = SessionContext::bind("outer");
        assert_eq!(SessionContext::current().as_deref(), Some("outer"));

        let inner = SessionContext::bind("inner");
        assert_eq!(SessionContext::current().as_deref(), Some("inner"));

        SessionContext::unbind(inner);
        assert_eq!(SessionContext::current().as_deref(), Some("outer"));

        SessionContext::unbind(outer);
        assert_eq!(SessionContext::current(), None);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = SessionContext::bind("doomed");
            panic!("work failed");
        }));
        assert!(result.is_err());
        assert_eq!(SessionContext::current(), None);
    }

    #[test]
    fn test_thread_binding_not_visible_to_other_threads() {
        let _guard = SessionContext::bind("main");
        let seen = std::thread::spawn(SessionContext::current).join().unwrap();
        assert_eq!(seen, None);
    }

    #[test]
    fn test_propagate_carries_binding_to_thread() {
        let _guard = SessionContext::bind("s1");
        let seen = std::thread::spawn(SessionContext::propagate(SessionContext::current))
            .join()
            .unwrap();
        assert_eq!(seen.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_scope_binds_and_ends() {
        let seen = SessionContext::scope("s1", async { SessionContext::current() }).await;
        assert_eq!(seen.as_deref(), Some("s1"));
        assert_eq!(SessionContext::current(), None);
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let a = SessionContext::scope("a", async {
            for _ in 0..10 {
                tokio::task::yield_now().await;
                assert_eq!(SessionContext::current().as_deref(), Some("a"));
            }
        });
        let b = SessionContext::scope("b", async {
            for _ in 0..10 {
                tokio::task::yield_now().await;
                assert_eq!(SessionContext::current().as_deref(), Some("b"));
            }
        });
        tokio::join!(a, b);
    }

    #[tokio::test]
    async fn test_spawn_in_session_inherits() {
        let handle = SessionContext::scope("parent", async {
            spawn_in_session(async { SessionContext::current() })
        })
        .await;
        assert_eq!(handle.await.unwrap().as_deref(), Some("parent"));
    }

    #[tokio::test]
    async fn test_plain_spawn_does_not_inherit() {
        let handle =
            SessionContext::scope("parent", async { tokio::spawn(async { SessionContext::current() }) })
                .await;
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_spawn_blocking_in_session_inherits() {
        let seen = SessionContext::scope("worker", async {
            spawn_blocking_in_session(SessionContext::current).await.unwrap()
        })
        .await;
        assert_eq!(seen.as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn test_spawn_without_binding_stays_absent() {
        let seen = spawn_in_session(async { SessionContext::current() }).await.unwrap();
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn test_bind_inside_scope_restores_scope() {
        SessionContext::scope("s1", async {
            let guard = SessionContext::bind("inner");
            assert_eq!(SessionContext::current().as_deref(), Some("inner"));
            drop(guard);
            assert_eq!(SessionContext::current().as_deref(), Some("s1"));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_thread_binding_stays_with_its_task() {
        let guard = SessionContext::bind("a");

        let scoped = tokio::spawn(SessionContext::scope("b", async { SessionContext::current() }));
        let plain = tokio::spawn(async { SessionContext::current() });

        assert_eq!(scoped.await.unwrap().as_deref(), Some("b"));
        assert_eq!(plain.await.unwrap(), None);
        assert_eq!(SessionContext::current().as_deref(), Some("a"));
        drop(guard);
        assert_eq!(SessionContext::current(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_local_task_binding_not_seen_by_siblings() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (bound_tx, bound_rx) = tokio::sync::oneshot::channel();
                let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

                let holder = tokio::task::spawn_local(async move {
                    let _guard = SessionContext::bind("a");
                    let _ = bound_tx.send(());
                    let _ = release_rx.await;
                    SessionContext::current()
                });
                bound_rx.await.unwrap();

                let sibling = tokio::task::spawn_local(SessionContext::scope("b", async {
                    SessionContext::current()
                }));
                assert_eq!(sibling.await.unwrap().as_deref(), Some("b"));

                release_tx.send(()).unwrap();
                assert_eq!(holder.await.unwrap().as_deref(), Some("a"));
            })
            .await;
    }

    #[test]
    fn test_out_of_order_release() {
        let first = SessionContext::bind("first");
        let second = SessionContext::bind("second");

        drop(first);
        assert_eq!(SessionContext::current().as_deref(), Some("second"));
        drop(second);
        assert_eq!(SessionContext::current(), None);
    }
}
