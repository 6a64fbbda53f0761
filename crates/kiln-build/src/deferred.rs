//! Single-assignment values with synchronous introspection.
//!
//! A [`Deferred`] is created pending and settled exactly once, either resolved
//! with a value or rejected with an error. Settling twice is a caller bug and
//! is reported as [`UsageError::AlreadySettled`] rather than being ignored.
//! Any number of tasks can [`wait`](Deferred::wait) on the same deferred; the
//! settled value is cloned out to each of them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::watch;

use crate::error::{Result, UsageError};

type Slot<T, E> = Option<std::result::Result<T, E>>;

/// A cloneable handle over one shared, settle-once cell.
pub struct Deferred<T, E> {
    tx: Arc<watch::Sender<Slot<T, E>>>,
}

/// Error from [`Deferred::value`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeferredError<E> {
    /// The deferred settled with this error.
    #[error("deferred value rejected: {0}")]
    Rejected(E),

    /// The deferred has not been settled yet.
    #[error("deferred value is not available yet")]
    Pending,
}

/// Result of the unchecked accessor [`Deferred::read`].
pub enum Readiness<T, E> {
    Ready(T),
    Failed(E),
    /// Not settled yet. Await the token to learn when to retry.
    Suspended(Settled),
}

/// Completes once the deferred it was taken from settles (or is abandoned).
pub struct Settled {
    inner: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Settle with a value.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Settle with an error.
    pub fn reject(&self, error: E) -> Result<()> {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: std::result::Result<T, E>) -> Result<()> {
        let mut outcome = Some(outcome);
        let settled = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        });

        if settled {
            Ok(())
        } else {
            Err(UsageError::AlreadySettled.into())
        }
    }

    pub fn is_pending(&self) -> bool {
        self.tx.borrow().is_none()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.tx.borrow(), Some(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(*self.tx.borrow(), Some(Err(_)))
    }

    /// The settled value, the rejection, or [`DeferredError::Pending`].
    ///
    /// Meant for callers that already checked the state; everyone else should
    /// use [`wait`](Self::wait).
    pub fn value(&self) -> std::result::Result<T, DeferredError<E>> {
        match &*self.tx.borrow() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(DeferredError::Rejected(error.clone())),
            None => Err(DeferredError::Pending),
        }
    }

    /// Wait for the deferred to settle and return a clone of the outcome.
    pub async fn wait(&self) -> std::result::Result<T, E> {
        let mut rx = self.tx.subscribe();
        loop {
            {
                let slot = rx.borrow_and_update();
                if let Some(outcome) = slot.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                // `self` keeps the sender alive, so the channel cannot close here.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Unchecked accessor for consumers that suspend instead of erroring.
    pub fn read(&self) -> Readiness<T, E> {
        match &*self.tx.borrow() {
            Some(Ok(value)) => return Readiness::Ready(value.clone()),
            Some(Err(error)) => return Readiness::Failed(error.clone()),
            None => {}
        }
        Readiness::Suspended(self.settled())
    }

    /// A token that completes once this deferred settles.
    pub fn settled(&self) -> Settled {
        let mut rx = self.tx.subscribe();
        Settled {
            inner: Box::pin(async move {
                let _ = rx.wait_for(Option::is_some).await;
            }),
        }
    }

    /// True when both handles point to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.tx.borrow() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl Future for Settled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Settled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Settled")
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Readiness<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Readiness::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
            Readiness::Suspended(_) => f.write_str("Suspended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    type D = Deferred<u32, String>;

    #[test]
    fn test_new_is_pending() {
        let d = D::new();
        assert!(d.is_pending());
        assert!(!d.is_resolved());
        assert!(!d.is_rejected());
        assert_eq!(d.value(), Err(DeferredError::Pending));
    }

    #[test]
    fn test_resolve_then_value() {
        let d = D::new();
        d.resolve(7).unwrap();
        assert!(d.is_resolved());
        assert_eq!(d.value(), Ok(7));
    }

    #[test]
    fn test_reject_then_value() {
        let d = D::new();
        d.reject("nope".to_string()).unwrap();
        assert!(d.is_rejected());
        assert_eq!(d.value(), Err(DeferredError::Rejected("nope".to_string())));
    }

    #[test]
    fn test_second_settle_is_usage_error() {
        let d = D::new();
        d.resolve(1).unwrap();

        let err = d.reject("late".to_string()).unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::AlreadySettled)));
        let err = d.resolve(2).unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::AlreadySettled)));

        // first settlement wins
        assert_eq!(d.value(), Ok(1));
    }

    #[test]
    fn test_clones_share_state() {
        let d = D::new();
        let other = d.clone();
        other.resolve(3).unwrap();
        assert!(d.is_resolved());
        assert!(d.ptr_eq(&other));
        assert!(!d.ptr_eq(&D::new()));
    }

    #[tokio::test]
    async fn test_many_waiters_see_the_same_value() {
        let d = D::new();
        let a = tokio::spawn({
            let d = d.clone();
            async move { d.wait().await }
        });
        let b = tokio::spawn({
            let d = d.clone();
            async move { d.wait().await }
        });

        tokio::task::yield_now().await;
        d.resolve(42).unwrap();

        assert_eq!(a.await.unwrap(), Ok(42));
        assert_eq!(b.await.unwrap(), Ok(42));
        // waiting again after settlement returns immediately
        assert_eq!(d.wait().await, Ok(42));
    }

    #[tokio::test]
    async fn test_read_suspends_until_settled() {
        let d = D::new();
        let token = match d.read() {
            Readiness::Suspended(token) => token,
            other => panic!("expected Suspended, got {other:?}"),
        };

        let settle = d.clone();
        tokio::spawn(async move {
            settle.reject("broken".to_string()).unwrap();
        });
        token.await;

        assert!(matches!(d.read(), Readiness::Failed(e) if e == "broken"));
    }

    #[test]
    fn test_unawaited_deferred_is_harmless() {
        let d = D::new();
        d.reject("nobody listens".to_string()).unwrap();
        drop(d);
    }
}
