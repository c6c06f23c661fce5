//! Request-scoped values and the cancellation scope of a connection.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Immutable set of typed values plus a cancellation scope.
///
/// Values are keyed by their type. [`Context::with_value`] returns a new
/// context and never mutates the one it was called on, so a context can be
/// shared freely between a connection, its worker and handler callbacks.
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct Username(String);
///
/// let ctx = Context::new().with_value(Username("ada".into()));
/// assert_eq!(ctx.value::<Username>().map(|u| u.0.as_str()), Some("ada"));
/// ```
#[derive(Clone, Default)]
pub struct Context {
    values: Arc<Values>,
    cancel: CancellationToken,
}

impl Context {
    /// Create an empty context with a fresh cancellation scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty context bound to an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            values: Arc::default(),
            cancel,
        }
    }

    /// Returns a new context holding `value` in addition to the current values.
    ///
    /// A value of the same type already present is shadowed.
    #[must_use]
    pub fn with_value<T>(&self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut values = Values::clone(&self.values);
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            values: Arc::new(values),
            cancel: self.cancel.clone(),
        }
    }

    /// Borrow the value of type `T`, if present.
    #[must_use]
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns a context with the same values and a child cancellation scope.
    ///
    /// Cancelling the child does not cancel `self`; cancelling `self`
    /// cancels the child.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            values: Arc::clone(&self.values),
            cancel: self.cancel.child_token(),
        }
    }

    /// Cancel this scope and every child scope.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once this scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when this scope is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The underlying cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
