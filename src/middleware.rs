//! Ordered transform/reject stages run on a freshly upgraded connection.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::connection::{Connection, DEFAULT_CLOSE_TIMEOUT};
use crate::error::{BoxError, Error, Result};

/// A single stage of the upgrade pipeline.
///
/// A stage returns the connection to hand to the next stage, typically the
/// same connection re-bound to a context carrying derived values, or rejects
/// the connection with an error.
///
/// Implemented for closures `Fn(&Connection) -> Result<Connection, BoxError>`.
pub trait Middleware: Send + Sync + 'static {
    /// Transform or reject `conn`.
    fn apply(&self, conn: &Connection) -> std::result::Result<Connection, BoxError>;
}

impl<F> Middleware for F
where
    F: Fn(&Connection) -> std::result::Result<Connection, BoxError> + Send + Sync + 'static,
{
    fn apply(&self, conn: &Connection) -> std::result::Result<Connection, BoxError> {
        self(conn)
    }
}

/// An ordered list of [`Middleware`] stages.
///
/// Cloning a chain is cheap; stages are shared.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn with(mut self, stage: impl Middleware) -> Self {
        self.push(stage);
        self
    }

    /// Append a stage in place.
    pub fn push(&mut self, stage: impl Middleware) {
        self.stages.push(Arc::new(stage));
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    ///
    /// On rejection the remaining stages are skipped and the connection is
    /// closed before the error is returned.
    ///
    /// # Errors
    ///
    /// - `Error::MiddlewareFailed` carrying the stage's error
    /// - `Error::ConnectionCloseError` if closing the rejected connection also failed
    pub async fn apply(&self, conn: Connection) -> Result<Connection> {
        let mut conn = conn;
        for (index, stage) in self.stages.iter().enumerate() {
            match stage.apply(&conn) {
                Ok(next) => conn = next,
                Err(err) => {
                    debug!(stage = index, error = %err, "middleware rejected connection");
                    let cause = Error::MiddlewareFailed(err.to_string());
                    return Err(conn.close_with_cause(cause, DEFAULT_CLOSE_TIMEOUT).await);
                }
            }
        }
        Ok(conn)
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}
