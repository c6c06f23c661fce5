//! A long-lived upgrade front end shared by every incoming connection.

use std::fmt;
use std::sync::Arc;

use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::Config;
use crate::context::Context;
use crate::error::Result;
use crate::handler::SocketFactory;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::upgrade::{self, Upgrader};
use crate::worker::Worker;

/// Holds everything needed to turn requests into running workers.
///
/// Every worker created by a manager runs in a child scope of the manager's
/// context, so [`shutdown`](Self::shutdown) terminates all of them with
/// `Error::Cancelled`.
///
/// ## Example
///
/// ```rust,ignore
/// let manager = Manager::new(TungsteniteUpgrader::new(), factory, Config::keepalive(ping, pong))
///     .with_middleware(authenticate)
///     .with_response_header(HeaderName::from_static("x-server"), HeaderValue::from_static("chat"));
///
/// while let Ok((stream, _)) = listener.accept().await {
///     manager.serve(stream);
/// }
///
/// manager.shutdown();
/// manager.wait().await;
/// ```
pub struct Manager<U, F> {
    upgrader: Arc<U>,
    factory: Arc<F>,
    config: Arc<Config>,
    middlewares: MiddlewareChain,
    response_headers: Arc<HeaderMap>,
    ctx: Context,
    tracker: TaskTracker,
}

impl<U, F> Manager<U, F>
where
    F: SocketFactory,
{
    /// Create a manager.
    pub fn new(upgrader: U, factory: F, config: Config) -> Self {
        Self {
            upgrader: Arc::new(upgrader),
            factory: Arc::new(factory),
            config: Arc::new(config),
            middlewares: MiddlewareChain::new(),
            response_headers: Arc::new(HeaderMap::new()),
            ctx: Context::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Append a middleware stage.
    #[must_use]
    pub fn with_middleware(mut self, stage: impl Middleware) -> Self {
        self.middlewares.push(stage);
        self
    }

    /// Add a header to every handshake response.
    #[must_use]
    pub fn with_response_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        Arc::make_mut(&mut self.response_headers).append(name, value);
        self
    }

    /// Use `ctx` as the base context of every connection.
    #[must_use]
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// The base context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Upgrade `request` in the base context.
    ///
    /// # Errors
    ///
    /// See [`upgrade::upgrade`].
    pub async fn upgrade<R>(&self, request: R) -> Result<Worker<F::Handler>>
    where
        U: Upgrader<R>,
    {
        self.upgrade_with_context(request, self.ctx.clone()).await
    }

    /// Upgrade `request` in `ctx`, typically `self.context().with_value(..)`.
    ///
    /// # Errors
    ///
    /// See [`upgrade::upgrade`].
    pub async fn upgrade_with_context<R>(&self, request: R, ctx: Context) -> Result<Worker<F::Handler>>
    where
        U: Upgrader<R>,
    {
        upgrade::upgrade(
            request,
            ctx,
            self.upgrader.as_ref(),
            &self.response_headers,
            self.factory.as_ref(),
            Arc::clone(&self.config),
            &self.middlewares,
        )
        .await
    }

    /// Upgrade and run `request` on a tracked task, logging the outcome.
    pub fn serve<R>(&self, request: R)
    where
        U: Upgrader<R>,
        R: Send + 'static,
    {
        let upgrader = Arc::clone(&self.upgrader);
        let factory = Arc::clone(&self.factory);
        let config = Arc::clone(&self.config);
        let middlewares = self.middlewares.clone();
        let response_headers = Arc::clone(&self.response_headers);
        let ctx = self.ctx.clone();

        self.tracker.spawn(async move {
            let worker = match upgrade::upgrade(
                request,
                ctx,
                upgrader.as_ref(),
                &response_headers,
                factory.as_ref(),
                config,
                &middlewares,
            )
            .await
            {
                Ok(worker) => worker,
                Err(err) => {
                    warn!(error = %err, "upgrade failed");
                    return;
                }
            };

            let cause = worker.run().await;
            if cause.is_disconnect() {
                debug!(cause = %cause, "connection finished");
            } else {
                warn!(cause = %cause, "connection failed");
            }
        });
    }

    /// Number of served connections still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel the base context, terminating every worker created from it.
    pub fn shutdown(&self) {
        debug!(active = self.tracker.len(), "shutting down");
        self.ctx.cancel();
    }

    /// Wait until every served connection has finished.
    ///
    /// No further connections should be served afterwards.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl<U, F> fmt::Debug for Manager<U, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("middlewares", &self.middlewares)
            .field("response_headers", &self.response_headers)
            .field("ctx", &self.ctx)
            .field("active", &self.tracker.len())
            .finish()
    }
}
