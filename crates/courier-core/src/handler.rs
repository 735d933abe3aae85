//! Handler trait and middleware entries.
//!
//! A [`Handler`] observes and may transform a [`Message`]. It continues the
//! chain by awaiting [`Message::next`] itself and may post-process after it
//! returns, so a single handler can act both before and after everything
//! downstream of it:
//!
//! ```ignore
//! fn handle<'a>(&'a self, message: &'a mut RequestMessage) -> BoxFuture<'a, PipelineResult<()>> {
//!     Box::pin(async move {
//!         message.set_header("x-trace", "on")?;   // before
//!         message.next().await?;                   // downstream, I/O included
//!         tracing::info!(url = message.url(), "sent"); // after
//!         Ok(())
//!     })
//! }
//! ```
//!
//! A handler that terminates the chain (by failing, or by being the terminal
//! I/O action) simply does not call `next()` again.
//!
//! Handlers are registered as [`Middleware`] entries, which pair the handler
//! with its [`Stage`] and integer order.

use crate::error::PipelineResult;
use crate::message::{Message, Role};
use crate::stage::{IoDirection, Stage};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A step in a message's middleware chain.
///
/// Implementations must be `Send + Sync` so one instance can be shared by
/// every protocol that registers it.
pub trait Handler<R: Role>: Send + Sync + 'static {
    /// Returns the name of this handler, used in logs and chain inspection.
    fn name(&self) -> &'static str;

    /// Processes the message.
    ///
    /// Call [`Message::next`] to continue the chain. Returning an error
    /// aborts the remainder of the chain and the error becomes the result of
    /// the whole run.
    fn handle<'a>(&'a self, message: &'a mut Message<R>) -> BoxFuture<'a, PipelineResult<()>>;
}

impl<R: Role, H: Handler<R>> Handler<R> for Arc<H> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn handle<'a>(&'a self, message: &'a mut Message<R>) -> BoxFuture<'a, PipelineResult<()>> {
        (**self).handle(message)
    }
}

/// A handler created from a closure.
///
/// Build one with [`handler_fn`].
pub struct FnHandler<F> {
    name: &'static str,
    func: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

impl<R, F> Handler<R> for FnHandler<F>
where
    R: Role,
    F: for<'a> Fn(&'a mut Message<R>) -> BoxFuture<'a, PipelineResult<()>> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(&'a self, message: &'a mut Message<R>) -> BoxFuture<'a, PipelineResult<()>> {
        (self.func)(message)
    }
}

/// Creates a handler from a closure returning a boxed future.
///
/// # Example
///
/// ```
/// use courier_core::{handler_fn, Middleware, RequestMessage};
///
/// let tag = handler_fn("tag", |message: &mut RequestMessage| {
///     Box::pin(async move {
///         message.set_header("x-tag", "courier")?;
///         message.next().await
///     })
/// });
/// let _entry = Middleware::new(tag);
/// ```
pub fn handler_fn<R, F>(name: &'static str, func: F) -> FnHandler<F>
where
    R: Role,
    F: for<'a> Fn(&'a mut Message<R>) -> BoxFuture<'a, PipelineResult<()>> + Send + Sync + 'static,
{
    FnHandler { name, func }
}

/// A registered chain entry: a handler plus its scheduling key.
pub struct Middleware<R: Role> {
    stage: Stage,
    order: i32,
    handler: Arc<dyn Handler<R>>,
}

impl<R: Role> Middleware<R> {
    /// Creates a general middleware ([`Stage::Default`], order 0).
    pub fn new(handler: impl Handler<R>) -> Self {
        Self::with_stage(Stage::Default, 0, handler)
    }

    /// Creates a middleware that runs right before the I/O boundary.
    pub fn before_send(order: i32, handler: impl Handler<R>) -> Self {
        Self::with_stage(Stage::BeforeSend, order, handler)
    }

    /// Creates a middleware with an explicit stage and order.
    pub fn with_stage(stage: Stage, order: i32, handler: impl Handler<R>) -> Self {
        Self::from_arc(stage, order, Arc::new(handler))
    }

    /// Creates a terminal I/O entry.
    pub fn io(direction: IoDirection, handler: impl Handler<R>) -> Self {
        Self::with_stage(direction.stage(), 0, handler)
    }

    /// Creates an entry around an already shared handler.
    #[must_use]
    pub fn from_arc(stage: Stage, order: i32, handler: Arc<dyn Handler<R>>) -> Self {
        Self {
            stage,
            order,
            handler,
        }
    }

    /// Returns the stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the order within the stage.
    #[must_use]
    pub const fn order(&self) -> i32 {
        self.order
    }

    /// Returns the handler name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    /// Returns true if this entry is a terminal I/O hook.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        self.stage.is_io()
    }

    pub(crate) fn sort_key(&self) -> (u8, i32) {
        (self.stage.rank(), self.order)
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler<R>> {
        &self.handler
    }
}

impl<R: Role> Clone for Middleware<R> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            order: self.order,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<R: Role> fmt::Debug for Middleware<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name())
            .field("stage", &self.stage)
            .field("order", &self.order)
            .finish()
    }
}
