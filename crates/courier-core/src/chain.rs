//! The cursor-based pipeline engine.
//!
//! A [`Chain`] keeps the registered middlewares and, for the run in
//! progress, the planned execution order plus a cursor. The cursor starts
//! "before the first element"; every advance moves it by one and hands out
//! the handler at the new position. Running past the end yields nothing,
//! which ends the run successfully.
//!
//! Planning happens once at the start of each run and never mid-run: the
//! registered middlewares and the run's I/O hook are stably sorted by
//! `(stage rank, order)` and the I/O entries are counted. Exactly one is
//! required.

use crate::error::{PipelineError, PipelineResult};
use crate::handler::{Handler, Middleware};
use crate::message::Role;
use crate::stage::IoDirection;
use std::fmt;
use std::sync::Arc;

/// Ordered middlewares of one message plus the cursor of the current run.
pub struct Chain<R: Role> {
    registered: Vec<Middleware<R>>,
    plan: Vec<Arc<dyn Handler<R>>>,
    cursor: Option<usize>,
}

impl<R: Role> Default for Chain<R> {
    fn default() -> Self {
        Self {
            registered: Vec::new(),
            plan: Vec::new(),
            cursor: None,
        }
    }
}

impl<R: Role> Chain<R> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware. `None` is skipped silently.
    pub fn add(&mut self, middleware: impl Into<Option<Middleware<R>>>) {
        if let Some(middleware) = middleware.into() {
            self.registered.push(middleware);
        }
    }

    /// Appends every present middleware in iteration order.
    pub fn extend<I, M>(&mut self, middlewares: I)
    where
        I: IntoIterator<Item = M>,
        M: Into<Option<Middleware<R>>>,
    {
        for middleware in middlewares {
            self.add(middleware);
        }
    }

    /// Returns the registered middlewares in registration order.
    #[must_use]
    pub fn registered(&self) -> &[Middleware<R>] {
        &self.registered
    }

    /// Returns the number of registered middlewares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Returns the handler names of the most recent plan, in execution order.
    #[must_use]
    pub fn planned_names(&self) -> Vec<&'static str> {
        self.plan.iter().map(|handler| handler.name()).collect()
    }

    /// Plans a run: sorts the registered entries plus `io` and resets the cursor.
    ///
    /// Fails before anything executes when the plan does not contain exactly
    /// one I/O entry.
    pub(crate) fn prepare(
        &mut self,
        io: Option<Middleware<R>>,
        direction: IoDirection,
    ) -> PipelineResult<()> {
        let mut entries: Vec<&Middleware<R>> = self.registered.iter().chain(io.as_ref()).collect();

        match entries.iter().filter(|entry| entry.is_io()).count() {
            0 => {
                return Err(PipelineError::MissingIoHandler {
                    kind: R::KIND,
                    direction,
                })
            }
            1 => {}
            count => return Err(PipelineError::MultipleIoHandlers { count }),
        }

        // slice::sort_by_key is stable: equal keys keep registration order.
        entries.sort_by_key(|entry| entry.sort_key());
        self.plan = entries
            .into_iter()
            .map(|entry| Arc::clone(entry.handler()))
            .collect();
        self.cursor = None;

        tracing::trace!(
            kind = %R::KIND,
            handlers = ?self.planned_names(),
            "Pipeline planned"
        );
        Ok(())
    }

    /// Moves the cursor forward and returns the handler at the new position.
    pub(crate) fn advance(&mut self) -> Option<Arc<dyn Handler<R>>> {
        let next = self
            .cursor
            .map_or(0, |cursor| cursor + 1)
            .min(self.plan.len());
        self.cursor = Some(next);
        self.plan.get(next).cloned()
    }

    /// Returns the cursor position, `None` meaning "before the first handler".
    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }
}

impl<R: Role> fmt::Debug for Chain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("registered", &self.registered)
            .field("plan", &self.planned_names())
            .field("cursor", &self.cursor)
            .finish()
    }
}
