//! Bus Tasks
//!
//! A task pairs a device address with a type-erased job: the action that
//! talks to the device and the handler that receives its result. The worker
//! only sees `Job<C>`, so tasks with different result types share one queue.

use std::fmt;

use crate::error::{BusError, BusResult};

/// Work the bus worker can run against a client of type `C`
pub(crate) trait Job<C>: Send {
    /// Run the action once; the produced value is kept for `finish`
    fn attempt(&mut self, client: &mut C) -> BusResult<()>;

    /// Hand the final outcome to the result handler
    fn finish(self: Box<Self>, outcome: BusResult<()>);
}

/// Closure-backed job: `action` runs on the worker, `handler` on a
/// result thread
pub(crate) struct Action<T, A, H> {
    action: A,
    handler: H,
    output: Option<T>,
}

impl<T, A, H> Action<T, A, H> {
    pub(crate) fn new<C>(action: A, handler: H) -> Self
    where
        A: FnMut(&mut C) -> BusResult<T>,
        H: FnOnce(BusResult<T>),
    {
        Self {
            action,
            handler,
            output: None,
        }
    }
}

impl<C, T, A, H> Job<C> for Action<T, A, H>
where
    T: Send,
    A: FnMut(&mut C) -> BusResult<T> + Send,
    H: FnOnce(BusResult<T>) + Send,
{
    fn attempt(&mut self, client: &mut C) -> BusResult<()> {
        self.output = Some((self.action)(client)?);
        Ok(())
    }

    fn finish(self: Box<Self>, outcome: BusResult<()>) {
        let Action {
            handler, output, ..
        } = *self;
        let result = outcome.and_then(|()| {
            output.ok_or_else(|| BusError::Other("Action produced no result".to_string()))
        });
        handler(result);
    }
}

/// One queued hardware operation
pub(crate) struct Task<C> {
    pub(crate) unit: u8,
    pub(crate) tries: u8,
    pub(crate) job: Box<dyn Job<C>>,
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("unit", &self.unit)
            .field("tries", &self.tries)
            .finish_non_exhaustive()
    }
}
