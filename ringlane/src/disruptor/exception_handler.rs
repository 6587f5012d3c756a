//! Policies for errors returned by event handlers.

use tracing::{ error, warn };

use crate::error::{ HandlerError, Result, RinglaneError };

/// Decides what a processor does when its handler fails.
///
/// Returning `Ok` skips the failed entry and carries on with the next one.
/// Returning `Err` stops the processor; the error comes back out of `run`.
pub trait ExceptionHandler<T>: Send + Sync {
    fn handle(&self, error: HandlerError, sequence: i64, data: &T) -> Result<()>;
}

/// Default policy: log at error level and stop the processor.
///
/// Replaying an entry against handler state that may have been half-updated
/// is not safe without the handler's help, so nothing is retried.
#[derive(Debug, Default, Clone, Copy)]
pub struct FatalExceptionHandler;

impl<T> ExceptionHandler<T> for FatalExceptionHandler {
    fn handle(&self, err: HandlerError, sequence: i64, _data: &T) -> Result<()> {
        error!(sequence, error = %err, "Exception processing event");
        Err(RinglaneError::handler_fault(sequence, err))
    }
}

/// Log the failure and move on to the next entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreExceptionHandler;

impl<T> ExceptionHandler<T> for IgnoreExceptionHandler {
    fn handle(&self, err: HandlerError, sequence: i64, _data: &T) -> Result<()> {
        warn!(sequence, error = %err, "Exception processing event, skipping");
        Ok(())
    }
}
