use std::fmt;

use crate::addon::AddonId;

/// A logger scoped to one addon and one message.
///
/// `AddonLog` is obtained from `EventCtx::log()` and cannot outlive the
/// context it came from. Every record carries `addon` and `message_id` fields.
#[derive(Debug, Clone, Copy)]
pub struct AddonLog<'a> {
    addon: &'a AddonId,
    message_id: u64,
}

impl<'a> AddonLog<'a> {
    /// This is `pub(crate)`: only `EventCtx` creates loggers.
    pub(crate) fn new(addon: &'a AddonId, message_id: u64) -> Self {
        Self { addon, message_id }
    }

    /// Returns the addon this logger speaks for.
    pub fn addon(&self) -> &AddonId {
        self.addon
    }

    /// Returns the message id stamped on each record.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Logs an info-level message.
    ///
    /// Use with `format_args!`:
    /// ```no_run
    /// # use addon_core::AddonLog;
    /// # fn example(log: &AddonLog, host: &str) {
    /// log.info(format_args!("rewrote host to {}", host));
    /// # }
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(addon = %self.addon, message_id = self.message_id, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(addon = %self.addon, message_id = self.message_id, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(addon = %self.addon, message_id = self.message_id, "{}", args);
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(addon = %self.addon, message_id = self.message_id, "{}", args);
    }

    /// Logs an error-level message together with the error that caused it.
    pub fn error_with(&self, args: fmt::Arguments<'_>, error: &dyn std::error::Error) {
        tracing::error!(
            addon = %self.addon,
            message_id = self.message_id,
            error = %error,
            "{}",
            args
        );
    }
}
