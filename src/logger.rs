//! Diagnostic logging collaborator.
//!
//! Layers never log through global state. Each configuration carries a
//! [`LogHandle`]; the default handle discards everything.

use std::fmt;
use std::sync::Arc;

/// Sink for diagnostic messages.
pub trait Logger: Send + Sync {
    /// Record a debug message.
    fn debug(&self, message: &str);

    /// Whether messages are wanted at all. Formatting is skipped when false.
    fn enabled(&self) -> bool {
        true
    }
}

/// Logger that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}

    fn enabled(&self) -> bool {
        false
    }
}

/// Logger that forwards to `tracing::debug!`.
#[cfg(feature = "tracing-support")]
#[cfg_attr(docsrs, doc(cfg(feature = "tracing-support")))]
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

#[cfg(feature = "tracing-support")]
impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "voltage_iec61850", "{}", message);
    }
}

/// Cloneable, shareable handle to a [`Logger`].
#[derive(Clone)]
pub struct LogHandle {
    inner: Arc<dyn Logger>,
}

impl LogHandle {
    /// Wrap a logger.
    pub fn new(logger: impl Logger + 'static) -> Self {
        Self {
            inner: Arc::new(logger),
        }
    }

    /// Handle that discards everything.
    pub fn noop() -> Self {
        Self::new(NoopLogger)
    }

    /// Format and record a debug message.
    ///
    /// ```rust,ignore
    /// log.debug(format_args!("negotiated TPDU size {}", size));
    /// ```
    #[inline]
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        if self.inner.enabled() {
            match args.as_str() {
                Some(s) => self.inner.debug(s),
                None => self.inner.debug(&args.to_string()),
            }
        }
    }
}

impl Default for LogHandle {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("enabled", &self.inner.enabled())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Logger that keeps every message for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct CollectingLogger {
        pub(crate) messages: Mutex<Vec<String>>,
    }

    impl Logger for CollectingLogger {
        fn debug(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_noop_handle_is_disabled() {
        let handle = LogHandle::default();
        handle.debug(format_args!("dropped {}", 1));
        assert_eq!(format!("{:?}", handle), "LogHandle { enabled: false }");
    }

    #[test]
    fn test_collecting_logger() {
        let logger = Arc::new(CollectingLogger::default());
        let handle = LogHandle {
            inner: logger.clone(),
        };

        handle.debug(format_args!("static"));
        handle.debug(format_args!("value {}", 42));

        let messages = logger.messages.lock().unwrap();
        assert_eq!(*messages, vec!["static".to_string(), "value 42".to_string()]);
    }
}
