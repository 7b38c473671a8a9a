//! Injected logger handle
//!
//! Servers and middleware log through a [`Logger`] they were given rather
//! than through whatever subscriber happens to be global, so tests and
//! embedders can route each component's events to their own subscriber.

use std::borrow::Cow;
use std::fmt;

use tracing::Dispatch;

/// A tracing dispatcher paired with the module name stamped on every event
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    module: Cow<'static, str>,
}

impl Logger {
    /// Logger writing to `dispatch`
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            module: Cow::Borrowed("ferrule"),
        }
    }

    /// Logger bound to the dispatcher that is current on this thread
    pub fn current() -> Self {
        Self::new(tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Same dispatcher, different module name
    pub fn with_module(&self, module: impl Into<Cow<'static, str>>) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
            module: module.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run `f` with this logger's dispatcher as the default
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.in_scope(|| tracing::debug!(module = %self.module, "{}", message));
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.in_scope(|| tracing::info!(module = %self.module, "{}", message));
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.in_scope(|| tracing::warn!(module = %self.module, "{}", message));
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.in_scope(|| tracing::error!(module = %self.module, "{}", message));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::Logger;

    /// Logger that records formatted output in memory
    #[derive(Clone, Default)]
    pub struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub fn logger(&self) -> Logger {
            let sink = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish();
            Logger::new(tracing::Dispatch::new(subscriber))
        }

        pub fn contents(&self) -> String {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Captured;

    #[test]
    fn test_events_go_to_injected_dispatcher() {
        let captured = Captured::default();
        let logger = captured.logger().with_module("http");

        logger.info("[HTTP] server listening on: :8000");
        logger.warn(format_args!("slow request {}", 42));

        let out = captured.contents();
        assert!(out.contains("server listening on: :8000"));
        assert!(out.contains("module=http"));
        assert!(out.contains("slow request 42"));
    }

    #[test]
    fn test_module_name_defaults() {
        let captured = Captured::default();
        assert_eq!(captured.logger().module(), "ferrule");
    }
}
