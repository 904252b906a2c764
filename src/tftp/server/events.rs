//! Transfer event reporting
//!
//! Every server event is written once to the `log` facade and, if the
//! embedding application installed one, forwarded to a [`LogSink`] so a UI
//! can show transfer activity as it happens.

use std::fmt;
use std::sync::Arc;

use log::Level;

/// Receiver of human-readable server events
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str, level: Level);
}

impl<F> LogSink for F
where
    F: Fn(&str, Level) + Send + Sync,
{
    fn log(&self, message: &str, level: Level) {
        self(message, level)
    }
}

/// Cheaply clonable handle shared by the dispatcher and every session
#[derive(Clone, Default)]
pub struct EventLog {
    sink: Option<Arc<dyn LogSink>>,
}

impl EventLog {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn emit(&self, level: Level, message: &str) {
        log::log!(target: "tinytftp", level, "{}", message);
        if let Some(sink) = &self.sink {
            sink.log(message, level);
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(Level::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(Level::Error, message.as_ref());
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
