//! Bridge from `tracing` events to the [`Logger`] sinks.
//!
//! Every event becomes one record: the `message` field first, remaining
//! fields appended as `key=value`. `tracing` has no PANIC level; fatal
//! records go through [`Logger::panic`] or [`Logger::fatal`].

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::observability::logging::{Level, Logger};

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Layer writing events through a [`Logger`].
#[derive(Debug, Clone)]
pub struct SinkLayer {
    logger: Logger,
}

impl SinkLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    // Filtering stays in on_event: `enabled` would be cached per callsite
    // and ignore later reconfiguration.
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let level = Level::from(*metadata.level());
        if !self.logger.should_log(level) {
            return;
        }

        self.logger.emit_at(
            level,
            metadata.file().unwrap_or_else(|| metadata.target()),
            metadata.line().unwrap_or(0),
            format_args!("{}", visitor.finish()),
        );
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: String,
}

impl RecordVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}
