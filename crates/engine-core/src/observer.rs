use model::events::{StepFields, StepStatus};
use std::sync::Mutex;
use tracing::{Level, error, info, span, warn};

/// Receives lifecycle notifications for pipeline steps (fetch, process, push).
pub trait StepObserver: Send + Sync {
    fn on_step_start(&self, name: &str);
    fn on_step_update(&self, fields: &StepFields);
    fn on_step_end(&self, status: &StepStatus);
}

/// Renders step events as structured `tracing` events.
#[derive(Default)]
pub struct TracingObserver {
    current: Mutex<Option<(String, tracing::Span)>>,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn span(&self) -> (String, tracing::Span) {
        match self.current.lock() {
            Ok(guard) => guard
                .clone()
                .unwrap_or_else(|| ("-".to_string(), tracing::Span::none())),
            Err(_) => ("-".to_string(), tracing::Span::none()),
        }
    }
}

impl StepObserver for TracingObserver {
    fn on_step_start(&self, name: &str) {
        let span = span!(Level::INFO, "step", step = name);
        span.in_scope(|| info!(step = name, "Step started"));
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some((name.to_string(), span));
        }
    }

    fn on_step_update(&self, fields: &StepFields) {
        let (name, span) = self.span();
        let rendered = serde_json::to_string(fields).unwrap_or_default();
        span.in_scope(|| info!(step = %name, fields = %rendered, "Step update"));
    }

    fn on_step_end(&self, status: &StepStatus) {
        let (name, span) = self.span();
        span.in_scope(|| match status {
            StepStatus::Succeeded => info!(step = %name, "Step finished"),
            StepStatus::Skipped(reason) => warn!(step = %name, reason = %reason, "Step skipped"),
            StepStatus::Failed(reason) => error!(step = %name, reason = %reason, "Step failed"),
        });
        if let Ok(mut guard) = self.current.lock() {
            *guard = None;
        }
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    fn on_step_start(&self, _name: &str) {}
    fn on_step_update(&self, _fields: &StepFields) {}
    fn on_step_end(&self, _status: &StepStatus) {}
}
