//! Structured JSON-per-line event stream for the orchestration engine.
//!
//! Grounded in the teacher's telemetry module, but deliberately NOT a
//! singleton: a `Telemetry` is constructed once per session and passed by
//! reference into every component, rather than reached for through a global.
//! Each event is one self-contained JSON object written to the sink,
//! independent of whatever `tracing` subscriber (if any) the embedding binary
//! installs.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

/// Severity label carried on every event, independent of `orch_core::ErrorSeverity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

enum Sink {
    Stderr,
    Buffer(Vec<u8>),
}

impl Sink {
    fn write_line(&mut self, line: &str) {
        match self {
            Sink::Stderr => {
                let mut stderr = std::io::stderr();
                let _ = writeln!(stderr, "{line}");
            }
            Sink::Buffer(buf) => {
                buf.extend_from_slice(line.as_bytes());
                buf.push(b'\n');
            }
        }
    }
}

#[derive(Serialize)]
struct Event<'a> {
    timestamp: String,
    level: &'a str,
    component: &'a str,
    session_id: &'a str,
    event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_name: Option<&'a str>,
    #[serde(flatten)]
    details: Value,
}

/// Emits one JSON object per line to stderr (or, in tests, an in-memory buffer).
/// Never buffers across calls and never panics on a write failure: telemetry
/// is diagnostic, not load-bearing, so a broken stderr pipe must not abort
/// the orchestrator.
pub struct Telemetry {
    session_id: String,
    sink: Mutex<Sink>,
}

impl Telemetry {
    pub fn new(session_id: impl Into<String>) -> Self {
        Telemetry { session_id: session_id.into(), sink: Mutex::new(Sink::Stderr) }
    }

    /// Writer that accumulates lines in memory instead of stderr, for tests.
    pub fn buffered(session_id: impl Into<String>) -> Self {
        Telemetry { session_id: session_id.into(), sink: Mutex::new(Sink::Buffer(Vec::new())) }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns everything written so far, only meaningful for `Telemetry::buffered`.
    pub fn buffered_contents(&self) -> String {
        let sink = self.sink.lock().expect("telemetry sink lock poisoned");
        match &*sink {
            Sink::Stderr => String::new(),
            Sink::Buffer(buf) => String::from_utf8_lossy(buf).into_owned(),
        }
    }

    pub fn log_event(
        &self,
        level: Level,
        component: &str,
        event_type: &str,
        step_id: Option<u32>,
        agent_name: Option<&str>,
        details: Value,
    ) {
        let event = Event {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_str(),
            component,
            session_id: &self.session_id,
            event_type,
            step_id,
            agent_name,
            details,
        };
        let Ok(line) = serde_json::to_string(&event) else { return };
        let mut sink = self.sink.lock().expect("telemetry sink lock poisoned");
        sink.write_line(&line);
    }

    /// Convenience for the common case: info-level event, no step/agent context.
    pub fn info(&self, component: &str, event_type: &str, details: Value) {
        self.log_event(Level::Info, component, event_type, None, None, details);
    }

    pub fn warning(&self, component: &str, event_type: &str, details: Value) {
        self.log_event(Level::Warning, component, event_type, None, None, details);
    }

    pub fn error(&self, component: &str, event_type: &str, details: Value) {
        self.log_event(Level::Error, component, event_type, None, None, details);
    }
}
