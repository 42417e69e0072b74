//! Structured server events. Tracing covers operator-facing logs; the
//! event stream lets a host program observe the request lifecycle
//! programmatically (accounting, tests, metrics export). The stream is
//! opened through [`ServerConfig::with_event_stream`]; without it every
//! event is dropped at the emission site.
//!
//! [`ServerConfig::with_event_stream`]: crate::server::ServerConfig::with_event_stream

use std::fmt;

use tokio::sync::mpsc;

/// The request lifecycle stages reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message was dropped by the accept filter.
    Ignored,
    /// A question passed the accept filter.
    Request,
    /// No zone claimed the question.
    Refused,
    /// A zone, set, or record-source fault collapsed to SERVFAIL.
    BackendError,
    /// A socket write failed; the exchange was abandoned.
    NetworkError,
    /// A reply was assembled.
    Response,
    /// A reply was written out.
    Finish,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ignored => "ignored",
            EventKind::Request => "request",
            EventKind::Refused => "refused",
            EventKind::BackendError => "backend-error",
            EventKind::NetworkError => "network-error",
            EventKind::Response => "response",
            EventKind::Finish => "finish",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed event, with optional context.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub kind: EventKind,
    /// The question in presentation form, e.g. `example.com. A`.
    pub message: Option<String>,
    /// The underlying error, stringified.
    pub error: Option<String>,
    /// A short static reason, e.g. `"question count is not one"`.
    pub reason: Option<&'static str>,
}

impl ServerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            message: None,
            error: None,
            reason: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Where emitted events go: into the host's channel when a stream was
/// opened on the config, nowhere otherwise. A send failure means the
/// host dropped the receiver, which silently turns the stream back off.
#[derive(Clone, Default)]
pub(crate) struct EventSink(pub(crate) Option<mpsc::UnboundedSender<ServerEvent>>);

impl EventSink {
    pub(crate) fn emit(&self, event: ServerEvent) {
        if let Some(ref sender) = self.0 {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sink_drops_events() {
        EventSink::default().emit(ServerEvent::new(EventKind::Request));
    }

    #[tokio::test]
    async fn test_open_sink_delivers_events() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let sink = EventSink(Some(sender));

        sink.emit(ServerEvent::new(EventKind::Refused).with_message("example.org. A"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Refused);
        assert_eq!(event.message.as_deref(), Some("example.org. A"));
        assert!(event.error.is_none());
        assert!(event.reason.is_none());
    }

    #[test]
    fn test_emit_survives_a_dropped_receiver() {
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        EventSink(Some(sender)).emit(ServerEvent::new(EventKind::Finish));
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::BackendError.to_string(), "backend-error");
        assert_eq!(EventKind::Finish.as_str(), "finish");
    }
}
