//! Legal ordering of peer notifications for a single request.
//!
//! ```text
//! Pending ──headers──▶ HeadersReceived ──body──▶ Streaming ──body──▶ Streaming
//!    │                        │                      │
//!    └──────────── complete / cancel (any non-terminal state) ──────▶ Completed / Cancelled
//!
//! Pending ──completed response (headers + optional body + completion)──▶ Completed
//! ```
//!
//! Cached metadata and upload progress never change the state. Redirects are
//! only legal in `Pending`.

use serde::Serialize;

use crate::types::types::{DeliveryError, DeliveryState};

/// How the response body reaches the peer. Fixed by the first body event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyMode {
    InMemory,
    Downloaded,
}

impl BodyMode {
    fn operation(self) -> &'static str {
        match self {
            BodyMode::InMemory => "deliver_chunk",
            BodyMode::Downloaded => "deliver_downloaded_bytes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UploadCursor {
    position: u64,
    size: u64,
}

/// Validates transitions; performs no peer calls itself.
#[derive(Debug, Clone)]
pub struct DeliveryMachine {
    state: DeliveryState,
    body_mode: Option<BodyMode>,
    metadata_delivered: bool,
    upload: Option<UploadCursor>,
}

impl Default for DeliveryMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryMachine {
    pub fn new() -> Self {
        Self {
            state: DeliveryState::Pending,
            body_mode: None,
            metadata_delivered: false,
            upload: None,
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn body_mode(&self) -> Option<BodyMode> {
        self.body_mode
    }

    pub fn metadata_delivered(&self) -> bool {
        self.metadata_delivered
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn violation(&self, operation: &'static str) -> DeliveryError {
        DeliveryError::ProtocolViolation {
            state: self.state,
            operation,
        }
    }

    fn require_open(&self, operation: &'static str) -> Result<(), DeliveryError> {
        if self.is_terminal() {
            Err(self.violation(operation))
        } else {
            Ok(())
        }
    }

    pub fn redirect(&self) -> Result<(), DeliveryError> {
        match self.state {
            DeliveryState::Pending => Ok(()),
            _ => Err(self.violation("deliver_redirect")),
        }
    }

    /// A vetoed redirect leaves the request at `Pending` and forgets any
    /// metadata delivered for the abandoned hop.
    pub fn redirect_vetoed(&mut self) {
        self.metadata_delivered = false;
    }

    pub fn headers(&mut self) -> Result<(), DeliveryError> {
        match self.state {
            DeliveryState::Pending => {
                self.state = DeliveryState::HeadersReceived;
                Ok(())
            }
            _ => Err(self.violation("deliver_headers")),
        }
    }

    pub fn body(&mut self, mode: BodyMode) -> Result<(), DeliveryError> {
        match self.state {
            DeliveryState::HeadersReceived | DeliveryState::Streaming => {}
            _ => return Err(self.violation(mode.operation())),
        }
        match self.body_mode {
            Some(existing) if existing != mode => Err(self.violation(mode.operation())),
            _ => {
                self.body_mode = Some(mode);
                self.state = DeliveryState::Streaming;
                Ok(())
            }
        }
    }

    pub fn cached_metadata(&mut self) -> Result<(), DeliveryError> {
        self.require_open("deliver_cached_metadata")?;
        if self.metadata_delivered {
            return Err(self.violation("deliver_cached_metadata"));
        }
        self.metadata_delivered = true;
        Ok(())
    }

    /// Position must never move backwards, the size must not change and the
    /// position must stay within it.
    pub fn upload_progress(&mut self, position: u64, size: u64) -> Result<(), DeliveryError> {
        const OP: &str = "deliver_upload_progress";
        self.require_open(OP)?;
        if position > size {
            return Err(self.violation(OP));
        }
        if let Some(cursor) = self.upload {
            if cursor.size != size || position < cursor.position {
                return Err(self.violation(OP));
            }
        }
        self.upload = Some(UploadCursor { position, size });
        Ok(())
    }

    /// Distinguishes a repeated completion from other late deliveries.
    pub fn complete(&mut self) -> Result<(), DeliveryError> {
        match self.state {
            DeliveryState::Completed => Err(DeliveryError::AlreadyCompleted),
            DeliveryState::Cancelled => Err(self.violation("complete")),
            _ => {
                self.state = DeliveryState::Completed;
                Ok(())
            }
        }
    }

    /// The combined path: only from `Pending`, straight to `Completed`.
    pub fn completed_response(&mut self, with_body: bool) -> Result<(), DeliveryError> {
        const OP: &str = "deliver_completed_response";
        if self.state != DeliveryState::Pending {
            return Err(self.violation(OP));
        }
        if with_body {
            self.body_mode = Some(BodyMode::InMemory);
        }
        self.state = DeliveryState::Completed;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), DeliveryError> {
        match self.state {
            DeliveryState::Completed => Err(DeliveryError::AlreadyCompleted),
            _ => {
                self.state = DeliveryState::Cancelled;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_completed() {
        let mut m = DeliveryMachine::new();
        m.headers().unwrap();
        assert_eq!(m.state(), DeliveryState::HeadersReceived);
        m.body(BodyMode::InMemory).unwrap();
        m.body(BodyMode::InMemory).unwrap();
        assert_eq!(m.state(), DeliveryState::Streaming);
        m.complete().unwrap();
        assert!(m.is_terminal());
    }

    #[test]
    fn body_before_headers_is_rejected() {
        let mut m = DeliveryMachine::new();
        let err = m.body(BodyMode::InMemory).unwrap_err();
        assert_eq!(
            err,
            DeliveryError::ProtocolViolation {
                state: DeliveryState::Pending,
                operation: "deliver_chunk",
            }
        );
        assert_eq!(m.state(), DeliveryState::Pending);
    }

    #[test]
    fn body_modes_are_exclusive() {
        let mut m = DeliveryMachine::new();
        m.headers().unwrap();
        m.body(BodyMode::Downloaded).unwrap();
        assert!(matches!(
            m.body(BodyMode::InMemory),
            Err(DeliveryError::ProtocolViolation { .. })
        ));
        assert_eq!(m.body_mode(), Some(BodyMode::Downloaded));
    }

    #[test]
    fn second_headers_rejected() {
        let mut m = DeliveryMachine::new();
        m.headers().unwrap();
        assert!(m.headers().is_err());
    }

    #[test]
    fn metadata_at_most_once() {
        let mut m = DeliveryMachine::new();
        m.cached_metadata().unwrap();
        assert!(m.cached_metadata().is_err());
        m.redirect_vetoed();
        m.cached_metadata().unwrap();
    }

    #[test]
    fn upload_progress_must_be_monotonic() {
        let mut m = DeliveryMachine::new();
        m.upload_progress(0, 100).unwrap();
        m.upload_progress(50, 100).unwrap();
        m.upload_progress(50, 100).unwrap();
        assert!(m.upload_progress(40, 100).is_err());
        assert!(m.upload_progress(60, 200).is_err());
        assert!(m.upload_progress(101, 100).is_err());
        m.upload_progress(100, 100).unwrap();
    }

    #[test]
    fn complete_twice_reports_already_completed() {
        let mut m = DeliveryMachine::new();
        m.complete().unwrap();
        assert_eq!(m.complete(), Err(DeliveryError::AlreadyCompleted));
        assert_eq!(m.cancel(), Err(DeliveryError::AlreadyCompleted));
    }

    #[test]
    fn completed_response_only_from_pending() {
        let mut m = DeliveryMachine::new();
        m.headers().unwrap();
        assert!(m.completed_response(true).is_err());

        let mut m = DeliveryMachine::new();
        m.completed_response(false).unwrap();
        assert_eq!(m.state(), DeliveryState::Completed);
        assert_eq!(m.body_mode(), None);
    }

    #[test]
    fn redirect_only_while_pending() {
        let mut m = DeliveryMachine::new();
        m.redirect().unwrap();
        m.headers().unwrap();
        assert!(m.redirect().is_err());
    }
}
