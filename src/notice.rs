//! User-facing notices raised by session operations
//!
//! Session failures never escape as panics. Each one is recorded here with a
//! severity and category so a UI can show it, and the operation still returns
//! the error to its caller.

use crate::error::{CrmError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How prominently a notice should be shown
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 0,
    Success = 1,
    Warning = 2,
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A single message for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    /// Notice describing a failed operation
    pub fn from_error(error: &CrmError) -> Self {
        let kind = error.kind();
        let severity = match kind {
            // Fallback paths keep the session usable
            ErrorKind::DocumentLoad => Severity::Warning,
            _ => Severity::Error,
        };
        Self {
            severity,
            message: error.to_string(),
            kind: Some(kind),
            timestamp: Utc::now(),
        }
    }
}

/// Fixed-capacity ring of the most recent notices
#[derive(Debug, Clone)]
pub struct NoticeLog {
    buffer: Vec<Notice>,
    head: usize,
    capacity: usize,
}

impl NoticeLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn push(&mut self, notice: Notice) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(notice);
        } else {
            self.buffer[self.head] = notice;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Notices oldest first
    pub fn to_vec(&self) -> Vec<Notice> {
        let mut result = Vec::with_capacity(self.buffer.len());
        result.extend_from_slice(&self.buffer[self.head..]);
        result.extend_from_slice(&self.buffer[..self.head]);
        result
    }

    pub fn latest(&self) -> Option<&Notice> {
        if self.buffer.is_empty() {
            return None;
        }
        let newest = (self.head + self.buffer.len() - 1) % self.buffer.len();
        self.buffer.get(newest)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(n: usize) -> Notice {
        Notice::new(Severity::Info, format!("notice {}", n))
    }

    #[test]
    fn test_ring_keeps_most_recent_in_order() {
        let mut log = NoticeLog::new(3);
        for n in 0..5 {
            log.push(info(n));
        }
        let messages: Vec<String> = log.to_vec().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["notice 2", "notice 3", "notice 4"]);
        assert_eq!(log.latest().unwrap().message, "notice 4");
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_latest_before_wrap() {
        let mut log = NoticeLog::new(4);
        assert!(log.latest().is_none());
        log.push(info(1));
        log.push(info(2));
        assert_eq!(log.latest().unwrap().message, "notice 2");
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_from_error_classifies() {
        let notice = Notice::from_error(&CrmError::Commit("disk full".into()));
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(notice.kind, Some(ErrorKind::Commit));
        assert!(notice.message.contains("disk full"));

        let notice = Notice::from_error(&CrmError::DocumentLoad("timeout".into()));
        assert_eq!(notice.severity, Severity::Warning);
    }

    #[test]
    fn test_notice_json_shape() {
        let notice = Notice::from_error(&CrmError::FileTransfer("refused".into()));
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["kind"], "fileTransfer");
    }
}
