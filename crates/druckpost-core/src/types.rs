// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckpost print relay.

use std::sync::Arc;
use std::time::Duration;

use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{DruckpostError, Result};

/// Producer-supplied identifier of a print job.
///
/// Opaque to the relay; it is only echoed back in logs and callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One print request flowing through the pipeline.
///
/// A `Job` is built by the ingest stage after transcoding and is never
/// modified afterwards: the payload bytes handed to the sink on the tenth
/// retry are the same bytes that were accepted.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    payload: Arc<[u8]>,
    cut_requested: bool,
    callback_url: Option<String>,
    enqueued_at: Instant,
}

impl Job {
    /// Create a job stamped with the current instant.
    ///
    /// An empty callback URL is normalised to `None`.
    pub fn new(
        id: JobId,
        payload: impl Into<Arc<[u8]>>,
        cut_requested: bool,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            id,
            payload: payload.into(),
            cut_requested,
            callback_url: callback_url.filter(|url| !url.trim().is_empty()),
            enqueued_at: Instant::now(),
        }
    }

    /// Re-stamp the job with the instant it was accepted into a queue.
    pub fn accepted_at(mut self, at: Instant) -> Self {
        self.enqueued_at = at;
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Printable bytes, written verbatim to the sink.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn cut_requested(&self) -> bool {
        self.cut_requested
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Time since the job was accepted.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Terminal result of delivering one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub job_id: JobId,
    pub success: bool,
    /// Number of sink attempts made (0 when the job was abandoned unattempted).
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn delivered(job_id: JobId, attempts: u32) -> Self {
        Self {
            job_id,
            success: true,
            attempts,
        }
    }

    pub fn failed(job_id: JobId, attempts: u32) -> Self {
        Self {
            job_id,
            success: false,
            attempts,
        }
    }
}

/// How an error should be treated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Retry with backoff until the job goes stale.
    Recoverable,
    /// Give up on whatever the error was attached to.
    Fatal,
}

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

/// Inbound job payload as published on the job topic.
///
/// ```json
/// { "id": "A", "message": "SGVsbG8=", "callback": "", "cut": "true" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundJob {
    pub id: String,
    /// Raw text, optionally base64-wrapped.
    pub message: String,
    #[serde(default)]
    pub callback: String,
    #[serde(default, deserialize_with = "deserialize_cut")]
    pub cut: bool,
}

impl InboundJob {
    /// Parse and validate a raw payload.
    ///
    /// Missing or mistyped fields reject the payload with a
    /// [`DruckpostError::Transform`] instead of producing a half-filled job.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let job: InboundJob = serde_json::from_slice(raw)
            .map_err(|e| DruckpostError::Transform(format!("malformed job payload: {e}")))?;

        if job.id.trim().is_empty() {
            return Err(DruckpostError::Transform("job id is empty".into()));
        }

        Ok(job)
    }

    /// The callback URL, or `None` when the producer wants no notification.
    pub fn callback_url(&self) -> Option<String> {
        let url = self.callback.trim();
        (!url.is_empty()).then(|| url.to_string())
    }
}

/// Accepts `"true"`/`"false"` in any case, an empty string, or a JSON bool.
fn deserialize_cut<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CutFlag {
        Flag(bool),
        Text(String),
    }

    match CutFlag::deserialize(deserializer)? {
        CutFlag::Flag(flag) => Ok(flag),
        CutFlag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            _ => Err(de::Error::invalid_value(
                Unexpected::Str(&text),
                &"\"true\" or \"false\"",
            )),
        },
    }
}

/// JSON body POSTed to a job's callback URL.
///
/// `success` is a string on the wire (`"true"`/`"false"`) for compatibility
/// with existing consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackBody {
    pub success: String,
    pub id: String,
}

impl From<&DeliveryOutcome> for CallbackBody {
    fn from(outcome: &DeliveryOutcome) -> Self {
        Self {
            success: outcome.success.to_string(),
            id: outcome.job_id.0.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_payload() {
        let raw = br#"{"id":"A","message":"SGVsbG8=","callback":"","cut":"true"}"#;
        let job = InboundJob::parse(raw).expect("parse");
        assert_eq!(job.id, "A");
        assert_eq!(job.message, "SGVsbG8=");
        assert!(job.cut);
        assert_eq!(job.callback_url(), None);
    }

    #[test]
    fn cut_is_case_insensitive_and_accepts_bool() {
        let upper = InboundJob::parse(br#"{"id":"x","message":"m","cut":"TRUE"}"#).unwrap();
        assert!(upper.cut);
        let flag = InboundJob::parse(br#"{"id":"x","message":"m","cut":false}"#).unwrap();
        assert!(!flag.cut);
    }

    #[test]
    fn optional_fields_default() {
        let job = InboundJob::parse(br#"{"id":"x","message":"m"}"#).unwrap();
        assert!(!job.cut);
        assert!(job.callback.is_empty());
    }

    #[test]
    fn missing_message_is_rejected() {
        let err = InboundJob::parse(br#"{"id":"x"}"#).unwrap_err();
        assert!(matches!(err, DruckpostError::Transform(_)));
    }

    #[test]
    fn mistyped_field_is_rejected() {
        let err = InboundJob::parse(br#"{"id":7,"message":"m"}"#).unwrap_err();
        assert!(matches!(err, DruckpostError::Transform(_)));

        let err = InboundJob::parse(br#"{"id":"x","message":"m","cut":"maybe"}"#).unwrap_err();
        assert!(matches!(err, DruckpostError::Transform(_)));
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(InboundJob::parse(br#"{"id":"  ","message":"m"}"#).is_err());
    }

    #[test]
    fn callback_body_wire_format() {
        let outcome = DeliveryOutcome::delivered(JobId::from("B"), 4);
        let body = serde_json::to_string(&CallbackBody::from(&outcome)).unwrap();
        assert_eq!(body, r#"{"success":"true","id":"B"}"#);

        let outcome = DeliveryOutcome::failed(JobId::from("C"), 9);
        let body = serde_json::to_string(&CallbackBody::from(&outcome)).unwrap();
        assert_eq!(body, r#"{"success":"false","id":"C"}"#);
    }

    #[test]
    fn empty_callback_is_none() {
        let job = Job::new(JobId::from("a"), b"x".to_vec(), false, Some(String::new()));
        assert_eq!(job.callback_url(), None);
        let job = Job::new(JobId::from("a"), b"x".to_vec(), false, Some("http://x/cb".into()));
        assert_eq!(job.callback_url(), Some("http://x/cb"));
    }
}
