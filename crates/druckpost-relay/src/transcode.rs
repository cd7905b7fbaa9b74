// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload transcoding: raw message text → printable bytes.
//
// Runs exactly once per job, at ingest.  Whatever it returns is the final
// payload; nothing downstream re-encodes it, so a job retried ten times is
// still printed with the bytes produced here.

use std::borrow::Cow;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::trace;

use druckpost_core::error::{DruckpostError, Result};

use crate::cp850;

/// A pure transformation applied to every inbound message before enqueue.
pub trait PayloadTransform: Send + Sync {
    /// Turn a raw message into the bytes the printer should receive.
    ///
    /// An error rejects the job; it never reaches the delivery queue.
    fn transform(&self, raw: &[u8]) -> Result<Vec<u8>>;
}

/// Default transform: optional base64 unwrap, then CP850 encoding.
///
/// Base64 is detected, not declared: any message that decodes cleanly as
/// standard padded base64 is treated as wrapped.  Plain text that happens
/// to be valid base64 (e.g. `"Test"`) is therefore decoded too.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cp850Transcoder;

impl PayloadTransform for Cp850Transcoder {
    fn transform(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let unwrapped = unwrap_base64(raw);
        let text = std::str::from_utf8(&unwrapped).map_err(|e| {
            DruckpostError::Transform(format!("message is not valid UTF-8: {e}"))
        })?;
        cp850::encode(text)
    }
}

/// Decode `raw` if it is valid base64, otherwise return it unchanged.
///
/// CR and LF are ignored, so line-wrapped (MIME style) base64 is decoded
/// like the unwrapped form.
pub fn unwrap_base64(raw: &[u8]) -> Cow<'_, [u8]> {
    let decoded = if raw.iter().any(|&b| b == b'\r' || b == b'\n') {
        let joined: Vec<u8> = raw
            .iter()
            .copied()
            .filter(|&b| b != b'\r' && b != b'\n')
            .collect();
        STANDARD.decode(joined)
    } else {
        STANDARD.decode(raw)
    };

    match decoded {
        Ok(decoded) => {
            trace!(raw_len = raw.len(), decoded_len = decoded.len(), "base64 payload unwrapped");
            Cow::Owned(decoded)
        }
        Err(_) => Cow::Borrowed(raw),
    }
}
