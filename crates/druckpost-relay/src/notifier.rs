// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Delivery callbacks.
//
// The delivery loop hands terminal outcomes to a `CallbackSender`, which
// queues a notice for every job that asked for a callback.  A single
// `Notifier` task drains that queue and POSTs each notice.  Callback
// delivery is best effort: a failed POST is logged and forgotten.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use druckpost_core::error::{DruckpostError, Result};
use druckpost_core::types::{CallbackBody, DeliveryOutcome};

use crate::queue::{self, QueueGauge, QueueReceiver, QueueSender};

/// One pending POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackNotice {
    pub url: String,
    pub body: CallbackBody,
}

/// Create the callback queue and its notifier.
pub fn callback_channel(
    capacity: usize,
    timeout: Duration,
) -> Result<(CallbackSender, Notifier)> {
    let (tx, rx) = queue::bounded(capacity);
    let notifier = Notifier::new(rx, timeout)?;
    Ok((CallbackSender { queue: tx }, notifier))
}

/// Producer side of the callback queue.
#[derive(Debug, Clone)]
pub struct CallbackSender {
    queue: QueueSender<CallbackNotice>,
}

impl CallbackSender {
    /// Wrap an existing queue (used when the caller wants to observe the
    /// notices directly).
    pub fn from_queue(queue: QueueSender<CallbackNotice>) -> Self {
        Self { queue }
    }

    /// Queue a notification for `outcome`.
    ///
    /// Without a callback URL this is a no-op and returns `Ok(false)`.
    pub async fn notify(
        &self,
        outcome: &DeliveryOutcome,
        callback_url: Option<&str>,
    ) -> Result<bool> {
        let Some(url) = callback_url.map(str::trim).filter(|url| !url.is_empty()) else {
            debug!(job_id = %outcome.job_id, "no callback requested");
            return Ok(false);
        };

        self.queue
            .push(CallbackNotice {
                url: url.to_string(),
                body: CallbackBody::from(outcome),
            })
            .await?;
        debug!(job_id = %outcome.job_id, success = outcome.success, "callback queued");
        Ok(true)
    }

    pub fn gauge(&self) -> QueueGauge {
        self.queue.gauge()
    }
}

/// Single consumer of the callback queue.
pub struct Notifier {
    client: reqwest::Client,
    queue: QueueReceiver<CallbackNotice>,
}

impl Notifier {
    pub fn new(queue: QueueReceiver<CallbackNotice>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DruckpostError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, queue })
    }

    pub fn gauge(&self) -> QueueGauge {
        self.queue.gauge()
    }

    /// Post notices until the queue is closed and drained.
    pub async fn run(mut self) {
        info!("callback notifier started");
        while let Some(notice) = self.queue.pop().await {
            match self.post(&notice).await {
                Ok(()) => debug!(id = %notice.body.id, url = %notice.url, "callback delivered"),
                Err(e) => error!(id = %notice.body.id, url = %notice.url, error = %e, "callback failed"),
            }
        }
        info!("callback notifier stopped");
    }

    async fn post(&self, notice: &CallbackNotice) -> Result<()> {
        let resp = self
            .client
            .post(&notice.url)
            .json(&notice.body)
            .send()
            .await
            .map_err(|e| DruckpostError::Callback(format!("POST failed: {e}")))?;

        let status = resp.status();
        if !(status.is_success() || status.is_redirection()) {
            warn!(status = %status, url = %notice.url, "callback endpoint rejected notice");
            return Err(DruckpostError::Callback(format!("POST returned status {status}")));
        }
        Ok(())
    }
}
