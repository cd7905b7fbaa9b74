// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ingest adapter: the entry point for raw payloads from the broker side.
//
// Whatever owns the subscription calls `handle_payload` once per message.
// The payload is validated, transcoded, stamped and pushed onto the delivery
// queue.  A full queue makes the caller wait rather than dropping the job;
// the waiting caller is how backpressure reaches the subscription.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use druckpost_core::error::{DruckpostError, Result};
use druckpost_core::types::{InboundJob, Job, JobId};

use crate::queue::{QueueGauge, QueueSender};
use crate::transcode::PayloadTransform;

/// Cloneable handle that turns raw payloads into queued jobs.
#[derive(Clone)]
pub struct IngestAdapter {
    queue: QueueSender<Job>,
    transform: Arc<dyn PayloadTransform>,
    shutdown: CancellationToken,
}

impl IngestAdapter {
    pub fn new(
        queue: QueueSender<Job>,
        transform: Arc<dyn PayloadTransform>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            transform,
            shutdown,
        }
    }

    /// Accept one raw payload.
    ///
    /// Returns the job id once the job is in the delivery queue.  Malformed
    /// payloads and messages that cannot be transcoded are rejected with
    /// [`DruckpostError::Transform`] and never reach the queue.  Once the
    /// service is stopping every call fails with
    /// [`DruckpostError::ShuttingDown`].
    pub async fn handle_payload(&self, raw: &[u8]) -> Result<JobId> {
        if self.shutdown.is_cancelled() {
            return Err(DruckpostError::ShuttingDown);
        }

        let inbound = InboundJob::parse(raw).inspect_err(|e| {
            error!(error = %e, len = raw.len(), "discarding malformed payload");
        })?;
        let id = JobId(inbound.id.clone());
        debug!(job_id = %id, "message received");

        let payload = self
            .transform
            .transform(inbound.message.as_bytes())
            .inspect_err(|e| error!(job_id = %id, error = %e, "discarding job that cannot be transcoded"))?;

        let job = Job::new(id.clone(), payload, inbound.cut, inbound.callback_url());

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!(job_id = %id, "shutdown while waiting for queue space, job not accepted");
                Err(DruckpostError::ShuttingDown)
            }
            pushed = self.queue.push_with(move || job.accepted_at(Instant::now())) => {
                pushed?;
                debug!(job_id = %id, queue_depth = self.queue.gauge().depth(), "job queued");
                Ok(id)
            }
        }
    }

    pub fn gauge(&self) -> QueueGauge {
        self.queue.gauge()
    }
}
