// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The delivery loop: the single consumer of the delivery queue.
//
// Per job:  queued → attempting → { delivered | stale-dropped | retry-wait }
// and retry-wait loops back to attempting.  Only recoverable sink errors
// enter retry-wait; a fatal one ends the job on the spot.
//
// The job being attempted sits in the loop's head slot and stays there until
// it resolves, so every job behind it waits.  A receipt printer is a serial
// device and jobs must come out in submission order; a stuck job degrades to
// "the oldest job times out after the staleness window" rather than being
// skipped.  Running a second loop against the same queue would break that
// ordering, which is why `RelayService` only ever spawns one.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use druckpost_core::config::DeliveryPolicy;
use druckpost_core::types::{DeliveryOutcome, ErrorClass, Job};

use crate::notifier::CallbackSender;
use crate::queue::{QueueGauge, QueueReceiver};
use crate::retry::{Backoff, RetryDecision, should_retry};
use crate::sink::Sink;

/// What the delivery loop last observed about the printer.
///
/// Published over a `watch` channel for the health monitor; the loop is the
/// only writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStatus {
    /// Result of the most recent attempt, `None` before the first one.
    pub last_attempt_ok: Option<bool>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Jobs printed since startup.
    pub delivered: u64,
    /// Jobs given up on since startup (stale or abandoned at shutdown).
    pub dropped: u64,
}

/// The job in the head slot and how many attempts it has had.
struct Head {
    job: Job,
    attempts: u32,
}

pub struct DeliveryLoop<S: Sink> {
    sink: S,
    queue: QueueReceiver<Job>,
    callbacks: CallbackSender,
    staleness: Duration,
    backoff: Backoff,
    status: watch::Sender<SinkStatus>,
    shutdown: CancellationToken,
}

impl<S: Sink> DeliveryLoop<S> {
    pub fn new(
        sink: S,
        queue: QueueReceiver<Job>,
        callbacks: CallbackSender,
        policy: &DeliveryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(SinkStatus::default());
        Self {
            sink,
            queue,
            callbacks,
            staleness: policy.staleness,
            backoff: Backoff::new(policy),
            status,
            shutdown,
        }
    }

    /// Subscribe to printer status updates.
    pub fn status(&self) -> watch::Receiver<SinkStatus> {
        self.status.subscribe()
    }

    pub fn gauge(&self) -> QueueGauge {
        self.queue.gauge()
    }

    /// Run until shutdown is signalled or the queue closes.
    ///
    /// Shutdown never interrupts an attempt in progress, but no new attempt
    /// starts once it is signalled.  Whatever is still undelivered at that
    /// point is reported as failed.
    pub async fn run(mut self) {
        info!(sink = %self.sink, "delivery loop started");
        let mut head: Option<Head> = None;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let Head { job, attempts } = match head.take() {
                Some(current) => current,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => break,
                        next = self.queue.pop() => next,
                    };
                    match next {
                        Some(job) => Head { job, attempts: 0 },
                        None => break,
                    }
                }
            };

            let attempts = attempts + 1;
            match self.sink.deliver(&job).await {
                Ok(()) => {
                    self.backoff.reset();
                    self.status.send_modify(|s| {
                        s.last_attempt_ok = Some(true);
                        s.consecutive_failures = 0;
                        s.last_error = None;
                        s.delivered += 1;
                    });
                    info!(job_id = %job.id(), attempts, "job delivered");
                    self.finish(&job, DeliveryOutcome::delivered(job.id().clone(), attempts))
                        .await;
                }
                Err(e) => {
                    self.status.send_modify(|s| {
                        s.last_attempt_ok = Some(false);
                        s.consecutive_failures += 1;
                        s.last_error = Some(e.to_string());
                    });

                    if e.class() == ErrorClass::Fatal {
                        error!(
                            job_id = %job.id(),
                            attempts,
                            error = %e,
                            "job cannot be delivered, dropping"
                        );
                        self.status.send_modify(|s| s.dropped += 1);
                        self.finish(&job, DeliveryOutcome::failed(job.id().clone(), attempts))
                            .await;
                        continue;
                    }

                    match should_retry(job.age(), self.staleness, &mut self.backoff) {
                        RetryDecision::Stale => {
                            warn!(
                                job_id = %job.id(),
                                attempts,
                                age_secs = job.age().as_secs(),
                                error = %e,
                                "job went stale, dropping"
                            );
                            self.status.send_modify(|s| s.dropped += 1);
                            self.finish(&job, DeliveryOutcome::failed(job.id().clone(), attempts))
                                .await;
                        }
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                job_id = %job.id(),
                                attempts,
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "delivery failed, will retry"
                            );
                            head = Some(Head { job, attempts });
                            tokio::select! {
                                biased;
                                _ = self.shutdown.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        self.abandon(head).await;
        info!("delivery loop stopped");
    }

    /// Report every job that will never be attempted again.
    async fn abandon(&mut self, head: Option<Head>) {
        let mut abandoned = 0u64;

        if let Some(Head { job, attempts }) = head {
            self.finish(&job, DeliveryOutcome::failed(job.id().clone(), attempts))
                .await;
            abandoned += 1;
        }

        // Refuse new items, then take what was already accepted.
        self.queue.close();
        while let Some(job) = self.queue.pop().await {
            self.finish(&job, DeliveryOutcome::failed(job.id().clone(), 0))
                .await;
            abandoned += 1;
        }

        if abandoned > 0 {
            warn!(abandoned, "undelivered jobs reported as failed at shutdown");
            self.status.send_modify(|s| s.dropped += abandoned);
        }
    }

    async fn finish(&self, job: &Job, outcome: DeliveryOutcome) {
        if let Err(e) = self.callbacks.notify(&outcome, job.callback_url()).await {
            error!(job_id = %job.id(), error = %e, "could not queue callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use druckpost_core::error::{DruckpostError, Result};
    use druckpost_core::types::JobId;
    use tokio::time::Instant;

    use crate::notifier::CallbackNotice;
    use crate::queue::{self, QueueSender};

    /// Sink that fails each job a scripted number of times, then succeeds,
    /// and records when every attempt started.
    #[derive(Clone, Default)]
    struct ScriptedSink {
        failures: Arc<Mutex<HashMap<String, u32>>>,
        rejected: Arc<Mutex<HashSet<String>>>,
        attempts: Arc<Mutex<Vec<(String, Instant)>>>,
    }

    impl ScriptedSink {
        /// Fail every attempt at `id` with a non-recoverable error.
        fn reject(&self, id: &str) -> &Self {
            self.rejected.lock().unwrap().insert(id.to_string());
            self
        }

        fn fail(&self, id: &str, times: u32) -> &Self {
            self.failures.lock().unwrap().insert(id.to_string(), times);
            self
        }

        fn attempts(&self) -> Vec<(String, Instant)> {
            self.attempts.lock().unwrap().clone()
        }

        fn attempt_ids(&self) -> Vec<String> {
            self.attempts().into_iter().map(|(id, _)| id).collect()
        }
    }

    impl std::fmt::Display for ScriptedSink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("scripted")
        }
    }

    impl Sink for ScriptedSink {
        async fn deliver(&self, job: &Job) -> Result<()> {
            let id = job.id().0.clone();
            self.attempts.lock().unwrap().push((id.clone(), Instant::now()));
            if self.rejected.lock().unwrap().contains(&id) {
                return Err(DruckpostError::Transform("printer rejected payload".into()));
            }
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&id) {
                Some(left) if *left > 0 => {
                    *left = left.saturating_sub(1);
                    Err(DruckpostError::Transport("connection refused".into()))
                }
                _ => Ok(()),
            }
        }
    }

    const ALWAYS: u32 = u32::MAX;

    struct Harness {
        sink: ScriptedSink,
        jobs: QueueSender<Job>,
        notices: QueueReceiver<CallbackNotice>,
        status: watch::Receiver<SinkStatus>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(sink: ScriptedSink) -> Harness {
        let (jobs, job_rx) = queue::bounded(16);
        let (notice_tx, notices) = queue::bounded(16);
        let shutdown = CancellationToken::new();
        let delivery = DeliveryLoop::new(
            sink.clone(),
            job_rx,
            CallbackSender::from_queue(notice_tx),
            &DeliveryPolicy::default(),
            shutdown.clone(),
        );
        let status = delivery.status();
        let task = tokio::spawn(delivery.run());
        Harness {
            sink,
            jobs,
            notices,
            status,
            shutdown,
            task,
        }
    }

    fn job(id: &str) -> Job {
        Job::new(JobId::from(id), b"payload".to_vec(), false, Some("http://x/cb".into()))
    }

    /// The paused clock fires timers on millisecond ticks.
    fn assert_gap(later: Instant, earlier: Instant, expected: Duration) {
        let gap = later - earlier;
        assert!(
            gap >= expected && gap < expected + Duration::from_millis(5),
            "expected gap of {expected:?}, got {gap:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_report_once() {
        let sink = ScriptedSink::default();
        sink.fail("B", 3);
        let mut h = start(sink);

        h.jobs.push(job("B")).await.unwrap();
        let notice = h.notices.pop().await.expect("notice");
        assert_eq!(notice.url, "http://x/cb");
        assert_eq!(notice.body.id, "B");
        assert_eq!(notice.body.success, "true");

        let attempts = h.sink.attempts();
        assert_eq!(attempts.len(), 4);
        assert_gap(attempts[1].1, attempts[0].1, Duration::from_millis(1000));
        assert_gap(attempts[2].1, attempts[1].1, Duration::from_millis(1500));
        assert_gap(attempts[3].1, attempts[2].1, Duration::from_millis(2250));

        // Nothing else is ever reported for B.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(h.notices.try_pop().is_none());
        assert_eq!(h.status.borrow().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_job_goes_stale_once() {
        let sink = ScriptedSink::default();
        sink.fail("C", ALWAYS);
        let mut h = start(sink);

        let enqueued = Instant::now();
        h.jobs.push(job("C")).await.unwrap();
        let notice = h.notices.pop().await.expect("notice");
        assert_eq!(notice.body.success, "false");
        assert_eq!(notice.body.id, "C");

        let attempts = h.sink.attempts();
        let last = attempts.last().unwrap().1;
        assert!(last - enqueued > Duration::from_secs(60));
        // The attempt before the last one was still inside the window.
        let before_last = attempts[attempts.len() - 2].1;
        assert!(before_last - enqueued <= Duration::from_secs(60));

        let count = attempts.len();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.sink.attempts().len(), count, "no attempts after drop");
        assert!(h.notices.try_pop().is_none());

        let status = h.status.borrow().clone();
        assert_eq!(status.dropped, 1);
        assert_eq!(status.last_attempt_ok, Some(false));
        assert_eq!(status.consecutive_failures as usize, count);
    }

    #[tokio::test(start_paused = true)]
    async fn head_of_line_resolves_before_next_job() {
        let sink = ScriptedSink::default();
        sink.fail("A", 2).fail("B", 1);
        let mut h = start(sink);

        for id in ["A", "B", "C"] {
            h.jobs.push(job(id)).await.unwrap();
        }
        let mut reported = Vec::new();
        for _ in 0..3 {
            reported.push(h.notices.pop().await.unwrap().body.id);
        }

        assert_eq!(reported, vec!["A", "B", "C"]);
        assert_eq!(h.sink.attempt_ids(), vec!["A", "A", "A", "B", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_success() {
        let sink = ScriptedSink::default();
        sink.fail("A", 3).fail("B", 2);
        let mut h = start(sink);

        h.jobs.push(job("A")).await.unwrap();
        h.jobs.push(job("B")).await.unwrap();
        h.notices.pop().await.unwrap();
        h.notices.pop().await.unwrap();

        let b: Vec<Instant> = h
            .sink
            .attempts()
            .into_iter()
            .filter(|(id, _)| id == "B")
            .map(|(_, t)| t)
            .collect();
        assert_eq!(b.len(), 3);
        assert_gap(b[1], b[0], Duration::from_secs(1));
        assert_gap(b[2], b[1], Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_fails_job_without_retry() {
        let sink = ScriptedSink::default();
        sink.reject("bad").fail("next", 1);
        let mut h = start(sink);

        h.jobs.push(job("bad")).await.unwrap();
        h.jobs.push(job("next")).await.unwrap();

        let first = h.notices.pop().await.unwrap();
        let second = h.notices.pop().await.unwrap();
        assert_eq!((first.body.id.as_str(), first.body.success.as_str()), ("bad", "false"));
        assert_eq!((second.body.id.as_str(), second.body.success.as_str()), ("next", "true"));

        let attempts = h.sink.attempts();
        let ids: Vec<&str> = attempts.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["bad", "next", "next"]);
        // No backoff after the fatal error, and it did not advance the backoff
        // used by the next job's first retry.
        assert_gap(attempts[1].1, attempts[0].1, Duration::ZERO);
        assert_gap(attempts[2].1, attempts[1].1, Duration::from_secs(1));
        assert_eq!(h.status.borrow().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_drop_moves_on_to_next_job() {
        let sink = ScriptedSink::default();
        sink.fail("stuck", ALWAYS);
        let mut h = start(sink);

        h.jobs.push(job("stuck")).await.unwrap();
        h.jobs.push(job("next")).await.unwrap();

        let first = h.notices.pop().await.unwrap();
        let second = h.notices.pop().await.unwrap();
        assert_eq!((first.body.id.as_str(), first.body.success.as_str()), ("stuck", "false"));
        assert_eq!((second.body.id.as_str(), second.body.success.as_str()), ("next", "true"));
    }

    #[tokio::test(start_paused = true)]
    async fn job_without_callback_is_not_reported() {
        let mut h = start(ScriptedSink::default());

        h.jobs
            .push(Job::new(JobId::from("quiet"), b"x".to_vec(), true, None))
            .await
            .unwrap();
        h.jobs.push(job("loud")).await.unwrap();

        let notice = h.notices.pop().await.unwrap();
        assert_eq!(notice.body.id, "loud");
        assert_eq!(h.sink.attempt_ids(), vec!["quiet", "loud"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_reports_remaining_jobs() {
        let sink = ScriptedSink::default();
        sink.fail("A", ALWAYS);
        let mut h = start(sink);

        h.jobs.push(job("A")).await.unwrap();
        h.jobs.push(job("B")).await.unwrap();

        // Let A fail a couple of times, then stop mid-backoff.
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.shutdown.cancel();
        h.task.await.unwrap();

        let attempts_at_stop = h.sink.attempts().len();
        assert!(attempts_at_stop >= 2);
        assert!(h.sink.attempt_ids().iter().all(|id| id == "A"));

        let a = h.notices.pop().await.unwrap();
        let b = h.notices.pop().await.unwrap();
        assert_eq!((a.body.id.as_str(), a.body.success.as_str()), ("A", "false"));
        assert_eq!((b.body.id.as_str(), b.body.success.as_str()), ("B", "false"));

        // The loop owned the only notice sender; the queue is now closed.
        assert!(h.notices.pop().await.is_none());
        assert_eq!(h.status.borrow().dropped, 2);
        assert!(h.jobs.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_queue_closes() {
        let h = start(ScriptedSink::default());
        drop(h.jobs);
        h.task.await.unwrap();
        assert!(h.sink.attempts().is_empty());
    }
}
