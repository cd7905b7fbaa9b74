// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded in-memory FIFO queues connecting the pipeline stages.
//
// Both the delivery queue (ingest → delivery loop) and the callback queue
// (delivery loop → notifier) are instances of the same type.  A queue is a
// tokio mpsc channel plus a depth gauge the health monitor can read without
// touching the channel itself.
//
// Closing follows ownership: the queue closes when the last `QueueSender` is
// dropped, so it is impossible to close a queue while a producer can still
// push into it.  The receiver then drains whatever is left and sees `None`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use druckpost_core::error::{DruckpostError, Result};

/// Create a bounded queue holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero (rejected earlier by config validation).
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let gauge = QueueGauge {
        depth: Arc::new(AtomicUsize::new(0)),
        capacity,
    };
    (
        QueueSender {
            tx,
            gauge: gauge.clone(),
        },
        QueueReceiver { rx, gauge },
    )
}

/// Read-only view of a queue's fill level.
#[derive(Debug, Clone)]
pub struct QueueGauge {
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl QueueGauge {
    /// Items currently waiting in the queue.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Producer handle.  Cloneable; the queue stays open while any clone lives.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    gauge: QueueGauge,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            gauge: self.gauge.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Append an item, waiting while the queue is full.
    pub async fn push(&self, item: T) -> Result<()> {
        self.push_with(|| item).await
    }

    /// Wait for a free slot, then build the item and append it.
    ///
    /// `make` runs only once the slot is reserved, so anything it records
    /// (such as an acceptance timestamp) reflects the moment of enqueue
    /// rather than the start of the wait.
    pub async fn push_with<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce() -> T,
    {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| DruckpostError::QueueClosed)?;
        self.gauge.depth.fetch_add(1, Ordering::Relaxed);
        permit.send(make());
        Ok(())
    }

    pub fn gauge(&self) -> QueueGauge {
        self.gauge.clone()
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer handle.  There is exactly one per queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    gauge: QueueGauge,
}

impl<T> QueueReceiver<T> {
    /// Wait for the next item.  Returns `None` once the queue is closed and
    /// empty.  Suspends without polling while the queue is empty.
    pub async fn pop(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.gauge.depth.fetch_sub(1, Ordering::Relaxed);
        Some(item)
    }

    /// Take the next item if one is ready.
    pub fn try_pop(&mut self) -> Option<T> {
        let item = self.rx.try_recv().ok()?;
        self.gauge.depth.fetch_sub(1, Ordering::Relaxed);
        Some(item)
    }

    /// Stop accepting new items.  Items already queued can still be popped,
    /// and producers blocked on a full queue are released with an error.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn gauge(&self) -> QueueGauge {
        self.gauge.clone()
    }
}
