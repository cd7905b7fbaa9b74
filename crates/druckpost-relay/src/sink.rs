// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer sinks: where printable bytes end up.
//
// Two transports, both dumb byte pipes:
//   * raw TCP (JetDirect style): a fresh connection per attempt
//   * character device (USB line printer): opened write-only per attempt
//
// A sink makes exactly one attempt per call and never retries; retry and
// backoff belong to the delivery loop.  Delivery is not idempotent: if a
// write fails halfway the printer may already have printed part of the job,
// and the retry prints it again.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use druckpost_core::config::{DeliveryPolicy, SinkTarget};
use druckpost_core::error::{DruckpostError, Result};
use druckpost_core::types::Job;

/// Partial-cut sequence: newline, ESC 'm', newline.
pub const CUT_COMMAND: [u8; 4] = [0x0A, 0x1B, 0x6D, 0x0A];

/// One attempt at putting a job on paper.
pub trait Sink: std::fmt::Display + Send + Sync + 'static {
    /// Write the job payload, followed by [`CUT_COMMAND`] when the job asks
    /// for a cut.  Every failure is surfaced as an error.
    fn deliver(&self, job: &Job) -> impl Future<Output = Result<()>> + Send;
}

/// Write payload and optional cut, then flush.
async fn write_job<W>(writer: &mut W, job: &Job) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(job.payload()).await?;
    if job.cut_requested() {
        writer.write_all(&CUT_COMMAND).await?;
        debug!(job_id = %job.id(), "cut command written");
    }
    writer.flush().await
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// Raw TCP printer, one connection per attempt.
#[derive(Debug, Clone)]
pub struct TcpSink {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpSink {
    pub fn new(host: &str, port: u16, policy: &DeliveryPolicy) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout: policy.connect_timeout,
            write_timeout: policy.write_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl std::fmt::Display for TcpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp://{}", self.addr)
    }
}

impl Sink for TcpSink {
    #[instrument(skip_all, fields(addr = %self.addr, job_id = %job.id(), len = job.payload().len()))]
    async fn deliver(&self, job: &Job) -> Result<()> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                DruckpostError::Transport(format!(
                    "connect to {} timed out after {:?}",
                    self.addr, self.connect_timeout
                ))
            })?
            .map_err(|e| DruckpostError::Transport(format!("connect to {}: {e}", self.addr)))?;

        // The deadline covers payload, cut and flush together.
        let written = tokio::time::timeout(self.write_timeout, async {
            write_job(&mut stream, job).await?;
            stream.shutdown().await
        })
        .await;

        // `stream` drops here on every path, closing the connection.
        match written {
            Ok(Ok(())) => {
                info!("job written to printer");
                Ok(())
            }
            Ok(Err(e)) => Err(DruckpostError::Transport(format!(
                "write to {}: {e}",
                self.addr
            ))),
            Err(_) => Err(DruckpostError::Transport(format!(
                "write to {} exceeded {:?} deadline",
                self.addr, self.write_timeout
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Character device
// ---------------------------------------------------------------------------

/// Character device printer (e.g. `/dev/usb/lp0`), opened per attempt.
#[derive(Debug, Clone)]
pub struct DeviceSink {
    path: PathBuf,
    settle: Duration,
    write_timeout: Duration,
}

impl DeviceSink {
    pub fn new(path: impl Into<PathBuf>, policy: &DeliveryPolicy) -> Self {
        Self {
            path: path.into(),
            settle: policy.device_settle,
            write_timeout: policy.write_timeout,
        }
    }
}

impl std::fmt::Display for DeviceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device:{}", self.path.display())
    }
}

impl Sink for DeviceSink {
    #[instrument(skip_all, fields(path = %self.path.display(), job_id = %job.id(), len = job.payload().len()))]
    async fn deliver(&self, job: &Job) -> Result<()> {
        let mut device = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                DruckpostError::Transport(format!("open {}: {e}", self.path.display()))
            })?;

        let written = tokio::time::timeout(self.write_timeout + self.settle * 2, async {
            // Device buffers need a moment on either side of the payload.
            tokio::time::sleep(self.settle).await;
            device.write_all(job.payload()).await?;
            tokio::time::sleep(self.settle).await;
            if job.cut_requested() {
                device.write_all(&CUT_COMMAND).await?;
                debug!("cut command written");
            }
            device.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                info!("job written to device");
                Ok(())
            }
            Ok(Err(e)) => Err(DruckpostError::Transport(format!(
                "write to {}: {e}",
                self.path.display()
            ))),
            Err(_) => Err(DruckpostError::Transport(format!(
                "write to {} exceeded deadline",
                self.path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Startup selection
// ---------------------------------------------------------------------------

/// The sink chosen from configuration.
#[derive(Debug, Clone)]
pub enum PrinterSink {
    Tcp(TcpSink),
    Device(DeviceSink),
}

impl PrinterSink {
    pub fn from_config(target: &SinkTarget, policy: &DeliveryPolicy) -> Self {
        match target {
            SinkTarget::Tcp { host, port } => PrinterSink::Tcp(TcpSink::new(host, *port, policy)),
            SinkTarget::Device { path } => PrinterSink::Device(DeviceSink::new(path, policy)),
        }
    }
}

impl std::fmt::Display for PrinterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrinterSink::Tcp(sink) => std::fmt::Display::fmt(sink, f),
            PrinterSink::Device(sink) => std::fmt::Display::fmt(sink, f),
        }
    }
}

impl Sink for PrinterSink {
    async fn deliver(&self, job: &Job) -> Result<()> {
        match self {
            PrinterSink::Tcp(sink) => sink.deliver(job).await,
            PrinterSink::Device(sink) => sink.deliver(job).await,
        }
    }
}
