//! Multi-producer single-consumer collection of recorded operations.
//!
//! Workers push every finished operation into a bounded channel; the
//! collector appends them to the in-memory log and streams them to disk.
//! The channel bound applies back-pressure instead of dropping records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::error::{BenchError, Result};
use crate::ops::{Operation, OperationLog};
use crate::persist::LogWriter;

/// Channel bound between workers and the collector.
pub const CHANNEL_CAPACITY: usize = 16 * 1024;

/// Rows buffered before an early flush.
const FLUSH_ROWS: usize = 4096;

/// Interval between timed flushes.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// The consuming half of the worker pipe.
pub struct Collector {
    rx: mpsc::Receiver<Operation>,
    log: OperationLog,
    writer: Option<LogWriter>,
    /// Shared with the progress display.
    ops_seen: Arc<AtomicU64>,
    stall_window: Duration,
    last_success: Instant,
    unflushed: usize,
}

impl Collector {
    /// Create the pipe. Returns the sender side for workers and the
    /// collector to be driven by [`Collector::run`].
    pub fn new(
        client_id: impl Into<String>,
        writer: Option<LogWriter>,
        ops_seen: Arc<AtomicU64>,
        stall_window: Duration,
    ) -> (mpsc::Sender<Operation>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let collector = Self {
            rx,
            log: OperationLog::new(client_id),
            writer,
            ops_seen,
            stall_window,
            last_success: Instant::now(),
            unflushed: 0,
        };
        (tx, collector)
    }

    /// Consume until every sender is dropped, then seal and return the log.
    ///
    /// Fails with [`BenchError::AllWorkersFailing`] when errors keep
    /// arriving and no success lands inside the stall window.
    pub async fn run(mut self) -> Result<OperationLog> {
        let mut tick = tokio::time::interval(FLUSH_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                op = self.rx.recv() => match op {
                    Some(op) => self.record(op)?,
                    None => break,
                },
                _ = tick.tick() => self.flush()?,
            }
        }
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        let mut log = self.log;
        log.seal();
        Ok(log)
    }

    fn record(&mut self, op: Operation) -> Result<()> {
        self.ops_seen.fetch_add(1, Ordering::Relaxed);
        if op.is_error() {
            if self.last_success.elapsed() >= self.stall_window {
                return Err(BenchError::AllWorkersFailing(self.stall_window));
            }
        } else {
            self.last_success = Instant::now();
        }
        if let Some(writer) = &mut self.writer {
            writer.append(&op)?;
            self.unflushed += 1;
            if self.unflushed >= FLUSH_ROWS {
                self.flush()?;
            }
        }
        self.log.push(op);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            if self.unflushed > 0 {
                writer.flush()?;
                self.unflushed = 0;
            }
        }
        Ok(())
    }
}
