//! Benchmark driver: bucket setup, preparation, the measured worker pool
//! and teardown.
//!
//! A run has two phases. Preparation uploads the objects GET/DELETE/LIST/
//! STAT benchmarks operate on, distributed round-robin across threads and
//! endpoints; those PUTs are recorded in the same log as everything else.
//! Measurement spawns exactly `concurrent` workers that loop until a shared
//! deadline, each strictly serial, forwarding every finished operation to
//! the collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::NaiveTime;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::sync::{mpsc, Barrier};
use tracing::{error, info, warn};

use crate::actions::{self, ActionContext};
use crate::collector::Collector;
use crate::config::{BenchConfig, STALL_WINDOW};
use crate::endpoint::{EndpointPool, EndpointRing};
use crate::error::{BenchError, Result};
use crate::ops::{short_error, OpType, Operation, OperationLog, RunClock};
use crate::persist::LogWriter;

/// Run one benchmark to completion and return the sealed operation log.
pub async fn run_benchmark(cfg: BenchConfig) -> Result<OperationLog> {
    cfg.validate()?;
    let pool = EndpointPool::connect(&cfg.connect)?;
    info!(
        op = %cfg.op,
        endpoints = pool.len(),
        concurrent = cfg.concurrent,
        duration = ?cfg.duration,
        "starting benchmark"
    );

    let setup = pool.get(0).clone();
    ensure_bucket(&setup.client, &cfg.connect.bucket).await?;
    if !cfg.noclear {
        let removed = clean_bucket(&setup.client, &cfg.connect.bucket)
            .await
            .map_err(|e| BenchError::bucket(format!("cannot clean bucket: {e}")))?;
        if removed > 0 {
            info!(removed, "removed leftover objects before the run");
        }
    }

    let clock = Arc::new(RunClock::start());
    let payload = make_payload(cfg.seed, cfg.obj_size);
    let writer = match &cfg.benchdata {
        Some(path) => Some(LogWriter::create(path)?),
        None => None,
    };
    let ops_seen = Arc::new(AtomicU64::new(0));
    let (tx, collector) = Collector::new(&cfg.client_id, writer, Arc::clone(&ops_seen), STALL_WINDOW);
    let consumer = tokio::spawn(collector.run());

    let cfg = Arc::new(cfg);
    let key_counter = Arc::new(AtomicU64::new(0));

    let prepared = if cfg.op.needs_prepared_data() {
        prepare_objects(&cfg, &pool, &clock, &payload, &tx, &key_counter).await?
    } else {
        Vec::new()
    };
    let delete_batches = Arc::new(Mutex::new(chunk_batches(&prepared, cfg.batch)));
    let prepared = Arc::new(prepared);

    let start_at = sync_start_instant(cfg.sync_start);
    let deadline = start_at + cfg.duration;
    let barrier = Arc::new(Barrier::new(cfg.concurrent));
    let progress = spawn_progress(cfg.duration, Arc::clone(&ops_seen), start_at, deadline);

    let mut workers = Vec::with_capacity(cfg.concurrent);
    for thread_id in 0..cfg.concurrent as u32 {
        let worker = Worker {
            thread_id,
            cfg: Arc::clone(&cfg),
            ring: pool.ring(thread_id),
            clock: Arc::clone(&clock),
            payload: payload.clone(),
            prepared: Arc::clone(&prepared),
            delete_batches: Arc::clone(&delete_batches),
            tx: tx.clone(),
            rng: StdRng::seed_from_u64(cfg.seed.wrapping_add(thread_id as u64)),
            counter: 0,
            key_counter: Arc::clone(&key_counter),
            barrier: Arc::clone(&barrier),
            start_at,
            deadline,
        };
        workers.push(tokio::spawn(worker.run()));
    }
    drop(tx);

    for (id, worker) in workers.into_iter().enumerate() {
        if let Err(e) = worker.await {
            error!(worker = id, "worker task failed: {e}");
        }
    }
    let log = consumer
        .await
        .map_err(|e| BenchError::s3(format!("collector task failed: {e}")))??;
    let _ = progress.await;
    info!(operations = log.len(), "measurement complete");

    if !cfg.noclear {
        match clean_bucket(&setup.client, &cfg.connect.bucket).await {
            Ok(removed) => info!(removed, "cleaned benchmark bucket"),
            Err(e) => warn!("cleanup failed, bucket left as-is: {e}"),
        }
    }
    Ok(log)
}

/// The run's shared PUT payload: one buffer from a per-run seeded source,
/// sliced by every upload.
pub fn make_payload(seed: u64, size: u64) -> Bytes {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; size as usize];
    rng.fill_bytes(&mut buf);
    Bytes::from(buf)
}

struct Worker {
    thread_id: u32,
    cfg: Arc<BenchConfig>,
    ring: EndpointRing,
    clock: Arc<RunClock>,
    payload: Bytes,
    prepared: Arc<Vec<String>>,
    delete_batches: Arc<Mutex<Vec<Vec<String>>>>,
    tx: mpsc::Sender<Operation>,
    rng: StdRng,
    counter: u64,
    key_counter: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
    start_at: Instant,
    deadline: Instant,
}

enum Target {
    Key(String),
    Batch(Vec<String>),
    Prefix(String),
}

impl Worker {
    async fn run(mut self) {
        tokio::time::sleep_until(tokio::time::Instant::from_std(self.start_at)).await;
        self.barrier.wait().await;
        loop {
            // No new request past the deadline; the in-flight one below
            // always completes and gets recorded.
            if Instant::now() >= self.deadline {
                break;
            }
            let target = match self.cfg.op {
                OpType::Put => Target::Key(self.next_key()),
                OpType::Get | OpType::Stat => Target::Key(self.pick_key()),
                OpType::Delete => match self.next_batch() {
                    Some(batch) => Target::Batch(batch),
                    // Prepared objects exhausted: the benchmark ends early.
                    None => break,
                },
                OpType::List => Target::Prefix(self.list_prefix()),
            };
            let endpoint = self.ring.next();
            let ctx = ActionContext {
                client: &endpoint.client,
                endpoint: &endpoint.url,
                bucket: &self.cfg.connect.bucket,
                client_id: &self.cfg.client_id,
                thread_id: self.thread_id,
                clock: &self.clock,
                timeout: self.cfg.request_timeout,
                encrypt: self.cfg.connect.encrypt,
            };
            let op = match target {
                Target::Key(key) => match self.cfg.op {
                    OpType::Put => actions::put_object(&ctx, &key, self.payload.clone()).await,
                    OpType::Get => actions::get_object(&ctx, &key, self.cfg.range).await,
                    _ => actions::stat_object(&ctx, &key).await,
                },
                Target::Batch(batch) => actions::delete_objects(&ctx, &batch).await,
                Target::Prefix(prefix) => {
                    actions::list_objects(&ctx, &prefix, self.cfg.batch as i32).await
                }
            };
            if self.tx.send(op).await.is_err() {
                // Collector gone: the run is aborting.
                break;
            }
        }
    }

    fn next_key(&mut self) -> String {
        if self.cfg.noprefix {
            format!("obj-{}", self.key_counter.fetch_add(1, Ordering::SeqCst))
        } else {
            let n = self.counter;
            self.counter += 1;
            format!("T{}/{}", self.thread_id, n)
        }
    }

    fn pick_key(&mut self) -> String {
        self.prepared[self.rng.gen_range(0..self.prepared.len())].clone()
    }

    fn next_batch(&self) -> Option<Vec<String>> {
        self.delete_batches.lock().expect("delete batch lock").pop()
    }

    fn list_prefix(&self) -> String {
        if self.cfg.noprefix {
            String::new()
        } else {
            format!("T{}/", self.thread_id)
        }
    }
}

/// Upload the objects a data-dependent benchmark operates on.
///
/// Returns the keys that were uploaded successfully; fails only when not a
/// single upload succeeded.
async fn prepare_objects(
    cfg: &Arc<BenchConfig>,
    pool: &EndpointPool,
    clock: &Arc<RunClock>,
    payload: &Bytes,
    tx: &mpsc::Sender<Operation>,
    key_counter: &Arc<AtomicU64>,
) -> Result<Vec<String>> {
    info!(objects = cfg.objects, size = cfg.obj_size, "uploading benchmark data");
    let mut tasks = Vec::new();
    for (thread_id, count) in split_objects(cfg.objects, cfg.concurrent)
        .into_iter()
        .enumerate()
    {
        if count == 0 {
            continue;
        }
        let cfg = Arc::clone(cfg);
        let clock = Arc::clone(clock);
        let payload = payload.clone();
        let tx = tx.clone();
        let key_counter = Arc::clone(key_counter);
        let mut ring = pool.ring(thread_id as u32);
        tasks.push(tokio::spawn(async move {
            let mut keys = Vec::with_capacity(count);
            for n in 0..count {
                let key = if cfg.noprefix {
                    format!("obj-{}", key_counter.fetch_add(1, Ordering::SeqCst))
                } else {
                    format!("T{}/{}", thread_id, n)
                };
                let endpoint = ring.next();
                let ctx = ActionContext {
                    client: &endpoint.client,
                    endpoint: &endpoint.url,
                    bucket: &cfg.connect.bucket,
                    client_id: &cfg.client_id,
                    thread_id: thread_id as u32,
                    clock: &clock,
                    timeout: cfg.request_timeout,
                    encrypt: cfg.connect.encrypt,
                };
                let op = actions::put_object(&ctx, &key, payload.clone()).await;
                let ok = !op.is_error();
                if tx.send(op).await.is_err() {
                    break;
                }
                if ok {
                    keys.push(key);
                }
            }
            keys
        }));
    }

    let mut prepared = Vec::with_capacity(cfg.objects);
    for task in futures::future::join_all(tasks).await {
        match task {
            Ok(keys) => prepared.extend(keys),
            Err(e) => error!("prepare task failed: {e}"),
        }
    }
    if prepared.is_empty() {
        return Err(BenchError::bucket("all preparation uploads failed"));
    }
    info!(prepared = prepared.len(), "benchmark data ready");
    Ok(prepared)
}

/// Objects per thread when `objects` are spread over `concurrent` threads.
fn split_objects(objects: usize, concurrent: usize) -> Vec<usize> {
    let base = objects / concurrent;
    let extra = objects % concurrent;
    (0..concurrent)
        .map(|t| base + usize::from(t < extra))
        .collect()
}

/// Chunk prepared keys into DELETE batches.
fn chunk_batches(keys: &[String], batch: usize) -> Vec<Vec<String>> {
    if batch == 0 {
        return Vec::new();
    }
    keys.chunks(batch).map(|c| c.to_vec()).collect()
}

/// When measurement starts: now, or the configured local time of day.
/// A time that already passed today starts immediately with a warning.
fn sync_start_instant(sync_start: Option<NaiveTime>) -> Instant {
    let now = Instant::now();
    let Some(t) = sync_start else {
        return now;
    };
    let local_now = chrono::Local::now();
    let target = local_now.date_naive().and_time(t);
    let Some(target) = target.and_local_timezone(chrono::Local).earliest() else {
        warn!("sync start time is not representable today, starting now");
        return now;
    };
    match (target - local_now).to_std() {
        Ok(wait) => {
            info!("waiting for synchronized start at {}", target.format("%H:%M"));
            now + wait
        }
        Err(_) => {
            warn!(
                "sync start {} already passed, starting immediately",
                target.format("%H:%M")
            );
            now
        }
    }
}

fn spawn_progress(
    duration: Duration,
    ops_seen: Arc<AtomicU64>,
    start_at: Instant,
    deadline: Instant,
) -> tokio::task::JoinHandle<()> {
    let pb = ProgressBar::new(duration.as_secs().max(1));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}s ({msg})")
            .unwrap()
            .progress_chars("#>-"),
    );
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tick.tick().await;
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if now >= start_at {
                pb.set_position(now.duration_since(start_at).as_secs().min(duration.as_secs()));
                pb.set_message(format!("ops: {}", ops_seen.load(Ordering::Relaxed)));
            }
        }
        pb.finish_with_message("waiting for in-flight requests...");
    })
}

async fn ensure_bucket(client: &S3Client, bucket: &str) -> Result<()> {
    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => {
            info!(bucket, "created bucket");
            Ok(())
        }
        Err(err) => {
            let already_there = err
                .as_service_error()
                .map(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists())
                .unwrap_or(false);
            if already_there {
                Ok(())
            } else {
                Err(BenchError::bucket(short_error(DisplayErrorContext(err))))
            }
        }
    }
}

/// Delete everything in the bucket. Used before the run (the bucket must
/// start empty) and at teardown.
async fn clean_bucket(client: &S3Client, bucket: &str) -> Result<u64> {
    let mut removed = 0u64;
    loop {
        let resp = client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(1000)
            .send()
            .await
            .map_err(|e| BenchError::s3(short_error(DisplayErrorContext(e))))?;
        let keys: Vec<String> = resp
            .contents()
            .iter()
            .filter_map(|o| o.key().map(String::from))
            .collect();
        if keys.is_empty() {
            return Ok(removed);
        }

        let mut deletes = Vec::new();
        for chunk in keys.chunks(1000) {
            let ids = chunk
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| BenchError::s3(short_error(e)))?;
            let delete = Delete::builder()
                .set_objects(Some(ids))
                .quiet(true)
                .build()
                .map_err(|e| BenchError::s3(short_error(e)))?;
            deletes.push(async move {
                client
                    .delete_objects()
                    .bucket(bucket)
                    .delete(delete)
                    .send()
                    .await
            });
        }
        for result in futures::future::join_all(deletes).await {
            result.map_err(|e| BenchError::s3(short_error(DisplayErrorContext(e))))?;
        }
        removed += keys.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_deterministic_per_seed() {
        let a = make_payload(7, 4096);
        let b = make_payload(7, 4096);
        let c = make_payload(8, 4096);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 4096);
    }

    #[test]
    fn objects_split_round_robin() {
        assert_eq!(split_objects(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(split_objects(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(split_objects(3, 4), vec![1, 1, 1, 0]);
        assert_eq!(split_objects(0, 2), vec![0, 0]);
        let total: usize = split_objects(1000, 7).iter().sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn delete_batches_cover_all_keys() {
        let keys: Vec<String> = (0..1000).map(|i| format!("T0/{i}")).collect();
        let batches = chunk_batches(&keys, 100);
        assert_eq!(batches.len(), 10);
        assert!(batches.iter().all(|b| b.len() == 100));
        let flat: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(flat, 1000);

        let uneven = chunk_batches(&keys[..250], 100);
        assert_eq!(uneven.last().unwrap().len(), 50);
    }

    #[test]
    fn sync_start_none_starts_now() {
        let before = Instant::now();
        let at = sync_start_instant(None);
        assert!(at.duration_since(before) < Duration::from_secs(1));
    }

    #[test]
    fn sync_start_in_the_past_starts_now() {
        let local_now = chrono::Local::now();
        let past = local_now - chrono::Duration::minutes(5);
        if past.date_naive() != local_now.date_naive() {
            // Within five minutes of midnight the five-minutes-ago time of
            // day belongs to yesterday; skip rather than flake.
            return;
        }
        let before = Instant::now();
        let at = sync_start_instant(Some(past.time()));
        assert!(at.duration_since(before) < Duration::from_secs(1));
    }
}
