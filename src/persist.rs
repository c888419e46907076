//! Streaming persistence for operation logs.
//!
//! On disk a log is 4 magic bytes and a version byte, followed by a gzip
//! stream holding CSV rows, header first. The writer flushes with gzip sync
//! points so a crash loses at most the rows buffered since the last flush;
//! the loader drops an incomplete final record but rejects malformed
//! records anywhere earlier.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{BenchError, Result};
use crate::ops::{OpType, Operation, OperationLog};

pub const LOG_MAGIC: &[u8; 4] = b"WRPB";
pub const LOG_VERSION: u8 = 1;

pub const CSV_HEADER: &str =
    "idx,thread,op_type,client_id,endpoint,obj_count,bytes,start_ns,first_byte_ns,end_ns,error";

/// Append-only writer streaming CSV rows into the compressed log.
pub struct LogWriter {
    enc: GzEncoder<BufWriter<File>>,
    idx: u64,
}

impl LogWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(LOG_MAGIC)?;
        out.write_all(&[LOG_VERSION])?;
        let mut enc = GzEncoder::new(out, Compression::default());
        writeln!(enc, "{CSV_HEADER}")?;
        Ok(Self { enc, idx: 0 })
    }

    pub fn append(&mut self, op: &Operation) -> Result<()> {
        writeln!(self.enc, "{}", csv_row(self.idx, op))?;
        self.idx += 1;
        Ok(())
    }

    /// Sync-flush the gzip stream so everything appended so far survives a
    /// crash of the process.
    pub fn flush(&mut self) -> Result<()> {
        self.enc.flush()?;
        self.enc.get_mut().flush()?;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        let mut out = self.enc.finish()?;
        out.flush()?;
        Ok(())
    }
}

/// One operation as a CSV row, fixed column order.
pub fn csv_row(idx: u64, op: &Operation) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{}",
        idx,
        op.thread_id,
        op.op_type.name(),
        op.client_id,
        op.endpoint,
        op.obj_count,
        op.size_bytes,
        op.start_ns,
        op.first_byte_ns.map(|v| v.to_string()).unwrap_or_default(),
        op.end_ns,
        op.error.as_deref().unwrap_or(""),
    )
}

/// Write a whole sealed log in one pass.
pub fn save_log(path: &Path, log: &OperationLog) -> Result<()> {
    let mut writer = LogWriter::create(path)?;
    for op in log.ops() {
        writer.append(op)?;
    }
    writer.finish()
}

/// Load a persisted log from disk.
pub fn load_log(path: &Path) -> Result<OperationLog> {
    let data = std::fs::read(path)?;
    parse_log(&data).map_err(|e| match e {
        BenchError::LogCorrupted(msg) => {
            BenchError::LogCorrupted(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse the raw bytes of a persisted log.
pub fn parse_log(data: &[u8]) -> Result<OperationLog> {
    if data.len() < 5 || &data[..4] != LOG_MAGIC {
        return Err(BenchError::corrupt("missing WRPB magic"));
    }
    if data[4] != LOG_VERSION {
        return Err(BenchError::corrupt(format!(
            "unsupported log version {}",
            data[4]
        )));
    }

    let mut dec = GzDecoder::new(&data[5..]);
    let mut body = Vec::new();
    // A crash can cut the gzip stream mid-block; keep whatever decoded.
    let stream_truncated = dec.read_to_end(&mut body).is_err();
    let text = String::from_utf8_lossy(&body);

    let mut lines: Vec<&str> = text.split('\n').collect();
    let mut tail_may_be_partial = stream_truncated;
    match lines.last() {
        Some(&"") => {
            lines.pop();
        }
        Some(_) => tail_may_be_partial = true,
        None => {}
    }

    let mut it = lines.into_iter();
    match it.next() {
        Some(header) if header == CSV_HEADER => {}
        _ => return Err(BenchError::corrupt("missing CSV header row")),
    }

    let mut ops = Vec::new();
    let mut rows = it.peekable();
    while let Some(line) = rows.next() {
        let is_last = rows.peek().is_none();
        match parse_row(line) {
            Some(op) => ops.push(op),
            None if is_last && tail_may_be_partial => break,
            None => {
                return Err(BenchError::corrupt(format!(
                    "malformed record at row {}",
                    ops.len() + 1
                )))
            }
        }
    }

    let client_id = ops
        .first()
        .map(|op| op.client_id.clone())
        .unwrap_or_default();
    Ok(OperationLog::from_ops(client_id, ops))
}

fn parse_row(line: &str) -> Option<Operation> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != 11 {
        return None;
    }
    let _idx: u64 = parts[0].parse().ok()?;
    let thread_id: u32 = parts[1].parse().ok()?;
    let op_type = OpType::parse(parts[2])?;
    let obj_count: u64 = parts[5].parse().ok()?;
    let size_bytes: u64 = parts[6].parse().ok()?;
    let start_ns: i64 = parts[7].parse().ok()?;
    let first_byte_ns = if parts[8].is_empty() {
        None
    } else {
        Some(parts[8].parse().ok()?)
    };
    let end_ns: i64 = parts[9].parse().ok()?;
    if end_ns < start_ns {
        return None;
    }
    Some(Operation {
        op_type,
        client_id: parts[3].to_string(),
        endpoint: parts[4].to_string(),
        thread_id,
        obj_count,
        size_bytes,
        start_ns,
        first_byte_ns,
        end_ns,
        error: if parts[10].is_empty() {
            None
        } else {
            Some(parts[10].to_string())
        },
    })
}
