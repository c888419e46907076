//! Per-operation S3 drivers with timing hooks.
//!
//! Every driver stamps `start` immediately before the network call and `end`
//! when the request completes, the final body byte is consumed, or an error
//! is detected. A request that outlives the per-request timeout is recorded
//! as an error operation with `end = start + timeout`. Drivers never fail:
//! request errors are data, captured inside the returned operation.

use std::time::Duration;

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, ServerSideEncryption};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;

use crate::ops::{short_error, OpType, Operation, RunClock};

/// Everything a driver needs to execute and attribute one request.
pub struct ActionContext<'a> {
    pub client: &'a S3Client,
    pub endpoint: &'a str,
    pub bucket: &'a str,
    pub client_id: &'a str,
    pub thread_id: u32,
    pub clock: &'a RunClock,
    pub timeout: Duration,
    pub encrypt: bool,
}

impl ActionContext<'_> {
    fn operation(
        &self,
        op_type: OpType,
        start_ns: i64,
        end_ns: i64,
        obj_count: u64,
        size_bytes: u64,
        first_byte_ns: Option<i64>,
        error: Option<String>,
    ) -> Operation {
        Operation {
            op_type,
            client_id: self.client_id.to_string(),
            endpoint: self.endpoint.to_string(),
            thread_id: self.thread_id,
            obj_count,
            size_bytes,
            start_ns,
            first_byte_ns,
            end_ns,
            error,
        }
    }

    fn timeout_end(&self, start_ns: i64) -> i64 {
        start_ns + self.timeout.as_nanos() as i64
    }
}

/// Upload one object.
pub async fn put_object(ctx: &ActionContext<'_>, key: &str, body: Bytes) -> Operation {
    let size = body.len() as u64;
    let start_ns = ctx.clock.now_ns();
    let fut = async {
        let mut req = ctx
            .client
            .put_object()
            .bucket(ctx.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if ctx.encrypt {
            req = req.server_side_encryption(ServerSideEncryption::Aes256);
        }
        req.send().await
    };
    match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(Ok(_)) => ctx.operation(OpType::Put, start_ns, ctx.clock.now_ns(), 1, size, None, None),
        Ok(Err(e)) => ctx.operation(
            OpType::Put,
            start_ns,
            ctx.clock.now_ns(),
            1,
            0,
            None,
            Some(short_error(DisplayErrorContext(e))),
        ),
        Err(_) => ctx.operation(
            OpType::Put,
            start_ns,
            ctx.timeout_end(start_ns),
            1,
            0,
            None,
            Some("request timeout".to_string()),
        ),
    }
}

/// Download one object, optionally only its first `range` bytes.
///
/// The body is consumed chunk by chunk so the first-byte time and the bytes
/// actually transferred before a failure are both captured.
pub async fn get_object(ctx: &ActionContext<'_>, key: &str, range: Option<u64>) -> Operation {
    let start_ns = ctx.clock.now_ns();
    let mut first_byte_ns = None;
    let mut transferred = 0u64;
    let fut = async {
        let mut req = ctx.client.get_object().bucket(ctx.bucket).key(key);
        if let Some(n) = range {
            req = req.range(format!("bytes=0-{}", n - 1));
        }
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return Some(short_error(DisplayErrorContext(e))),
        };
        let mut body = resp.body;
        loop {
            match body.try_next().await {
                Ok(Some(chunk)) => {
                    if first_byte_ns.is_none() {
                        first_byte_ns = Some(ctx.clock.now_ns());
                    }
                    transferred += chunk.len() as u64;
                }
                Ok(None) => return None,
                Err(e) => return Some(short_error(e)),
            }
        }
    };
    let (end_ns, error) = match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(error) => (ctx.clock.now_ns(), error),
        Err(_) => (ctx.timeout_end(start_ns), Some("request timeout".to_string())),
    };
    ctx.operation(
        OpType::Get,
        start_ns,
        end_ns,
        1,
        transferred,
        first_byte_ns,
        error,
    )
}

/// Delete a batch of objects with one request.
pub async fn delete_objects(ctx: &ActionContext<'_>, keys: &[String]) -> Operation {
    let start_ns = ctx.clock.now_ns();
    let batch = keys.len() as u64;
    let delete = keys
        .iter()
        .map(|k| ObjectIdentifier::builder().key(k).build())
        .collect::<Result<Vec<_>, _>>()
        .and_then(|ids| Delete::builder().set_objects(Some(ids)).quiet(true).build());
    let delete = match delete {
        Ok(delete) => delete,
        Err(e) => {
            let end_ns = ctx.clock.now_ns();
            return ctx.operation(
                OpType::Delete,
                start_ns,
                end_ns,
                batch,
                0,
                None,
                Some(short_error(e)),
            );
        }
    };
    let fut = ctx
        .client
        .delete_objects()
        .bucket(ctx.bucket)
        .delete(delete)
        .send();
    match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(Ok(_)) => ctx.operation(OpType::Delete, start_ns, ctx.clock.now_ns(), batch, 0, None, None),
        Ok(Err(e)) => ctx.operation(
            OpType::Delete,
            start_ns,
            ctx.clock.now_ns(),
            batch,
            0,
            None,
            Some(short_error(DisplayErrorContext(e))),
        ),
        Err(_) => ctx.operation(
            OpType::Delete,
            start_ns,
            ctx.timeout_end(start_ns),
            batch,
            0,
            None,
            Some("request timeout".to_string()),
        ),
    }
}

/// List every object under `prefix`, paging until exhaustion.
pub async fn list_objects(ctx: &ActionContext<'_>, prefix: &str, page_size: i32) -> Operation {
    let start_ns = ctx.clock.now_ns();
    let mut listed = 0u64;
    let fut = async {
        let mut continuation_token: Option<String> = None;
        loop {
            let mut req = ctx
                .client
                .list_objects_v2()
                .bucket(ctx.bucket)
                .max_keys(page_size);
            if !prefix.is_empty() {
                req = req.prefix(prefix);
            }
            if let Some(token) = continuation_token {
                req = req.continuation_token(token);
            }
            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => return Some(short_error(DisplayErrorContext(e))),
            };
            listed += resp.contents().len() as u64;
            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(String::from);
            } else {
                return None;
            }
        }
    };
    let (end_ns, error) = match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(error) => (ctx.clock.now_ns(), error),
        Err(_) => (ctx.timeout_end(start_ns), Some("request timeout".to_string())),
    };
    ctx.operation(OpType::List, start_ns, end_ns, listed, 0, None, error)
}

/// Fetch object metadata without the payload.
pub async fn stat_object(ctx: &ActionContext<'_>, key: &str) -> Operation {
    let start_ns = ctx.clock.now_ns();
    let fut = ctx.client.head_object().bucket(ctx.bucket).key(key).send();
    match tokio::time::timeout(ctx.timeout, fut).await {
        Ok(Ok(_)) => ctx.operation(OpType::Stat, start_ns, ctx.clock.now_ns(), 1, 0, None, None),
        Ok(Err(e)) => ctx.operation(
            OpType::Stat,
            start_ns,
            ctx.clock.now_ns(),
            1,
            0,
            None,
            Some(short_error(DisplayErrorContext(e))),
        ),
        Err(_) => ctx.operation(
            OpType::Stat,
            start_ns,
            ctx.timeout_end(start_ns),
            1,
            0,
            None,
            Some("request timeout".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectConfig;
    use crate::endpoint::EndpointPool;

    // Network behavior needs a live endpoint; here we pin the attribution
    // contract: a timed-out request ends exactly at start + timeout, and
    // operations carry the identity of the context that produced them.
    #[test]
    fn timeout_end_is_start_plus_timeout() {
        let connect = ConnectConfig::test_default();
        let pool = EndpointPool::for_urls(&connect, &["http://127.0.0.1:9000"]);
        let endpoint = pool.get(0).clone();
        let clock = RunClock::start();
        let ctx = ActionContext {
            client: &endpoint.client,
            endpoint: &endpoint.url,
            bucket: "warp-benchmark-bucket",
            client_id: "client-test",
            thread_id: 3,
            clock: &clock,
            timeout: Duration::from_millis(100),
            encrypt: false,
        };
        assert_eq!(ctx.timeout_end(5_000), 5_000 + 100_000_000);

        let op = ctx.operation(
            OpType::Stat,
            1_000,
            ctx.timeout_end(1_000),
            1,
            0,
            None,
            Some("request timeout".to_string()),
        );
        assert!(op.is_error());
        assert_eq!(op.thread_id, 3);
        assert_eq!(op.client_id, "client-test");
        assert_eq!(op.endpoint, "http://127.0.0.1:9000");
        assert_eq!(op.duration_ns(), 100_000_000);
    }
}
