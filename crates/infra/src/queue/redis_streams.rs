//! Redis Streams queue transport.
//!
//! Each logical queue maps to one stream with one consumer group:
//!
//! - **Stream key**: `jobping:queue:{queue}`
//! - **Consumer group**: `jobping:{queue}` (created on first use)
//! - **Receipt handle**: the stream entry id
//!
//! A received entry sits in the group's pending list until deleted. Entries
//! idle for longer than the visibility timeout are reclaimed with XAUTOCLAIM
//! and handed out again, which gives the same at-least-once behaviour as a
//! visibility timeout.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument};

use jobping_queue::{
    QueueError, QueueId, QueueTransport, ReceiptHandle, ReceiveOptions, ReceivedMessage,
};

const STREAM_PREFIX: &str = "jobping:queue:";
const GROUP_PREFIX: &str = "jobping:";
const BODY_FIELD: &str = "body";

#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    client: Arc<redis::Client>,
    consumer_name: String,
    groups: Arc<Mutex<HashSet<QueueId>>>,
}

impl RedisStreamsQueue {
    /// `redis_url` like `redis://localhost:6379`. Does not connect yet.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            consumer_name: format!("consumer-{}", uuid::Uuid::now_v7()),
            groups: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    fn stream_key(queue: &QueueId) -> String {
        format!("{STREAM_PREFIX}{queue}")
    }

    fn group_name(queue: &QueueId) -> String {
        format!("{GROUP_PREFIX}{queue}")
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    /// XGROUP CREATE ... MKSTREAM, once per queue per process.
    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &QueueId,
    ) -> Result<(), QueueError> {
        {
            let groups = self.groups.lock().map_err(|_| QueueError::Poisoned)?;
            if groups.contains(queue) {
                return Ok(());
            }
        }

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(Self::stream_key(queue))
            .arg(Self::group_name(queue))
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(_) => {}
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }

        self.groups
            .lock()
            .map_err(|_| QueueError::Poisoned)?
            .insert(queue.clone());
        Ok(())
    }

    /// Reclaim entries whose visibility timeout lapsed.
    async fn reclaim_expired(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &QueueId,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(Self::stream_key(queue))
            .arg(Self::group_name(queue))
            .arg(&self.consumer_name)
            .arg(options.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(options.max_messages)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XAUTOCLAIM failed: {e}")))?;

        let entries = parse_autoclaim_reply(reply)?;
        let mut messages = Vec::with_capacity(entries.len());
        for (id, body) in entries {
            let receive_count = self.delivery_count(conn, queue, &id).await?;
            messages.push(ReceivedMessage {
                message_id: id.clone(),
                receipt: ReceiptHandle::new(id),
                body,
                receive_count,
            });
        }
        Ok(messages)
    }

    async fn delivery_count(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &QueueId,
        id: &str,
    ) -> Result<u32, QueueError> {
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(Self::stream_key(queue))
            .arg(Self::group_name(queue))
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XPENDING failed: {e}")))?;

        Ok(pending
            .first()
            .map(|(_, _, _, delivered)| (*delivered).min(u32::MAX as u64) as u32)
            .unwrap_or(1))
    }

    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &QueueId,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(Self::group_name(queue))
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(options.max_messages);
        // BLOCK 0 would wait forever.
        let wait_ms = options.wait.as_millis() as u64;
        if wait_ms > 0 {
            cmd.arg("BLOCK").arg(wait_ms);
        }
        cmd.arg("STREAMS").arg(Self::stream_key(queue)).arg(">");

        let reply: Value = cmd
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(parse_read_reply(reply)?
            .into_iter()
            .map(|(id, body)| ReceivedMessage {
                message_id: id.clone(),
                receipt: ReceiptHandle::new(id),
                body,
                receive_count: 1,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl QueueTransport for RedisStreamsQueue {
    #[instrument(skip(self, body), fields(queue = %queue), err)]
    async fn send(&self, queue: &QueueId, body: String) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        let id: String = redis::cmd("XADD")
            .arg(Self::stream_key(queue))
            .arg("*")
            .arg(BODY_FIELD)
            .arg(&body)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;
        Ok(id)
    }

    #[instrument(skip(self, options), fields(queue = %queue), err)]
    async fn receive_batch(
        &self,
        queue: &QueueId,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut conn = self.connection().await?;
        self.ensure_group(&mut conn, queue).await?;

        let reclaimed = self.reclaim_expired(&mut conn, queue, options).await?;
        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "redelivering expired entries");
            return Ok(reclaimed);
        }

        self.read_new(&mut conn, queue, options).await
    }

    #[instrument(skip(self), fields(queue = %queue, receipt = %receipt.as_str()), err)]
    async fn delete(&self, queue: &QueueId, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let acked: u64 = redis::cmd("XACK")
            .arg(Self::stream_key(queue))
            .arg(Self::group_name(queue))
            .arg(receipt.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;

        if acked == 0 {
            return Err(QueueError::UnknownReceipt(receipt.as_str().to_string()));
        }

        let _: u64 = redis::cmd("XDEL")
            .arg(Self::stream_key(queue))
            .arg(receipt.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XDEL failed: {e}")))?;
        Ok(())
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// `[id, [field, value, ...]]`. Entries deleted while pending come back with
/// a nil field list and are skipped.
fn parse_entry(entry: &Value) -> Result<Option<(String, String)>, QueueError> {
    let parts = match entry {
        Value::Bulk(parts) if parts.len() >= 2 => parts,
        _ => return Err(QueueError::Command("malformed stream entry".to_string())),
    };

    let id = text(&parts[0]).ok_or_else(|| QueueError::Command("malformed entry id".to_string()))?;
    let fields = match &parts[1] {
        Value::Bulk(fields) => fields,
        Value::Nil => return Ok(None),
        _ => return Err(QueueError::Command("malformed entry fields".to_string())),
    };

    let body = fields
        .chunks(2)
        .find(|pair| pair.len() == 2 && text(&pair[0]).as_deref() == Some(BODY_FIELD))
        .and_then(|pair| text(&pair[1]))
        .unwrap_or_default();

    Ok(Some((id, body)))
}

fn parse_entries(entries: &Value) -> Result<Vec<(String, String)>, QueueError> {
    match entries {
        Value::Bulk(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(entry) = parse_entry(item)? {
                    out.push(entry);
                }
            }
            Ok(out)
        }
        Value::Nil => Ok(Vec::new()),
        _ => Err(QueueError::Command("malformed entry list".to_string())),
    }
}

/// XREADGROUP: `[[stream, [entry, ...]]]`, or nil when the block timed out.
fn parse_read_reply(reply: Value) -> Result<Vec<(String, String)>, QueueError> {
    match reply {
        Value::Nil => Ok(Vec::new()),
        Value::Bulk(streams) => {
            let mut out = Vec::new();
            for stream in &streams {
                match stream {
                    Value::Bulk(pair) if pair.len() == 2 => out.extend(parse_entries(&pair[1])?),
                    _ => return Err(QueueError::Command("malformed XREADGROUP reply".to_string())),
                }
            }
            Ok(out)
        }
        _ => Err(QueueError::Command("malformed XREADGROUP reply".to_string())),
    }
}

/// XAUTOCLAIM: `[next-cursor, [entry, ...], [deleted-id, ...]?]`.
fn parse_autoclaim_reply(reply: Value) -> Result<Vec<(String, String)>, QueueError> {
    match reply {
        Value::Bulk(parts) if parts.len() >= 2 => parse_entries(&parts[1]),
        _ => Err(QueueError::Command("malformed XAUTOCLAIM reply".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, body: &str) -> Value {
        Value::Bulk(vec![data(id), Value::Bulk(vec![data("body"), data(body)])])
    }

    #[test]
    fn keys_are_namespaced_per_queue() {
        let q = QueueId::new("user-fanout-queue");
        assert_eq!(RedisStreamsQueue::stream_key(&q), "jobping:queue:user-fanout-queue");
        assert_eq!(RedisStreamsQueue::group_name(&q), "jobping:user-fanout-queue");
    }

    #[test]
    fn read_reply_timeout_is_empty() {
        assert!(parse_read_reply(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn read_reply_yields_ids_and_bodies() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("jobping:queue:q"),
            Value::Bulk(vec![entry("1-0", "{\"job_id\":\"a\"}"), entry("2-0", "{}")]),
        ])]);

        let parsed = parse_read_reply(reply).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("1-0".to_string(), "{\"job_id\":\"a\"}".to_string()),
                ("2-0".to_string(), "{}".to_string()),
            ]
        );
    }

    #[test]
    fn autoclaim_skips_entries_deleted_while_pending() {
        let reply = Value::Bulk(vec![
            data("0-0"),
            Value::Bulk(vec![
                entry("5-0", "x"),
                Value::Bulk(vec![data("6-0"), Value::Nil]),
            ]),
            Value::Bulk(vec![]),
        ]);

        let parsed = parse_autoclaim_reply(reply).unwrap();
        assert_eq!(parsed, vec![("5-0".to_string(), "x".to_string())]);
    }

    #[test]
    fn malformed_reply_is_a_command_error() {
        let err = parse_read_reply(Value::Int(3)).unwrap_err();
        assert!(matches!(err, QueueError::Command(_)));
    }
}
