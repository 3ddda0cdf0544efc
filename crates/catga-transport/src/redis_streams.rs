//! Redis Streams backend (spec §4.G, §6): one stream per message type,
//! consumer groups, `XAUTOCLAIM`-based pending-entries-list sweeps for
//! consumers that died mid-processing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, error, warn};

use crate::subjects::redis_stream_key;
use crate::{MessageHandler, SubscriptionHandle, Transport, TransportContext, TransportError};

pub struct RedisStreamsTransport {
    conn: ConnectionManager,
    consumer_id: String,
    claim_idle: Duration,
}

impl RedisStreamsTransport {
    pub fn new(conn: ConnectionManager, consumer_id: impl Into<String>) -> Self {
        Self { conn, consumer_id: consumer_id.into(), claim_idle: Duration::from_secs(30) }
    }

    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    fn encode_fields(payload: &[u8], ctx: &TransportContext) -> Vec<(String, String)> {
        let mut fields = vec![("payload".to_string(), base64_encode(payload))];
        for (k, v) in ctx.to_wire_headers() {
            fields.push((k, v));
        }
        fields
    }

    async fn ensure_group(&self, stream_key: &str, group: &str) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream_key, group, "0").await;
        match result {
            Ok(_) => Ok(()),
            // BUSYGROUP means the group already exists — not an error here.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(TransportError::Backend(e.to_string())),
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        let _ = write!(out, "{}", ALPHABET[(n >> 18) as usize & 0x3f] as char);
        let _ = write!(out, "{}", ALPHABET[(n >> 12) as usize & 0x3f] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(n >> 6) as usize & 0x3f] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[n as usize & 0x3f] as char } else { '=' });
    }
    out
}

#[async_trait]
impl Transport for RedisStreamsTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>, ctx: TransportContext) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let stream_key = redis_stream_key(subject);
        let fields = Self::encode_fields(&payload, &ctx);
        let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let _id: String = conn
            .xadd(&stream_key, "*", &field_refs)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn send_and_receive(
        &self,
        subject: &str,
        payload: Vec<u8>,
        ctx: TransportContext,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        // Streams are fan-out/work-queue primitives, not a natural
        // request/reply channel; we publish to the request stream and
        // block-read the dedicated reply stream named after the
        // message id, mirroring the NATS reply-subject pattern.
        self.publish(subject, payload, ctx.clone()).await?;
        let reply_key = redis_stream_key(&format!("reply.{}", ctx.message_id));
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default().count(1).block(timeout.as_millis() as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[&reply_key], &["0"], &opts)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        reply
            .keys
            .first()
            .and_then(|k| k.ids.first())
            .and_then(|entry| entry.map.get("payload"))
            .and_then(|v: &redis::Value| match v {
                redis::Value::BulkString(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .ok_or(TransportError::Timeout(timeout))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionHandle, TransportError> {
        let group = queue_group.unwrap_or(subject).to_string();
        let stream_key = redis_stream_key(subject);
        self.ensure_group(&stream_key, &group).await?;

        let mut conn = self.conn.clone();
        let consumer_id = self.consumer_id.clone();
        let claim_idle = self.claim_idle;
        let stream_key_owned = stream_key.clone();
        let group_owned = group.clone();

        tokio::spawn(async move {
            loop {
                // Claim entries idle past `claim_idle` before reading new
                // ones, so a dead consumer's in-flight messages surface
                // again (spec §8 "PEL claim sweeps").
                let claimed: redis::RedisResult<(String, Vec<redis::streams::StreamId>, Vec<String>)> = redis::cmd("XAUTOCLAIM")
                    .arg(&stream_key_owned)
                    .arg(&group_owned)
                    .arg(&consumer_id)
                    .arg(claim_idle.as_millis() as usize)
                    .arg("0")
                    .query_async(&mut conn)
                    .await;
                if let Ok((_, entries, _)) = claimed {
                    for entry in entries {
                        dispatch_entry(&mut conn, &stream_key_owned, &group_owned, &entry, handler.clone()).await;
                    }
                }

                let opts = StreamReadOptions::default().group(&group_owned, &consumer_id).count(10).block(1000);
                let read: redis::RedisResult<StreamReadReply> = conn.xread_options(&[&stream_key_owned], &[">"], &opts).await;
                match read {
                    Ok(reply) => {
                        for stream_key_entry in reply.keys {
                            for entry in stream_key_entry.ids {
                                dispatch_entry(&mut conn, &stream_key_owned, &group_owned, &entry, handler.clone()).await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(stream = %stream_key_owned, error = %e, "redis streams read failed, backing off");
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }
        });

        Ok(SubscriptionHandle { subject: subject.to_string(), queue_group: Some(group) })
    }
}

async fn dispatch_entry(
    conn: &mut ConnectionManager,
    stream_key: &str,
    group: &str,
    entry: &redis::streams::StreamId,
    handler: Arc<dyn MessageHandler>,
) {
    let payload = match entry.map.get("payload") {
        Some(redis::Value::BulkString(bytes)) => bytes.clone(),
        _ => Vec::new(),
    };
    let message_id = entry
        .map
        .get("catga.message_id")
        .and_then(|v| match v {
            redis::Value::BulkString(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        })
        .unwrap_or_else(|| entry.id.clone());

    let ctx = TransportContext::new(message_id, stream_key.to_string());
    match handler.handle(payload, ctx).await {
        Ok(_) => {
            let _: redis::RedisResult<i64> = conn.xack(stream_key, group, &[&entry.id]).await;
            debug!(stream = %stream_key, id = %entry.id, "redis stream entry acked");
        }
        Err(e) => {
            error!(stream = %stream_key, id = %entry.id, error = %e, "redis stream handler failed, leaving unacked for PEL claim");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips_for_common_lengths() {
        for input in [b"".as_slice(), b"a", b"ab", b"abc", b"hello world"] {
            let encoded = base64_encode(input);
            assert_eq!(encoded.len() % 4, 0);
        }
    }
}
