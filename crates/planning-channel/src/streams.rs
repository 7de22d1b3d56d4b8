//! Redis Streams implementation of the channel traits.

use crate::config::{dead_letter_topic, ChannelConfig};
use crate::error::{ChannelError, ChannelResult};
use crate::{Delivery, MessagePublisher, MessageSource};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Stream field carrying the wire document.
const PAYLOAD_FIELD: &str = "payload";

/// One raw stream entry: (message id, payload).
type StreamEntry = (String, String);

/// Redis Streams channel: publisher and consumer over one client.
///
/// Publishing goes through its own connection handle so `publish` can
/// replace it after a drop while the consumer side is borrowed elsewhere.
pub struct RedisChannel {
    client: Client,
    conn: MultiplexedConnection,
    publish_conn: Mutex<MultiplexedConnection>,
    config: ChannelConfig,
    subscriptions: Vec<String>,
    groups: HashSet<String>,
    buffered: VecDeque<Delivery>,
    attempts: HashMap<String, u32>,
}

impl RedisChannel {
    /// Connect to Redis once.
    pub async fn connect(config: ChannelConfig) -> ChannelResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        info!(url = %config.redis_url, consumer = %config.consumer_name, "Connected to Redis");

        Ok(Self {
            client,
            publish_conn: Mutex::new(conn.clone()),
            conn,
            config,
            subscriptions: Vec::new(),
            groups: HashSet::new(),
            buffered: VecDeque::new(),
            attempts: HashMap::new(),
        })
    }

    /// Subscribe to topics, creating their consumer groups when missing.
    pub async fn subscribe(&mut self, topics: &[String]) -> ChannelResult<()> {
        for topic in topics {
            self.ensure_consumer_group(topic).await?;
            if !self.subscriptions.contains(topic) {
                self.subscriptions.push(topic.clone());
            }
        }
        info!(topics = ?self.subscriptions, group = %self.config.consumer_group, "Subscribed");
        Ok(())
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Ensure the consumer group exists on `topic`, creating the stream if needed.
    async fn ensure_consumer_group(&mut self, topic: &str) -> ChannelResult<()> {
        if self.groups.contains(topic) {
            return Ok(());
        }

        // "0" so messages published before the first consumer started are kept
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %topic, group = %self.config.consumer_group, "Created consumer group");
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %topic, group = %self.config.consumer_group, "Consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }

        self.groups.insert(topic.to_string());
        Ok(())
    }

    fn attempt_key(topic: &str, id: &str) -> String {
        format!("{topic}/{id}")
    }

    /// Claim messages that were requeued (left pending) long enough ago.
    async fn reclaim_requeued(&mut self) -> ChannelResult<()> {
        let min_idle_ms = self.config.requeue_delay.as_millis() as u64;
        for topic in self.subscriptions.clone() {
            // XAUTOCLAIM key group consumer min-idle-time start [COUNT count]
            let value: Value = redis::cmd("XAUTOCLAIM")
                .arg(&topic)
                .arg(&self.config.consumer_group)
                .arg(&self.config.consumer_name)
                .arg(min_idle_ms)
                .arg("0-0")
                .arg("COUNT")
                .arg(1)
                .query_async(&mut self.conn)
                .await?;

            for (id, payload) in parse_autoclaim_response(value)? {
                debug!(stream = %topic, message_id = %id, "Reclaimed requeued message");
                self.buffered.push_back(Delivery {
                    topic: topic.clone(),
                    delivery_id: id,
                    payload,
                    attempts: 0,
                });
            }
        }
        Ok(())
    }

    /// Blocking XREADGROUP over every subscribed stream.
    async fn read_new(&mut self) -> ChannelResult<()> {
        if self.subscriptions.is_empty() {
            return Err(ChannelError::Protocol("No topics subscribed".to_string()));
        }

        // XREADGROUP GROUP g c COUNT 1 BLOCK ms STREAMS k1 k2 ... > > ...
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout_ms)
            .arg("STREAMS");
        for topic in &self.subscriptions {
            cmd.arg(topic);
        }
        for _ in &self.subscriptions {
            cmd.arg(">");
        }

        let value: Value = cmd.query_async(&mut self.conn).await?;
        for (topic, (id, payload)) in parse_xreadgroup_response(value)? {
            self.buffered.push_back(Delivery {
                topic,
                delivery_id: id,
                payload,
                attempts: 0,
            });
        }
        Ok(())
    }

    async fn xack(&mut self, topic: &str, id: &str) -> ChannelResult<()> {
        let result: i64 = self
            .conn
            .xack(topic, &self.config.consumer_group, &[id])
            .await?;

        if result == 1 {
            debug!(message_id = %id, stream = %topic, "Acknowledged message");
        } else {
            warn!(message_id = %id, stream = %topic, "XACK returned {}, message may not exist", result);
        }
        self.attempts.remove(&Self::attempt_key(topic, id));
        Ok(())
    }

    async fn dead_letter(&mut self, delivery: &Delivery, reason: &str) -> ChannelResult<()> {
        let target = dead_letter_topic(&delivery.topic);
        let _: String = redis::cmd("XADD")
            .arg(&target)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.stream_max_len)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&delivery.payload)
            .arg("reason")
            .arg(reason)
            .arg("source_id")
            .arg(&delivery.delivery_id)
            .query_async(&mut self.conn)
            .await?;

        warn!(
            stream = %delivery.topic,
            message_id = %delivery.delivery_id,
            dead_letter = %target,
            reason,
            "Message dead-lettered"
        );
        self.xack(&delivery.topic, &delivery.delivery_id).await
    }

    /// Replace the publishing connection, trying `connect_attempts` times.
    async fn reopen_publish_conn(&self) -> ChannelResult<MultiplexedConnection> {
        let mut current = self.publish_conn.lock().await;
        let max_attempts = self.config.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    info!(attempt, "Reconnected publisher to Redis");
                    *current = conn.clone();
                    return Ok(conn);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, max_attempts, error = %e, "Publisher reconnect failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.connect_delay).await;
                    }
                }
            }
        }

        Err(ChannelError::TransportUnavailable {
            attempts: max_attempts,
            reason: last_error,
        })
    }
}

async fn xadd(
    conn: &mut MultiplexedConnection,
    topic: &str,
    max_len: usize,
    payload: &str,
) -> ChannelResult<String> {
    let id: String = redis::cmd("XADD")
        .arg(topic)
        .arg("MAXLEN")
        .arg("~")
        .arg(max_len)
        .arg("*")
        .arg(PAYLOAD_FIELD)
        .arg(payload)
        .query_async(conn)
        .await?;
    Ok(id)
}

#[async_trait]
impl MessagePublisher for RedisChannel {
    async fn publish(&self, topics: &[String], payload: &str) -> ChannelResult<()> {
        let mut conn = self.publish_conn.lock().await.clone();
        let max_len = self.config.stream_max_len;

        for topic in topics {
            let id = match xadd(&mut conn, topic, max_len, payload).await {
                Ok(id) => id,
                Err(e) if e.is_connection_error() => {
                    warn!(stream = %topic, error = %e, "Publish connection lost, reconnecting...");
                    conn = self.reopen_publish_conn().await?;
                    xadd(&mut conn, topic, max_len, payload).await?
                }
                Err(e) => return Err(e),
            };
            debug!(stream = %topic, message_id = %id, "Published message");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSource for RedisChannel {
    async fn next_delivery(&mut self) -> ChannelResult<Option<Delivery>> {
        loop {
            if self.buffered.is_empty() {
                self.reclaim_requeued().await?;
            }
            if self.buffered.is_empty() {
                self.read_new().await?;
            }

            let Some(mut delivery) = self.buffered.pop_front() else {
                return Ok(None);
            };

            let count = self
                .attempts
                .entry(Self::attempt_key(&delivery.topic, &delivery.delivery_id))
                .or_insert(0);
            *count += 1;
            delivery.attempts = *count;

            if delivery.attempts > self.config.max_redeliveries {
                let reason = format!("exceeded {} deliveries", self.config.max_redeliveries);
                self.dead_letter(&delivery, &reason).await?;
                continue;
            }

            debug!(
                stream = %delivery.topic,
                message_id = %delivery.delivery_id,
                attempts = delivery.attempts,
                "Read message from stream"
            );
            return Ok(Some(delivery));
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> ChannelResult<()> {
        self.xack(&delivery.topic, &delivery.delivery_id).await
    }

    async fn nack(&mut self, delivery: &Delivery, requeue: bool, reason: &str) -> ChannelResult<()> {
        if requeue {
            // Left in the pending list; XAUTOCLAIM hands it out again after requeue_delay.
            debug!(
                stream = %delivery.topic,
                message_id = %delivery.delivery_id,
                reason,
                "Message requeued"
            );
            return Ok(());
        }
        self.dead_letter(delivery, reason).await
    }

    async fn pull(&mut self, topic: &str) -> ChannelResult<Option<Delivery>> {
        self.ensure_consumer_group(topic).await?;

        let value: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("NOACK")
            .arg("STREAMS")
            .arg(topic)
            .arg(">")
            .query_async(&mut self.conn)
            .await?;

        Ok(parse_xreadgroup_response(value)?
            .into_iter()
            .next()
            .map(|(topic, (id, payload))| Delivery {
                topic,
                delivery_id: id,
                payload,
                attempts: 1,
            }))
    }

    async fn reconnect(&mut self) -> ChannelResult<()> {
        info!("Reconnecting to Redis...");
        self.conn = self.client.get_multiplexed_async_connection().await?;
        *self.publish_conn.get_mut() = self.conn.clone();
        self.groups.clear();
        for topic in self.subscriptions.clone() {
            self.ensure_consumer_group(&topic).await?;
        }
        Ok(())
    }
}

/// Connect with a fixed delay between attempts.
///
/// Gives up with [`ChannelError::TransportUnavailable`] once
/// `config.connect_attempts` is exhausted.
pub async fn connect_with_retry(config: ChannelConfig) -> ChannelResult<RedisChannel> {
    let max_attempts = config.connect_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match RedisChannel::connect(config.clone()).await {
            Ok(channel) => return Ok(channel),
            Err(e) => {
                last_error = e.to_string();
                if attempt < max_attempts {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Failed to connect to Redis, retrying..."
                    );
                    tokio::time::sleep(config.connect_delay).await;
                }
            }
        }
    }

    Err(ChannelError::TransportUnavailable {
        attempts: max_attempts,
        reason: last_error,
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(s) => Some(String::from_utf8_lossy(s).to_string()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse `[id, [field, value, ...]]` entries; deleted entries (nil fields) are skipped.
///
/// An entry without a payload field is still returned, with an empty
/// payload, so the consumer settles it (it fails to decode and is
/// dead-lettered) instead of it sitting in the pending list forever.
fn parse_entries(value: &Value) -> ChannelResult<Vec<StreamEntry>> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(ChannelError::Protocol(format!(
                "Expected array of entries, got {:?}",
                other
            )))
        }
    };

    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(parts) = entry else {
            return Err(ChannelError::Protocol("Expected array for message".to_string()));
        };
        if parts.len() < 2 {
            return Err(ChannelError::Protocol("Message entry too short".to_string()));
        }

        let id = value_to_string(&parts[0]).ok_or_else(|| {
            ChannelError::Protocol(format!("Expected string for message ID, got {:?}", parts[0]))
        })?;

        let fields = match &parts[1] {
            Value::Array(fields) => fields,
            Value::Nil => continue,
            _ => return Err(ChannelError::Protocol("Expected array for fields".to_string())),
        };

        let payload = fields
            .chunks(2)
            .find(|pair| pair.len() == 2 && value_to_string(&pair[0]).as_deref() == Some(PAYLOAD_FIELD))
            .and_then(|pair| value_to_string(&pair[1]));
        let payload = match payload {
            Some(payload) => payload,
            None => {
                warn!(message_id = %id, "Stream entry has no {PAYLOAD_FIELD} field");
                String::new()
            }
        };

        parsed.push((id, payload));
    }
    Ok(parsed)
}

/// Parse `[[stream, [[id, fields], ...]], ...]` into (stream, entry) pairs.
fn parse_xreadgroup_response(value: Value) -> ChannelResult<Vec<(String, StreamEntry)>> {
    let streams = match value {
        Value::Array(streams) => streams,
        Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(ChannelError::Protocol(format!(
                "Unexpected XREADGROUP response type: {:?}",
                other
            )))
        }
    };

    let mut deliveries = Vec::new();
    for stream in &streams {
        let Value::Array(parts) = stream else {
            return Err(ChannelError::Protocol("Expected array for stream entry".to_string()));
        };
        if parts.len() < 2 {
            return Err(ChannelError::Protocol("Stream entry too short".to_string()));
        }
        let topic = value_to_string(&parts[0])
            .ok_or_else(|| ChannelError::Protocol("Expected string for stream key".to_string()))?;
        for entry in parse_entries(&parts[1])? {
            deliveries.push((topic.clone(), entry));
        }
    }
    Ok(deliveries)
}

/// Parse `[next_id, [[id, fields], ...], [deleted_ids]]`.
fn parse_autoclaim_response(value: Value) -> ChannelResult<Vec<StreamEntry>> {
    match value {
        Value::Array(parts) if parts.len() >= 2 => parse_entries(&parts[1]),
        Value::Nil => Ok(Vec::new()),
        other => Err(ChannelError::Protocol(format!(
            "Unexpected XAUTOCLAIM response: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, payload: &str) -> Value {
        Value::Array(vec![
            bulk(id),
            Value::Array(vec![bulk(PAYLOAD_FIELD), bulk(payload)]),
        ])
    }

    #[test]
    fn test_parse_xreadgroup_multiple_streams() {
        let value = Value::Array(vec![
            Value::Array(vec![
                bulk("planning.event.create"),
                Value::Array(vec![entry("1-0", "<CreateEvent/>")]),
            ]),
            Value::Array(vec![
                bulk("planning.session.delete"),
                Value::Array(vec![entry("2-0", "<DeleteSession/>")]),
            ]),
        ]);

        let parsed = parse_xreadgroup_response(value).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "planning.event.create");
        assert_eq!(parsed[0].1, ("1-0".to_string(), "<CreateEvent/>".to_string()));
        assert_eq!(parsed[1].0, "planning.session.delete");
    }

    #[test]
    fn test_parse_xreadgroup_timeout() {
        assert!(parse_xreadgroup_response(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn test_parse_entry_without_payload_is_delivered_empty() {
        let value = Value::Array(vec![
            Value::Array(vec![
                bulk("planning.event.create"),
                Value::Array(vec![Value::Array(vec![
                    bulk("1-0"),
                    Value::Array(vec![bulk("data"), bulk("x")]),
                ])]),
            ]),
            Value::Array(vec![
                bulk("planning.session.create"),
                Value::Array(vec![entry("2-0", "<CreateSession/>")]),
            ]),
        ]);

        let parsed = parse_xreadgroup_response(value).unwrap();
        assert_eq!(
            parsed,
            vec![
                (
                    "planning.event.create".to_string(),
                    ("1-0".to_string(), String::new())
                ),
                (
                    "planning.session.create".to_string(),
                    ("2-0".to_string(), "<CreateSession/>".to_string())
                ),
            ]
        );
    }

    #[test]
    fn test_parse_malformed_entry_is_protocol_error() {
        let value = Value::Array(vec![Value::Array(vec![
            bulk("s"),
            Value::Array(vec![Value::Array(vec![bulk("1-0")])]),
        ])]);
        assert!(matches!(
            parse_xreadgroup_response(value),
            Err(ChannelError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_autoclaim_skips_deleted_entries() {
        let value = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![
                entry("5-0", "<UpdateEvent/>"),
                Value::Array(vec![bulk("6-0"), Value::Nil]),
            ]),
            Value::Array(vec![]),
        ]);
        let parsed = parse_autoclaim_response(value).unwrap();
        assert_eq!(parsed, vec![("5-0".to_string(), "<UpdateEvent/>".to_string())]);
    }

    #[tokio::test]
    async fn test_connect_with_retry_exhausts() {
        let mut config = ChannelConfig::new("redis://127.0.0.1:1", "planning");
        config.connect_attempts = 2;
        config.connect_delay = std::time::Duration::from_millis(10);

        let err = connect_with_retry(config).await.err().unwrap();
        assert!(matches!(err, ChannelError::TransportUnavailable { attempts: 2, .. }));
        assert!(err.is_connection_error());
    }

    /// Read one RESP command array; `None` on EOF or garbage.
    async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8_lossy(&buf).to_string());
        }
        Some(args)
    }

    /// Answer every command like a tiny Redis. With `drop_after_xadd` the
    /// socket is closed right after the first XADD reply.
    async fn serve(stream: TcpStream, seen: mpsc::UnboundedSender<String>, drop_after_xadd: bool) {
        let mut reader = BufReader::new(stream);
        while let Some(args) = read_command(&mut reader).await {
            let name = args.first().map(|a| a.to_uppercase()).unwrap_or_default();
            let reply: &[u8] = if name == "XADD" {
                b"$3\r\n1-0\r\n"
            } else {
                b"+OK\r\n"
            };
            if reader.get_mut().write_all(reply).await.is_err() {
                return;
            }
            let _ = seen.send(name.clone());
            if drop_after_xadd && name == "XADD" {
                return;
            }
        }
    }

    async fn wait_for(seen: &mut mpsc::UnboundedReceiver<String>, command: &str) {
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(name) = seen.recv().await {
                if name == command {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(found, Ok(true), "server never saw {command}");
    }

    fn local_config(port: u16, attempts: u32) -> ChannelConfig {
        let mut config = ChannelConfig::new(format!("redis://127.0.0.1:{port}"), "planning");
        config.connect_attempts = attempts;
        config.connect_delay = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn test_publish_reconnects_after_connection_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut first = true;
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, seen_tx.clone(), first));
                first = false;
            }
        });

        let channel = RedisChannel::connect(local_config(port, 3)).await.unwrap();
        let topics = vec!["planning.event.create".to_string()];

        channel.publish(&topics, "<CreateEvent/>").await.unwrap();
        wait_for(&mut seen, "XADD").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        channel.publish(&topics, "<UpdateEvent/>").await.unwrap();
        wait_for(&mut seen, "XADD").await;
    }

    #[tokio::test]
    async fn test_publish_gives_up_when_broker_stays_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let server = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                serve(stream, seen_tx, true).await;
            }
        });

        let channel = RedisChannel::connect(local_config(port, 2)).await.unwrap();
        let topics = vec!["planning.event.create".to_string()];
        channel.publish(&topics, "<CreateEvent/>").await.unwrap();
        wait_for(&mut seen, "XADD").await;
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = channel.publish(&topics, "<UpdateEvent/>").await.unwrap_err();
        assert!(matches!(err, ChannelError::TransportUnavailable { attempts: 2, .. }));
    }
}
