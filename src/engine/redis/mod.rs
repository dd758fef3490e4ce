//! Redis Cache Handle
//!
//! Redis has no SQL surface, so this handle only runs single commands that
//! already passed [`crate::validation::validate_cache_command`].
//!
//! # Implementation Notes
//! - One multiplexed connection per handle; clones share the socket
//! - Replies are mapped to JSON; binary strings are Base64-encoded

use ::redis::aio::MultiplexedConnection;
use ::redis::Value as RedisValue;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{Result, SherlockError};

/// Open Redis connection shared across daemon tasks
#[derive(Debug)]
pub struct RedisHandle {
    conn: MultiplexedConnection,
}

impl RedisHandle {
    /// Connect to a `redis://` or `rediss://` URL
    pub async fn open(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)
            .map_err(|e| SherlockError::connection_failed(format!("Invalid Redis URL: {e}")))?;
        let conn = client.get_multiplexed_async_connection().await.map_err(|e| {
            SherlockError::connection_failed(format!("Failed to connect to Redis: {e}"))
        })?;
        Ok(Self { conn })
    }

    /// Run one validated command and return its reply as JSON
    pub async fn exec(&self, cmd: &str, args: &[String]) -> Result<Value> {
        let mut command = ::redis::cmd(cmd);
        for arg in args {
            command.arg(arg.as_str());
        }

        let mut conn = self.conn.clone();
        let reply: RedisValue = command
            .query_async(&mut conn)
            .await
            .map_err(|e| SherlockError::query_failed(format!("Redis command failed: {e}")))?;
        Ok(reply_to_json(reply))
    }

    pub async fn ping(&self) -> Result<()> {
        self.exec("PING", &[]).await.map(|_| ())
    }
}

fn reply_to_json(value: RedisValue) -> Value {
    match value {
        RedisValue::Nil => Value::Null,
        RedisValue::Int(n) => Value::from(n),
        RedisValue::Double(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        RedisValue::Boolean(b) => Value::Bool(b),
        RedisValue::Okay => Value::String("OK".to_string()),
        RedisValue::SimpleString(s) => Value::String(s),
        RedisValue::BulkString(bytes) => bytes_to_json(bytes),
        RedisValue::Array(items) | RedisValue::Set(items) => {
            Value::Array(items.into_iter().map(reply_to_json).collect())
        }
        RedisValue::Map(pairs) => {
            let mut map = Map::new();
            for (key, value) in pairs {
                map.insert(map_key(reply_to_json(key)), reply_to_json(value));
            }
            Value::Object(map)
        }
        RedisValue::VerbatimString { text, .. } => Value::String(text),
        other => Value::String(format!("{other:?}")),
    }
}

fn bytes_to_json(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => Value::String(base64::engine::general_purpose::STANDARD.encode(e.into_bytes())),
    }
}

fn map_key(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_scalar_replies() {
        assert_eq!(reply_to_json(RedisValue::Nil), Value::Null);
        assert_eq!(reply_to_json(RedisValue::Int(42)), json!(42));
        assert_eq!(reply_to_json(RedisValue::Okay), json!("OK"));
        assert_eq!(reply_to_json(RedisValue::SimpleString("PONG".into())), json!("PONG"));
        assert_eq!(reply_to_json(RedisValue::Double(f64::NAN)), Value::Null);
    }

    #[test]
    fn test_binary_bulk_string_is_base64() {
        assert_eq!(reply_to_json(RedisValue::BulkString(b"session".to_vec())), json!("session"));
        assert_eq!(reply_to_json(RedisValue::BulkString(vec![0xff, 0x00])), json!("/wA="));
    }

    #[test]
    fn test_hgetall_style_map() {
        let reply = RedisValue::Map(vec![
            (RedisValue::BulkString(b"name".to_vec()), RedisValue::BulkString(b"ada".to_vec())),
            (RedisValue::Int(7), RedisValue::Array(vec![RedisValue::Int(1), RedisValue::Nil])),
        ]);
        assert_eq!(reply_to_json(reply), json!({"name": "ada", "7": [1, null]}));
    }

    #[tokio::test]
    async fn test_rejects_non_redis_url() {
        let err = RedisHandle::open("mysql://not-redis").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    #[ignore = "Requires a Redis server at SHERLOCK_TEST_REDIS_URL"]
    async fn test_live_round_trip() {
        let url = std::env::var("SHERLOCK_TEST_REDIS_URL").unwrap();
        let handle = RedisHandle::open(&url).await.unwrap();
        handle.ping().await.unwrap();
        let reply = handle.exec("EXISTS", &["sherlock:missing".to_string()]).await.unwrap();
        assert_eq!(reply, json!(0));
    }
}
