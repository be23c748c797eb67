//! Redis client for the key-value seam
//!
//! Multiplexed async connections from the `redis` crate. Credentials come
//! from the URL (`redis://:password@host:port/db`).

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;

use crate::error::{Result, StrataError};
use crate::storage::kv::{Expiry, KvConnection, KvConnector, KvWrite};

const COMPARE_AND_SWAP: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
    return 1
end
return 0
";

fn map_redis_error(context: &str, e: redis::RedisError) -> StrataError {
    if e.kind() == redis::ErrorKind::AuthenticationFailed {
        StrataError::AuthenticationFailure(format!("{context}: {e}"))
    } else if e.is_io_error()
        || e.is_timeout()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
    {
        StrataError::ConnectionFailure(format!("{context}: {e}"))
    } else {
        StrataError::Storage(format!("{context}: {e}"))
    }
}

/// Opens multiplexed connections to one Redis endpoint.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: redis::Client,
    endpoint: String,
}

impl RedisConnector {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StrataError::Config(format!("Invalid Redis URL: {e}")))?;
        let info = client.get_connection_info();
        let endpoint = format!("{}/{}", info.addr, info.redis.db);
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl KvConnector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<RedisConnection> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error(&format!("connect {}", self.endpoint), e))?;
        tracing::debug!("Opened Redis connection to {}", self.endpoint);
        Ok(RedisConnection { conn })
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// A multiplexed Redis connection. Clones share the socket.
#[derive(Clone)]
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

fn set_command(key: &str, value: &[u8], expiry: Expiry) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    match expiry {
        Expiry::Persist => {}
        Expiry::Seconds(secs) => {
            cmd.arg("EX").arg(secs.max(1));
        }
    }
    cmd
}

#[async_trait]
impl KvConnection for RedisConnection {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("GET", e))?;
        Ok(value.map(Bytes::from))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("MGET", e))?;
        Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = set_command(key, &value, expiry)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("SET", e))?;
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, expected: &Bytes, value: Bytes) -> Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 = redis::Script::new(COMPARE_AND_SWAP)
            .key(key)
            .arg(expected.as_ref())
            .arg(value.as_ref())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("compare-and-swap", e))?;
        Ok(swapped == 1)
    }

    async fn set_many(&self, writes: Vec<KvWrite>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for write in &writes {
            pipe.add_command(set_command(&write.key, &write.value, write.expiry))
                .ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("SET pipeline", e))?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("DEL", e))?;
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("SCAN", e))?;
        Ok(page)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("PING", e))?;
        Ok(())
    }

    async fn dbsize(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("DBSIZE", e))?;
        Ok(size)
    }
}
