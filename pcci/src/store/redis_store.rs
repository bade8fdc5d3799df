//! Redis-backed coordination store.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;

use super::{CoordinationStore, StoreKeys, StoreSnapshot};

/// Initialize-if-absent, compare against the ceiling and increment, in one
/// server-side step.
const ACQUIRE_SLOT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  redis.call('SET', KEYS[1], 0)
  current = 0
end
if tonumber(current) >= tonumber(ARGV[1]) then
  return 0
end
redis.call('INCR', KEYS[1])
return 1
"#;

const RELEASE_SLOT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
  return redis.call('DECR', KEYS[1])
end
return 0
"#;

/// [`CoordinationStore`] over a single Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    keys: StoreKeys,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(url: &str, keys: StoreKeys) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("invalid redis url {url}"))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {url}"))?;
        Ok(Self { conn, keys })
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        cmd: redis::Cmd,
    ) -> redis::RedisResult<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn).await
    }

    async fn eval_script(
        &self,
        script: &str,
        key: &str,
        args: &[&str],
    ) -> anyhow::Result<i64> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(1).arg(key);
        for arg in args {
            cmd.arg(*arg);
        }
        self.query(cmd)
            .await
            .with_context(|| format!("lua script failed (key: {key})"))
    }

    async fn list_len(&self, key: &str) -> anyhow::Result<usize> {
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(key);
        self.query(cmd)
            .await
            .with_context(|| format!("LLEN {key} failed"))
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn try_acquire_slot(&self, max_workers: u32) -> anyhow::Result<bool> {
        let max = max_workers.to_string();
        let acquired = self
            .eval_script(ACQUIRE_SLOT_SCRIPT, &self.keys.workers, &[&max])
            .await?;
        Ok(acquired == 1)
    }

    async fn release_slot(&self) -> anyhow::Result<()> {
        self.eval_script(RELEASE_SLOT_SCRIPT, &self.keys.workers, &[])
            .await?;
        Ok(())
    }

    async fn worker_count(&self) -> anyhow::Result<u64> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(&self.keys.workers);
        let count: Option<i64> = self
            .query(cmd)
            .await
            .with_context(|| format!("GET {} failed", self.keys.workers))?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn is_run_enabled(&self) -> anyhow::Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(&self.keys.run_flag);
        self.query(cmd)
            .await
            .with_context(|| format!("EXISTS {} failed", self.keys.run_flag))
    }

    async fn set_run_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        let cmd = if enabled {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&self.keys.run_flag).arg(1);
            cmd
        } else {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(&self.keys.run_flag);
            cmd
        };
        self.query::<()>(cmd)
            .await
            .with_context(|| format!("updating {} failed", self.keys.run_flag))
    }

    async fn pop_job(&self) -> anyhow::Result<Option<String>> {
        let mut cmd = redis::cmd("LPOP");
        cmd.arg(&self.keys.todo);
        self.query(cmd)
            .await
            .with_context(|| format!("LPOP {} failed", self.keys.todo))
    }

    async fn push_job(&self, raw: &str) -> anyhow::Result<()> {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(&self.keys.todo).arg(raw);
        self.query::<()>(cmd)
            .await
            .with_context(|| format!("RPUSH {} failed", self.keys.todo))
    }

    async fn push_completed(&self, artifact_id: &str) -> anyhow::Result<()> {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(&self.keys.completed).arg(artifact_id);
        self.query::<()>(cmd)
            .await
            .with_context(|| format!("RPUSH {} failed", self.keys.completed))
    }

    async fn snapshot(&self) -> anyhow::Result<StoreSnapshot> {
        Ok(StoreSnapshot {
            sampled_at: Utc::now(),
            workers: self.worker_count().await?,
            run_enabled: self.is_run_enabled().await?,
            todo_depth: self.list_len(&self.keys.todo).await?,
            completed_depth: self.list_len(&self.keys.completed).await?,
        })
    }
}
