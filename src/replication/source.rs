use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::entry::Tick;
use crate::config::ConnectionConfig;
use crate::errors::DbError;

/// Header carrying the last tick contained in a tail response.
pub const LAST_INCLUDED_HEADER: &str = "x-arango-replication-lastincluded";

/// One poll of the log tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailResponse {
    /// Nothing new since the requested position.
    Idle,
    /// Newline-delimited entries up to and including `last_included`.
    Batch { last_included: Tick, body: String },
}

/// Somewhere a listener can read the write-ahead log from.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current head of the log.
    async fn logger_state(&self) -> Result<Tick, DbError>;

    /// Entries after `from`, at most `chunk` bytes when given.
    async fn tail(&self, from: Tick, chunk: Option<u64>) -> Result<TailResponse, DbError>;
}

/// [`LogSource`] over the server's replication HTTP API.
#[derive(Debug, Clone)]
pub struct HttpLogSource {
    client: reqwest::Client,
    base: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpLogSource {
    /// # Errors
    /// Returns `Transport` if the HTTP client cannot be built.
    pub fn new(conn: &ConnectionConfig, timeout: Duration) -> Result<Self, DbError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: format!("{}/_db/{}/_api", conn.url.trim_end_matches('/'), conn.database),
            username: conn.username.clone(),
            password: conn.password.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(self.endpoint(path));
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn logger_state(&self) -> Result<Tick, DbError> {
        let response = self.get("replication/logger-state").send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DbError::Transport(format!("logger-state returned {status}")));
        }
        let body: Value = response.json().await?;
        body.pointer("/state/lastLogTick")
            .and_then(tick_from_json)
            .ok_or_else(|| DbError::Transport("logger-state response has no state.lastLogTick".into()))
    }

    async fn tail(&self, from: Tick, chunk: Option<u64>) -> Result<TailResponse, DbError> {
        let mut query = vec![("from", from.to_string())];
        if let Some(size) = chunk {
            query.push(("chunkSize", size.to_string()));
        }
        let response = self.get("wal/tail").query(&query).send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(TailResponse::Idle);
        }
        if !status.is_success() {
            return Err(DbError::Transport(format!("wal tail returned {status}")));
        }
        let last_included = response
            .headers()
            .get(LAST_INCLUDED_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if last_included == 0 {
            return Ok(TailResponse::Idle);
        }
        let body = response.text().await?;
        Ok(TailResponse::Batch { last_included: Tick(last_included), body })
    }
}

fn tick_from_json(v: &Value) -> Option<Tick> {
    match v {
        Value::String(s) => Tick::parse(s).ok(),
        Value::Number(n) => n.as_u64().map(Tick),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conn(url: &str) -> ConnectionConfig {
        ConnectionConfig { url: url.into(), database: "shop".into(), ..ConnectionConfig::default() }
    }

    #[test]
    fn endpoints_are_database_scoped() {
        let src = HttpLogSource::new(&conn("http://db:8529/"), Duration::from_secs(1)).unwrap();
        assert_eq!(src.endpoint("wal/tail"), "http://db:8529/_db/shop/_api/wal/tail");
    }

    #[test]
    fn ticks_accept_strings_and_numbers() {
        assert_eq!(tick_from_json(&json!("42")), Some(Tick(42)));
        assert_eq!(tick_from_json(&json!(7)), Some(Tick(7)));
        assert_eq!(tick_from_json(&json!(null)), None);
    }
}
