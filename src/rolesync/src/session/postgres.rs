//! PostgreSQL sessions backed by sqlx

use super::{Connection, Connector, ResultSet};
use crate::connstring::is_url;
use crate::error::{Result, RoleSyncError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection as _, Executor as _, Postgres};
use std::str::FromStr;
use tracing::{debug, warn};

static KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+)\s*=\s*('(?:[^'\\]|\\.)*'|\S*)").expect("Invalid keyword regex pattern")
});

/// Parse a URL or `key=value` connection string into sqlx options
///
/// Keyword strings start from the `PG*` environment defaults, like libpq.
pub fn parse_connect_options(connstring: &str) -> Result<PgConnectOptions> {
    if is_url(connstring) {
        return Ok(PgConnectOptions::from_str(connstring)?);
    }

    let mut options = PgConnectOptions::new();
    for caps in KEYWORD_RE.captures_iter(connstring) {
        let key = &caps[1];
        let raw = &caps[2];
        let value = raw
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .map(|v| v.replace("\\'", "'").replace("\\\\", "\\"))
            .unwrap_or_else(|| raw.to_string());

        options = match key {
            "host" | "hostaddr" => options.host(&value),
            "port" => options.port(value.parse().map_err(|_| {
                RoleSyncError::ConnectionString(format!("invalid port {value}"))
            })?),
            "user" => options.username(&value),
            "password" => options.password(&value),
            "dbname" => options.database(&value),
            "sslmode" => options.ssl_mode(PgSslMode::from_str(&value)?),
            "application_name" => options.application_name(&value),
            other => {
                warn!("Ignoring unsupported connection parameter {}.", other);
                options
            }
        };
    }
    Ok(options)
}

/// Opens [`PgSession`]s
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgSession;

    async fn connect(&self, connstring: &str) -> Result<PgSession> {
        let options = parse_connect_options(connstring)?;
        let conn = PgConnection::connect_with(&options).await?;
        Ok(PgSession { conn: Some(conn) })
    }
}

/// A single PostgreSQL connection
pub struct PgSession {
    conn: Option<PgConnection>,
}

impl PgSession {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| RoleSyncError::Execution("connection already closed".to_string()))
    }
}

#[async_trait]
impl Connection for PgSession {
    async fn execute(&mut self, sql: &str, args: &[String]) -> Result<ResultSet> {
        let mut tx = self.conn()?.begin().await?;
        let result = if args.is_empty() {
            // Without arguments sqlx uses the simple protocol, which accepts
            // several statements at once.
            (&mut *tx).execute(sql).await?
        } else {
            let mut query = sqlx::query::<Postgres>(sql);
            for arg in args {
                query = query.bind(arg.as_str());
            }
            query.execute(&mut *tx).await?
        };
        tx.commit().await?;

        Ok(ResultSet {
            rows_affected: result.rows_affected(),
            rows: Vec::new(),
        })
    }

    async fn query(&mut self, sql: &str, args: &[String]) -> Result<ResultSet> {
        let wrapped = format!(
            "SELECT row_to_json(q) FROM ({}) AS q",
            sql.trim().trim_end_matches(';')
        );
        let mut query = sqlx::query_scalar::<Postgres, serde_json::Value>(&wrapped);
        for arg in args {
            query = query.bind(arg.as_str());
        }
        let rows = query.fetch_all(self.conn()?).await?;

        Ok(ResultSet {
            rows_affected: rows.len() as u64,
            rows,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing Postgres connection.");
            conn.close().await?;
        }
        Ok(())
    }
}
