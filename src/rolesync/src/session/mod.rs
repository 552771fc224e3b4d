//! Database sessions and the per-database connection pool
//!
//! A reconciliation run needs one connection per database it touches: the
//! default one for cluster-wide statements (roles are global), and one per
//! database for ownership reassignment and ACL purges. Connections are opened
//! on first use and kept until the pool is closed.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{PgConnector, PgSession};

use crate::connstring::inject_database;
use crate::error::{Result, RoleSyncError};
use crate::statement::{Statement, Target};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Default cap on open connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Outcome of a statement or query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Rows affected by a mutating statement
    pub rows_affected: u64,
    /// Returned rows, one JSON object per row keyed by column name
    pub rows: Vec<serde_json::Value>,
}

/// An open database connection
#[async_trait]
pub trait Connection: Send {
    /// Run a mutating statement and commit it
    async fn execute(&mut self, sql: &str, args: &[String]) -> Result<ResultSet>;

    /// Run a read-only query
    async fn query(&mut self, sql: &str, args: &[String]) -> Result<ResultSet>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens connections from connection strings
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connection type produced
    type Connection: Connection;

    /// Open a connection to `connstring`
    async fn connect(&self, connstring: &str) -> Result<Self::Connection>;
}

/// Lazily opened connections keyed by database name
///
/// `None` is the default connection, used for statements that do not need a
/// specific database. The pool is not meant to be shared between runs.
pub struct SessionPool<C: Connector> {
    connector: C,
    connstring: String,
    max_connections: usize,
    sessions: HashMap<Option<String>, C::Connection>,
}

impl<C: Connector> SessionPool<C> {
    /// Create an empty pool on top of a base connection string
    pub fn new(connector: C, connstring: impl Into<String>) -> Self {
        Self {
            connector,
            connstring: connstring.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sessions: HashMap::new(),
        }
    }

    /// Change the connection cap
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether a connection to `dbname` is cached
    pub fn is_open(&self, dbname: Option<&str>) -> bool {
        self.sessions.contains_key(&dbname.map(str::to_string))
    }

    /// Underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connection for `dbname`, opened on first use
    ///
    /// Fails with [`RoleSyncError::PoolExhausted`] when a new connection
    /// would exceed the cap. Cached connections are left untouched.
    pub async fn acquire(&mut self, dbname: Option<&str>) -> Result<&mut C::Connection> {
        let open = self.sessions.len();
        match self.sessions.entry(dbname.map(str::to_string)) {
            Entry::Occupied(entry) => {
                debug!("Using connection to database {:?}.", dbname);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                if open >= self.max_connections {
                    return Err(RoleSyncError::PoolExhausted {
                        max: self.max_connections,
                    });
                }
                let connstring = inject_database(&self.connstring, dbname)?;
                debug!("Connecting to database {:?}.", dbname);
                let connection = self.connector.connect(connstring.trim()).await?;
                Ok(entry.insert(connection))
            }
        }
    }

    /// Run `statement` on the connection of its target and commit
    pub async fn execute(&mut self, statement: &Statement) -> Result<ResultSet> {
        if statement.target == Target::AllDatabases {
            return Err(RoleSyncError::UnexpandedStatement(statement.message.clone()));
        }
        debug!("Doing:\n{}", statement.sql.trim());
        let connection = self.acquire(statement.target.dbname()).await?;
        connection.execute(&statement.sql, &statement.args).await
    }

    /// Run a read-only query on `dbname`
    pub async fn query(
        &mut self,
        dbname: Option<&str>,
        sql: &str,
        args: &[String],
    ) -> Result<ResultSet> {
        let connection = self.acquire(dbname).await?;
        connection.query(sql, args).await
    }

    /// Close every cached connection
    pub async fn close(&mut self) -> Result<()> {
        let closing = self.sessions.drain().map(|(dbname, mut connection)| async move {
            debug!("Closing connection to database {:?}.", dbname);
            connection.close().await
        });
        for result in futures::future::join_all(closing).await {
            result?;
        }
        Ok(())
    }
}
