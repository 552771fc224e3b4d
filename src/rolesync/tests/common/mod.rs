//! Scripted cluster standing in for PostgreSQL in integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pg_rolesync::inspect::{CAPABILITIES_QUERY, DATABASES_QUERY, SUPERUSER_QUERY};
use pg_rolesync::{
    Connection, Connector, Result, ResultSet, RoleAttribute, RoleOptions, RoleSyncError,
};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct ClusterState {
    columns: Vec<String>,
    superuser: bool,
    databases: Vec<String>,
    roles: Vec<Value>,
    connects: Vec<String>,
    closed: usize,
    executed: Vec<(String, String)>,
    fail_on: Option<String>,
}

/// A fake cluster answering catalog queries and recording statements
#[derive(Debug, Clone)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Superuser session on a server with every role column and one database
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                columns: RoleAttribute::ALL.iter().map(|a| a.column().to_string()).collect(),
                superuser: true,
                databases: vec!["postgres".to_string()],
                roles: Vec::new(),
                connects: Vec::new(),
                closed: 0,
                executed: Vec::new(),
                fail_on: None,
            })),
        }
    }

    pub fn with_databases(self, databases: &[&str]) -> Self {
        self.state.lock().unwrap().databases = databases.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_columns(self, columns: &[&str]) -> Self {
        self.state.lock().unwrap().columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn without_superuser(self) -> Self {
        self.state.lock().unwrap().superuser = false;
        self
    }

    /// Add an existing role; `options` uses `LOGIN NOINHERIT` syntax
    pub fn with_role(self, name: &str, members: &[&str], options: &str) -> Self {
        let mut parsed: RoleOptions = options.parse().expect("valid options");
        parsed.fill_with_defaults();

        let mut row = Map::new();
        row.insert("name".to_string(), json!(name));
        row.insert("members".to_string(), json!(members));
        for attr in RoleAttribute::ALL {
            row.insert(attr.column().to_string(), json!(parsed.resolved(attr)));
        }
        self.state.lock().unwrap().roles.push(Value::Object(row));
        self
    }

    /// Fail any statement containing `pattern`
    pub fn fail_on(self, pattern: &str) -> Self {
        self.state.lock().unwrap().fail_on = Some(pattern.to_string());
        self
    }

    /// Connection strings opened so far
    pub fn connects(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    /// Number of connections closed so far
    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Executed statements as (connection string, SQL)
    pub fn executed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Executed SQL only
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed().into_iter().map(|(_, sql)| sql).collect()
    }
}

pub struct MockConnection {
    connstring: String,
    cluster: MockCluster,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, _args: &[String]) -> Result<ResultSet> {
        let mut state = self.cluster.state.lock().unwrap();
        if let Some(pattern) = &state.fail_on {
            if sql.contains(pattern.as_str()) {
                return Err(RoleSyncError::Execution(format!("permission denied: {sql}")));
            }
        }
        state.executed.push((self.connstring.clone(), sql.to_string()));
        Ok(ResultSet {
            rows_affected: 0,
            rows: Vec::new(),
        })
    }

    async fn query(&mut self, sql: &str, _args: &[String]) -> Result<ResultSet> {
        let state = self.cluster.state.lock().unwrap();
        let rows: Vec<Value> = if sql == CAPABILITIES_QUERY {
            state.columns.iter().map(|c| json!({ "attname": c })).collect()
        } else if sql == SUPERUSER_QUERY {
            vec![json!({ "rolsuper": state.superuser })]
        } else if sql == DATABASES_QUERY {
            state.databases.iter().map(|d| json!({ "datname": d })).collect()
        } else if sql.contains("pg_auth_members") {
            state.roles.clone()
        } else {
            Vec::new()
        };
        Ok(ResultSet {
            rows_affected: rows.len() as u64,
            rows,
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.cluster.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

#[async_trait]
impl Connector for MockCluster {
    type Connection = MockConnection;

    async fn connect(&self, connstring: &str) -> Result<MockConnection> {
        self.state.lock().unwrap().connects.push(connstring.to_string());
        Ok(MockConnection {
            connstring: connstring.to_string(),
            cluster: self.clone(),
        })
    }
}
