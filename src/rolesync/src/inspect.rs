//! Reading the actual state of the cluster

use crate::error::{Result, RoleSyncError};
use crate::options::{Capabilities, RoleAttribute};
use crate::role::Role;
use crate::roleset::RoleSet;
use crate::session::{Connector, SessionPool};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Role attribute columns present in `pg_authid` on this server
pub const CAPABILITIES_QUERY: &str = "\
SELECT attrs.attname
FROM pg_catalog.pg_namespace AS nsp
JOIN pg_catalog.pg_class AS tables
  ON tables.relnamespace = nsp.oid AND tables.relname = 'pg_authid'
JOIN pg_catalog.pg_attribute AS attrs
  ON attrs.attrelid = tables.oid AND attrs.attname LIKE 'rol%'
WHERE nsp.nspname = 'pg_catalog'
ORDER BY 1";

/// Whether the session user is a superuser
pub const SUPERUSER_QUERY: &str =
    "SELECT rolsuper FROM pg_catalog.pg_roles WHERE rolname = CURRENT_USER";

/// Databases accepting connections
pub const DATABASES_QUERY: &str = "\
SELECT datname
FROM pg_catalog.pg_database
WHERE datallowconn IS TRUE
ORDER BY 1";

/// Default patterns of roles never managed
pub const DEFAULT_BLACKLIST: [&str; 2] = ["pg_*", "postgres"];

/// Match a role name against a blacklist pattern
///
/// Supports `*`, `prefix*`, `*suffix` and exact names.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return name.ends_with(suffix);
    }
    name == pattern
}

/// Roles query selecting only the supported attribute columns
pub fn roles_query(caps: &Capabilities) -> String {
    let columns: Vec<String> = caps
        .attributes()
        .map(|attr| format!("role.{}", attr.column()))
        .collect();
    let select_columns: String = columns.iter().map(|c| format!(",\n       {c}")).collect();
    let group_columns: String = columns.iter().map(|c| format!(", {c}")).collect();

    format!(
        "SELECT role.rolname AS name,
       array_remove(array_agg(member.rolname ORDER BY member.rolname), NULL) AS members{select_columns}
FROM pg_catalog.pg_roles AS role
LEFT JOIN pg_catalog.pg_auth_members AS ms ON ms.roleid = role.oid
LEFT JOIN pg_catalog.pg_roles AS member ON member.oid = ms.member
GROUP BY role.rolname{group_columns}
ORDER BY 1"
    )
}

#[derive(Deserialize)]
struct ColumnRow {
    attname: String,
}

#[derive(Deserialize)]
struct SuperuserRow {
    rolsuper: bool,
}

#[derive(Deserialize)]
struct DatabaseRow {
    datname: String,
}

#[derive(Deserialize)]
struct RoleRow {
    name: String,
    #[serde(default)]
    members: Option<Vec<String>>,
    #[serde(flatten)]
    attributes: BTreeMap<String, bool>,
}

fn decode<T: DeserializeOwned>(rows: Vec<serde_json::Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row.clone())
                .map_err(|e| RoleSyncError::Catalog(format!("{e}: {row}")))
        })
        .collect()
}

/// Reads capabilities, databases and roles through the default connection
#[derive(Debug, Clone)]
pub struct Inspector {
    blacklist: Vec<String>,
}

impl Inspector {
    /// Create an inspector ignoring roles matching `blacklist`
    pub fn new(blacklist: Vec<String>) -> Self {
        Self { blacklist }
    }

    /// Discover which role attributes this session can read and write
    pub async fn capabilities<C: Connector>(&self, pool: &mut SessionPool<C>) -> Result<Capabilities> {
        let rows = pool.query(None, CAPABILITIES_QUERY, &[]).await?.rows;
        let columns: Vec<ColumnRow> = decode(rows)?;
        let mut caps = Capabilities::from_columns(columns.iter().map(|c| c.attname.as_str()));

        let rows = pool.query(None, SUPERUSER_QUERY, &[]).await?.rows;
        let is_superuser = decode::<SuperuserRow>(rows)?
            .first()
            .map(|row| row.rolsuper)
            .unwrap_or(false);
        if !is_superuser {
            debug!("Session is not superuser, hiding superuser-only role options.");
            caps = caps.without_superuser_attributes();
        }

        debug!(
            "Postgres server supports role options {}.",
            caps.attributes()
                .map(RoleAttribute::keyword)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(caps)
    }

    /// Databases of the cluster
    pub async fn databases<C: Connector>(&self, pool: &mut SessionPool<C>) -> Result<Vec<String>> {
        let rows = pool.query(None, DATABASES_QUERY, &[]).await?.rows;
        let databases: Vec<String> = decode::<DatabaseRow>(rows)?
            .into_iter()
            .map(|row| row.datname)
            .collect();
        debug!("Found databases {}.", databases.join(", "));
        Ok(databases)
    }

    /// Every role in the cluster, with options and members
    pub async fn roles<C: Connector>(
        &self,
        pool: &mut SessionPool<C>,
        caps: &Capabilities,
    ) -> Result<RoleSet> {
        let rows = pool.query(None, &roles_query(caps), &[]).await?.rows;
        let mut roles = RoleSet::new();
        for row in decode::<RoleRow>(rows)? {
            roles.insert(role_from_row(row, caps));
        }
        info!("Found {} roles in the cluster.", roles.len());
        Ok(roles)
    }

    /// Roles this tool may alter and drop
    pub fn managed(&self, available: &RoleSet) -> RoleSet {
        available
            .iter()
            .filter(|role| {
                !self
                    .blacklist
                    .iter()
                    .any(|pattern| matches_pattern(&role.name, pattern))
            })
            .cloned()
            .collect()
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new(DEFAULT_BLACKLIST.iter().map(|p| p.to_string()).collect())
    }
}

fn role_from_row(row: RoleRow, caps: &Capabilities) -> Role {
    let mut role = Role::new(row.name).with_members(row.members.unwrap_or_default());
    for attr in caps.attributes() {
        if let Some(value) = row.attributes.get(attr.column()) {
            role.options.set(attr, *value);
        }
    }
    role.options.fill_with_defaults();
    role
}
