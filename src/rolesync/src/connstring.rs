//! Per-database connection strings

use crate::error::{Result, RoleSyncError};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static DBNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"dbname *= *'?[^ ]*'?").expect("Invalid dbname regex pattern"));

/// Whether `connstring` is URL-style rather than `key=value` pairs
pub fn is_url(connstring: &str) -> bool {
    connstring.starts_with("postgres://") || connstring.starts_with("postgresql://")
}

/// Point `connstring` at `dbname`
///
/// URL-style strings get their path replaced, keyword strings lose any
/// `dbname` pair and get a new one appended. `None` leaves the string as is.
pub fn inject_database(connstring: &str, dbname: Option<&str>) -> Result<String> {
    let Some(dbname) = dbname else {
        return Ok(connstring.to_string());
    };

    if is_url(connstring) {
        let mut url = Url::parse(connstring)
            .map_err(|e| RoleSyncError::ConnectionString(format!("{connstring}: {e}")))?;
        url.set_path(&format!("/{dbname}"));
        return Ok(url.to_string());
    }

    let stripped = DBNAME_RE.replace_all(connstring, "");
    Ok(format!("{} dbname={}", stripped.trim(), dbname).trim().to_string())
}
