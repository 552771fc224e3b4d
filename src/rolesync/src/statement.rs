//! Deferred SQL statements and their per-database expansion

use std::fmt;

/// Placeholder replaced by the database name in the message of a fanned out
/// statement
pub const DBNAME_PLACEHOLDER: &str = "{dbname}";

/// Where a statement must run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The default connection, no specific database
    Default,
    /// A single named database
    Database(String),
    /// Every database of the cluster, once each
    AllDatabases,
}

impl Target {
    /// Database name to connect to, if any
    pub fn dbname(&self) -> Option<&str> {
        match self {
            Target::Database(name) => Some(name),
            _ => None,
        }
    }
}

/// A unit of work produced by the diff and consumed by the session pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Human-readable description, logged before execution
    pub message: String,
    /// Target scope
    pub target: Target,
    /// SQL text, possibly several `;`-separated statements
    pub sql: String,
    /// Positional arguments
    pub args: Vec<String>,
}

impl Statement {
    /// Create a statement on the default connection
    pub fn new(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target: Target::Default,
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Change the target scope
    pub fn on(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Attach positional arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Expand an [`Target::AllDatabases`] statement into one copy per database
    ///
    /// Only the message is templated. The SQL is copied verbatim: the target
    /// connection selects the database, and quoted identifiers in the SQL may
    /// legitimately contain the placeholder. Other statements are returned
    /// unchanged.
    pub fn expand(self, databases: &[String]) -> Vec<Statement> {
        if self.target != Target::AllDatabases {
            return vec![self];
        }

        databases
            .iter()
            .map(|dbname| Statement {
                message: self.message.replace(DBNAME_PLACEHOLDER, dbname),
                target: Target::Database(dbname.clone()),
                sql: self.sql.clone(),
                args: self.args.clone(),
            })
            .collect()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Expand a whole statement stream, preserving order
pub fn expand_all<'a, I>(statements: I, databases: &'a [String]) -> impl Iterator<Item = Statement> + 'a
where
    I: IntoIterator<Item = Statement>,
    I::IntoIter: 'a,
{
    statements
        .into_iter()
        .flat_map(move |statement| statement.expand(databases))
}
