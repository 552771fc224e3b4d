//! Role entity and the statements that create, alter, rename and drop it

use crate::error::{Result, RoleSyncError};
use crate::options::{Capabilities, RoleOptions};
use crate::statement::{Statement, Target, DBNAME_PLACEHOLDER};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Comment set on roles created without an explicit one
pub const DEFAULT_COMMENT: &str = "Managed by pg-rolesync.";

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_names<'a, I>(names: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    names
        .into_iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Dollar-quote tag that does not occur in `body`
fn dollar_tag(body: &str) -> String {
    let mut tag = "$rolesync$".to_string();
    let mut n = 0;
    while body.contains(&tag) {
        n += 1;
        tag = format!("$rolesync{n}$");
    }
    tag
}

/// A database role
///
/// Identity is the case-preserving `name`; `lname` is kept alongside for
/// case-insensitive rename detection. Equality, ordering and hashing only
/// look at `name`, so options and members are mutable payload.
#[derive(Debug, Clone)]
pub struct Role {
    /// Role name, as desired
    pub name: String,

    /// Lowercased name, computed once
    lname: String,

    /// Role attributes
    pub options: RoleOptions,

    /// Roles granted membership in this role
    pub members: Vec<String>,

    /// Roles this role should be granted to
    pub parents: Vec<String>,

    /// Optional comment
    pub comment: Option<String>,
}

impl Role {
    /// Create a role with unset options and no relations
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let lname = name.to_lowercase();
        Self {
            name,
            lname,
            options: RoleOptions::new(),
            members: Vec::new(),
            parents: Vec::new(),
            comment: None,
        }
    }

    /// Set options, builder style
    pub fn with_options(mut self, options: RoleOptions) -> Self {
        self.options = options;
        self
    }

    /// Set members, builder style
    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    /// Set parents, builder style
    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Set the comment, builder style
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Lowercased name
    pub fn lname(&self) -> &str {
        &self.lname
    }

    fn member_set(&self) -> BTreeSet<&String> {
        self.members.iter().collect()
    }

    /// Statements creating this role from scratch
    pub fn create(&self, caps: &Capabilities) -> Vec<Statement> {
        let role = quote_ident(&self.name);
        let comment = self.comment.as_deref().unwrap_or(DEFAULT_COMMENT);
        let mut statements = vec![Statement::new(
            format!("Create {}.", self.name),
            format!(
                "CREATE ROLE {role} WITH {options};\nCOMMENT ON ROLE {role} IS {comment};",
                options = self.options.display(caps),
                comment = quote_literal(comment),
            ),
        )];

        if !self.members.is_empty() {
            statements.push(Statement::new(
                format!("Add {} members.", self.name),
                format!("GRANT {role} TO {};", quote_names(self.member_set())),
            ));
        }
        statements
    }

    /// Statements turning `self` into `target`
    pub fn alter(&self, target: &Role, caps: &Capabilities) -> Vec<Statement> {
        let role = quote_ident(&self.name);
        let mut statements = Vec::new();

        if !self.options.eq_supported(&target.options, caps) {
            statements.push(Statement::new(
                format!("Update options of {}.", self.name),
                format!(
                    "ALTER ROLE {role} WITH {};",
                    target.options.display(caps)
                ),
            ));
        }

        let mine = self.member_set();
        let theirs = target.member_set();

        let missing: Vec<&String> = theirs.difference(&mine).copied().collect();
        if !missing.is_empty() {
            debug!(
                "Role {} miss members {}.",
                self.name,
                missing.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
            );
            statements.push(Statement::new(
                format!("Add missing {} members.", self.name),
                format!("GRANT {role} TO {};", quote_names(missing)),
            ));
        }

        let spurious: Vec<&String> = mine.difference(&theirs).copied().collect();
        if !spurious.is_empty() {
            statements.push(Statement::new(
                format!("Delete spurious {} members.", self.name),
                format!("REVOKE {role} FROM {};", quote_names(spurious)),
            ));
        }

        statements
    }

    /// Statements dropping this role
    ///
    /// Ownership and ACLs are per database, so the purge runs once in each
    /// database before the cluster-wide drop.
    pub fn drop(&self) -> Vec<Statement> {
        let role = quote_ident(&self.name);
        // Inside EXECUTE '...' the identifier is part of a string literal.
        let inner = role.replace('\'', "''");
        let tag = dollar_tag(&inner);
        vec![
            Statement::new(
                format!(
                    "Reassign {} objects and purge ACL on {}.",
                    self.name, DBNAME_PLACEHOLDER
                ),
                format!(
                    "DO {tag}BEGIN EXECUTE 'GRANT {inner} TO '||SESSION_USER; END{tag};\n\
                     DO {tag}BEGIN EXECUTE 'REASSIGN OWNED BY {inner} TO '||SESSION_USER; END{tag};\n\
                     DROP OWNED BY {role};"
                ),
            )
            .on(Target::AllDatabases),
            Statement::new(format!("Drop {}.", self.name), format!("DROP ROLE {role};")),
        ]
    }

    /// Statement renaming the lowercase role to the properly cased name
    pub fn rename(&self) -> Vec<Statement> {
        vec![Statement::new(
            format!("Rename {} to {}.", self.lname, self.name),
            format!(
                "ALTER ROLE {} RENAME TO {};",
                quote_ident(&self.lname),
                quote_ident(&self.name)
            ),
        )]
    }

    /// Replace lowercase member names that were just renamed
    pub fn rename_members(&mut self, renamed: &HashMap<String, Role>) {
        for member in self.members.iter_mut() {
            if let Some(role) = renamed.get(member.as_str()) {
                *member = role.name.clone();
            }
        }
    }

    /// Fold another definition of the same role into this one
    pub fn merge(&mut self, other: Role) -> Result<()> {
        self.options.merge(&other.options).map_err(|e| match e {
            RoleSyncError::ConflictingOptions { option, .. } => RoleSyncError::ConflictingOptions {
                role: self.name.clone(),
                option,
            },
            other => other,
        })?;
        self.members.extend(other.members);
        self.parents.extend(other.parents);
        if self.comment.is_none() {
            self.comment = other.comment;
        }
        Ok(())
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Role {}

impl Hash for Role {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
