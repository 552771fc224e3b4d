//! Reconciliation run: inspect, diff, expand, execute

use crate::error::Result;
use crate::inspect::Inspector;
use crate::rule::{Entry, RoleRule};
use crate::roleset::RoleSet;
use crate::session::{Connector, SessionPool};
use crate::statement::{expand_all, Statement};
use tracing::{debug, info};

/// Build the desired role set from rules and directory entries
///
/// Static rules are generated once, templated rules once per entry.
/// Definitions of the same role are merged before defaults are filled in
/// and parent declarations are resolved into memberships.
pub fn build_desired(rules: &[RoleRule], entries: &[Entry]) -> Result<RoleSet> {
    let empty = Entry::new();
    let mut desired = RoleSet::new();

    for rule in rules {
        if rule.is_static() {
            for role in rule.generate(&empty) {
                desired.add(role)?;
            }
            continue;
        }
        for entry in entries {
            for role in rule.generate(entry) {
                desired.add(role)?;
            }
        }
    }

    for role in desired.iter_mut() {
        role.options.fill_with_defaults();
    }
    desired.resolve_membership()?;
    Ok(desired)
}

/// Summary of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Statements executed, or that would have been in dry run
    pub statements: usize,

    /// Whether statements were only logged
    pub dry_run: bool,
}

/// Drives one reconciliation run over a session pool
pub struct Reconciler<C: Connector> {
    pool: SessionPool<C>,
    inspector: Inspector,
    dry_run: bool,
}

impl<C: Connector> Reconciler<C> {
    /// Create a reconciler; runs are dry by default
    pub fn new(pool: SessionPool<C>, inspector: Inspector) -> Self {
        Self {
            pool,
            inspector,
            dry_run: true,
        }
    }

    /// Choose between logging and executing statements
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Session pool, for inspection after a run
    pub fn pool(&self) -> &SessionPool<C> {
        &self.pool
    }

    /// Bring the cluster to `desired`
    ///
    /// Stops at the first failing statement; statements already executed stay
    /// committed. The pool is closed whether the run succeeds or not.
    pub async fn run(&mut self, desired: &RoleSet) -> Result<SyncSummary> {
        let applied = self.reconcile(desired).await;
        let closed = self.pool.close().await;
        let count = applied?;
        closed?;

        if count == 0 {
            info!("Nothing to do.");
        } else if self.dry_run {
            info!("Comparison complete, {} statements to run. Set ROLESYNC_REAL=1 to apply.", count);
        } else {
            info!("Synchronization complete, {} statements run.", count);
        }

        Ok(SyncSummary {
            statements: count,
            dry_run: self.dry_run,
        })
    }

    async fn reconcile(&mut self, desired: &RoleSet) -> Result<usize> {
        let caps = self.inspector.capabilities(&mut self.pool).await?;
        let databases = self.inspector.databases(&mut self.pool).await?;
        let available = self.inspector.roles(&mut self.pool, &caps).await?;
        let managed = self.inspector.managed(&available);
        debug!(
            "Managing {} roles, {} desired.",
            managed.len(),
            desired.len()
        );

        let statements = managed.diff(desired, &available, &caps);
        let mut count = 0;
        for statement in expand_all(statements, &databases) {
            count += 1;
            if self.dry_run {
                info!("{}", would(&statement));
                continue;
            }
            info!("{}", statement);
            self.pool.execute(&statement).await?;
        }
        Ok(count)
    }
}

/// Dry-run phrasing of a statement message
fn would(statement: &Statement) -> String {
    let mut chars = statement.message.chars();
    match chars.next() {
        Some(first) => format!("Would {}{}", first.to_lowercase(), chars.as_str()),
        None => "Would run an unnamed statement.".to_string(),
    }
}
