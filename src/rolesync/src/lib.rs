//! # pg-rolesync
//!
//! Reconciles PostgreSQL roles, their attributes and their memberships with
//! a desired state computed from directory entries.
//!
//! ## Features
//!
//! - **Three-way diff** between managed, desired and available roles
//! - **Dependency ordering**: members are created before the groups granting
//!   them, groups are dropped before their members
//! - **Rename detection** for roles differing only in letter case
//! - **Capability discovery**: attributes unsupported by the server or hidden
//!   to non-superusers never produce spurious changes
//! - **Per-database fan-out** of ownership reassignment through a bounded
//!   session pool
//!
//! ## Example
//!
//! ```rust
//! use pg_rolesync::{Capabilities, Role, RoleOptions, RoleSet};
//!
//! let mut options: RoleOptions = "LOGIN".parse().unwrap();
//! options.fill_with_defaults();
//!
//! let desired: RoleSet = [Role::new("alice").with_options(options)].into_iter().collect();
//! let available = RoleSet::new();
//! let managed = RoleSet::new();
//!
//! let statements = managed.diff(&desired, &available, &Capabilities::all());
//! assert!(statements[0].sql.starts_with("CREATE ROLE \"alice\""));
//! ```

pub mod config;
pub mod connstring;
pub mod error;
pub mod inspect;
pub mod options;
pub mod role;
pub mod roleset;
pub mod rule;
pub mod session;
pub mod statement;
pub mod sync;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::{Result, RoleSyncError};
pub use inspect::Inspector;
pub use options::{Capabilities, RoleAttribute, RoleOptions};
pub use role::Role;
pub use roleset::RoleSet;
pub use rule::{Entry, RoleRule};
pub use session::{Connection, Connector, ResultSet, SessionPool};
pub use statement::{Statement, Target};
pub use sync::{build_desired, Reconciler, SyncSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
