//! Role attributes, server capabilities and tri-state option bags

use crate::error::{Result, RoleSyncError};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Boolean role attribute stored in `pg_authid`
///
/// Variants are declared in catalog column order, which is also the
/// rendering order of option strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleAttribute {
    BypassRls,
    CanLogin,
    CreateDb,
    CreateRole,
    Inherit,
    Replication,
    Superuser,
}

impl RoleAttribute {
    /// Every attribute, in column order
    pub const ALL: [RoleAttribute; 7] = [
        RoleAttribute::BypassRls,
        RoleAttribute::CanLogin,
        RoleAttribute::CreateDb,
        RoleAttribute::CreateRole,
        RoleAttribute::Inherit,
        RoleAttribute::Replication,
        RoleAttribute::Superuser,
    ];

    /// Attributes only a superuser may read or change
    pub const SUPERUSER_ONLY: [RoleAttribute; 3] = [
        RoleAttribute::Superuser,
        RoleAttribute::Replication,
        RoleAttribute::BypassRls,
    ];

    /// Catalog column name
    pub fn column(self) -> &'static str {
        match self {
            RoleAttribute::BypassRls => "rolbypassrls",
            RoleAttribute::CanLogin => "rolcanlogin",
            RoleAttribute::CreateDb => "rolcreatedb",
            RoleAttribute::CreateRole => "rolcreaterole",
            RoleAttribute::Inherit => "rolinherit",
            RoleAttribute::Replication => "rolreplication",
            RoleAttribute::Superuser => "rolsuper",
        }
    }

    /// SQL keyword used in `CREATE ROLE ... WITH`
    pub fn keyword(self) -> &'static str {
        match self {
            RoleAttribute::BypassRls => "BYPASSRLS",
            RoleAttribute::CanLogin => "LOGIN",
            RoleAttribute::CreateDb => "CREATEDB",
            RoleAttribute::CreateRole => "CREATEROLE",
            RoleAttribute::Inherit => "INHERIT",
            RoleAttribute::Replication => "REPLICATION",
            RoleAttribute::Superuser => "SUPERUSER",
        }
    }

    /// Value used when no rule sets the attribute
    pub fn default_value(self) -> bool {
        matches!(self, RoleAttribute::Inherit)
    }

    /// Look up an attribute by catalog column
    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.column() == column)
    }

    /// Look up an attribute by keyword, case-insensitively
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.keyword().eq_ignore_ascii_case(keyword))
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RoleAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Attributes the connected server lets us read and write
///
/// Produced by capability discovery and passed to every renderer and
/// comparison, so that an older server or a non-superuser session never
/// yields spurious differences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    supported: BTreeSet<RoleAttribute>,
}

impl Capabilities {
    /// Capabilities of a recent server with a superuser session
    pub fn all() -> Self {
        Self {
            supported: RoleAttribute::ALL.into_iter().collect(),
        }
    }

    /// Capabilities limited to the given catalog columns
    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut caps = Self::all();
        caps.restrict_to_columns(columns);
        caps
    }

    /// Drop attributes whose column is missing from `columns`
    pub fn restrict_to_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let present: BTreeSet<RoleAttribute> = columns
            .into_iter()
            .filter_map(|c| RoleAttribute::from_column(c.as_ref()))
            .collect();
        self.supported.retain(|a| present.contains(a));
    }

    /// Hide attributes reserved to superusers
    pub fn without_superuser_attributes(mut self) -> Self {
        for attr in RoleAttribute::SUPERUSER_ONLY {
            self.supported.remove(&attr);
        }
        self
    }

    /// Whether `attr` is read and rendered
    pub fn supports(&self, attr: RoleAttribute) -> bool {
        self.supported.contains(&attr)
    }

    /// Supported attributes in column order
    pub fn attributes(&self) -> impl Iterator<Item = RoleAttribute> + '_ {
        self.supported.iter().copied()
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// Tri-state bag of role attributes
///
/// `None` means no source said anything about the attribute yet. Serialized
/// as the `LOGIN NOCREATEDB` keyword string of its set attributes, which
/// parses back to the same bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "OptionsSpec")]
pub struct RoleOptions {
    values: [Option<bool>; 7],
}

impl RoleOptions {
    /// Create an option bag with every attribute unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, builder style
    pub fn with(mut self, attr: RoleAttribute, value: bool) -> Self {
        self.set(attr, value);
        self
    }

    /// Current tri-state value of `attr`
    pub fn get(&self, attr: RoleAttribute) -> Option<bool> {
        self.values[attr.index()]
    }

    /// Value of `attr`, falling back to its default when unset
    pub fn resolved(&self, attr: RoleAttribute) -> bool {
        self.get(attr).unwrap_or_else(|| attr.default_value())
    }

    /// Set `attr` explicitly
    pub fn set(&mut self, attr: RoleAttribute, value: bool) {
        self.values[attr.index()] = Some(value);
    }

    /// Combine `other` into `self`
    ///
    /// Unset attributes adopt the other side. Two explicit, different values
    /// for the same attribute are a conflict.
    pub fn merge(&mut self, other: &RoleOptions) -> Result<()> {
        for attr in RoleAttribute::ALL {
            match (self.get(attr), other.get(attr)) {
                (_, None) => {}
                (None, Some(theirs)) => self.set(attr, theirs),
                (Some(mine), Some(theirs)) if mine != theirs => {
                    return Err(RoleSyncError::ConflictingOptions {
                        role: String::new(),
                        option: attr.keyword().to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Replace every unset attribute with its default
    pub fn fill_with_defaults(&mut self) {
        for attr in RoleAttribute::ALL {
            if self.get(attr).is_none() {
                self.set(attr, attr.default_value());
            }
        }
    }

    /// Compare supported attributes only
    pub fn eq_supported(&self, other: &RoleOptions, caps: &Capabilities) -> bool {
        caps.attributes()
            .all(|attr| self.resolved(attr) == other.resolved(attr))
    }

    /// Render as a `WITH` clause body for the given capabilities
    pub fn display<'a>(&'a self, caps: &'a Capabilities) -> OptionsDisplay<'a> {
        OptionsDisplay {
            options: self,
            caps,
        }
    }

    /// Build options from a keyword map such as `{"LOGIN": true}`
    pub fn from_map(map: &BTreeMap<String, bool>) -> Result<Self> {
        let mut options = Self::new();
        for (keyword, value) in map {
            let attr = RoleAttribute::from_keyword(keyword)
                .ok_or_else(|| RoleSyncError::UnknownOption(keyword.clone()))?;
            options.set(attr, *value);
        }
        Ok(options)
    }
}

impl FromStr for RoleOptions {
    type Err = RoleSyncError;

    /// Parse `LOGIN NOSUPERUSER`-style option strings
    fn from_str(s: &str) -> Result<Self> {
        let mut options = Self::new();
        for word in s.split_whitespace() {
            if let Some(attr) = RoleAttribute::from_keyword(word) {
                options.set(attr, true);
                continue;
            }
            let negated = word
                .get(..2)
                .filter(|prefix| prefix.eq_ignore_ascii_case("NO"))
                .and_then(|_| RoleAttribute::from_keyword(&word[2..]));
            match negated {
                Some(attr) => options.set(attr, false),
                None => return Err(RoleSyncError::UnknownOption(word.to_string())),
            }
        }
        Ok(options)
    }
}

impl fmt::Display for RoleOptions {
    /// Set attributes only, unlike [`RoleOptions::display`]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for attr in RoleAttribute::ALL {
            let Some(value) = self.get(attr) else {
                continue;
            };
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if !value {
                f.write_str("NO")?;
            }
            f.write_str(attr.keyword())?;
        }
        Ok(())
    }
}

impl Serialize for RoleOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Either representation accepted in configuration files
#[derive(Deserialize)]
#[serde(untagged)]
enum OptionsSpec {
    Text(String),
    Map(BTreeMap<String, bool>),
}

impl TryFrom<OptionsSpec> for RoleOptions {
    type Error = RoleSyncError;

    fn try_from(spec: OptionsSpec) -> Result<Self> {
        match spec {
            OptionsSpec::Text(text) => text.parse(),
            OptionsSpec::Map(map) => Self::from_map(&map),
        }
    }
}

/// [`RoleOptions`] rendered against a [`Capabilities`] descriptor
pub struct OptionsDisplay<'a> {
    options: &'a RoleOptions,
    caps: &'a Capabilities,
}

impl fmt::Display for OptionsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for attr in self.caps.attributes() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if !self.options.resolved(attr) {
                f.write_str("NO")?;
            }
            f.write_str(attr.keyword())?;
        }
        Ok(())
    }
}
