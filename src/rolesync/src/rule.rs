//! Role rules: templates turning directory entries into desired roles

use crate::options::RoleOptions;
use crate::role::Role;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use tracing::warn;

/// A directory entry: attribute name to its values
pub type Entry = BTreeMap<String, Vec<String>>;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").expect("Invalid placeholder regex pattern")
});

/// Attribute names referenced by `template`, in order of appearance
fn fields(template: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let field = caps[1].to_string();
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

/// Expand `template` with every combination of the referenced attribute values
///
/// A referenced attribute missing from the entry yields no value at all.
pub fn expand_template(template: &str, entry: &Entry) -> Vec<String> {
    let mut results = vec![template.to_string()];
    for field in fields(template) {
        let Some(values) = entry.get(&field) else {
            return Vec::new();
        };
        let placeholder = format!("{{{field}}}");
        let placeholder = placeholder.as_str();
        results = results
            .iter()
            .flat_map(|partial| values.iter().map(move |v| partial.replace(placeholder, v)))
            .collect();
    }
    results
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Template for one or more roles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    /// Role name templates
    #[serde(deserialize_with = "one_or_many")]
    pub names: Vec<String>,

    /// Templates of roles to grant the generated roles to
    #[serde(default, deserialize_with = "one_or_many")]
    pub parents: Vec<String>,

    /// Templates of roles granted the generated roles
    #[serde(default, deserialize_with = "one_or_many")]
    pub members: Vec<String>,

    /// Role attributes
    #[serde(default)]
    pub options: RoleOptions,

    /// Comment template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl RoleRule {
    /// Create a rule for the given name templates
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Whether no template references an entry attribute
    pub fn is_static(&self) -> bool {
        self.names
            .iter()
            .chain(&self.parents)
            .chain(&self.members)
            .chain(&self.comment)
            .all(|template| fields(template).is_empty())
    }

    fn build_comment(&self, entry: &Entry) -> Option<String> {
        let template = self.comment.as_ref()?;
        let mut comments = expand_template(template, entry).into_iter();
        let id = entry_id(entry);

        let Some(comment) = comments.next() else {
            warn!("Can't generate comment for {}... Missing attribute?", id);
            return None;
        };
        if comments.next().is_some() {
            warn!("Multiple comments are generated for {}.", id);
        }
        Some(comment)
    }

    /// Roles described by this rule for `entry`
    pub fn generate(&self, entry: &Entry) -> Vec<Role> {
        let expand_all = |templates: &[String]| -> Vec<String> {
            templates
                .iter()
                .flat_map(|t| expand_template(t, entry))
                .collect()
        };
        let members = expand_all(&self.members);
        let parents = expand_all(&self.parents);
        let comment = self.build_comment(entry);

        expand_all(&self.names)
            .into_iter()
            .map(|name| {
                let mut role = Role::new(name)
                    .with_options(self.options.clone())
                    .with_members(members.clone())
                    .with_parents(parents.clone());
                role.comment = comment.clone();
                role
            })
            .collect()
    }
}

fn entry_id(entry: &Entry) -> String {
    entry
        .get("dn")
        .and_then(|values| values.first())
        .map(|dn| dn.chars().take(24).collect())
        .unwrap_or_else(|| "static rule".to_string())
}
