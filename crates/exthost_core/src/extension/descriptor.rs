//! Extension descriptor parsing with fallback defaults.
//!
//! # Responsibility
//! - Turn one raw `extension.toml` source into an `ExtensionDescriptor`.
//! - Record every substitution as a `MetadataIssue` instead of failing.
//!
//! # Invariants
//! - Parsing never fails: an unreadable or unparsable source still yields a
//!   descriptor with a valid name and an empty dependency set.
//! - Descriptors are immutable once built; loaders share them via `Arc`.
//! - A malformed maintainer contact is a metadata issue, never a hard error.

use crate::diagnostics::Diagnostics;
use crate::logging::sanitize_message;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

/// Filename every extension directory must contain.
pub const DESCRIPTOR_FILENAME: &str = "extension.toml";
/// Version substituted when `version` is missing or malformed.
pub const DEFAULT_VERSION: &str = "0.0.0";
/// Name used when neither the descriptor nor its origin yields a usable id.
pub const FALLBACK_NAME: &str = "unnamed";

pub const FIELD_NAME: &str = "name";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_VERSION: &str = "version";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_DEPENDENCIES: &str = "dependencies";
pub const FIELD_MAINTAINER: &str = "maintainer";
/// Pseudo-field used for issues affecting the whole source.
pub const FIELD_SOURCE: &str = "source";

const KNOWN_FIELDS: &[&str] = &[
    FIELD_NAME,
    FIELD_TITLE,
    FIELD_VERSION,
    FIELD_DESCRIPTION,
    FIELD_DEPENDENCIES,
    FIELD_MAINTAINER,
];

const MAX_ISSUE_TEXT_CHARS: usize = 120;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s<>]+@[^@\s<>.]+(\.[^@\s<>.]+)+$").expect("valid email regex")
});

/// Raw bytes of one descriptor as handed to the metadata loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceContent {
    Text(String),
    /// The file could not be read; carries the I/O error message.
    Unreadable(String),
}

/// One descriptor source plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSource {
    /// Directory name (or in-memory key) used as fallback identity.
    pub origin: String,
    pub path: Option<PathBuf>,
    pub content: SourceContent,
}

impl DescriptorSource {
    pub fn from_text(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: None,
            content: SourceContent::Text(text.into()),
        }
    }

    pub fn unreadable(origin: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: None,
            content: SourceContent::Unreadable(error.into()),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Address used to route runtime error reports to an extension's author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintainerContact {
    pub name: Option<String>,
    pub email: String,
}

impl MaintainerContact {
    /// Parses `Name <user@host>` or a bare `user@host`.
    ///
    /// Returns `None` when the address part is not a plausible email.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (name, email) = match (trimmed.find('<'), trimmed.strip_suffix('>')) {
            (Some(open), Some(without_close)) => {
                let name = trimmed[..open].trim();
                let email = without_close[open + 1..].trim();
                ((!name.is_empty()).then(|| name.to_string()), email)
            }
            (None, None) => (None, trimmed),
            _ => return None,
        };
        if !EMAIL_RE.is_match(email) {
            return None;
        }
        Some(Self {
            name,
            email: email.to_string(),
        })
    }
}

impl Display for MaintainerContact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// Non-fatal problem found while reading one descriptor field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataIssue {
    pub field: String,
    pub problem: String,
    /// Human-readable description of the value that was substituted.
    pub fallback: String,
}

impl MetadataIssue {
    fn new(field: &str, problem: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            problem: problem.into(),
            fallback: fallback.into(),
        }
    }
}

impl Display for MetadataIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}; using {}", self.field, self.problem, self.fallback)
    }
}

/// Parsed, fully-defaulted metadata of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    /// Unique extension id, e.g. `score.wizard`.
    pub name: String,
    pub title: String,
    pub version: String,
    pub description: String,
    /// Declared dependencies in declaration order, deduplicated.
    pub dependencies: Vec<String>,
    pub maintainer: Option<MaintainerContact>,
    /// Keys the loader does not interpret, kept as their TOML text.
    pub extra: BTreeMap<String, String>,
    pub origin: String,
    pub issues: Vec<MetadataIssue>,
}

impl ExtensionDescriptor {
    /// Builds a clean in-memory descriptor, used for compiled-in extensions.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            version: DEFAULT_VERSION.to_string(),
            description: String::new(),
            dependencies: Vec::new(),
            maintainer: None,
            extra: BTreeMap::new(),
            origin: name.clone(),
            issues: Vec::new(),
            name,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_maintainer(mut self, contact: MaintainerContact) -> Self {
        self.maintainer = Some(contact);
        self
    }

    /// True when at least one field was substituted during parsing.
    pub fn has_fallbacks(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|dependency| dependency == name)
    }
}

/// Parses one descriptor source, substituting defaults for bad fields.
pub fn parse_descriptor(source: &DescriptorSource) -> ExtensionDescriptor {
    let mut issues = Vec::new();
    let table = match &source.content {
        SourceContent::Text(text) => match toml::from_str::<toml::Table>(text) {
            Ok(table) => table,
            Err(err) => {
                issues.push(MetadataIssue::new(
                    FIELD_SOURCE,
                    format!("unparsable descriptor: {}", condense(&err.to_string())),
                    "empty descriptor",
                ));
                toml::Table::new()
            }
        },
        SourceContent::Unreadable(err) => {
            issues.push(MetadataIssue::new(
                FIELD_SOURCE,
                format!("unreadable descriptor: {}", condense(err)),
                "empty descriptor",
            ));
            toml::Table::new()
        }
    };

    let name = read_name(&table, &source.origin, &mut issues);
    let title = read_text(&table, FIELD_TITLE, true, &mut issues, &name)
        .unwrap_or_else(|| name.clone());
    let version = read_version(&table, &mut issues);
    let description =
        read_text(&table, FIELD_DESCRIPTION, false, &mut issues, "an empty description")
            .unwrap_or_default();
    let dependencies = read_dependencies(&table, &mut issues);
    let maintainer = read_maintainer(&table, &mut issues);

    let extra = table
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| {
            let text = match value {
                toml::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect();

    ExtensionDescriptor {
        name,
        title,
        version,
        description,
        dependencies,
        maintainer,
        extra,
        origin: source.origin.clone(),
        issues,
    }
}

/// Parses every source in declaration order and records each metadata
/// issue in `diagnostics`.
pub fn load_descriptors(
    sources: &[DescriptorSource],
    diagnostics: &Diagnostics,
) -> Vec<Arc<ExtensionDescriptor>> {
    sources
        .iter()
        .map(|source| {
            let descriptor = parse_descriptor(source);
            for issue in &descriptor.issues {
                warn!(
                    "event=descriptor_parse module=metadata status=warn extension={} origin={} field={} problem={}",
                    descriptor.name, descriptor.origin, issue.field, issue.problem
                );
                diagnostics.record_metadata(&descriptor.name, issue.clone());
            }
            Arc::new(descriptor)
        })
        .collect()
}

/// Returns whether `value` is a valid extension id.
///
/// Ids are lowercase ASCII letters/digits separated by single `.`, `_` or
/// `-`, neither starting nor ending with a separator.
pub fn is_valid_extension_name(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

/// Maps an arbitrary origin label (usually a directory name) to id form.
pub fn normalize_origin_name(origin: &str) -> String {
    let mut normalized = String::with_capacity(origin.len());
    for c in origin.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            normalized.push(c);
        } else if !normalized.is_empty() && !normalized.ends_with(['.', '_', '-']) {
            normalized.push(if matches!(c, '.' | '_') { c } else { '-' });
        }
    }
    let trimmed = normalized.trim_end_matches(['.', '_', '-']);
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn read_name(table: &toml::Table, origin: &str, issues: &mut Vec<MetadataIssue>) -> String {
    let fallback = normalize_origin_name(origin);
    let fallback_text = format!("`{fallback}` derived from `{origin}`");
    match table.get(FIELD_NAME) {
        None => {
            issues.push(MetadataIssue::new(FIELD_NAME, "missing", fallback_text));
            fallback
        }
        Some(toml::Value::String(raw)) if is_valid_extension_name(raw.trim()) => {
            raw.trim().to_string()
        }
        Some(toml::Value::String(raw)) => {
            issues.push(MetadataIssue::new(
                FIELD_NAME,
                format!("invalid extension name `{}`", condense(raw)),
                fallback_text,
            ));
            fallback
        }
        Some(other) => {
            issues.push(MetadataIssue::new(
                FIELD_NAME,
                format!("expected a string, found {}", other.type_str()),
                fallback_text,
            ));
            fallback
        }
    }
}

fn read_text(
    table: &toml::Table,
    field: &str,
    expected: bool,
    issues: &mut Vec<MetadataIssue>,
    fallback: &str,
) -> Option<String> {
    match table.get(field) {
        None => {
            if expected {
                issues.push(MetadataIssue::new(field, "missing", format!("`{fallback}`")));
            }
            None
        }
        Some(toml::Value::String(raw)) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        Some(toml::Value::String(_)) => {
            if expected {
                issues.push(MetadataIssue::new(field, "empty string", format!("`{fallback}`")));
            }
            None
        }
        Some(other) => {
            issues.push(MetadataIssue::new(
                field,
                format!("expected a string, found {}", other.type_str()),
                format!("`{fallback}`"),
            ));
            None
        }
    }
}

fn read_version(table: &toml::Table, issues: &mut Vec<MetadataIssue>) -> String {
    let Some(raw) = read_text(table, FIELD_VERSION, true, issues, DEFAULT_VERSION) else {
        return DEFAULT_VERSION.to_string();
    };
    if is_semver_triplet(&raw) {
        return raw;
    }
    issues.push(MetadataIssue::new(
        FIELD_VERSION,
        format!("invalid version `{}` (expected major.minor.patch)", condense(&raw)),
        format!("`{DEFAULT_VERSION}`"),
    ));
    DEFAULT_VERSION.to_string()
}

fn read_dependencies(table: &toml::Table, issues: &mut Vec<MetadataIssue>) -> Vec<String> {
    let items = match table.get(FIELD_DEPENDENCIES) {
        None => return Vec::new(),
        Some(toml::Value::Array(items)) => items,
        Some(other) => {
            issues.push(MetadataIssue::new(
                FIELD_DEPENDENCIES,
                format!("expected an array of names, found {}", other.type_str()),
                "no dependencies",
            ));
            return Vec::new();
        }
    };

    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::with_capacity(items.len());
    for item in items {
        let name = match item {
            toml::Value::String(raw) if is_valid_extension_name(raw.trim()) => raw.trim(),
            toml::Value::String(raw) => {
                issues.push(MetadataIssue::new(
                    FIELD_DEPENDENCIES,
                    format!("invalid dependency name `{}`", condense(raw)),
                    "entry dropped",
                ));
                continue;
            }
            other => {
                issues.push(MetadataIssue::new(
                    FIELD_DEPENDENCIES,
                    format!("expected a string entry, found {}", other.type_str()),
                    "entry dropped",
                ));
                continue;
            }
        };
        if !seen.insert(name.to_string()) {
            issues.push(MetadataIssue::new(
                FIELD_DEPENDENCIES,
                format!("duplicate dependency `{name}`"),
                "entry dropped",
            ));
            continue;
        }
        dependencies.push(name.to_string());
    }
    dependencies
}

fn read_maintainer(
    table: &toml::Table,
    issues: &mut Vec<MetadataIssue>,
) -> Option<MaintainerContact> {
    let raw = read_text(table, FIELD_MAINTAINER, false, issues, "no contact")?;
    let contact = MaintainerContact::parse(&raw);
    if contact.is_none() {
        issues.push(MetadataIssue::new(
            FIELD_MAINTAINER,
            format!("malformed maintainer contact `{}`", condense(&raw)),
            "no contact",
        ));
    }
    contact
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn condense(value: &str) -> String {
    sanitize_message(value.trim(), MAX_ISSUE_TEXT_CHARS)
}
