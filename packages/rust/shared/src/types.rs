//! Core domain types for bundles and their manifest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Manifest keys owned by the assembler; bundle properties may not use them.
pub const RESERVED_MANIFEST_KEYS: &[&str] = &[
    "toolchain",
    "encoding",
    "externalLibraries",
    "services",
    "initializers",
    "components",
    "css",
];

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Kind of textual content flowing through a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Script,
    Style,
    Markup,
}

impl ContentKind {
    /// Lowercase label used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style => "style",
            Self::Markup => "markup",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a named contribution living in one of the three context registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextThingKind {
    Service,
    Initializer,
    Component,
}

impl ContextThingKind {
    pub const ALL: [ContextThingKind; 3] = [Self::Service, Self::Initializer, Self::Component];

    /// Title-case label used in provenance banners (`Service Router`).
    pub fn label(self) -> &'static str {
        match self {
            Self::Service => "Service",
            Self::Initializer => "Initializer",
            Self::Component => "Component",
        }
    }

    /// Manifest section name, also used as the registry name in conflicts.
    pub fn plural(self) -> &'static str {
        match self {
            Self::Service => "services",
            Self::Initializer => "initializers",
            Self::Component => "components",
        }
    }
}

impl std::fmt::Display for ContextThingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Kinds of code-unit directories in a source tree.
///
/// Their directories are never copied as auxiliary content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeUnitKind {
    Bundle,
    Library,
    Service,
    Initializer,
    Component,
    Theme,
}

impl CodeUnitKind {
    pub const ALL: [CodeUnitKind; 6] = [
        Self::Bundle,
        Self::Library,
        Self::Service,
        Self::Initializer,
        Self::Component,
        Self::Theme,
    ];

    /// Directory name suffix marking a unit of this kind.
    pub fn dir_suffix(self) -> &'static str {
        match self {
            Self::Bundle => ".bnd",
            Self::Library => ".lib",
            Self::Service => ".svc",
            Self::Initializer => ".ini",
            Self::Component => ".cmp",
            Self::Theme => ".thm",
        }
    }

    /// Whether `name` ends with the suffix of any code-unit kind.
    pub fn is_unit_dir_name(name: &str) -> bool {
        Self::ALL.iter().any(|k| name.ends_with(k.dir_suffix()))
    }
}

// ---------------------------------------------------------------------------
// BundleId
// ---------------------------------------------------------------------------

/// Name and optional version of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleId {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl BundleId {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version: version.filter(|v| !v.is_empty()),
        }
    }

    /// Output directory name: `name` or `name-version`.
    pub fn dir_name(&self) -> String {
        match &self.version {
            Some(v) => format!("{}-{v}", self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dir_name())
    }
}

// ---------------------------------------------------------------------------
// Manifest entries
// ---------------------------------------------------------------------------

/// An external library as listed in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalLibraryEntry {
    /// Libraries this one depends on, in load order.
    #[serde(
        rename = "useExternalLibraries",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on: Option<Vec<String>>,
    /// Concatenated script blob.
    #[serde(rename = "js", default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// A service, initializer or component as listed in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextThingEntry {
    #[serde(rename = "useApplication", default, skip_serializing_if = "is_false")]
    pub uses_application: bool,
    #[serde(
        rename = "useExternalLibraries",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on_libraries: Option<Vec<String>>,
    #[serde(rename = "useServices", default, skip_serializing_if = "Option::is_none")]
    pub depends_on_services: Option<Vec<String>>,
    #[serde(rename = "useComponents", default, skip_serializing_if = "Option::is_none")]
    pub depends_on_components: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_plugins: Option<Vec<String>>,
    #[serde(rename = "alias", default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_context_plugin_provider: bool,
    /// Concatenated script blob (always present).
    #[serde(rename = "js")]
    pub script: String,
    /// Concatenated markup blob.
    #[serde(rename = "templates", default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// BundleManifest
// ---------------------------------------------------------------------------

/// The `{name}.json` descriptor stored at the root of each bundle directory.
///
/// Registry sections are omitted when empty, never emitted as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    /// Version of the toolchain that produced the bundle.
    pub toolchain: String,
    /// Text encoding of the generated files.
    pub encoding: String,
    /// Scalar bundle properties (truthy values only).
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_libraries: Option<BTreeMap<String, ExternalLibraryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<BTreeMap<String, ContextThingEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializers: Option<BTreeMap<String, ContextThingEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, ContextThingEntry>>,
    /// Set when the bundle ships an aggregate style file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<bool>,
}
