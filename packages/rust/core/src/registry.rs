//! Named contributions: external libraries and context things.
//!
//! Each registry rejects a second entry under an existing name. Entries are
//! built completely (all concatenations resolved) before they are inserted,
//! so a registry never holds a half-populated entry.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use bundlewright_shared::{
    BundleError, BundleManifest, ContentKind, ContextThingEntry, ContextThingKind,
    ExternalLibraryEntry, RESERVED_MANIFEST_KEYS, Result,
};
use bundlewright_transform::TransformGateway;

use crate::concat::{ContentFragment, concat};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed map that refuses to overwrite.
#[derive(Debug)]
pub struct Registry<T> {
    label: &'static str,
    entries: BTreeMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: BTreeMap::new(),
        }
    }

    /// Registry name used in conflict messages (e.g. `services`).
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `value` unless `name` is taken; on conflict the value is handed back.
    pub fn insert_if_absent(&mut self, name: String, value: T) -> std::result::Result<(), T> {
        use std::collections::btree_map::Entry;

        match self.entries.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
            Entry::Occupied(_) => Err(value),
        }
    }

    /// Sorted snapshot for the manifest, `None` when empty.
    fn snapshot(&self) -> Option<BTreeMap<String, T>>
    where
        T: Clone,
    {
        (!self.entries.is_empty()).then(|| self.entries.clone())
    }
}

// ---------------------------------------------------------------------------
// Registration inputs
// ---------------------------------------------------------------------------

/// An external library contribution.
#[derive(Debug, Clone, Default)]
pub struct LibrarySpec {
    pub name: String,
    /// Libraries this one needs, in load order.
    pub depends_on: Option<Vec<String>>,
    /// Script fragments; `None` for style-only libraries.
    pub scripts: Option<Vec<ContentFragment>>,
    pub styles: Vec<ContentFragment>,
}

impl LibrarySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A service, initializer or component contribution.
#[derive(Debug, Clone)]
pub struct ContextThingSpec {
    pub kind: ContextThingKind,
    pub name: String,
    pub uses_application: bool,
    pub depends_on_libraries: Option<Vec<String>>,
    pub depends_on_services: Option<Vec<String>>,
    pub depends_on_components: Option<Vec<String>>,
    pub context_plugins: Option<Vec<String>>,
    pub aliases: Option<Vec<String>>,
    pub is_context_plugin_provider: bool,
    /// Script fragments, always concatenated.
    pub scripts: Vec<ContentFragment>,
    pub styles: Vec<ContentFragment>,
    /// Markup fragments; only concatenated when present.
    pub markup: Option<Vec<ContentFragment>>,
}

impl ContextThingSpec {
    pub fn new(kind: ContextThingKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            uses_application: false,
            depends_on_libraries: None,
            depends_on_services: None,
            depends_on_components: None,
            context_plugins: None,
            aliases: None,
            is_context_plugin_provider: false,
            scripts: Vec::new(),
            styles: Vec::new(),
            markup: None,
        }
    }

    /// Banner title, e.g. `Component Todos.CreateTask`.
    pub fn title(&self) -> String {
        format!("{} {}", self.kind.label(), self.name)
    }
}

/// A fully built entry plus the style blob it contributes to the bundle.
#[derive(Debug)]
pub struct Prepared<T> {
    pub name: String,
    pub entry: T,
    pub style: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry builders (async, lock-free)
// ---------------------------------------------------------------------------

/// Run every concatenation an external library needs.
pub async fn prepare_library(
    spec: LibrarySpec,
    gateway: &dyn TransformGateway,
) -> Result<Prepared<ExternalLibraryEntry>> {
    let LibrarySpec {
        name,
        depends_on,
        scripts,
        styles,
    } = spec;
    let title = format!("ExternalLibrary {name}");

    let script = async {
        match scripts {
            Some(fragments) => concat(&title, fragments, ContentKind::Script, gateway)
                .await
                .map(Some),
            None => Ok(None),
        }
    };
    let style = concat_styles(&title, styles, gateway);
    let (script, style) = tokio::try_join!(script, style)?;

    debug!(library = %name, has_script = script.is_some(), has_style = style.is_some(), "library prepared");

    Ok(Prepared {
        name,
        entry: ExternalLibraryEntry { depends_on, script },
        style,
    })
}

/// Run every concatenation a context thing needs.
pub async fn prepare_context_thing(
    spec: ContextThingSpec,
    gateway: &dyn TransformGateway,
) -> Result<Prepared<ContextThingEntry>> {
    let title = spec.title();
    let ContextThingSpec {
        kind,
        name,
        uses_application,
        depends_on_libraries,
        depends_on_services,
        depends_on_components,
        context_plugins,
        aliases,
        is_context_plugin_provider,
        scripts,
        styles,
        markup,
    } = spec;

    if markup.is_some() && context_plugins.is_none() {
        warn!(%title, "markup registered without context plugins");
    }

    let script = concat(&title, scripts, ContentKind::Script, gateway);
    let markup = async {
        match markup {
            Some(fragments) => concat(&title, fragments, ContentKind::Markup, gateway)
                .await
                .map(Some),
            None => Ok(None),
        }
    };
    let style = concat_styles(&title, styles, gateway);
    let (script, markup, style) = tokio::try_join!(script, markup, style)?;

    debug!(%kind, thing = %name, has_markup = markup.is_some(), "context thing prepared");

    Ok(Prepared {
        name,
        entry: ContextThingEntry {
            uses_application,
            depends_on_libraries,
            depends_on_services,
            depends_on_components,
            context_plugins,
            aliases,
            is_context_plugin_provider,
            script,
            markup,
        },
        style,
    })
}

async fn concat_styles(
    title: &str,
    styles: Vec<ContentFragment>,
    gateway: &dyn TransformGateway,
) -> Result<Option<String>> {
    if styles.is_empty() {
        return Ok(None);
    }
    concat(title, styles, ContentKind::Style, gateway).await.map(Some)
}

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

/// Everything registered for one bundle except themes and auxiliary files.
#[derive(Debug)]
pub struct Contributions {
    bundle: String,
    properties: BTreeMap<String, Value>,
    libraries: Registry<ExternalLibraryEntry>,
    services: Registry<ContextThingEntry>,
    initializers: Registry<ContextThingEntry>,
    components: Registry<ContextThingEntry>,
    other_styles: Vec<String>,
}

impl Contributions {
    pub fn new(bundle: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            properties: BTreeMap::new(),
            libraries: Registry::new("externalLibraries"),
            services: Registry::new(ContextThingKind::Service.plural()),
            initializers: Registry::new(ContextThingKind::Initializer.plural()),
            components: Registry::new(ContextThingKind::Component.plural()),
            other_styles: Vec::new(),
        }
    }

    /// Set a free-form bundle property. Manifest-owned keys are rejected.
    pub fn put_property(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if RESERVED_MANIFEST_KEYS.contains(&key.as_str()) {
            return Err(BundleError::validation(format!(
                "bundle property \"{key}\" is reserved by the manifest"
            )));
        }
        self.properties.insert(key, value);
        Ok(())
    }

    pub fn libraries(&self) -> &Registry<ExternalLibraryEntry> {
        &self.libraries
    }

    pub fn things(&self, kind: ContextThingKind) -> &Registry<ContextThingEntry> {
        match kind {
            ContextThingKind::Service => &self.services,
            ContextThingKind::Initializer => &self.initializers,
            ContextThingKind::Component => &self.components,
        }
    }

    fn things_mut(&mut self, kind: ContextThingKind) -> &mut Registry<ContextThingEntry> {
        match kind {
            ContextThingKind::Service => &mut self.services,
            ContextThingKind::Initializer => &mut self.initializers,
            ContextThingKind::Component => &mut self.components,
        }
    }

    /// Fail early when a library name is already taken.
    pub fn ensure_library_free(&self, name: &str) -> Result<()> {
        if self.libraries.contains(name) {
            return Err(BundleError::duplicate(&self.bundle, self.libraries.label(), name));
        }
        Ok(())
    }

    /// Fail early when a context-thing name is already taken for `kind`.
    pub fn ensure_thing_free(&self, kind: ContextThingKind, name: &str) -> Result<()> {
        let registry = self.things(kind);
        if registry.contains(name) {
            return Err(BundleError::duplicate(&self.bundle, registry.label(), name));
        }
        Ok(())
    }

    /// Insert a prepared library, then append its style blob.
    pub fn commit_library(&mut self, prepared: Prepared<ExternalLibraryEntry>) -> Result<()> {
        let Prepared { name, entry, style } = prepared;
        if self.libraries.insert_if_absent(name.clone(), entry).is_err() {
            return Err(BundleError::duplicate(&self.bundle, self.libraries.label(), name));
        }
        self.other_styles.extend(style);
        Ok(())
    }

    /// Insert a prepared context thing, then append its style blob.
    pub fn commit_context_thing(
        &mut self,
        kind: ContextThingKind,
        prepared: Prepared<ContextThingEntry>,
    ) -> Result<()> {
        let Prepared { name, entry, style } = prepared;
        let bundle = self.bundle.clone();
        let registry = self.things_mut(kind);
        if registry.insert_if_absent(name.clone(), entry).is_err() {
            return Err(BundleError::duplicate(bundle, registry.label(), name));
        }
        self.other_styles.extend(style);
        Ok(())
    }

    /// Style blobs from libraries and context things, in commit order.
    pub fn other_styles(&self) -> &[String] {
        &self.other_styles
    }

    /// Assemble the manifest. Empty sections are omitted; `css` is only set
    /// when the bundle ships a style file.
    pub fn build_manifest(&self, toolchain: &str, encoding: &str, has_css: bool) -> BundleManifest {
        BundleManifest {
            toolchain: toolchain.to_string(),
            encoding: encoding.to_string(),
            properties: self
                .properties
                .iter()
                .filter(|(_, v)| is_truthy(v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            external_libraries: self.libraries.snapshot(),
            services: self.services.snapshot(),
            initializers: self.initializers.snapshot(),
            components: self.components.snapshot(),
            css: has_css.then_some(true),
        }
    }
}

/// Falsy: `null`, `false`, `0`, `""`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlewright_transform::IdentityTransform;
    use serde_json::json;

    fn scripts(texts: &[&str]) -> Vec<ContentFragment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| ContentFragment::inline(format!("s{i}.js"), *t))
            .collect()
    }

    #[test]
    fn insert_if_absent_hands_back_on_conflict() {
        let mut registry: Registry<u32> = Registry::new("numbers");
        assert!(registry.insert_if_absent("one".into(), 1).is_ok());
        assert_eq!(registry.insert_if_absent("one".into(), 11), Err(11));
        assert_eq!(registry.get("one"), Some(&1));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn library_style_goes_to_other_styles() {
        let mut spec = LibrarySpec::new("jquery");
        spec.depends_on = Some(vec!["core".into()]);
        spec.scripts = Some(scripts(&["$();"]));
        spec.styles = vec![ContentFragment::inline("j.css", "p{}")];

        let prepared = prepare_library(spec, &IdentityTransform).await.unwrap();
        assert_eq!(prepared.entry.script.as_deref(), Some("// == ExternalLibrary jquery ==\n$();"));
        assert_eq!(prepared.style.as_deref(), Some("/*! == ExternalLibrary jquery == */\np{}"));

        let mut contributions = Contributions::new("app");
        contributions.commit_library(prepared).unwrap();
        assert_eq!(contributions.other_styles().len(), 1);
        let entry = contributions.libraries().get("jquery").unwrap();
        assert_eq!(entry.depends_on, Some(vec!["core".to_string()]));
    }

    #[tokio::test]
    async fn style_only_library_has_no_script() {
        let mut spec = LibrarySpec::new("normalize");
        spec.styles = vec![ContentFragment::inline("n.css", "html{}")];
        let prepared = prepare_library(spec, &IdentityTransform).await.unwrap();
        assert!(prepared.entry.script.is_none());
        assert!(prepared.style.is_some());
    }

    #[tokio::test]
    async fn context_thing_builds_script_and_markup() {
        let mut spec = ContextThingSpec::new(ContextThingKind::Component, "Button");
        spec.uses_application = true;
        spec.context_plugins = Some(vec!["tpl".into()]);
        spec.scripts = scripts(&["btn();"]);
        spec.markup = Some(vec![ContentFragment::inline("b.html", "<button/>")]);

        let prepared = prepare_context_thing(spec, &IdentityTransform).await.unwrap();
        assert_eq!(prepared.entry.script, "// == Component Button ==\nbtn();");
        assert_eq!(prepared.entry.markup.as_deref(), Some("<button/>"));
        assert!(prepared.entry.uses_application);
        assert!(prepared.style.is_none());
    }

    #[tokio::test]
    async fn markup_without_plugins_is_only_a_warning() {
        let mut spec = ContextThingSpec::new(ContextThingKind::Component, "Bare");
        spec.scripts = scripts(&["bare();"]);
        spec.markup = Some(vec![ContentFragment::inline("bare.html", "<i/>")]);

        let prepared = prepare_context_thing(spec, &IdentityTransform).await.unwrap();
        assert_eq!(prepared.entry.markup.as_deref(), Some("<i/>"));
    }

    #[tokio::test]
    async fn duplicate_names_are_scoped_per_kind() {
        let mut contributions = Contributions::new("app");

        let svc = ContextThingSpec {
            scripts: scripts(&["a();"]),
            ..ContextThingSpec::new(ContextThingKind::Service, "Router")
        };
        let cmp = ContextThingSpec {
            scripts: scripts(&["b();"]),
            ..ContextThingSpec::new(ContextThingKind::Component, "Router")
        };
        let again = svc.clone();

        let p = prepare_context_thing(svc, &IdentityTransform).await.unwrap();
        contributions.commit_context_thing(ContextThingKind::Service, p).unwrap();
        let p = prepare_context_thing(cmp, &IdentityTransform).await.unwrap();
        contributions.commit_context_thing(ContextThingKind::Component, p).unwrap();

        assert!(contributions.ensure_thing_free(ContextThingKind::Initializer, "Router").is_ok());
        let err = contributions
            .ensure_thing_free(ContextThingKind::Service, "Router")
            .unwrap_err();
        assert!(matches!(err, BundleError::DuplicateName { .. }));

        let p = prepare_context_thing(again, &IdentityTransform).await.unwrap();
        let err = contributions
            .commit_context_thing(ContextThingKind::Service, p)
            .unwrap_err();
        assert!(err.to_string().contains("several services \"Router\""));
    }

    #[test]
    fn reserved_property_keys_are_rejected() {
        let mut contributions = Contributions::new("app");
        assert!(contributions.put_property("preload", json!(["x"])).is_ok());
        let err = contributions.put_property("services", json!(1)).unwrap_err();
        assert!(matches!(err, BundleError::Validation { .. }));
    }

    #[tokio::test]
    async fn manifest_keeps_only_truthy_properties_and_non_empty_sections() {
        let mut contributions = Contributions::new("app");
        contributions.put_property("title", json!("Todos")).unwrap();
        contributions.put_property("empty", json!("")).unwrap();
        contributions.put_property("off", json!(false)).unwrap();
        contributions.put_property("zero", json!(0)).unwrap();
        contributions.put_property("none", Value::Null).unwrap();
        contributions.put_property("count", json!(3)).unwrap();

        let mut spec = LibrarySpec::new("lib");
        spec.scripts = Some(scripts(&["l();"]));
        let prepared = prepare_library(spec, &IdentityTransform).await.unwrap();
        contributions.commit_library(prepared).unwrap();

        let manifest = contributions.build_manifest("0.1.0", "UTF-8", false);
        let keys: Vec<&str> = manifest.properties.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["count", "title"]);
        assert!(manifest.external_libraries.is_some());
        assert!(manifest.services.is_none());
        assert!(manifest.components.is_none());
        assert!(manifest.css.is_none());

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["title"], "Todos");
        assert!(json.get("initializers").is_none());
        assert!(json.get("css").is_none());

        let manifest = contributions.build_manifest("0.1.0", "UTF-8", true);
        assert_eq!(manifest.css, Some(true));
    }
}
