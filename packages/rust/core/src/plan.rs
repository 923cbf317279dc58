//! TOML bundle plans.
//!
//! A plan describes everything one bundle is made of. Relative paths are
//! resolved against the directory holding the plan file.
//!
//! ```toml
//! name = "todos"
//! version = "1.2"
//!
//! [properties]
//! title = "Todo list"
//!
//! [[libraries]]
//! name = "jquery"
//! scripts = ["vendor/jquery.min.js"]
//!
//! [[components]]
//! name = "Todos.List"
//! uses_application = true
//! scripts = ["List.cmp/List.js"]
//! styles = ["List.cmp/List.css"]
//! markup = ["List.cmp/List.html"]
//! context_plugins = ["templates"]
//!
//! [[themes]]
//! label = "Theme base"
//! channel = "before"
//! level = 10
//! files = ["base.thm/reset.css"]
//!
//! [[auxiliary]]
//! path = "assets"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use serde::Deserialize;
use tracing::{debug, instrument};

use bundlewright_shared::{BundleError, BundleId, ContextThingKind, Result};

use crate::assembler::BundleAssembler;
use crate::concat::ContentFragment;
use crate::registry::{ContextThingSpec, LibrarySpec};

/// File name endings treated as already transformed.
const PRE_TRANSFORMED_SUFFIXES: &[&str] = &[".min.js", ".min.css"];

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryPlan {
    pub name: String,
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    #[serde(default)]
    pub scripts: Option<Vec<String>>,
    #[serde(default)]
    pub styles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextThingPlan {
    pub name: String,
    #[serde(default)]
    pub uses_application: bool,
    #[serde(default)]
    pub depends_on_libraries: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on_services: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on_components: Option<Vec<String>>,
    #[serde(default)]
    pub context_plugins: Option<Vec<String>>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub context_plugin_provider: bool,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub markup: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThemePlan {
    pub label: String,
    /// `before`, `after`, or empty for the default channel.
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub level: i32,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuxiliaryPlan {
    /// Name in the bundle directory; defaults to the source's file name.
    #[serde(default)]
    pub output_name: Option<String>,
    pub path: String,
}

/// A parsed bundle plan.
#[derive(Debug, Clone, Deserialize)]
pub struct BundlePlan {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub libraries: Vec<LibraryPlan>,
    #[serde(default)]
    pub services: Vec<ContextThingPlan>,
    #[serde(default)]
    pub initializers: Vec<ContextThingPlan>,
    #[serde(default)]
    pub components: Vec<ContextThingPlan>,
    #[serde(default)]
    pub themes: Vec<ThemePlan>,
    #[serde(default)]
    pub auxiliary: Vec<AuxiliaryPlan>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl BundlePlan {
    /// Read and parse a plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&content, base_dir)
            .map_err(|e| BundleError::validation(format!("invalid plan {}: {e}", path.display())))
    }

    /// Parse plan text; relative paths will resolve against `base_dir`.
    pub fn parse(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut plan: Self = toml::from_str(content)
            .map_err(|e| BundleError::validation(format!("failed to parse plan: {e}")))?;
        if plan.name.trim().is_empty() {
            return Err(BundleError::validation("plan name must not be empty"));
        }
        plan.base_dir = base_dir.into();
        Ok(plan)
    }

    pub fn bundle_id(&self) -> BundleId {
        BundleId::new(&self.name, self.version.clone())
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let path = Path::new(rel);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn fragment(&self, rel: &str) -> ContentFragment {
        let fragment = ContentFragment::file(self.resolve(rel));
        if PRE_TRANSFORMED_SUFFIXES.iter().any(|s| rel.ends_with(s)) {
            fragment.pre_transformed()
        } else {
            fragment
        }
    }

    fn fragments(&self, rels: &[String]) -> Vec<ContentFragment> {
        rels.iter().map(|r| self.fragment(r)).collect()
    }

    fn library_spec(&self, plan: &LibraryPlan) -> LibrarySpec {
        LibrarySpec {
            name: plan.name.clone(),
            depends_on: plan.depends_on.clone(),
            scripts: plan.scripts.as_deref().map(|s| self.fragments(s)),
            styles: self.fragments(&plan.styles),
        }
    }

    fn context_thing_spec(&self, kind: ContextThingKind, plan: &ContextThingPlan) -> ContextThingSpec {
        ContextThingSpec {
            uses_application: plan.uses_application,
            depends_on_libraries: plan.depends_on_libraries.clone(),
            depends_on_services: plan.depends_on_services.clone(),
            depends_on_components: plan.depends_on_components.clone(),
            context_plugins: plan.context_plugins.clone(),
            aliases: plan.aliases.clone(),
            is_context_plugin_provider: plan.context_plugin_provider,
            scripts: self.fragments(&plan.scripts),
            styles: self.fragments(&plan.styles),
            markup: plan.markup.as_deref().map(|m| self.fragments(m)),
            ..ContextThingSpec::new(kind, &plan.name)
        }
    }

    fn things(&self, kind: ContextThingKind) -> &[ContextThingPlan] {
        match kind {
            ContextThingKind::Service => &self.services,
            ContextThingKind::Initializer => &self.initializers,
            ContextThingKind::Component => &self.components,
        }
    }

    /// Register the whole plan with `assembler`.
    ///
    /// Libraries, context things and themes are registered concurrently.
    /// Auxiliary paths go in plan order, which is the merge order for
    /// directories sharing an output name.
    #[instrument(skip_all, fields(bundle = %self.name))]
    pub async fn apply(&self, assembler: &BundleAssembler) -> Result<()> {
        for (key, value) in &self.properties {
            assembler.put_property(key.clone(), value.clone()).await?;
        }

        let libraries = try_join_all(
            self.libraries
                .iter()
                .map(|lib| assembler.register_external_library(self.library_spec(lib))),
        );
        let things = try_join_all(ContextThingKind::ALL.into_iter().flat_map(move |kind| {
            self.things(kind)
                .iter()
                .map(move |plan| assembler.register_context_thing(self.context_thing_spec(kind, plan)))
        }));
        let themes = try_join_all(self.themes.iter().map(|theme| {
            assembler.add_theme(&theme.label, self.fragments(&theme.files), &theme.channel, theme.level)
        }));
        tokio::try_join!(libraries, things, themes)?;

        for aux in &self.auxiliary {
            let path = self.resolve(&aux.path);
            let output_name = match &aux.output_name {
                Some(name) => name.clone(),
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        BundleError::validation(format!(
                            "auxiliary path \"{}\" has no file name, set output_name",
                            aux.path
                        ))
                    })?,
            };
            assembler.register_auxiliary_path(output_name, path).await?;
        }

        debug!(
            libraries = self.libraries.len(),
            services = self.services.len(),
            initializers = self.initializers.len(),
            components = self.components.len(),
            themes = self.themes.len(),
            auxiliary = self.auxiliary.len(),
            "plan applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assembler::{BundleState, CommitOutcome};
    use bundlewright_shared::AssemblerConfig;
    use bundlewright_transform::FnTransform;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bw-plan-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    const PLAN: &str = r#"
name = "todos"
version = "1.2"

[properties]
title = "Todo list"
beta = false

[[libraries]]
name = "jquery"
scripts = ["vendor/jquery.min.js"]

[[services]]
name = "Store"
scripts = ["Store.svc/Store.js"]

[[components]]
name = "List"
uses_application = true
depends_on_services = ["Store"]
context_plugins = ["templates"]
scripts = ["List.cmp/List.js"]
styles = ["List.cmp/List.css"]
markup = ["List.cmp/List.html"]

[[themes]]
label = "Theme base"
channel = "before"
level = 10
files = ["base.thm/reset.css"]

[[auxiliary]]
path = "assets"

[[auxiliary]]
output_name = "assets"
path = "more-assets"
"#;

    #[test]
    fn parse_reads_sections() {
        let plan = BundlePlan::parse(PLAN, "/project").unwrap();
        assert_eq!(plan.bundle_id().dir_name(), "todos-1.2");
        assert_eq!(plan.libraries.len(), 1);
        assert_eq!(plan.components[0].markup.as_ref().unwrap().len(), 1);
        assert_eq!(plan.themes[0].channel, "before");
        assert_eq!(plan.auxiliary[1].output_name.as_deref(), Some("assets"));
        assert_eq!(plan.properties["title"], "Todo list");

        let fragment = plan.fragment("vendor/jquery.min.js");
        assert!(fragment.pre_transformed);
        assert_eq!(fragment.path, PathBuf::from("/project/vendor/jquery.min.js"));
        assert!(!plan.fragment("Store.svc/Store.js").pre_transformed);
    }

    #[test]
    fn parse_rejects_bad_plans() {
        assert!(matches!(
            BundlePlan::parse("name = \"\"", "."),
            Err(BundleError::Validation { .. })
        ));
        assert!(matches!(
            BundlePlan::parse("version = \"1\"", "."),
            Err(BundleError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn apply_then_commit_builds_the_bundle() {
        let root = temp_dir();
        let src = root.join("src");
        write(&src.join("vendor/jquery.min.js"), "jq()");
        write(&src.join("Store.svc/Store.js"), "store()");
        write(&src.join("List.cmp/List.js"), "list()");
        write(&src.join("List.cmp/List.css"), ".list{}");
        write(&src.join("List.cmp/List.html"), "<ul></ul>");
        write(&src.join("base.thm/reset.css"), "*{margin:0}");
        write(&src.join("assets/logo.svg"), "<svg/>");
        write(&src.join("more-assets/font.woff"), "woff");
        write(&src.join("todos.plan.toml"), PLAN);

        let plan = BundlePlan::load(&src.join("todos.plan.toml")).unwrap();

        // Marks transformed text so pre-transformed files are recognisable.
        let gateway = FnTransform::new("mark", |_kind, text: &str, _path: &Path| {
            Ok(format!("{text};"))
        });
        let mut assembler = BundleAssembler::new(
            plan.bundle_id(),
            AssemblerConfig::with_output_root(root.join("dist")),
            Arc::new(gateway),
        );
        plan.apply(&assembler).await.unwrap();
        assert_eq!(assembler.state().await, BundleState::Collecting);

        let CommitOutcome::Committed(report) = assembler.commit(false).await.unwrap() else {
            panic!("expected a committed bundle");
        };
        let dir = report.bundle_path;
        assert_eq!(dir, root.join("dist/todos-1.2"));

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("todos.json")).unwrap()).unwrap();
        assert_eq!(manifest["title"], "Todo list");
        assert!(manifest.get("beta").is_none());
        assert_eq!(
            manifest["externalLibraries"]["jquery"]["js"],
            "// == ExternalLibrary jquery ==\njq()"
        );
        assert_eq!(manifest["services"]["Store"]["js"], "// == Service Store ==\nstore();");
        assert_eq!(manifest["components"]["List"]["templates"], "<ul></ul>;");
        assert_eq!(manifest["components"]["List"]["useServices"][0], "Store");

        let css = std::fs::read_to_string(dir.join("todos.css")).unwrap();
        assert!(css.find("*{margin:0}").unwrap() < css.find(".list{}").unwrap());

        assert!(dir.join("assets/logo.svg").is_file());
        assert!(dir.join("assets/font.woff").is_file());
        assert!(!dir.join("more-assets").exists());

        let _ = std::fs::remove_dir_all(&root);
    }
}
