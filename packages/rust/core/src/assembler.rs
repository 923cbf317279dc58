//! Bundle assembler.
//!
//! Collects the contributions of one bundle (properties, libraries, context
//! things, themes, auxiliary files), then writes the bundle directory:
//!
//! ```text
//! <output_root>/<name>[-<version>]/
//! ├── <name>.json      manifest
//! ├── <name>.css       aggregate styles (only when any style exists)
//! └── ...              auxiliary files and merged directories
//! ```
//!
//! Registrations take `&self` and may run concurrently. `commit` takes
//! `&mut self`, so every registration future has finished before the output is
//! written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use bundlewright_shared::{AssemblerConfig, BundleError, BundleId, BundleManifest, ContentKind, Result};
use bundlewright_transform::TransformGateway;

use crate::auxiliary::{AuxKind, AuxiliaryTree, ExtensionFilter, FileIncludePredicate};
use crate::concat::{ContentFragment, concat};
use crate::registry::{
    Contributions, ContextThingSpec, LibrarySpec, prepare_context_thing, prepare_library,
};
use crate::styles::{CHANNEL_AFTER, CHANNEL_BEFORE, CHANNEL_DEFAULT, StyleChannels};

// ---------------------------------------------------------------------------
// State and outcome
// ---------------------------------------------------------------------------

/// Lifecycle of a [`BundleAssembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Empty,
    Collecting,
    Committing,
    Committed,
    Failed,
    Skipped,
}

impl BundleState {
    fn accepts_registrations(self) -> bool {
        matches!(self, Self::Empty | Self::Collecting)
    }
}

/// Metadata for one generated file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WrittenFile {
    pub file_name: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Summary of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    /// The bundle directory.
    pub bundle_path: PathBuf,
    /// Manifest first, then the style file when present.
    pub files: Vec<WrittenFile>,
    /// Number of auxiliary entries copied.
    pub auxiliary_entries: usize,
}

/// Result of [`BundleAssembler::commit`].
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed(CommitReport),
    /// The bundle directory already existed and overwriting was not allowed.
    Skipped { path: PathBuf },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Collected {
    state: BundleState,
    contributions: Contributions,
    styles: StyleChannels,
    auxiliary: AuxiliaryTree,
}

impl Collected {
    /// Admit a registration, moving `Empty` to `Collecting`.
    fn admit(&mut self) -> Result<()> {
        if !self.state.accepts_registrations() {
            return Err(BundleError::state(format!(
                "cannot register contributions in state {:?}",
                self.state
            )));
        }
        self.state = BundleState::Collecting;
        Ok(())
    }

    fn has_css(&self) -> bool {
        !self.styles.is_empty() || !self.contributions.other_styles().is_empty()
    }
}

/// Builds one bundle directory.
pub struct BundleAssembler {
    id: BundleId,
    config: AssemblerConfig,
    gateway: Arc<dyn TransformGateway>,
    predicate: Arc<dyn FileIncludePredicate>,
    inner: Mutex<Collected>,
}

impl BundleAssembler {
    pub fn new(id: BundleId, config: AssemblerConfig, gateway: Arc<dyn TransformGateway>) -> Self {
        let predicate = Arc::new(ExtensionFilter::from_config(&config.auxiliary));
        Self {
            inner: Mutex::new(Collected {
                state: BundleState::Empty,
                contributions: Contributions::new(&id.name),
                styles: StyleChannels::new(),
                auxiliary: AuxiliaryTree::new(),
            }),
            id,
            config,
            gateway,
            predicate,
        }
    }

    /// Replace the auxiliary include predicate derived from the config.
    pub fn with_predicate(mut self, predicate: Arc<dyn FileIncludePredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn id(&self) -> &BundleId {
        &self.id
    }

    /// Where `commit` writes the bundle.
    pub fn bundle_dir(&self) -> PathBuf {
        self.config.output_root.join(self.id.dir_name())
    }

    pub async fn state(&self) -> BundleState {
        self.inner.lock().await.state
    }

    /// Set a free-form bundle property that ends up at the manifest root.
    pub async fn put_property(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.admit()?;
        inner.contributions.put_property(key, value)
    }

    /// Concatenate a theme and file it under `channel` at `level`.
    #[instrument(skip_all, fields(bundle = %self.id, theme = %label, channel = %channel, level = level))]
    pub async fn add_theme(
        &self,
        label: &str,
        fragments: Vec<ContentFragment>,
        channel: &str,
        level: i32,
    ) -> Result<()> {
        self.inner.lock().await.admit()?;

        let blob = concat(label, fragments, ContentKind::Style, self.gateway.as_ref()).await?;

        let mut inner = self.inner.lock().await;
        inner.admit()?;
        inner.styles.push(channel, level, blob);
        Ok(())
    }

    #[instrument(skip_all, fields(bundle = %self.id, library = %spec.name))]
    pub async fn register_external_library(&self, spec: LibrarySpec) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.admit()?;
            inner.contributions.ensure_library_free(&spec.name)?;
        }

        let prepared = prepare_library(spec, self.gateway.as_ref()).await?;

        let mut inner = self.inner.lock().await;
        inner.admit()?;
        inner.contributions.commit_library(prepared)
    }

    #[instrument(skip_all, fields(bundle = %self.id, kind = %spec.kind, thing = %spec.name))]
    pub async fn register_context_thing(&self, spec: ContextThingSpec) -> Result<()> {
        let kind = spec.kind;
        {
            let mut inner = self.inner.lock().await;
            inner.admit()?;
            inner.contributions.ensure_thing_free(kind, &spec.name)?;
        }

        let prepared = prepare_context_thing(spec, self.gateway.as_ref()).await?;

        let mut inner = self.inner.lock().await;
        inner.admit()?;
        inner.contributions.commit_context_thing(kind, prepared)
    }

    /// Register an auxiliary file or directory of known kind.
    pub async fn register_auxiliary(
        &self,
        output_name: impl Into<String>,
        rel_path: impl Into<String>,
        full_path: impl Into<PathBuf>,
        kind: AuxKind,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.admit()?;
        inner.auxiliary.register(output_name, rel_path, full_path, kind)
    }

    /// Register an auxiliary path, deciding file or directory from disk.
    pub async fn register_auxiliary_path(
        &self,
        output_name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        let path = path.into();
        let kind = AuxKind::of(&path).await?;
        let rel_path = path.display().to_string();
        self.register_auxiliary(output_name, rel_path, path, kind).await
    }

    /// Manifest as it would be written right now.
    pub async fn build_manifest(&self) -> BundleManifest {
        let inner = self.inner.lock().await;
        inner.contributions.build_manifest(
            &self.config.toolchain_version,
            &self.config.encoding,
            inner.has_css(),
        )
    }

    /// Write the bundle directory.
    ///
    /// An existing directory is left untouched and reported as
    /// [`CommitOutcome::Skipped`] unless `allow_overwrite` is set, in which
    /// case it is removed first. May be retried after a skip or a failure.
    #[instrument(skip_all, fields(bundle = %self.id, allow_overwrite = allow_overwrite))]
    pub async fn commit(&mut self, allow_overwrite: bool) -> Result<CommitOutcome> {
        let bundle_dir = self.bundle_dir();
        let Self {
            id,
            config,
            predicate,
            inner,
            ..
        } = self;
        let collected = inner.get_mut();

        if matches!(collected.state, BundleState::Committed | BundleState::Committing) {
            return Err(BundleError::state(format!(
                "bundle \"{id}\" cannot be committed in state {:?}",
                collected.state
            )));
        }

        let exists = tokio::fs::try_exists(&bundle_dir)
            .await
            .map_err(|e| BundleError::io(&bundle_dir, e))?;
        if exists && !allow_overwrite {
            warn!(path = %bundle_dir.display(), "bundle directory already exists, skipping");
            collected.state = BundleState::Skipped;
            return Ok(CommitOutcome::Skipped { path: bundle_dir });
        }

        info!(path = %bundle_dir.display(), "committing bundle");
        collected.state = BundleState::Committing;

        match write_bundle(id, config, collected, Arc::clone(predicate), &bundle_dir, exists).await {
            Ok(report) => {
                collected.state = BundleState::Committed;
                info!(
                    path = %bundle_dir.display(),
                    files = report.files.len(),
                    auxiliary = report.auxiliary_entries,
                    "bundle committed"
                );
                Ok(CommitOutcome::Committed(report))
            }
            Err(e) => {
                collected.state = BundleState::Failed;
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

async fn write_bundle(
    id: &BundleId,
    config: &AssemblerConfig,
    collected: &Collected,
    predicate: Arc<dyn FileIncludePredicate>,
    bundle_dir: &Path,
    exists: bool,
) -> Result<CommitReport> {
    if exists {
        tokio::fs::remove_dir_all(bundle_dir)
            .await
            .map_err(|e| BundleError::io(bundle_dir, e))?;
        debug!(path = %bundle_dir.display(), "removed previous bundle directory");
    }
    tokio::fs::create_dir_all(bundle_dir)
        .await
        .map_err(|e| BundleError::io(bundle_dir, e))?;

    let has_css = collected.has_css();
    let manifest = collected.contributions.build_manifest(
        &config.toolchain_version,
        &config.encoding,
        has_css,
    );
    let manifest_json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| BundleError::validation(format!("JSON serialization failed: {e}")))?;

    let write_manifest = write_file(bundle_dir, format!("{}.json", id.name), manifest_json);
    let write_style = async {
        if !has_css {
            return Ok(None);
        }
        let css = render_css(&config.style_charset, collected);
        write_file(bundle_dir, format!("{}.css", id.name), css)
            .await
            .map(Some)
    };
    let (manifest_file, style_file) = tokio::try_join!(write_manifest, write_style)?;

    let auxiliary_entries = collected
        .auxiliary
        .commit(bundle_dir, predicate, config.auxiliary.on_file_collision)
        .await?;

    let mut files = vec![manifest_file];
    files.extend(style_file);

    Ok(CommitReport {
        bundle_path: bundle_dir.to_path_buf(),
        files,
        auxiliary_entries,
    })
}

/// Aggregate style file: charset, `before` themes, library and component
/// styles, default themes, `after` themes.
fn render_css(charset: &str, collected: &Collected) -> String {
    let mut parts = vec![format!("@charset \"{charset}\";")];
    parts.extend(collected.styles.render_channel(CHANNEL_BEFORE));
    parts.extend(collected.contributions.other_styles().iter().cloned());
    parts.extend(collected.styles.render_channel(CHANNEL_DEFAULT));
    parts.extend(collected.styles.render_channel(CHANNEL_AFTER));
    for channel in collected.styles.channel_names() {
        if ![CHANNEL_BEFORE, CHANNEL_DEFAULT, CHANNEL_AFTER].contains(&channel) {
            debug!(channel, "theme channel is not rendered");
        }
    }
    parts.join("\n")
}

/// Write `content` atomically (temp file, then rename) and checksum it.
async fn write_file(dir: &Path, file_name: String, content: String) -> Result<WrittenFile> {
    let target = dir.join(&file_name);
    let temp = dir.join(format!(".{file_name}.tmp"));

    tokio::fs::write(&temp, content.as_bytes())
        .await
        .map_err(|e| BundleError::io(&temp, e))?;
    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(BundleError::io(&target, e));
    }

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let sha256 = format!("{:x}", hasher.finalize());

    debug!(file = %file_name, size = content.len(), "wrote bundle file");

    Ok(WrittenFile {
        file_name,
        sha256,
        size_bytes: content.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
