//! Auxiliary files and directories copied next to the manifest.
//!
//! Entries are keyed by output name. Registering a directory under a name that
//! already holds a directory merges the two: at commit time the sources are
//! replayed in registration order into the same destination. Code-unit
//! directories are never copied, and a directory that would end up empty is
//! not created at all.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use bundlewright_shared::{AuxiliaryConfig, BundleError, CodeUnitKind, CollisionPolicy, Result};

// ---------------------------------------------------------------------------
// Include predicate
// ---------------------------------------------------------------------------

/// Decides which entries inside an auxiliary directory are copied.
pub trait FileIncludePredicate: Send + Sync {
    /// Whether a plain file is copied.
    fn can_include(&self, file_name: &str) -> bool;

    /// Whether a subdirectory is walked at all.
    fn can_descend(&self, _dir_name: &str) -> bool {
        true
    }
}

/// Accepts every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl FileIncludePredicate for IncludeAll {
    fn can_include(&self, _file_name: &str) -> bool {
        true
    }
}

/// Rejects configured extensions and, unless enabled, dot-files and
/// dot-directories.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    excluded: Vec<String>,
    include_hidden: bool,
}

impl ExtensionFilter {
    pub fn from_config(config: &AuxiliaryConfig) -> Self {
        Self {
            excluded: config
                .exclude_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            include_hidden: config.include_hidden,
        }
    }
}

impl FileIncludePredicate for ExtensionFilter {
    fn can_include(&self, file_name: &str) -> bool {
        if !self.include_hidden && file_name.starts_with('.') {
            return false;
        }
        match Path::new(file_name).extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                !self.excluded.iter().any(|e| *e == ext)
            }
            None => true,
        }
    }

    fn can_descend(&self, dir_name: &str) -> bool {
        self.include_hidden || !dir_name.starts_with('.')
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    File,
    Directory,
}

impl AuxKind {
    /// Stat `path` (following symlinks) to decide its kind.
    pub async fn of(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| BundleError::io(path, e))?;
        Ok(if meta.is_dir() {
            Self::Directory
        } else {
            Self::File
        })
    }
}

/// One output name and the source(s) that populate it.
#[derive(Debug, Clone)]
pub struct AuxiliaryEntry {
    pub output_name: String,
    /// Source path as the caller named it, for messages.
    pub rel_path: String,
    pub source: PathBuf,
    pub kind: AuxKind,
    /// Further directory sources merged after `source`, in registration order.
    pub merge_list: Vec<PathBuf>,
}

impl AuxiliaryEntry {
    fn sources(&self) -> Vec<PathBuf> {
        std::iter::once(self.source.clone())
            .chain(self.merge_list.iter().cloned())
            .collect()
    }
}

/// All auxiliary entries of one bundle.
#[derive(Debug, Default)]
pub struct AuxiliaryTree {
    entries: BTreeMap<String, AuxiliaryEntry>,
}

impl AuxiliaryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, output_name: &str) -> Option<&AuxiliaryEntry> {
        self.entries.get(output_name)
    }

    /// Add a source under `output_name`.
    ///
    /// Only directory-on-directory is legal for an existing name; the new
    /// directory is queued for merging. Anything else is a name conflict.
    pub fn register(
        &mut self,
        output_name: impl Into<String>,
        rel_path: impl Into<String>,
        full_path: impl Into<PathBuf>,
        kind: AuxKind,
    ) -> Result<()> {
        let output_name = output_name.into();
        let rel_path = rel_path.into();
        let full_path = full_path.into();

        match self.entries.get_mut(&output_name) {
            None => {
                self.entries.insert(
                    output_name.clone(),
                    AuxiliaryEntry {
                        output_name,
                        rel_path,
                        source: full_path,
                        kind,
                        merge_list: Vec::new(),
                    },
                );
            }
            Some(existing) if existing.kind == AuxKind::Directory && kind == AuxKind::Directory => {
                debug!(output = %output_name, source = %rel_path, "queued directory merge");
                existing.merge_list.push(full_path);
            }
            Some(existing) => {
                return Err(BundleError::name_conflict(
                    &output_name,
                    format!(
                        "several files \"{output_name}\" (\"{}\" and \"{rel_path}\"), please rename one",
                        existing.rel_path
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Copy every entry below `output_dir`. Entries run concurrently; the first
    /// failure aborts the commit. Returns the number of entries committed.
    #[instrument(skip_all, fields(output_dir = %output_dir.display(), entries = self.entries.len()))]
    pub async fn commit(
        &self,
        output_dir: &Path,
        predicate: Arc<dyn FileIncludePredicate>,
        policy: CollisionPolicy,
    ) -> Result<usize> {
        let pending = self
            .entries
            .values()
            .map(|entry| commit_entry(entry, output_dir, Arc::clone(&predicate), policy));
        let copied = try_join_all(pending).await?;
        debug!(files = copied.iter().sum::<usize>(), "auxiliary files copied");
        Ok(self.entries.len())
    }
}

async fn commit_entry(
    entry: &AuxiliaryEntry,
    output_dir: &Path,
    predicate: Arc<dyn FileIncludePredicate>,
    policy: CollisionPolicy,
) -> Result<usize> {
    let dest = output_dir.join(&entry.output_name);
    let exists = tokio::fs::try_exists(&dest)
        .await
        .map_err(|e| BundleError::io(&dest, e))?;
    if exists {
        return Err(BundleError::name_conflict(
            &dest,
            format!(
                "cannot overwrite \"{}\" with \"{}\"",
                entry.output_name, entry.rel_path
            ),
        ));
    }

    match entry.kind {
        AuxKind::File => {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BundleError::io(parent, e))?;
            }
            tokio::fs::copy(&entry.source, &dest)
                .await
                .map_err(|e| BundleError::io(&entry.source, e))?;
            debug!(file = %entry.output_name, "copied auxiliary file");
            Ok(1)
        }
        AuxKind::Directory => {
            let sources = entry.sources();
            let target = dest.clone();
            tokio::task::spawn_blocking(move || {
                merge_directories(&sources, &target, predicate.as_ref(), policy)
            })
            .await
            .map_err(|e| BundleError::io(&dest, std::io::Error::other(e)))?
        }
    }
}

// ---------------------------------------------------------------------------
// Directory merge (blocking)
// ---------------------------------------------------------------------------

/// A file scheduled for copy: absolute source, path relative to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedCopy {
    from: PathBuf,
    rel: PathBuf,
}

fn merge_directories(
    sources: &[PathBuf],
    dest: &Path,
    predicate: &dyn FileIncludePredicate,
    policy: CollisionPolicy,
) -> Result<usize> {
    if !has_includable_content(sources, predicate)? {
        debug!(dest = %dest.display(), "nothing to copy, directory skipped");
        return Ok(0);
    }
    let plan = plan_merge(sources, predicate, policy)?;
    materialize(&plan, dest)
}

/// Walk `source` below its root, pruning code-unit directories and any
/// directory the predicate refuses to descend into.
fn walk<'a>(
    source: &'a Path,
    predicate: &'a dyn FileIncludePredicate,
) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> + 'a {
    WalkDir::new(source)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            if !e.file_type().is_dir() {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !CodeUnitKind::is_unit_dir_name(&name) && predicate.can_descend(&name)
        })
}

fn walk_error(root: &Path, err: walkdir::Error) -> BundleError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
    BundleError::io(path, source)
}

/// Scan pass: stops at the first includable file.
fn has_includable_content(sources: &[PathBuf], predicate: &dyn FileIncludePredicate) -> Result<bool> {
    for source in sources {
        for entry in walk(source, predicate) {
            let entry = entry.map_err(|e| walk_error(source, e))?;
            if entry.file_type().is_file() && predicate.can_include(&entry.file_name().to_string_lossy())
            {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Ordered list of files to copy. Earlier sources claim a relative path first.
fn plan_merge(
    sources: &[PathBuf],
    predicate: &dyn FileIncludePredicate,
    policy: CollisionPolicy,
) -> Result<Vec<PlannedCopy>> {
    let mut plan = Vec::new();
    let mut files: HashSet<PathBuf> = HashSet::new();
    let mut dirs: HashSet<PathBuf> = HashSet::new();

    for source in sources {
        for entry in walk(source, predicate) {
            let entry = entry.map_err(|e| walk_error(source, e))?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

            if entry.file_type().is_dir() {
                if files.contains(&rel) {
                    return Err(BundleError::name_conflict(
                        entry.path(),
                        format!("directory \"{}\" collides with a merged file", rel.display()),
                    ));
                }
                dirs.insert(rel);
                continue;
            }
            if !predicate.can_include(&entry.file_name().to_string_lossy()) {
                continue;
            }
            if dirs.contains(&rel) {
                return Err(BundleError::name_conflict(
                    entry.path(),
                    format!("file \"{}\" collides with a merged directory", rel.display()),
                ));
            }
            if !files.insert(rel.clone()) {
                match policy {
                    CollisionPolicy::KeepFirst => {
                        warn!(file = %rel.display(), skipped = %entry.path().display(), "file already provided by an earlier source");
                        continue;
                    }
                    CollisionPolicy::Fail => {
                        return Err(BundleError::name_conflict(
                            entry.path(),
                            format!("file \"{}\" is provided by several merged directories", rel.display()),
                        ));
                    }
                }
            }
            plan.push(PlannedCopy {
                from: entry.path().to_path_buf(),
                rel,
            });
        }
    }
    Ok(plan)
}

/// Materialize pass: directories only appear as parents of copied files.
fn materialize(plan: &[PlannedCopy], dest: &Path) -> Result<usize> {
    for copy in plan {
        let target = dest.join(&copy.rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
        }
        std::fs::copy(&copy.from, &target).map_err(|e| BundleError::io(&copy.from, e))?;
    }
    debug!(dest = %dest.display(), files = plan.len(), "merged directory");
    Ok(plan.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bw-aux-{tag}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn no_maps() -> Arc<dyn FileIncludePredicate> {
        Arc::new(ExtensionFilter::from_config(&AuxiliaryConfig::default()))
    }

    #[test]
    fn extension_filter_honours_config() {
        let filter = ExtensionFilter::from_config(&AuxiliaryConfig::default());
        assert!(filter.can_include("logo.png"));
        assert!(filter.can_include("LICENSE"));
        assert!(!filter.can_include("main.ts"));
        assert!(!filter.can_include("app.JS.MAP"));
        assert!(!filter.can_include(".DS_Store"));

        let config = AuxiliaryConfig {
            include_hidden: true,
            ..Default::default()
        };
        assert!(ExtensionFilter::from_config(&config).can_include(".htaccess"));
    }

    #[test]
    fn file_registered_twice_is_a_conflict() {
        let mut tree = AuxiliaryTree::new();
        tree.register("robots.txt", "a/robots.txt", "/a/robots.txt", AuxKind::File)
            .unwrap();
        let err = tree
            .register("robots.txt", "b/robots.txt", "/b/robots.txt", AuxKind::File)
            .unwrap_err();
        assert!(matches!(err, BundleError::NameConflict { .. }));

        tree.register("assets", "a/assets", "/a/assets", AuxKind::Directory)
            .unwrap();
        let err = tree
            .register("assets", "b/assets", "/b/assets", AuxKind::File)
            .unwrap_err();
        assert!(matches!(err, BundleError::NameConflict { .. }));
    }

    #[test]
    fn directories_queue_merges_in_order() {
        let mut tree = AuxiliaryTree::new();
        tree.register("assets", "a", "/a", AuxKind::Directory).unwrap();
        tree.register("assets", "b", "/b", AuxKind::Directory).unwrap();
        tree.register("assets", "c", "/c", AuxKind::Directory).unwrap();
        let entry = tree.get("assets").unwrap();
        assert_eq!(entry.source, PathBuf::from("/a"));
        assert_eq!(entry.merge_list, vec![PathBuf::from("/b"), PathBuf::from("/c")]);
        assert_eq!(tree.len(), 1);
    }

    #[tokio::test]
    async fn merged_directory_keeps_first_source_on_collision() {
        let root = temp_root("merge");
        let a = root.join("a");
        let b = root.join("b");
        write(&a.join("shared.txt"), "from a");
        write(&a.join("only-a.txt"), "a");
        write(&b.join("shared.txt"), "from b");
        write(&b.join("img/only-b.png"), "b");

        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("assets", "a", &a, AuxKind::Directory).unwrap();
        tree.register("assets", "b", &b, AuxKind::Directory).unwrap();
        let committed = tree
            .commit(&out, no_maps(), CollisionPolicy::KeepFirst)
            .await
            .unwrap();
        assert_eq!(committed, 1);

        let assets = out.join("assets");
        assert_eq!(std::fs::read_to_string(assets.join("shared.txt")).unwrap(), "from a");
        assert!(assets.join("only-a.txt").is_file());
        assert!(assets.join("img/only-b.png").is_file());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn fail_policy_rejects_colliding_files() {
        let root = temp_root("fail");
        let a = root.join("a");
        let b = root.join("b");
        write(&a.join("shared.txt"), "a");
        write(&b.join("shared.txt"), "b");
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("assets", "a", &a, AuxKind::Directory).unwrap();
        tree.register("assets", "b", &b, AuxKind::Directory).unwrap();
        let err = tree
            .commit(&out, no_maps(), CollisionPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::NameConflict { .. }));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rejected_content_creates_no_directories() {
        let root = temp_root("prune");
        let src = root.join("src");
        write(&src.join("only.ts"), "let x = 1;");
        write(&src.join("nested/deeper/types.ts"), "");
        write(&src.join("mixed/keep.txt"), "keep");
        write(&src.join("mixed/drop/x.map"), "{}");
        std::fs::create_dir_all(src.join("empty")).unwrap();
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("src", "src", &src, AuxKind::Directory).unwrap();
        tree.commit(&out, no_maps(), CollisionPolicy::KeepFirst)
            .await
            .unwrap();

        let copied = out.join("src");
        assert!(copied.join("mixed/keep.txt").is_file());
        assert!(!copied.join("mixed/drop").exists());
        assert!(!copied.join("nested").exists());
        assert!(!copied.join("empty").exists());
        assert!(!copied.join("only.ts").exists());

        let mut tree = AuxiliaryTree::new();
        let types = root.join("types");
        write(&types.join("a.ts"), "");
        tree.register("types", "types", &types, AuxKind::Directory).unwrap();
        tree.commit(&out, no_maps(), CollisionPolicy::KeepFirst)
            .await
            .unwrap();
        assert!(!out.join("types").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn code_unit_directories_are_skipped() {
        let root = temp_root("units");
        let src = root.join("web");
        write(&src.join("index.html"), "<html/>");
        write(&src.join("Button.cmp/Button.js"), "btn();");
        write(&src.join("Router.svc/Router.js"), "route();");
        write(&src.join("dark.thm/dark.css"), "body{}");
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("web", "web", &src, AuxKind::Directory).unwrap();
        tree.commit(&out, Arc::new(IncludeAll), CollisionPolicy::KeepFirst)
            .await
            .unwrap();

        let web = out.join("web");
        assert!(web.join("index.html").is_file());
        assert!(!web.join("Button.cmp").exists());
        assert!(!web.join("Router.svc").exists());
        assert!(!web.join("dark.thm").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn hidden_directories_are_not_walked() {
        let root = temp_root("hidden");
        let src = root.join("assets");
        write(&src.join(".git/config"), "[core]");
        write(&src.join("logo.png"), "png");
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("assets", "assets", &src, AuxKind::Directory).unwrap();
        tree.commit(&out, no_maps(), CollisionPolicy::KeepFirst)
            .await
            .unwrap();
        assert!(out.join("assets/logo.png").is_file());
        assert!(!out.join("assets/.git").exists());

        let config = AuxiliaryConfig {
            include_hidden: true,
            ..Default::default()
        };
        let out = root.join("out-hidden");
        std::fs::create_dir_all(&out).unwrap();
        tree.commit(
            &out,
            Arc::new(ExtensionFilter::from_config(&config)),
            CollisionPolicy::KeepFirst,
        )
        .await
        .unwrap();
        assert!(out.join("assets/.git/config").is_file());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unit_suffixes_only_exclude_directories() {
        let root = temp_root("suffix-files");
        let src = root.join("assets");
        write(&src.join("config.ini"), "[app]");
        write(&src.join("app.lib"), "lib");
        write(&src.join("Widgets.lib/widget.js"), "w();");
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("assets", "assets", &src, AuxKind::Directory).unwrap();
        tree.commit(&out, Arc::new(IncludeAll), CollisionPolicy::KeepFirst)
            .await
            .unwrap();

        let assets = out.join("assets");
        assert!(assets.join("config.ini").is_file());
        assert!(assets.join("app.lib").is_file());
        assert!(!assets.join("Widgets.lib").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    async fn merge_two(tag: &str, a_has_file: bool) -> BundleError {
        let root = temp_root(tag);
        let a = root.join("a");
        let b = root.join("b");
        let (file_side, dir_side) = if a_has_file { (&a, &b) } else { (&b, &a) };
        write(&file_side.join("x"), "plain file");
        write(&dir_side.join("x/inner.txt"), "nested");
        let out = root.join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut tree = AuxiliaryTree::new();
        tree.register("assets", "a", &a, AuxKind::Directory).unwrap();
        tree.register("assets", "b", &b, AuxKind::Directory).unwrap();
        let err = tree
            .commit(&out, Arc::new(IncludeAll), CollisionPolicy::KeepFirst)
            .await
            .unwrap_err();

        let _ = std::fs::remove_dir_all(&root);
        err
    }

    #[tokio::test]
    async fn file_then_directory_at_same_path_is_a_conflict() {
        let err = merge_two("file-dir", true).await;
        assert!(matches!(err, BundleError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn directory_then_file_at_same_path_is_a_conflict() {
        let err = merge_two("dir-file", false).await;
        assert!(matches!(err, BundleError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn existing_destination_is_a_conflict() {
        let root = temp_root("exists");
        let file = root.join("robots.txt");
        write(&file, "User-agent: *");
        let out = root.join("out");
        write(&out.join("robots.txt"), "already here");

        let mut tree = AuxiliaryTree::new();
        tree.register("robots.txt", "robots.txt", &file, AuxKind::File)
            .unwrap();
        let err = tree
            .commit(&out, Arc::new(IncludeAll), CollisionPolicy::KeepFirst)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::NameConflict { .. }));
        assert_eq!(
            std::fs::read_to_string(out.join("robots.txt")).unwrap(),
            "already here"
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn aux_kind_follows_the_filesystem() {
        let root = temp_root("kind");
        write(&root.join("f.txt"), "x");
        assert_eq!(AuxKind::of(&root).await.unwrap(), AuxKind::Directory);
        assert_eq!(AuxKind::of(&root.join("f.txt")).await.unwrap(), AuxKind::File);
        assert!(AuxKind::of(&root.join("missing")).await.is_err());
        let _ = std::fs::remove_dir_all(&root);
    }
}
