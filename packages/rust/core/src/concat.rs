//! Ordered concatenation of content fragments.
//!
//! Every fragment is loaded and transformed concurrently, but the output always
//! follows input order: results are collected positionally, never by
//! completion time.

use std::path::PathBuf;
use std::sync::LazyLock;

use futures::future::try_join_all;
use regex::Regex;
use tracing::{debug, instrument};

use bundlewright_shared::{BundleError, ContentKind, Result};
use bundlewright_transform::TransformGateway;

// ---------------------------------------------------------------------------
// ContentFragment
// ---------------------------------------------------------------------------

/// One piece of script, style or markup contributed to a bundle.
#[derive(Debug, Clone)]
pub struct ContentFragment {
    /// Display name (file name for file fragments).
    pub name: String,
    /// Source path handed to the transform.
    pub path: PathBuf,
    /// Skip the transform and use the text verbatim.
    pub pre_transformed: bool,
    /// Inline text; `None` means the text is read from `path`.
    text: Option<String>,
}

impl ContentFragment {
    /// A fragment whose text is already in memory.
    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: PathBuf::from(&name),
            name,
            pre_transformed: false,
            text: Some(text.into()),
        }
    }

    /// A fragment read from disk when the concatenation runs.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path,
            pre_transformed: false,
            text: None,
        }
    }

    /// Mark the fragment as already transformed (e.g. a vendored `.min.js`).
    pub fn pre_transformed(mut self) -> Self {
        self.pre_transformed = true;
        self
    }

    /// Override the source path reported to the transform.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    async fn load(&self) -> Result<String> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| BundleError::io(&self.path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Concatenation
// ---------------------------------------------------------------------------

/// Concatenate `fragments` into one blob of the given kind.
///
/// Style fragments lose their `@charset` declaration; the first fragment gets a
/// provenance banner for `title` in the kind's comment syntax. Any load or
/// transform failure aborts the whole concatenation.
#[instrument(skip_all, fields(title = %title, kind = %kind, fragments = fragments.len()))]
pub async fn concat(
    title: &str,
    fragments: Vec<ContentFragment>,
    kind: ContentKind,
    gateway: &dyn TransformGateway,
) -> Result<String> {
    let pending = fragments.into_iter().enumerate().map(|(index, fragment)| async move {
        let text = fragment.load().await?;
        let text = if fragment.pre_transformed {
            text
        } else {
            gateway.transform(kind, text, &fragment.path).await?
        };
        debug!(fragment = %fragment.name, len = text.len(), "fragment ready");
        Ok::<_, BundleError>(finish_fragment(title, index, kind, text))
    });

    let parts = try_join_all(pending).await?;
    Ok(parts.join("\n"))
}

fn finish_fragment(title: &str, index: usize, kind: ContentKind, text: String) -> String {
    let text = match kind {
        ContentKind::Style => strip_charset(&text),
        _ => text,
    };
    if index > 0 {
        return text;
    }
    match banner(title, kind) {
        Some(banner) => format!("{banner}\n{text}"),
        None => text,
    }
}

/// Provenance banner for the first fragment of a blob.
pub fn banner(title: &str, kind: ContentKind) -> Option<String> {
    match kind {
        ContentKind::Script => Some(format!("// == {title} ==")),
        ContentKind::Style => Some(format!("/*! == {title} == */")),
        ContentKind::Markup => None,
    }
}

/// Remove the first `@charset` declaration; the bundle declares it once.
pub fn strip_charset(css: &str) -> String {
    static CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"@charset\s+"[a-zA-Z0-9\-]+"\s*;?\s*"#).expect("valid regex")
    });
    CHARSET_RE.replace(css, "").into_owned()
}
