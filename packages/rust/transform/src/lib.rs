//! Pluggable content transforms for bundle assembly.
//!
//! The assembler never minifies anything itself. It hands each fragment to a
//! [`TransformGateway`] together with its content kind and source path, and
//! uses whatever text comes back.
//!
//! Built-in gateways:
//! - [`IdentityTransform`]: returns the text unchanged
//! - [`FnTransform`]: adapts a synchronous closure
//! - [`CommandTransform`]: pipes text through an external command per kind

mod command;

use std::path::Path;

use futures::FutureExt;
use futures::future::BoxFuture;

use bundlewright_shared::{ContentKind, Result};

pub use command::CommandTransform;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Capability that turns raw fragment text into bundle-ready text.
///
/// Implementations must behave like pure functions: the same input yields the
/// same output, and no state is expected to survive between calls.
pub trait TransformGateway: Send + Sync {
    /// Transform `text` of the given `kind`, read from `source_path`.
    fn transform<'a>(
        &'a self,
        kind: ContentKind,
        text: String,
        source_path: &'a Path,
    ) -> BoxFuture<'a, Result<String>>;

    /// Human-readable gateway name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Pass-through gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl TransformGateway for IdentityTransform {
    fn transform<'a>(
        &'a self,
        _kind: ContentKind,
        text: String,
        _source_path: &'a Path,
    ) -> BoxFuture<'a, Result<String>> {
        futures::future::ready(Ok(text)).boxed()
    }

    fn name(&self) -> &str {
        "identity"
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// Gateway backed by a synchronous function.
pub struct FnTransform<F> {
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(ContentKind, &str, &Path) -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> TransformGateway for FnTransform<F>
where
    F: Fn(ContentKind, &str, &Path) -> Result<String> + Send + Sync,
{
    fn transform<'a>(
        &'a self,
        kind: ContentKind,
        text: String,
        source_path: &'a Path,
    ) -> BoxFuture<'a, Result<String>> {
        futures::future::ready((self.func)(kind, &text, source_path)).boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
