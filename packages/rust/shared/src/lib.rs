//! Shared types, error model, and configuration for bundlewright.
//!
//! This crate is the foundation depended on by all other bundlewright crates.
//! It provides:
//! - [`BundleError`]: the unified error type
//! - Domain types ([`BundleManifest`], [`BundleId`], [`ContentKind`], [`ContextThingKind`])
//! - Configuration ([`AppConfig`], [`AssemblerConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AssemblerConfig, AuxiliaryConfig, CollisionPolicy, OutputConfig, TransformConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{BundleError, Result};
pub use types::{
    BundleId, BundleManifest, CodeUnitKind, ContentKind, ContextThingEntry, ContextThingKind,
    ExternalLibraryEntry, RESERVED_MANIFEST_KEYS,
};
