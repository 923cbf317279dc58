//! Bundle assembly for bundlewright.
//!
//! Contributions (libraries, services, initializers, components, themes and
//! auxiliary files) are registered concurrently with a [`BundleAssembler`],
//! then committed into one bundle directory holding a JSON manifest, an
//! optional aggregate style file and the auxiliary tree.

pub mod assembler;
pub mod auxiliary;
pub mod concat;
pub mod plan;
pub mod registry;
pub mod styles;

pub use assembler::{BundleAssembler, BundleState, CommitOutcome, CommitReport, WrittenFile};
pub use auxiliary::{AuxKind, ExtensionFilter, FileIncludePredicate, IncludeAll};
pub use concat::{ContentFragment, concat};
pub use plan::BundlePlan;
pub use registry::{ContextThingSpec, LibrarySpec};
pub use styles::{CHANNEL_AFTER, CHANNEL_BEFORE, CHANNEL_DEFAULT};
