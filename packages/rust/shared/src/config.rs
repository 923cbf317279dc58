//! Application configuration for bundlewright.
//!
//! User config lives at `~/.bundlewright/bundlewright.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bundlewright.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bundlewright";

// ---------------------------------------------------------------------------
// Config structs (matching bundlewright.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output location and encodings.
    #[serde(default)]
    pub output: OutputConfig,

    /// Auxiliary file selection.
    #[serde(default)]
    pub auxiliary: AuxiliaryConfig,

    /// External transform commands.
    #[serde(default)]
    pub transform: TransformConfig,
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory under which bundle directories are created.
    #[serde(default = "default_output_root")]
    pub root: String,

    /// Charset declared at the top of the aggregate style file.
    #[serde(default = "default_encoding")]
    pub style_charset: String,

    /// Encoding recorded in the manifest.
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            style_charset: default_encoding(),
            encoding: default_encoding(),
        }
    }
}

fn default_output_root() -> String {
    "dist".into()
}
fn default_encoding() -> String {
    "UTF-8".into()
}

/// What to do when two merged auxiliary directories both provide the same file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// The earlier source wins; the later file is skipped with a warning.
    #[default]
    KeepFirst,
    /// The collision aborts the commit with a name conflict.
    Fail,
}

/// `[auxiliary]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxiliaryConfig {
    /// File extensions (without dot) never copied from auxiliary directories.
    #[serde(default = "default_exclude_extensions")]
    pub exclude_extensions: Vec<String>,

    /// Whether dot-files inside auxiliary directories are copied.
    #[serde(default)]
    pub include_hidden: bool,

    /// Policy for same-name files across merged directory sources.
    #[serde(default)]
    pub on_file_collision: CollisionPolicy,
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            exclude_extensions: default_exclude_extensions(),
            include_hidden: false,
            on_file_collision: CollisionPolicy::default(),
        }
    }
}

fn default_exclude_extensions() -> Vec<String> {
    ["ts", "tsx", "scss", "less", "map"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[transform]` section. Each entry is an argv; empty means pass-through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub script: Vec<String>,
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default)]
    pub markup: Vec<String>,
}

impl TransformConfig {
    /// Whether any external command is configured.
    pub fn has_commands(&self) -> bool {
        !(self.script.is_empty() && self.style.is_empty() && self.markup.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Assembler config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime assembler configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Directory under which the bundle directory is created.
    pub output_root: PathBuf,
    /// Charset for the aggregate style file.
    pub style_charset: String,
    /// Encoding recorded in the manifest.
    pub encoding: String,
    /// Toolchain version recorded in the manifest.
    pub toolchain_version: String,
    /// Auxiliary file selection.
    pub auxiliary: AuxiliaryConfig,
}

impl From<&AppConfig> for AssemblerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_root: PathBuf::from(&config.output.root),
            style_charset: config.output.style_charset.clone(),
            encoding: config.output.encoding.clone(),
            toolchain_version: env!("CARGO_PKG_VERSION").to_string(),
            auxiliary: config.auxiliary.clone(),
        }
    }
}

impl AssemblerConfig {
    /// Defaults rooted at `output_root`.
    pub fn with_output_root(output_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::from(&AppConfig::default());
        config.output_root = output_root.into();
        config
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bundlewright/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BundleError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bundlewright/bundlewright.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BundleError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BundleError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BundleError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BundleError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BundleError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
