//! Engine configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user `config.toml` in the working directory (or the
//! directory passed with `--config-dir`) overrides any subset of them.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [search]
//! tolerance_bytes = 5000    # Accept an encode this close to the target size
//! max_iterations = 7        # Bisection encodes per search
//!
//! [preview]
//! debounce_ms = 400         # Quiet period before a preview runs
//!
//! [export]
//! format = "jpeg"           # Default output format
//! quality = 92              # Default lossy quality (1-100)
//! background = "#ffffff"    # Flatten color for formats without alpha
//!
//! [watermark]
//! padding = 40              # Distance from the edge for anchored stamps
//! max_tiles = 250000        # Upper bound on stamps in tile mode
//! font_size = 48.0
//! color = "#ffffff"
//! opacity = 0.5
//! rotation = -45.0
//! gap = 50.0                # Tile spacing
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [export]
//! format = "avif"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{
    Color, OutputFormat, PipelineSettings, Quality, SearchSettings, WatermarkSettings,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Quality-target search settings.
    pub search: SearchConfig,
    /// Interactive preview scheduling.
    pub preview: PreviewConfig,
    /// Export defaults.
    pub export: ExportConfig,
    /// Watermark defaults and limits.
    pub watermark: WatermarkConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.tolerance_bytes == 0 {
            return Err(ConfigError::Validation(
                "search.tolerance_bytes must be positive".into(),
            ));
        }
        if !(1..=50).contains(&self.search.max_iterations) {
            return Err(ConfigError::Validation(
                "search.max_iterations must be 1-50".into(),
            ));
        }
        if !(1..=100).contains(&self.export.quality) {
            return Err(ConfigError::Validation(
                "export.quality must be 1-100".into(),
            ));
        }
        if OutputFormat::from_extension(&self.export.format).is_none() {
            return Err(ConfigError::Validation(format!(
                "export.format '{}' is not one of jpeg, png, webp, avif, bmp, ico",
                self.export.format
            )));
        }
        if Color::parse_hex(&self.export.background).is_none() {
            return Err(ConfigError::Validation(format!(
                "export.background '{}' is not a #RRGGBB color",
                self.export.background
            )));
        }
        if Color::parse_hex(&self.watermark.color).is_none() {
            return Err(ConfigError::Validation(format!(
                "watermark.color '{}' is not a #RRGGBB color",
                self.watermark.color
            )));
        }
        if !(0.0..=1.0).contains(&self.watermark.opacity) {
            return Err(ConfigError::Validation(
                "watermark.opacity must be 0.0-1.0".into(),
            ));
        }
        if self.watermark.font_size <= 0.0 {
            return Err(ConfigError::Validation(
                "watermark.font_size must be positive".into(),
            ));
        }
        if self.watermark.gap < 0.0 {
            return Err(ConfigError::Validation(
                "watermark.gap must not be negative".into(),
            ));
        }
        if self.watermark.max_tiles == 0 {
            return Err(ConfigError::Validation(
                "watermark.max_tiles must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Engine-wide settings for pipeline runs.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            search: SearchSettings {
                tolerance_bytes: self.search.tolerance_bytes,
                max_iterations: self.search.max_iterations,
            },
            watermark: WatermarkSettings {
                padding: self.watermark.padding,
                max_tiles: self.watermark.max_tiles,
            },
            default_quality: Quality::new(self.export.quality),
        }
    }

    /// Default output format. Falls back to JPEG for unvalidated configs.
    pub fn default_format(&self) -> OutputFormat {
        OutputFormat::from_extension(&self.export.format).unwrap_or(OutputFormat::Jpeg)
    }

    pub fn background(&self) -> Color {
        Color::parse_hex(&self.export.background).unwrap_or_default()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.preview.debounce_ms)
    }
}

/// Quality-target search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Accept an encode whose size is within this many bytes of the target.
    pub tolerance_bytes: u64,
    /// Bisection encodes per search; the ceiling check may add one.
    pub max_iterations: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tolerance_bytes: 5000,
            max_iterations: 7,
        }
    }
}

/// Preview scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
    /// Quiet period after the last parameter change before a run starts.
    pub debounce_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { debounce_ms: 400 }
    }
}

/// Export defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Output format when none is given on the command line.
    pub format: String,
    /// Lossy quality when neither a quality nor a target size is given.
    pub quality: u32,
    /// Flatten color for formats without alpha (`#RRGGBB`).
    pub background: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: "jpeg".to_string(),
            quality: 92,
            background: "#ffffff".to_string(),
        }
    }
}

/// Watermark defaults and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    /// Distance in pixels between an anchored stamp and the edge.
    pub padding: u32,
    /// Tile patterns needing more stamps than this are rejected.
    pub max_tiles: usize,
    pub font_size: f32,
    pub color: String,
    pub opacity: f32,
    /// Degrees, clockwise.
    pub rotation: f32,
    /// Pixels between tiles.
    pub gap: f32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            padding: 40,
            max_tiles: 250_000,
            font_size: 48.0,
            color: "#ffffff".to_string(),
            opacity: 0.5,
            rotation: -45.0,
            gap: 50.0,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel batch workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.clamp(1, cores)).unwrap_or(cores)
}

/// Name of the override file looked up in the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// [`EngineConfig::default`] as a TOML table: the layer every override file
/// is laid over.
pub fn default_layer() -> Result<toml::Table, ConfigError> {
    toml::Table::try_from(EngineConfig::default())
        .map_err(|e| ConfigError::Validation(format!("defaults do not serialize: {e}")))
}

/// Lay `overrides` over `layer` in place. Sections combine key by key;
/// any other value in `overrides` wins outright.
pub fn apply_overrides(layer: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(inner) => match layer.get_mut(&key) {
                Some(toml::Value::Table(section)) => apply_overrides(section, inner),
                _ => {
                    layer.insert(key, toml::Value::Table(inner));
                }
            },
            value => {
                layer.insert(key, value);
            }
        }
    }
}

/// Parse `config.toml` in `dir`. A missing file is `Ok(None)`.
pub fn read_overrides(dir: &Path) -> Result<Option<toml::Table>, ConfigError> {
    let content = match fs::read_to_string(dir.join(CONFIG_FILE)) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(toml::from_str(&content)?))
}

/// Turn a layered table into a checked [`EngineConfig`].
pub fn finish_layers(layer: toml::Table) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::Value::Table(layer).try_into()?;
    config.validate()?;
    Ok(config)
}

/// Defaults, overridden by `dir/config.toml` when present, then validated.
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    let mut layer = default_layer()?;
    if let Some(overrides) = read_overrides(dir)? {
        apply_overrides(&mut layer, overrides);
    }
    finish_layers(layer)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Rasterkit Configuration
# =======================
#
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Place this file as config.toml in the directory you run rasterkit from,
# or point at its directory with --config-dir.

# ---------------------------------------------------------------------------
# Target-size search
# ---------------------------------------------------------------------------
[search]
# An encode within this many bytes of --target-size is accepted.
tolerance_bytes = 5000

# Bisection encodes per search, starting at quality 0.5. If every one lands
# under the target, one more encode at full quality checks the ceiling.
# A search that runs out reports the closest quality it found.
max_iterations = 7

# ---------------------------------------------------------------------------
# Interactive preview
# ---------------------------------------------------------------------------
[preview]
# Parameter changes arriving within this window collapse into one run.
debounce_ms = 400

# ---------------------------------------------------------------------------
# Export defaults
# ---------------------------------------------------------------------------
[export]
# jpeg, png, webp, avif, bmp or ico. JPEG, WebP and AVIF are lossy.
format = "jpeg"

# Lossy quality (1-100) used when neither --quality nor --target-size is set.
quality = 92

# JPEG and BMP have no alpha channel; transparent pixels are flattened onto this color.
background = "#ffffff"

# ---------------------------------------------------------------------------
# Watermark
# ---------------------------------------------------------------------------
[watermark]
# Distance in pixels between an anchored watermark and the image edge.
padding = 40

# Tile patterns that would need more stamps than this are rejected.
# Raise the gap instead of this limit.
max_tiles = 250000

# Defaults for text watermarks.
font_size = 48.0
color = "#ffffff"
opacity = 0.5

# Degrees, clockwise. Applies to anchored and tiled watermarks.
rotation = -45.0

# Pixels between tiles in tile mode.
gap = 50.0

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for batch runs. Omit for auto (= CPU cores).
# max_processes = 4
"##
}
