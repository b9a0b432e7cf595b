use clap::{Parser, Subcommand};
use rasterkit::archive::{ArchiveWriter, DirectoryArchive, ZipBundle, is_zip_path};
use rasterkit::batch::{self, BatchItem};
use rasterkit::config::{self, EngineConfig};
use rasterkit::imaging::{
    BitmapFont, BitmapStore, Color, CropRegion, Dimensions, Effect, EncodedOutput, FilterParams,
    GeometryParams, OutputFormat, OutputParams, Placement, Quality, ResampleFilter, RustBackend,
    SearchOutcome, SharpenLevel, SizeRequest, TransformParameters, WatermarkSource, WatermarkSpec,
    center_crop, parse_aspect,
};
use rasterkit::output;
use rasterkit::session::EditSession;
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Source extensions picked up when a batch input is a directory.
const SOURCE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "webp", "tif", "tiff", "bmp", "ico"];

/// Flags describing one edit, shared by `transform` and `batch`.
#[derive(clap::Args, Clone)]
struct TransformArgs {
    /// Target width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Target height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Scale both sides by a percentage (25, 50, 75, 100, 200, 400, ...)
    #[arg(long, conflicts_with_all = ["width", "height"])]
    scale: Option<f64>,

    /// Use width and height as given instead of keeping the aspect ratio
    #[arg(long)]
    no_aspect_lock: bool,

    /// Crop before resizing: X,Y,WIDTH,HEIGHT in source pixels
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropRegion>,

    /// Crop the largest centered region of this aspect ratio, e.g. 16:9
    #[arg(long, conflicts_with = "crop")]
    crop_aspect: Option<String>,

    /// Resampling filter: nearest, bilinear, bicubic, lanczos3
    #[arg(long, default_value = "lanczos3")]
    filter: ResampleFilter,

    /// Sharpen after resizing: none, standard, strong
    #[arg(long)]
    sharpen: Option<SharpenLevel>,

    /// Brightness percent, 100 = unchanged
    #[arg(long, default_value_t = 100.0)]
    brightness: f32,

    /// Contrast percent, 100 = unchanged
    #[arg(long, default_value_t = 100.0)]
    contrast: f32,

    /// Saturation percent, 100 = unchanged
    #[arg(long, default_value_t = 100.0)]
    saturation: f32,

    /// Grayscale amount, 0-100
    #[arg(long, default_value_t = 0.0)]
    grayscale: f32,

    /// Sepia amount, 0-100
    #[arg(long, default_value_t = 0.0)]
    sepia: f32,

    /// Hue rotation in degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    hue_rotate: f32,

    /// Gaussian blur radius in pixels
    #[arg(long, default_value_t = 0.0)]
    blur: f32,

    /// Watermark text
    #[arg(long)]
    watermark_text: Option<String>,

    /// Watermark image file
    #[arg(long, conflicts_with = "watermark_text")]
    watermark_image: Option<PathBuf>,

    /// Watermark image width as a fraction of the output width
    #[arg(long, default_value_t = 0.25)]
    watermark_scale: f32,

    /// top-left, top-right, bottom-left, bottom-right, center, or tile
    #[arg(long, default_value = "bottom-right")]
    position: Placement,

    /// Watermark opacity, 0.0-1.0 (default from config)
    #[arg(long)]
    opacity: Option<f32>,

    /// Watermark rotation in degrees (default from config)
    #[arg(long, allow_hyphen_values = true)]
    rotation: Option<f32>,

    /// Watermark font size in pixels (default from config)
    #[arg(long)]
    font_size: Option<f32>,

    /// Watermark text color, #RRGGBB or #RRGGBBAA (default from config)
    #[arg(long)]
    color: Option<Color>,

    /// Pixels between tiles when --position tile (default from config)
    #[arg(long)]
    gap: Option<f32>,

    /// Apply the watermark before sharpening
    #[arg(long)]
    watermark_first: bool,

    /// Output format: jpeg, png, webp, avif, bmp, ico
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Encoder quality 1-100 for lossy formats (default from config)
    #[arg(long, conflicts_with = "target_size")]
    quality: Option<u32>,

    /// Search quality to land near this size: 200000, 200KB, 1.5MB
    #[arg(long, value_parser = parse_size)]
    target_size: Option<u64>,

    /// Background for formats without alpha (default from config)
    #[arg(long)]
    background: Option<Color>,
}

impl TransformArgs {
    /// Build the edit. `source` is the size of the single source image, when
    /// there is one; centered crops need it.
    fn parameters(
        &self,
        config: &EngineConfig,
        format: OutputFormat,
        source: Option<Dimensions>,
    ) -> Result<TransformParameters, Box<dyn Error>> {
        let crop = match (&self.crop, &self.crop_aspect) {
            (Some(region), _) => Some(*region),
            (None, Some(aspect)) => {
                let ratio = parse_aspect(aspect)
                    .ok_or_else(|| format!("invalid aspect '{aspect}', expected W:H"))?;
                let dims = source.ok_or("--crop-aspect needs a single source image")?;
                Some(center_crop(dims, ratio))
            }
            (None, None) => None,
        };

        let size = SizeRequest {
            width: self.width,
            height: self.height,
            aspect_locked: !self.no_aspect_lock,
            scale_percent: self.scale,
        };

        let mut effects = Vec::new();
        let filter = FilterParams {
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            grayscale: self.grayscale,
            sepia: self.sepia,
            hue_rotate: self.hue_rotate,
            blur: self.blur,
        };
        if !filter.is_identity() {
            effects.push(Effect::Filter(filter));
        }
        let sharpen = self.sharpen.map(Effect::Sharpen);
        let watermark = self.watermark(config)?.map(Effect::Watermark);
        if self.watermark_first {
            effects.extend(watermark.into_iter().chain(sharpen));
        } else {
            effects.extend(sharpen.into_iter().chain(watermark));
        }

        Ok(TransformParameters {
            geometry: GeometryParams {
                crop,
                size,
                filter: self.filter,
            },
            effects,
            output: OutputParams {
                format,
                quality: self.quality.map(Quality::new),
                target_bytes: self.target_size,
                background: self.background.unwrap_or_else(|| config.background()),
            },
        })
    }

    fn watermark(&self, config: &EngineConfig) -> Result<Option<WatermarkSpec>, Box<dyn Error>> {
        let defaults = &config.watermark;
        let source = if let Some(text) = &self.watermark_text {
            WatermarkSource::Text {
                text: text.clone(),
                font_size: self.font_size.unwrap_or(defaults.font_size),
                color: match self.color {
                    Some(color) => color,
                    None => defaults.color.parse()?,
                },
            }
        } else if let Some(path) = &self.watermark_image {
            WatermarkSource::Image {
                bytes: std::fs::read(path)?,
                scale: self.watermark_scale,
            }
        } else {
            return Ok(None);
        };

        let placement = match self.position {
            Placement::Tile { .. } => Placement::Tile {
                gap: self.gap.unwrap_or(defaults.gap),
            },
            anchored => anchored,
        };
        Ok(Some(WatermarkSpec {
            source,
            opacity: self.opacity.unwrap_or(defaults.opacity),
            rotation_degrees: self.rotation.unwrap_or(defaults.rotation),
            placement,
        }))
    }
}

fn parse_crop(input: &str) -> Result<CropRegion, String> {
    let parts: Vec<u32> = input
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid crop '{input}': {e}"))?;
    match parts.as_slice() {
        &[x, y, width, height] => Ok(CropRegion {
            x,
            y,
            width,
            height,
        }),
        _ => Err(format!("invalid crop '{input}', expected X,Y,WIDTH,HEIGHT")),
    }
}

/// Byte count with an optional KB/MB suffix (binary units).
fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024.0)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1.0)
    } else {
        (upper.as_str(), 1.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{trimmed}'"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("size must be positive, got '{trimmed}'"));
    }
    Ok((value * multiplier).round() as u64)
}

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup; called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "rasterkit")]
#[command(about = "Resize, sharpen, watermark and compress images locally")]
#[command(long_about = "\
Resize, sharpen, watermark and compress images locally

Every edit runs in a fixed order:

  decode → crop/resize → filter → [sharpen | watermark] → target-size search → encode

Geometry always reads the original pixels, so repeated edits never
accumulate loss. Sharpen and watermark run in the order given
(--watermark-first flips it).

Examples:

  rasterkit transform photo.png --scale 50 -o half.jpg
  rasterkit transform photo.png --width 1200 --target-size 200KB
  rasterkit transform photo.png --watermark-text \"© me\" --position tile
  rasterkit batch shots/ --width 800 --format webp -o out/
  rasterkit batch shots/ --grayscale 100 -o shots.zip
  rasterkit info photo.png

Run 'rasterkit gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Log pipeline details to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply one edit to one image
    Transform {
        /// Source image
        input: PathBuf,
        /// Output file (default: <input>-edited.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        edit: TransformArgs,
    },
    /// Apply one edit to many images in parallel
    Batch {
        /// Source images or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory, or a .zip file to bundle everything into
        #[arg(short, long, default_value = "rasterkit-out")]
        output: PathBuf,
        #[command(flatten)]
        edit: TransformArgs,
    },
    /// Describe source images
    Info {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Serialize)]
struct TransformReport<'a> {
    source: String,
    destination: String,
    output: &'a EncodedOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<&'a SearchOutcome>,
}

#[derive(Serialize)]
struct InfoReport {
    name: String,
    width: u32,
    height: u32,
    format: Option<String>,
    file_bytes: usize,
    transparency: bool,
    fingerprint: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Transform {
            input,
            output,
            json,
            edit,
        } => {
            let config = config::load_config(&cli.config_dir)?;
            let format = edit
                .format
                .or_else(|| {
                    output
                        .as_ref()
                        .and_then(|p| p.extension())
                        .and_then(|e| OutputFormat::from_extension(&e.to_string_lossy()))
                })
                .unwrap_or_else(|| config.default_format());
            let destination = output.unwrap_or_else(|| default_destination(&input, format));

            let mut session = EditSession::from_config(&config);
            let asset = session.load(&std::fs::read(&input)?)?;
            let params = edit.parameters(&config, format, Some(asset.dimensions()))?;
            let result = session.run_now(&params)?;
            std::fs::write(&destination, &result.encoded.bytes)?;
            info!(destination = %destination.display(), "written");

            let source = display_name(&input);
            let dest = destination.display().to_string();
            if json {
                let report = TransformReport {
                    source,
                    destination: dest,
                    output: &result.encoded,
                    search: result.search.as_ref(),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in output::format_transform_report(&source, &dest, &result) {
                    println!("{}", line);
                }
            }
        }
        Command::Batch {
            inputs,
            output,
            edit,
        } => {
            let config = config::load_config(&cli.config_dir)?;
            init_thread_pool(&config.processing);
            let format = edit.format.unwrap_or_else(|| config.default_format());
            let params = edit.parameters(&config, format, None)?;
            let items = collect_items(&inputs)?;
            if items.is_empty() {
                return Err("no source images found".into());
            }

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_batch_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let results = batch::process_batch(
                &RustBackend::new(),
                &BitmapFont::new(),
                &items,
                &params,
                &config.pipeline_settings(),
                Some(tx),
            );
            printer
                .join()
                .map_err(|_| "progress printer panicked")?;

            let written = if is_zip_path(&output) {
                let mut archive = ZipBundle::create(&output)?;
                let written = batch::bundle(&results, &mut archive)?;
                archive.finish()?;
                written
            } else {
                let mut archive = DirectoryArchive::create(&output)?;
                let written = batch::bundle(&results, &mut archive)?;
                archive.finish()?;
                written
            };
            for line in output::format_batch_summary(&results, &written, &output) {
                println!("{}", line);
            }

            let failed = results.iter().filter(|r| r.result.is_err()).count();
            if failed > 0 {
                return Err(format!("{failed} of {} images failed", results.len()).into());
            }
        }
        Command::Info { inputs, json } => {
            let backend = RustBackend::new();
            let mut reports = Vec::new();
            for path in &inputs {
                let mut store = BitmapStore::new();
                let asset = store.load(&backend, &std::fs::read(path)?)?;
                let name = display_name(path);
                if json {
                    reports.push(InfoReport {
                        name,
                        width: asset.width(),
                        height: asset.height(),
                        format: asset.format().map(|f| format!("{f:?}").to_lowercase()),
                        file_bytes: asset.source_len(),
                        transparency: asset.has_transparency(),
                        fingerprint: asset.fingerprint().to_string(),
                    });
                } else {
                    for line in output::format_asset_info(&name, &asset) {
                        println!("{}", line);
                    }
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "rasterkit=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn default_destination(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{stem}-edited.{}", format.extension()))
}

fn is_source_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read every input file; directories are walked for known image extensions.
fn collect_items(inputs: &[PathBuf]) -> Result<Vec<BatchItem>, Box<dyn Error>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && is_source_image(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }

    paths
        .iter()
        .map(|path| {
            Ok(BatchItem {
                name: display_name(path),
                bytes: std::fs::read(path)?,
            })
        })
        .collect()
}
