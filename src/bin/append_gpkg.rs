//! Append the features of one GeoPackage layer to another.
//!
//! Usage:
//!   append_gpkg --source survey.gpkg --source-layer parcels \
//!       --target cadastre.gpkg --target-layer parcels \
//!       --source-field code --target-field code --action skip
//!
//! Settings can also come from a TOML file given with `--config`; flags
//! override the file:
//!
//! ```toml
//! source = "survey.gpkg"
//! source_layer = "parcels"
//! target = "cadastre.gpkg"
//! target_layer = "parcels"
//! avoid_intersections = ["protected_areas"]
//!
//! [append]
//! source_field = "code"
//! target_field = "code"
//! action_on_duplicate = "update"
//! ```

use clap::Parser;
use gpkg_append::{
    ActionOnDuplicate, AppendError, AppendParameters, AvoidIntersectionLayer, Gpkg, LogFeedback,
    append_features,
};
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "append_gpkg")]
#[command(about = "Append features to a GeoPackage layer, skipping or updating duplicates")]
#[command(version)]
struct Cli {
    /// TOML file with run settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// GeoPackage to read features from
    #[arg(long)]
    source: Option<PathBuf>,

    #[arg(long)]
    source_layer: Option<String>,

    /// GeoPackage to append features to
    #[arg(long)]
    target: Option<PathBuf>,

    #[arg(long)]
    target_layer: Option<String>,

    /// Source field compared to detect duplicates
    #[arg(long)]
    source_field: Option<String>,

    /// Target field compared to detect duplicates
    #[arg(long)]
    target_field: Option<String>,

    /// Action on duplicates: no_action, skip, update, update_geometry_only (or 0-3)
    #[arg(long, value_parser = parse_action)]
    action: Option<ActionOnDuplicate>,

    /// Polygon layer of the target GeoPackage that appended polygons must not
    /// overlap (repeatable)
    #[arg(long = "avoid-intersections", value_name = "LAYER")]
    avoid_intersections: Vec<String>,

    /// Log verbosity when RUST_LOG is not set: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunConfig {
    source: Option<PathBuf>,
    source_layer: Option<String>,
    target: Option<PathBuf>,
    target_layer: Option<String>,
    avoid_intersections: Vec<String>,
    append: AppendParameters,
}

impl RunConfig {
    fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
        Ok(toml::from_str(&text)?)
    }

    /// Overlay the command line flags that were given.
    fn merge(mut self, cli: Cli) -> Self {
        self.source = cli.source.or(self.source);
        self.source_layer = cli.source_layer.or(self.source_layer);
        self.target = cli.target.or(self.target);
        self.target_layer = cli.target_layer.or(self.target_layer);
        if !cli.avoid_intersections.is_empty() {
            self.avoid_intersections = cli.avoid_intersections;
        }
        self.append.source_field = cli.source_field.or(self.append.source_field);
        self.append.target_field = cli.target_field.or(self.append.target_field);
        if let Some(action) = cli.action {
            self.append.action_on_duplicate = action;
        }
        self
    }
}

fn parse_action(s: &str) -> Result<ActionOnDuplicate, String> {
    s.parse().map_err(|err: AppendError| err.to_string())
}

fn required<T>(value: Option<T>, flag: &str) -> Result<T, String> {
    value.ok_or_else(|| {
        format!(
            "missing --{flag} (or `{}` in the config file)",
            flag.replace('-', "_")
        )
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("append_gpkg failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbosity: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Returns whether the run wrote a report.
fn run(cli: Cli) -> Result<bool, Box<dyn Error>> {
    let file = match cli.config.as_deref() {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let config = file.merge(cli);

    let source_path = required(config.source, "source")?;
    let source_layer = required(config.source_layer, "source-layer")?;
    let target_path = required(config.target, "target")?;
    let target_layer = required(config.target_layer, "target-layer")?;

    let source_gpkg = Gpkg::open_read_only(&source_path)?;
    let target_gpkg = Gpkg::open(&target_path)?;

    let mut params = config.append;
    for layer_name in &config.avoid_intersections {
        let layer = target_gpkg.open_layer(layer_name)?;
        params
            .avoid_intersections
            .push(AvoidIntersectionLayer::from_layer(&layer)?);
    }

    let source = source_gpkg.open_layer(&source_layer)?;
    let mut target = target_gpkg.open_layer(&target_layer)?;

    let report = append_features(&source, &mut target, &params, &mut LogFeedback::new());
    print!("{}", toml::to_string(&report)?);
    Ok(!report.is_empty())
}
