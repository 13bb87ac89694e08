use std::path::Path;
use std::time::Instant;

use clap::Parser;
use log::{info, warn};

use capillary_map_lib::{Config, ConfigOverride, PipelineContext, Result, RunOptions};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "CapillaryMap - Capillary localization on stitched skin layers")]
struct Args {
    /// Folder with tile images and the scan positions file
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug mode (save intermediate images and records)
    #[clap(short, long)]
    debug: bool,

    /// Process layers one after another
    #[clap(long)]
    sequential: bool,

    /// Save every stitched layer with detected apexes marked
    #[clap(long)]
    save_stitched: bool,

    /// Override a configuration value, dotted keys reach nested tables (repeatable)
    #[clap(long = "set", value_name = "KEY=VALUE")]
    set: Vec<ConfigOverride>,

    /// Write the default configuration to the config path and exit
    #[clap(long)]
    write_default_config: bool,
}

/// Main function
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command-line arguments
    let args = Args::parse();

    if args.write_default_config {
        Config::default().save_to_file(&args.config)?;
        info!("Default configuration written to {}", args.config);
        return Ok(());
    }

    // Load configuration
    let config = if Path::new(&args.config).is_file() {
        Config::from_file(&args.config)?
    } else {
        warn!("Config file {} not found, using defaults", args.config);
        Config::default()
    };
    let mut config = config.with_overrides(&args.set)?;

    // Override config with command-line arguments
    if let Some(input) = args.input {
        config.input_path = input;
    }

    if let Some(output) = args.output {
        config.output_base_dir = output;
    }

    if args.sequential {
        config.use_parallel = false;
    }

    // Validate configuration
    config.validate()?;

    // Start timing
    let start_time = Instant::now();

    let options = RunOptions {
        debug: args.debug,
        save_stitched: args.save_stitched,
    };

    info!("Processing input folder: {}", config.input_path);
    let context = PipelineContext::from_config(config, options)?;
    let summary = context.run(options)?;

    match summary.best_layer {
        Some(index) => info!("Best layer: {}", index + 1),
        None => warn!("No capillary frame fitted in any layer"),
    }

    // Report elapsed time
    let elapsed = start_time.elapsed();
    info!("Processing completed in {:.2} seconds", elapsed.as_secs_f64());

    Ok(())
}
