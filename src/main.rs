//! CLI entry point for stem_sweep.
//!
//! Runs against simulated hardware: every control configured in the settings
//! starts at zero and both detectors produce deterministic frames.
//!
//! # Usage
//!
//! Show the grids a variant would visit:
//! ```bash
//! stem_sweep plan energy-deflection-eels --json
//! ```
//!
//! Run variants, confirming each on stdin:
//! ```bash
//! stem_sweep --config config/sweep.toml run deflection-eels defocus-eels
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stem_sweep::config::{SweepSettings, DEFAULT_CONFIG_PATH};
use stem_sweep::data::LoggingSink;
use stem_sweep::experiment::{
    AcquisitionSession, AutoConfirm, Operator, StdinOperator, SweepController, SweepVariant,
};
use stem_sweep::hardware::mock::{MockDetector, MockInstrument};

#[derive(Parser)]
#[command(name = "stem_sweep")]
#[command(about = "Sweep instrument controls over a grid and stack detector frames", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the grids and frame count a variant would use
    Plan {
        /// Variant to plan
        #[arg(value_enum)]
        variant: SweepVariant,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one or more variants against simulated hardware
    Run {
        /// Variants to run, in order
        #[arg(value_enum, required = true)]
        variants: Vec<SweepVariant>,

        /// Skip the detector-setup confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = SweepSettings::load_from(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level)),
        )
        .init();

    info!(config = %cli.config.display(), "Loaded settings");

    match cli.command {
        Commands::Plan { variant, json } => print_plan(settings, variant, json).await,
        Commands::Run { variants, yes } => run_variants(settings, &variants, yes).await,
    }
}

fn simulated_instrument(settings: &SweepSettings) -> Arc<MockInstrument> {
    let instrument = Arc::new(MockInstrument::new());
    for control in [
        &settings.deflection.control_a,
        &settings.deflection.control_b,
        &settings.energy.control,
        &settings.defocus.control,
    ] {
        instrument.preset(control, 0.0);
    }
    instrument
}

async fn print_plan(settings: SweepSettings, variant: SweepVariant, json: bool) -> Result<()> {
    let instrument = simulated_instrument(&settings);
    let axes = variant
        .axis_names()
        .iter()
        .filter_map(|name| settings.axis(name))
        .collect();
    let controller =
        SweepController::new(instrument, axes, settings.sweep.cancel_scope).await?;
    let summary = controller.plan(&variant.requests())?.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{variant}: {} frames -> {}", summary.total_frames, variant.title());
    for axis in &summary.axes {
        println!(
            "  {} [{}] step {:e} max {:e} via {}",
            axis.name,
            axis.unit,
            axis.step,
            axis.max,
            axis.controls.join(", ")
        );
        for (control, grid) in axis.controls.iter().zip(&axis.grids) {
            if let (Some(first), Some(last)) = (grid.first(), grid.last()) {
                println!("    {control}: {} points, {first:e} .. {last:e}", grid.len());
            }
        }
    }
    Ok(())
}

async fn run_variants(settings: SweepSettings, variants: &[SweepVariant], yes: bool) -> Result<()> {
    let instrument = simulated_instrument(&settings);
    let ronchigram = MockDetector::new(&settings.detectors.ronchigram, 128, 128)
        .with_readout(Duration::from_millis(20));
    let eels = MockDetector::new(&settings.detectors.eels, 1, 2048)
        .with_readout(Duration::from_millis(50));

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received; cancelling sweep");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let operator: Box<dyn Operator> = if yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinOperator)
    };

    let session = AcquisitionSession::new(instrument, settings, ronchigram, eels);
    let reports = session
        .run(variants, operator.as_ref(), &LoggingSink, &*cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
