//! Record a poke dataset from the simulated bench.

use anyhow::{Context, Result};
use clap::Parser;
use dmcal::Preset;
use hardware::acquire::{acquire_poke_dataset, AcquisitionPlan};
use hardware::sim::SimConfig;
use hardware::{ActuatorSink, BackendKind, Bench};
use std::path::PathBuf;
use strum::IntoEnumIterator;
use test_bench::{progress_bar, PokeDesign};

#[derive(Parser, Debug)]
#[command(author, version, about = "Record a deformable-mirror poke dataset", long_about = None)]
struct Args {
    #[arg(help = "Output file (.json, or .bin for bincode)")]
    output: PathBuf,

    #[arg(long, help = "Mirror name stored in the dataset", default_value = "SIM")]
    dm_name: String,

    #[arg(long, help = "Poke design", value_enum, default_value = "cyclic")]
    design: PokeDesign,

    #[arg(
        long,
        help = "Comma-separated poke levels (cyclic: 0.7,-0.35,0.15,-0.1,0.05; sequential: 5 levels from -0.7 to 0.7)"
    )]
    levels: Option<String>,

    #[arg(long, help = "Command of the alignment patterns", default_value = "0.7")]
    preset_magnitude: f64,

    #[arg(long, help = "Wavelength in nm", default_value = "775")]
    wavelength_nm: f64,

    #[arg(long, help = "Noise seed of the simulated camera", default_value = "7")]
    seed: u64,
}

fn parse_levels(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().with_context(|| format!("invalid level '{t}'")))
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let levels = match &args.levels {
        Some(text) => parse_levels(text)?,
        None => args.design.default_levels(),
    };
    let sim = SimConfig {
        seed: args.seed,
        ..Default::default()
    };
    let mut bench = Bench::open(BackendKind::Sim, None, sim)?;
    let n = bench.dm.size();
    let u = args.design.commands(n, &levels)?;

    let plan = AcquisitionPlan {
        dm_name: args.dm_name.clone(),
        wavelength_nm: args.wavelength_nm,
        u,
        presets: Preset::iter().collect(),
        preset_magnitude: args.preset_magnitude,
    };
    let pb = progress_bar(plan.presets.len() + plan.u.ncols(), "Recording frames");
    let mut progress = |done: usize, _total: usize| pb.set_position(done as u64);
    let dataset = acquire_poke_dataset(
        &mut bench.camera,
        &mut bench.dm,
        &bench.layout,
        &plan,
        Some(&mut progress),
    )?;
    pb.finish();

    dataset
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "{} frames and {} alignment frames written to {}",
        dataset.images.dim().0,
        dataset.align_names.len(),
        args.output.display()
    );
    Ok(())
}
