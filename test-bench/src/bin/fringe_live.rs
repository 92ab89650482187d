//! Continuous fringe analysis on the simulated or replayed bench.

use anyhow::{Context, Result};
use clap::Parser;
use hardware::sim::SimConfig;
use hardware::{BackendKind, Bench, FrameSource, LiveAnalysis, LiveEvent, RunMode};
use interf::{AnalyseOptions, Aperture, FringeAnalysis, FringeConfig};
use std::path::PathBuf;
use test_bench::finite_rms;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live interferogram analysis", long_about = None)]
struct Args {
    #[arg(long, help = "Camera backend (sim or replay)", default_value = "sim")]
    backend: BackendKind,

    #[arg(long, help = "Poke dataset to replay")]
    dataset: Option<PathBuf>,

    #[arg(long, help = "Analyse a single frame and exit")]
    single: bool,

    #[arg(long, help = "Stop after this many frames", default_value = "50")]
    frames: usize,

    #[arg(long, help = "Poke one actuator per frame with this command")]
    poke: Option<f64>,

    #[arg(long, help = "Pupil radius in mm, centred on the optical axis")]
    pupil_mm: Option<f64>,

    #[arg(long, help = "Search for the orders on every frame")]
    auto_find: bool,

    #[arg(long, help = "Noise seed of the simulated camera", default_value = "7")]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let sim = SimConfig {
        seed: args.seed,
        ..Default::default()
    };
    let bench = Bench::open(args.backend, args.dataset.as_deref(), sim)
        .context("opening the bench")?;

    let config = FringeConfig::new(bench.camera.shape(), bench.camera.pixel_size());
    let mut analysis = FringeAnalysis::new(config)?;
    let use_mask = match args.pupil_mm {
        Some(r) => {
            analysis.set_aperture(Aperture::new(0.0, 0.0, r))?;
            true
        }
        None => false,
    };
    let options = AnalyseOptions {
        auto_find_orders: args.auto_find,
        use_mask,
        ..Default::default()
    };

    let mode = if args.single {
        RunMode::Single
    } else {
        RunMode::Repeat
    };
    let mut live = LiveAnalysis::new(bench.camera, analysis, mode)
        .with_options(options)
        .with_max_frames(args.frames);
    if let Some(magnitude) = args.poke {
        live = live.with_poke_cycle(bench.dm, magnitude);
    }

    let summary = live.run(|event| match event {
        LiveEvent::Frame {
            index,
            poked,
            products,
        } => {
            let rms = finite_rms(products.phase()).unwrap_or(f64::NAN);
            let poked = poked.map_or("-".to_string(), |k| k.to_string());
            println!(
                "{index}\tpoke {poked}\trms {rms:.3} rad\tresidues {}",
                products.residues
            );
        }
        LiveEvent::Failed { index, error } => println!("{index}\tfailed: {error}"),
    })?;

    println!("{} frames, {} failed", summary.frames, summary.failures);
    Ok(())
}
