//! Fit calibration models to a recorded poke dataset, one per pupil radius.

use anyhow::{Context, Result};
use clap::Parser;
use dmcal::export::{dm_name_from_path, export_model};
use dmcal::{CalibConfig, CalibrationFile, PokeDataset, RegLSCalib, Regularization};
use log::info;
use std::path::PathBuf;
use test_bench::{basis_config, parse_radii, spinner, Alignment, BasisKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Deformable-mirror calibration from a poke dataset", long_about = None)]
struct Args {
    #[arg(help = "Poke dataset (.json or .bin)")]
    dataset: PathBuf,

    #[arg(
        long,
        help = "Comma-separated pupil radii in micrometres",
        default_value = "1500"
    )]
    radii: String,

    #[arg(long, help = "Directory for calibration and export files", default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, help = "Mirror name (derived from the dataset file name by default)")]
    dm_name: Option<String>,

    #[arg(long, help = "Phase basis", value_enum, default_value = "zernike")]
    basis: BasisKind,

    #[arg(
        long,
        help = "Zernike radial order, or pixel stride for the pixel basis",
        default_value = "6"
    )]
    order: usize,

    #[arg(
        long,
        help = "Ridge factor of the influence fit, relative to trace(UU^T)/n",
        default_value = "1e-6"
    )]
    fit_lambda: f64,

    #[arg(
        long,
        help = "Damping of the inversion, relative to the largest squared singular value",
        default_value = "1e-3"
    )]
    inverse_damping: f64,

    #[arg(long, help = "Write calibration files with bincode instead of JSON")]
    bincode: bool,

    #[arg(long, help = "Analyse frames on a single thread")]
    serial: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let radii = parse_radii(&args.radii)?;
    let dataset = PokeDataset::load(&args.dataset)
        .with_context(|| format!("loading dataset {}", args.dataset.display()))?;
    let dm_name = args
        .dm_name
        .clone()
        .unwrap_or_else(|| dm_name_from_path(&args.dataset));
    let sequence = dataset.poke_sequence()?;
    info!(
        "{dm_name}: {} actuators, {} steps of {:?} px",
        sequence.num_actuators(),
        sequence.num_steps(),
        sequence.image_shape()
    );

    let config = CalibConfig {
        wavelength_nm: dataset.wavelength_nm,
        basis: basis_config(args.basis, args.order),
        regularization: Regularization {
            fit_lambda: args.fit_lambda,
            inverse_damping: args.inverse_damping,
        },
        parallel: !args.serial,
        ..Default::default()
    };
    let calib = RegLSCalib::new(config);
    let alignment = Alignment::from_dataset(&dataset)?;
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    for radius in radii {
        let (analysis, aperture) = alignment.for_radius(radius)?;
        info!(
            "pupil {radius} µm at ({:.3}, {:.3}) mm",
            aperture.cx, aperture.cy
        );

        let pb = spinner(format!("{dm_name} r={radius} µm"));
        let mut report = |msg: &str| pb.set_message(format!("{dm_name} r={radius} µm: {msg}"));
        let run = calib
            .calibrate(&sequence, &analysis, dataset.pixel_size, Some(&mut report))
            .with_context(|| format!("calibrating {dm_name} at {radius} µm"))?;
        pb.finish_with_message(format!("{dm_name} r={radius} µm done"));

        let worst = run.residues.iter().max().copied().unwrap_or(0);
        let file = CalibrationFile::new(&dm_name, &sequence, &analysis, &config, radius, run);
        let mut path = args
            .output_dir
            .join(CalibrationFile::file_name(&dm_name, radius));
        if args.bincode {
            path.set_extension("bin");
        }
        // Text export first; the calibration file only lands next to a complete export
        let exported = export_model(&file.model, &args.output_dir, &dm_name, radius)
            .with_context(|| format!("exporting {dm_name} at {radius} µm"))?;
        if let Err(e) = file.save(&path) {
            exported.discard();
            return Err(e).with_context(|| format!("saving {}", path.display()));
        }

        println!(
            "{radius} µm: {} modes, worst frame {worst} residues, saved {}",
            file.model.num_modes(),
            path.display()
        );
        println!(
            "  exported {}, {}, {}",
            exported.z0.display(),
            exported.c.display(),
            exported.uflat.display()
        );
    }
    Ok(())
}
