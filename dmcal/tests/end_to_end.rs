//! Calibration of a simulated 140-actuator mirror seen through the fringe
//! pipeline.

use std::f64::consts::PI;

use dmcal::basis::ZernikeBasis;
use dmcal::export::{export_model, import_model, ExportPaths};
use dmcal::layout::DEFAULT_ROLL;
use dmcal::poke::{cyclic_pokes, sequential_pokes, CYCLIC_LEVELS};
use dmcal::{
    ActuatorLayout, CalibConfig, CalibrationError, CalibrationFile, CalibrationModel, PhaseBasis,
    PokeSequence, Preset, RegLSCalib,
};
use interf::synthetic::{flat_field, to_u16, FringeModel};
use interf::{AnalyseOptions, Aperture, Error, FringeAnalysis, FringeConfig, FringeProducts};
use ndarray::{array, s, Array2, Array3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const WAVELENGTH_NM: f64 = 775.0;
const STROKE_NM: f64 = 100.0;
const PUPIL_UM: f64 = 1500.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mirror in front of a simulated interferometer with a fixed aberration.
struct Bench {
    layout: ActuatorLayout,
    model: FringeModel,
    aberration: Array2<f64>,
}

impl Bench {
    fn new() -> Self {
        let model = FringeModel {
            pupil: Some(Aperture::new(0.0, 0.0, 1.6)),
            noise_sigma: 1.0,
            ..Default::default()
        };
        let aberration = model
            .phase_from_fn(|x, y| {
                let r2 = (x * x + y * y) / (1.5 * 1.5);
                1.2 * r2 + 0.4 * x * y / (1.5 * 1.5)
            })
            .unwrap();
        Self {
            layout: ActuatorLayout::dm140(),
            model,
            aberration,
        }
    }

    fn frame(&self, voltages: &[f64], seed: u64) -> Array2<u16> {
        let grid = self.model.camera_grid().unwrap();
        let surface = self.layout.surface(voltages, &grid, DEFAULT_ROLL).unwrap();
        let phase = &self.aberration + &surface.mapv(|s| s * STROKE_NM * 2.0 * PI / WAVELENGTH_NM);
        self.model
            .capture(&phase.view(), &mut ChaCha8Rng::seed_from_u64(seed))
            .unwrap()
    }

    fn record(&self, u: &Array2<f64>) -> PokeSequence {
        let (rows, cols) = self.model.shape;
        let mut images = Array3::zeros((u.ncols(), rows, cols));
        for (step, column) in u.columns().into_iter().enumerate() {
            let voltages: Vec<f64> = column.to_vec();
            images
                .slice_mut(s![step, .., ..])
                .assign(&self.frame(&voltages, 100 + step as u64));
        }
        PokeSequence::new(u.clone(), images).unwrap()
    }

    fn analysis(&self) -> FringeAnalysis {
        FringeAnalysis::new(FringeConfig::new(self.model.shape, self.model.pixel)).unwrap()
    }

    /// Analysis with orders found on the rest frame and the pupil centred on
    /// the bump of the centre preset.
    fn aligned_analysis(&self) -> FringeAnalysis {
        let mut fa = self.analysis();
        let rest_frame = self.frame(&vec![0.0; self.layout.len()], 1);
        let centre_frame = self.frame(&self.layout.preset(Preset::Centre, 0.7), 2);
        let search = AnalyseOptions {
            auto_find_orders: true,
            ..Default::default()
        };
        let rest = fa.analyse(&rest_frame.view(), search).unwrap();
        let centre = fa
            .analyse(&centre_frame.view(), AnalyseOptions::default())
            .unwrap();
        fa.estimate_aperture(&rest, &centre, PUPIL_UM).unwrap();
        fa
    }
}

fn coefficients(basis: &dyn PhaseBasis, products: &FringeProducts) -> nalgebra::DVector<f64> {
    let nm = products.phase().mapv(|p| p * WAVELENGTH_NM / (2.0 * PI));
    basis.project(&nm.view()).unwrap()
}

#[test]
fn test_calibrates_simulated_dm140() {
    init_logging();
    let bench = Bench::new();
    let fa = bench.aligned_analysis();
    let aperture = fa.aperture().unwrap();
    assert!(aperture.cx.abs() < 0.1 && aperture.cy.abs() < 0.1, "{aperture:?}");
    assert!((aperture.radius - 1.5).abs() < 1e-12);

    let u = cyclic_pokes(bench.layout.len(), &CYCLIC_LEVELS).unwrap();
    assert_eq!(u.dim(), (140, 142));
    let sequence = bench.record(&u);

    let config = CalibConfig {
        wavelength_nm: WAVELENGTH_NM,
        ..Default::default()
    };
    let mut messages = Vec::new();
    let mut status = |m: &str| messages.push(m.to_string());
    let run = RegLSCalib::new(config)
        .calibrate(&sequence, &fa, bench.model.pixel, Some(&mut status))
        .unwrap();

    assert_eq!(run.model.c.dim(), (140, 27));
    assert_eq!(run.model.uflat.len(), 140);
    assert_eq!(run.model.z0.len(), 27);
    assert_eq!(run.residues.len(), 142);
    assert!(messages.iter().any(|m| m == "analysed 142/142 frames"));
    // The caller's analysis is not modified
    assert_eq!(fa.aperture(), Some(run.aperture));

    // Applying the flat command removes most of the aberration
    let basis = ZernikeBasis::new(fa.phase_grid(), &aperture, 6).unwrap();
    let mut check = fa.clone();
    let options = AnalyseOptions {
        use_mask: true,
        ..Default::default()
    };
    let flat = check
        .analyse(&bench.frame(run.model.uflat.as_slice().unwrap(), 7).view(), options)
        .unwrap();
    let rest = check
        .analyse(&bench.frame(&vec![0.0; 140], 8).view(), options)
        .unwrap();
    let before = coefficients(&basis, &rest).norm();
    let after = coefficients(&basis, &flat).norm();
    assert!(after < 0.5 * before, "residual {after:.2} nm vs {before:.2} nm");

    // Persist and reload bit for bit, in both formats
    let dir = tempfile::tempdir().unwrap();
    let file = CalibrationFile::new("DM140", &sequence, &fa, &config, PUPIL_UM, run);
    for name in [CalibrationFile::file_name("DM140", PUPIL_UM), "cal.bin".to_string()] {
        let path = dir.path().join(name);
        file.save(&path).unwrap();
        let loaded = CalibrationFile::load(&path).unwrap();
        assert_eq!(loaded, file);
        assert!(loaded
            .model
            .c
            .iter()
            .zip(file.model.c.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }

    let paths = export_model(&file.model, dir.path(), "DM140", PUPIL_UM).unwrap();
    assert!(paths.c.ends_with("DM140_1.500mm_CAL_C_matrix.dat"));
    assert_eq!(import_model(&paths).unwrap(), file.model);
}

#[test]
fn test_calibration_requires_aperture() {
    init_logging();
    let bench = Bench::new();
    let u = cyclic_pokes(140, &CYCLIC_LEVELS).unwrap();
    let sequence = PokeSequence::new(u, Array3::zeros((142, 128, 128))).unwrap();
    let err = RegLSCalib::new(CalibConfig::default())
        .calibrate(&sequence, &bench.analysis(), bench.model.pixel, None)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::ApertureMismatch(_)));
}

#[test]
fn test_single_poke_per_actuator_is_insufficient() {
    init_logging();
    let bench = Bench::new();
    let mut fa = bench.analysis();
    fa.set_aperture(Aperture::new(0.0, 0.0, 1.5)).unwrap();
    let u = sequential_pokes(140, &[0.7]);
    let steps = u.ncols();
    let sequence = PokeSequence::new(u, Array3::zeros((steps, 128, 128))).unwrap();
    let err = RegLSCalib::new(CalibConfig::default())
        .calibrate(&sequence, &fa, bench.model.pixel, None)
        .unwrap_err();
    assert!(matches!(err, CalibrationError::InsufficientData(_)));
}

#[test]
fn test_flat_rest_frame_reports_its_step() {
    init_logging();
    let bench = Bench::new();
    let mut fa = bench.analysis();
    fa.set_aperture(Aperture::new(0.0, 0.0, 1.5)).unwrap();
    assert!(fa.orders().is_none());

    let u = sequential_pokes(140, &[0.7, -0.7]);
    let steps = u.ncols();
    let mut images = Array3::zeros((steps, 128, 128));
    let flat = to_u16(&flat_field((128, 128), 2000.0));
    for step in 0..steps {
        images.slice_mut(s![step, .., ..]).assign(&flat);
    }
    let sequence = PokeSequence::new(u, images).unwrap();

    let err = RegLSCalib::new(CalibConfig::default())
        .calibrate(&sequence, &fa, bench.model.pixel, None)
        .unwrap_err();
    assert_eq!(err.step(), Some(0));
    match err {
        CalibrationError::Frame { source, .. } => {
            assert_eq!(source.frame(), Some(0));
            assert!(matches!(source.root(), Error::OrderNotFound { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_failed_export_leaves_no_files() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let model = CalibrationModel {
        z0: array![1.0, -2.0],
        c: array![[0.5, 0.25], [0.125, -1.0], [2.0, 4.0]],
        uflat: array![0.0, 1.5, -0.75],
    };
    // A directory where the C matrix should go makes its rename fail
    let paths = ExportPaths::new(dir.path(), "DM140", PUPIL_UM);
    std::fs::create_dir(&paths.c).unwrap();

    let err = export_model(&model, dir.path(), "DM140", PUPIL_UM).unwrap_err();
    assert!(matches!(err, CalibrationError::Io { .. }));
    assert!(!paths.z0.exists());
    assert!(!paths.uflat.exists());
    assert!(paths.c.is_dir());
    // Nothing else in the directory, temporaries included
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    std::fs::remove_dir(&paths.c).unwrap();
    let written = export_model(&model, dir.path(), "DM140", PUPIL_UM).unwrap();
    assert_eq!(import_model(&written).unwrap(), model);
    written.discard();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
