//! End-to-end phase retrieval on synthetic interferograms.

use approx::assert_relative_eq;
use interf::synthetic::{flat_field, to_u16, FringeModel};
use interf::{
    AnalyseOptions, AnalysisState, Aperture, Error, FringeAnalysis, FringeConfig, OrderLocation,
    Stage,
};
use ndarray::{Array2, Zip};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn aberration(x: f64, y: f64) -> f64 {
    let r = 1.5;
    2.0 * (x * x + y * y) / (r * r) + 0.6 * x / r - 0.9 * x * y / (r * r)
}

fn analysis_for(model: &FringeModel) -> FringeAnalysis {
    FringeAnalysis::new(FringeConfig::new(model.shape, model.pixel)).unwrap()
}

fn noisy_frame(model: &FringeModel, phase: &Array2<f64>, seed: u64) -> Array2<u16> {
    model
        .capture(&phase.view(), &mut ChaCha8Rng::seed_from_u64(seed))
        .unwrap()
}

/// RMS of `measured - truth` over `inside`, after removing the mean offset.
fn rms_error(measured: &Array2<f64>, truth: &Array2<f64>, inside: &Array2<bool>) -> f64 {
    let mut diffs = Vec::new();
    Zip::from(measured)
        .and(truth)
        .and(inside)
        .for_each(|&m, &t, &keep| {
            if keep {
                diffs.push(m - t);
            }
        });
    let n = diffs.len() as f64;
    let mean = diffs.iter().sum::<f64>() / n;
    (diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt()
}

#[test]
fn test_locator_recovers_carrier() {
    init_logging();
    let model = FringeModel {
        noise_sigma: 3.0,
        ..Default::default()
    };
    let phase = model.phase_from_fn(aberration).unwrap();
    let mut fa = analysis_for(&model);

    let options = AnalyseOptions {
        auto_find_orders: true,
        ..Default::default()
    };
    let products = fa
        .analyse(&noisy_frame(&model, &phase, 1).view(), options)
        .unwrap();

    let (dfx, dfy) = fa.fourier_grid().spacing;
    let found = products.orders;
    assert!((found.f0.0 - model.carrier.0).abs() <= 1.01 * dfx);
    assert!((found.f0.1 - model.carrier.1).abs() <= 1.01 * dfy);
    assert!(found.asymmetry() <= 1.5 * dfx.max(dfy));
    assert_eq!(fa.orders(), Some(found));
}

#[test]
fn test_pipeline_recovers_phase() {
    init_logging();
    let model = FringeModel {
        noise_sigma: 2.0,
        ..Default::default()
    };
    let phase = model.phase_from_fn(aberration).unwrap();
    let mut fa = analysis_for(&model);
    fa.set_orders(OrderLocation::from_carrier(model.carrier.0, model.carrier.1));
    fa.set_aperture(Aperture::new(0.0, 0.0, 1.5)).unwrap();

    let options = AnalyseOptions {
        use_mask: true,
        ..Default::default()
    };
    let products = fa
        .analyse(&noisy_frame(&model, &phase, 2).view(), options)
        .unwrap();
    let unwrapped = products.unwrapped.as_ref().unwrap();

    let grid = &products.grid;
    let truth = Zip::from(&grid.xx)
        .and(&grid.yy)
        .map_collect(|&x, &y| aberration(x, y));
    let inner = Aperture::new(0.0, 0.0, 1.0).mask(grid);
    let rms = rms_error(unwrapped, &truth, &inner);
    assert!(rms < 0.1, "phase RMS error {rms:.4} rad");

    // Fringe amplitude is bias * V / 2 inside the pupil
    assert_relative_eq!(products.magnitude[[32, 32]], 800.0, max_relative = 0.05);

    let mask = products.mask.as_ref().unwrap();
    assert!(!mask[[0, 0]]);
    assert!(unwrapped[[0, 0]].is_nan());
    assert!(products.wrapped[[0, 0]].is_nan());
    assert!(products
        .wrapped
        .iter()
        .filter(|v| v.is_finite())
        .all(|v| *v > -std::f64::consts::PI && *v <= std::f64::consts::PI));
}

#[test]
fn test_flat_field_is_order_not_found() {
    init_logging();
    let model = FringeModel::default();
    let mut fa = analysis_for(&model);
    let mut flat = flat_field(model.shape, 2000.0);
    interf::synthetic::add_gaussian_noise(&mut flat, 3.0, &mut ChaCha8Rng::seed_from_u64(3));

    let err = fa
        .analyse(&to_u16(&flat).view(), AnalyseOptions::default())
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::LocateOrders));
    assert!(matches!(err.root(), Error::OrderNotFound { .. }));
    assert_eq!(fa.state(), AnalysisState::Uninitialized);
    assert!(fa.orders().is_none());
}

#[test]
fn test_failed_search_keeps_cached_orders() {
    init_logging();
    let model = FringeModel::default();
    let phase = model.phase_from_fn(aberration).unwrap();
    let good = noisy_frame(&model, &phase, 4);
    let flat = to_u16(&flat_field(model.shape, 2000.0));
    let mut fa = analysis_for(&model);

    let first = fa.analyse(&good.view(), AnalyseOptions::default()).unwrap();
    let cached = fa.orders().unwrap();
    assert_eq!(first.orders, cached);

    let search = AnalyseOptions {
        auto_find_orders: true,
        ..Default::default()
    };
    let err = fa.analyse(&flat.view(), search).unwrap_err().with_frame(1);
    assert_eq!(err.frame(), Some(1));
    assert_eq!(fa.orders(), Some(cached));
    assert_eq!(fa.state(), AnalysisState::Configured);

    // Fast path on the next frame reuses the cache
    let again = fa.analyse(&good.view(), AnalyseOptions::default()).unwrap();
    assert_eq!(again.orders, cached);
    assert_eq!(again.unwrapped, first.unwrapped);
}

#[test]
fn test_clones_cache_independently() {
    init_logging();
    let model = FringeModel::default();
    let phase = model.phase_from_fn(aberration).unwrap();
    let frame = noisy_frame(&model, &phase, 5);
    let fa = analysis_for(&model);

    let mut worker = fa.clone();
    worker.analyse(&frame.view(), AnalyseOptions::default()).unwrap();
    assert!(worker.orders().is_some());
    assert!(fa.orders().is_none());
    assert!(std::sync::Arc::ptr_eq(fa.phase_grid(), worker.phase_grid()));
}

#[test]
fn test_aperture_from_poked_frame() {
    init_logging();
    let model = FringeModel::default();
    let rest_phase = model.phase_from_fn(aberration).unwrap();
    let poked_phase = model
        .phase_from_fn(|x, y| {
            let r2 = (x - 0.3).powi(2) + (y + 0.2).powi(2);
            aberration(x, y) + 2.0 * (-r2 / (2.0 * 0.2 * 0.2)).exp()
        })
        .unwrap();

    let mut fa = analysis_for(&model);
    fa.set_orders(OrderLocation::from_carrier(model.carrier.0, model.carrier.1));
    let rest = fa
        .analyse(&noisy_frame(&model, &rest_phase, 6).view(), AnalyseOptions::default())
        .unwrap();
    let poked = fa
        .analyse(&noisy_frame(&model, &poked_phase, 7).view(), AnalyseOptions::default())
        .unwrap();

    let aperture = fa.estimate_aperture(&rest, &poked, 1200.0).unwrap();
    assert_relative_eq!(aperture.cx, 0.3, epsilon = 0.06);
    assert_relative_eq!(aperture.cy, -0.2, epsilon = 0.06);
    assert_relative_eq!(aperture.radius, 1.2);
    assert_eq!(fa.aperture(), Some(aperture));

    let err = fa.estimate_aperture(&rest, &poked, 1800.0).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Aperture));
    assert!(matches!(err.root(), Error::ApertureMismatch(_)));
}
