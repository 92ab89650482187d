//! Single-frame fringe analysis.
//!
//! [`FringeAnalysis`] owns the grids for one camera geometry, the cached order
//! location and the pupil. Each [`FringeAnalysis::analyse`] call runs
//! transform → locate (when asked or nothing is cached) → extract → repad →
//! inverse → unwrap → mask and tags any failure with the stage it came from.
//!
//! The cached orders are the only state that changes between calls. They are
//! replaced only after a successful location, so a frame that fails later in
//! the pipeline leaves the next frame's fast path intact.

use std::sync::Arc;

use log::{debug, warn};
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::aperture::{estimate_aperture, Aperture, ApertureConfig};
use crate::error::{Error, Result, Stage, StageContext};
use crate::grid::{camera_grid, fourier_grid, Extent, Grid, PixelSize};
use crate::orders::{
    canonical_grid, extract_order, locate_orders, repad_order, ExtractorConfig, LocatorConfig,
    OrderLocation,
};
use crate::spectral::{log_magnitude, SpectralTransform};
use crate::unwrap::{count_residues, unwrap_phase, wrap};

/// Static configuration of a [`FringeAnalysis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FringeConfig {
    /// Camera frame shape `(rows, cols)`
    pub image_shape: (usize, usize),
    pub pixel_size: PixelSize,
    /// Canonical spectrum size; half the image shape when `None`
    pub canonical_shape: Option<(usize, usize)>,
    pub locator: LocatorConfig,
    pub extractor: ExtractorConfig,
    pub aperture: ApertureConfig,
}

impl FringeConfig {
    pub fn new(image_shape: (usize, usize), pixel_size: PixelSize) -> Self {
        Self {
            image_shape,
            pixel_size,
            canonical_shape: None,
            locator: LocatorConfig::default(),
            extractor: ExtractorConfig::default(),
            aperture: ApertureConfig::default(),
        }
    }

    pub fn canonical(&self) -> (usize, usize) {
        self.canonical_shape
            .unwrap_or((self.image_shape.0 / 2, self.image_shape.1 / 2))
    }
}

impl Default for FringeConfig {
    /// 1280x1024 sensor with 5.2 um pixels
    fn default() -> Self {
        Self::new((1024, 1280), PixelSize::square(5.2))
    }
}

/// Lifecycle of a [`FringeAnalysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AnalysisState {
    /// No order location cached yet
    Uninitialized,
    /// Orders cached; the fast path is available
    Configured,
    /// A frame is being analysed
    Analyzing,
}

/// Per-call switches for [`FringeAnalysis::analyse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyseOptions {
    /// Locate orders even when a location is cached
    pub auto_find_orders: bool,
    pub do_unwrap: bool,
    /// Blank the phase outside the pupil
    pub use_mask: bool,
    /// Return the log-magnitude spectrum
    pub keep_spectrum: bool,
}

impl Default for AnalyseOptions {
    fn default() -> Self {
        Self {
            auto_find_orders: false,
            do_unwrap: true,
            use_mask: false,
            keep_spectrum: false,
        }
    }
}

/// Everything one analysed frame yields.
#[derive(Debug, Clone)]
pub struct FringeProducts {
    pub log_spectrum: Option<Array2<f64>>,
    /// Fringe modulation amplitude, independent of the canonical size
    pub magnitude: Array2<f64>,
    /// Wrapped phase in `(-π, π]`, NaN outside the pupil when masked
    pub wrapped: Array2<f64>,
    /// Unwrapped phase in radians, NaN outside the pupil when masked
    pub unwrapped: Option<Array2<f64>>,
    /// Residues of the wrapped map, counted inside the pupil when masked
    pub residues: usize,
    /// Camera-plane grid of the phase maps
    pub grid: Arc<Grid>,
    pub mask: Option<Array2<bool>>,
    pub orders: OrderLocation,
}

impl FringeProducts {
    /// Unwrapped phase when available, wrapped otherwise.
    pub fn phase(&self) -> &Array2<f64> {
        self.unwrapped.as_ref().unwrap_or(&self.wrapped)
    }

    pub fn extent(&self) -> Extent {
        self.grid.extent
    }
}

/// Phase retrieval for one camera geometry.
#[derive(Debug, Clone)]
pub struct FringeAnalysis {
    config: FringeConfig,
    forward: SpectralTransform,
    inverse: SpectralTransform,
    camera: Arc<Grid>,
    fourier: Arc<Grid>,
    phase_grid: Arc<Grid>,
    orders: Option<OrderLocation>,
    aperture: Option<Aperture>,
    state: AnalysisState,
}

impl FringeAnalysis {
    /// Build grids and transform plans for `config`.
    ///
    /// # Errors
    /// `InvalidGrid` for an empty shape, a bad pixel pitch or a canonical size
    /// that is empty or larger than the image.
    pub fn new(config: FringeConfig) -> Result<Self> {
        let shape = config.image_shape;
        let canonical = config.canonical();
        if canonical.0 == 0 || canonical.1 == 0 || canonical.0 > shape.0 || canonical.1 > shape.1 {
            return Err(Error::InvalidGrid(format!(
                "canonical size {canonical:?} must be non-empty and fit the image {shape:?}"
            )));
        }

        let camera = camera_grid(shape, config.pixel_size)?;
        let fourier = fourier_grid(shape, config.pixel_size)?;
        let phase_grid = canonical_grid(&fourier, canonical)?;
        debug!(
            "fringe analysis for {shape:?} frames, canonical {canonical:?}, phase extent {:?}",
            phase_grid.extent.as_tuple()
        );

        Ok(Self {
            forward: SpectralTransform::new(shape)?,
            inverse: SpectralTransform::new(canonical)?,
            camera: Arc::new(camera),
            fourier: Arc::new(fourier),
            phase_grid: Arc::new(phase_grid),
            orders: None,
            aperture: None,
            state: AnalysisState::Uninitialized,
            config,
        })
    }

    pub fn config(&self) -> &FringeConfig {
        &self.config
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn pixel_size(&self) -> PixelSize {
        self.config.pixel_size
    }

    pub fn camera_grid(&self) -> &Arc<Grid> {
        &self.camera
    }

    pub fn fourier_grid(&self) -> &Arc<Grid> {
        &self.fourier
    }

    /// Grid the phase maps are sampled on.
    pub fn phase_grid(&self) -> &Arc<Grid> {
        &self.phase_grid
    }

    pub fn orders(&self) -> Option<OrderLocation> {
        self.orders
    }

    /// Use a known order location instead of searching for one.
    pub fn set_orders(&mut self, orders: OrderLocation) {
        self.orders = Some(orders);
        self.state = AnalysisState::Configured;
    }

    pub fn clear_orders(&mut self) {
        self.orders = None;
        self.state = AnalysisState::Uninitialized;
    }

    pub fn aperture(&self) -> Option<Aperture> {
        self.aperture
    }

    /// # Errors
    /// `ApertureMismatch` if the pupil does not fit the phase-map extent.
    pub fn set_aperture(&mut self, aperture: Aperture) -> Result<()> {
        aperture
            .check_fits(&self.phase_grid.extent)
            .stage(Stage::Aperture)?;
        self.aperture = Some(aperture);
        Ok(())
    }

    pub fn clear_aperture(&mut self) {
        self.aperture = None;
    }

    /// Estimate the pupil from a rest and a centre-poked frame and keep it.
    pub fn estimate_aperture(
        &mut self,
        rest: &FringeProducts,
        poked: &FringeProducts,
        radius_um: f64,
    ) -> Result<Aperture> {
        let aperture = estimate_aperture(
            &rest.magnitude.view(),
            &rest.phase().view(),
            &poked.phase().view(),
            &self.phase_grid,
            radius_um,
            &self.config.aperture,
        )
        .stage(Stage::Aperture)?;
        self.aperture = Some(aperture);
        Ok(aperture)
    }

    /// Analyse one interferogram.
    ///
    /// # Errors
    /// Any stage failure, wrapped in [`Error::Stage`].
    pub fn analyse<T>(&mut self, image: &ArrayView2<T>, options: AnalyseOptions) -> Result<FringeProducts>
    where
        T: Copy + Into<f64>,
    {
        self.state = AnalysisState::Analyzing;
        let result = self.run(image, options);
        self.state = if self.orders.is_some() {
            AnalysisState::Configured
        } else {
            AnalysisState::Uninitialized
        };
        result
    }

    fn run<T>(&mut self, image: &ArrayView2<T>, options: AnalyseOptions) -> Result<FringeProducts>
    where
        T: Copy + Into<f64>,
    {
        let aperture = match (options.use_mask, self.aperture) {
            (true, None) => {
                return Err(Error::ApertureMismatch(
                    "masking requested but no aperture is configured".to_string(),
                )
                .in_stage(Stage::Mask));
            }
            (true, Some(ap)) => Some(ap),
            (false, _) => None,
        };

        let spectrum = self.forward.forward_real(image).stage(Stage::Transform)?;
        let mut log_spectrum = options
            .keep_spectrum
            .then(|| log_magnitude(&spectrum.view()));

        let orders = match self.orders {
            Some(cached) if !options.auto_find_orders => cached,
            _ => {
                let logm = log_spectrum.get_or_insert_with(|| log_magnitude(&spectrum.view()));
                let found = locate_orders(&self.fourier, &logm.view(), &self.config.locator)
                    .stage(Stage::LocateOrders)?;
                self.orders = Some(found);
                found
            }
        };

        let extracted = extract_order(
            &spectrum.view(),
            &self.fourier,
            orders.f0,
            self.config.pixel_size,
            &self.config.extractor,
        )
        .stage(Stage::ExtractOrder)?;
        let repadded = repad_order(&extracted, &self.fourier, self.config.canonical())
            .stage(Stage::RepadOrder)?;

        let field = self
            .inverse
            .inverse(&repadded.spectrum.view())
            .stage(Stage::PhaseExtraction)?;
        let magnitude = field.mapv(|z| z.norm() * repadded.scale);
        let mut wrapped = field.mapv(|z| wrap(z.arg()));

        let mut unwrapped = None;
        let mut residues = None;
        if options.do_unwrap {
            let out = unwrap_phase(&wrapped.view()).stage(Stage::Unwrap)?;
            residues = Some(out.residues);
            unwrapped = Some(out.phase);
        }

        let mut mask = None;
        if let Some(ap) = aperture {
            ap.check_fits(&self.phase_grid.extent).stage(Stage::Mask)?;
            let inside = ap.mask(&self.phase_grid);
            let in_pupil = count_residues(&wrapped.view(), Some(&inside.view()));
            if in_pupil > 0 {
                warn!("{in_pupil} phase residues inside the pupil");
            }
            residues = Some(in_pupil);

            blank_outside(&mut wrapped, &inside);
            if let Some(phase) = unwrapped.as_mut() {
                blank_outside(phase, &inside);
            }
            mask = Some(inside);
        }
        let residues = residues.unwrap_or_else(|| count_residues(&wrapped.view(), None));
        debug!("analysed frame: {residues} residues");

        Ok(FringeProducts {
            log_spectrum: log_spectrum.filter(|_| options.keep_spectrum),
            magnitude,
            wrapped,
            unwrapped,
            residues,
            grid: Arc::clone(&self.phase_grid),
            mask,
            orders,
        })
    }
}

fn blank_outside(phase: &mut Array2<f64>, inside: &Array2<bool>) {
    Zip::from(phase).and(inside).for_each(|p, &keep| {
        if !keep {
            *p = f64::NAN;
        }
    });
}
