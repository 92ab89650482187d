//! Plumbing shared by the bench binaries.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use dmcal::poke::{cyclic_pokes, linspace, sequential_pokes, CYCLIC_LEVELS};
use dmcal::{BasisConfig, PokeDataset, Preset};
use indicatif::{ProgressBar, ProgressStyle};
use interf::{AnalyseOptions, Aperture, FringeAnalysis, FringeConfig, FringeProducts};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BasisKind {
    Zernike,
    Pixel,
}

/// `order` is the radial order for Zernike and the sampling stride for pixels.
pub fn basis_config(kind: BasisKind, order: usize) -> BasisConfig {
    match kind {
        BasisKind::Zernike => BasisConfig::Zernike { n_radial: order },
        BasisKind::Pixel => BasisConfig::Pixel { stride: order },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PokeDesign {
    /// Overlapping level patterns, one frame per actuator
    Cyclic,
    /// Every level on every actuator in turn
    Sequential,
}

impl PokeDesign {
    pub fn default_levels(self) -> Vec<f64> {
        match self {
            PokeDesign::Cyclic => CYCLIC_LEVELS.to_vec(),
            PokeDesign::Sequential => linspace(-0.7, 0.7, 5),
        }
    }

    /// Command matrix for `n` actuators, one column per frame.
    pub fn commands(self, n: usize, levels: &[f64]) -> Result<ndarray::Array2<f64>> {
        if levels.is_empty() {
            bail!("no poke levels given");
        }
        Ok(match self {
            PokeDesign::Cyclic => cyclic_pokes(n, levels)?,
            PokeDesign::Sequential => sequential_pokes(n, levels),
        })
    }
}

/// Parse a comma-separated list of pupil radii in µm.
pub fn parse_radii(s: &str) -> Result<Vec<f64>> {
    let radii = s
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<f64>()
                .with_context(|| format!("invalid pupil radius '{t}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    if radii.is_empty() {
        bail!("no pupil radius given");
    }
    if let Some(r) = radii.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
        bail!("pupil radius must be positive, got {r}");
    }
    Ok(radii)
}

/// Order location and alignment frames of a dataset, analysed once and
/// reused for every pupil radius.
pub struct Alignment {
    pub analysis: FringeAnalysis,
    rest: FringeProducts,
    centre: FringeProducts,
}

impl Alignment {
    pub fn from_dataset(dataset: &PokeDataset) -> Result<Self> {
        let config = FringeConfig::new(dataset.image_shape(), dataset.pixel_size);
        let mut analysis = FringeAnalysis::new(config).context("configuring fringe analysis")?;

        let search = AnalyseOptions {
            auto_find_orders: true,
            ..Default::default()
        };
        let rest = analysis
            .analyse(&dataset.rest_image(), search)
            .context("locating fringe orders on the rest frame")?;
        let centre_frame = dataset.align_image(&Preset::Centre.to_string())?;
        let centre = analysis
            .analyse(&centre_frame, AnalyseOptions::default())
            .context("analysing the centre alignment frame")?;

        if let Some(orders) = analysis.orders() {
            info!(
                "orders at ({:.3}, {:.3}) cycles/mm, prominence {:.2}",
                orders.f0.0, orders.f0.1, orders.prominence
            );
        }
        Ok(Self {
            analysis,
            rest,
            centre,
        })
    }

    /// A copy of the analysis with its pupil set to `radius_um`.
    pub fn for_radius(&self, radius_um: f64) -> Result<(FringeAnalysis, Aperture)> {
        let mut analysis = self.analysis.clone();
        let aperture = analysis
            .estimate_aperture(&self.rest, &self.centre, radius_um)
            .with_context(|| format!("estimating a {radius_um} µm pupil"))?;
        Ok((analysis, aperture))
    }
}

pub fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    pb
}

pub fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ");
    pb.set_style(style);
    pb.set_message(message);
    pb
}

/// RMS of the finite samples of a phase map.
pub fn finite_rms(values: &ndarray::Array2<f64>) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v * v, n + 1));
    (count > 0).then(|| (sum / count as f64).sqrt())
}
