//! Off-axis interferometric phase retrieval.
//!
//! A tilted reference beam puts the wavefront phase on a spatial carrier. The
//! pipeline recovers it in Fourier space:
//!
//! 1. [`spectral::SpectralTransform`] - centred 2-D transform of the frame
//! 2. [`orders::locate_orders`] - carrier and conjugate peaks
//! 3. [`orders::extract_order`] - crop one first-order lobe
//! 4. [`orders::repad_order`] - centre it on a canonical spectrum
//! 5. inverse transform → magnitude and wrapped phase
//! 6. [`unwrap::unwrap_phase`] - continuous phase surface
//!
//! [`analysis::FringeAnalysis`] runs the whole chain per frame and caches the
//! order location and pupil between frames.

pub mod analysis;
pub mod aperture;
pub mod error;
pub mod grid;
pub mod orders;
pub mod spectral;
pub mod synthetic;
pub mod unwrap;

pub use analysis::{AnalyseOptions, AnalysisState, FringeAnalysis, FringeConfig, FringeProducts};
pub use aperture::{Aperture, ApertureConfig, CentreSource};
pub use error::{Error, Result, Stage};
pub use grid::{Extent, Grid, PixelSize};
pub use orders::OrderLocation;
