//! Diffraction-order handling: locate the carrier, cut out its lobe and
//! re-centre it on a canonical spectrum.

pub mod extract;
pub mod locate;
pub mod repad;

pub use extract::{extract_order, ExtractedOrder, ExtractorConfig};
pub use locate::{locate_orders, LocatorConfig, OrderLocation};
pub use repad::{canonical_grid, canonical_pitch, repad_order, RepaddedOrder};
