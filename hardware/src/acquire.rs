//! Recording poke datasets.

use dmcal::{ActuatorLayout, PokeDataset, Preset};
use log::info;
use ndarray::{s, Array2, Array3};

use crate::camera::FrameSource;
use crate::dm::ActuatorSink;
use crate::error::{DeviceError, Result};

/// What to record besides the poke sequence itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    pub dm_name: String,
    pub wavelength_nm: f64,
    /// Commands, one column per frame
    pub u: Array2<f64>,
    /// Alignment patterns, recorded first
    pub presets: Vec<Preset>,
    pub preset_magnitude: f64,
}

/// Drive `dm` through the alignment presets and every column of `plan.u`,
/// grabbing one frame per command. The mirror is returned to rest afterwards,
/// also when a step fails.
pub fn acquire_poke_dataset<C, S>(
    camera: &mut C,
    dm: &mut S,
    layout: &ActuatorLayout,
    plan: &AcquisitionPlan,
    mut progress: Option<&mut dyn FnMut(usize, usize)>,
) -> Result<PokeDataset>
where
    C: FrameSource + ?Sized,
    S: ActuatorSink + ?Sized,
{
    let n = dm.size();
    if plan.u.nrows() != n || layout.len() != n {
        return Err(DeviceError::InvalidCommand(format!(
            "U drives {} actuators, mirror has {n}, layout {}",
            plan.u.nrows(),
            layout.len()
        )));
    }

    let (rows, cols) = camera.shape();
    let steps = plan.u.ncols();
    let mut align_images = Array3::zeros((plan.presets.len(), rows, cols));
    let mut images = Array3::zeros((steps, rows, cols));

    let result = record_all(
        camera,
        dm,
        layout,
        plan,
        (&mut align_images, &mut images),
        &mut progress,
    );
    let rest = dm.write(&vec![0.0; n]);
    result?;
    rest?;

    info!(
        "acquired {} poke frames and {} alignment frames for {}",
        steps,
        plan.presets.len(),
        plan.dm_name
    );
    Ok(PokeDataset {
        dm_name: plan.dm_name.clone(),
        pixel_size: camera.pixel_size(),
        wavelength_nm: plan.wavelength_nm,
        u: plan.u.clone(),
        images,
        align_images,
        align_names: plan.presets.iter().map(|p| p.to_string()).collect(),
    })
}

fn record_all<C, S>(
    camera: &mut C,
    dm: &mut S,
    layout: &ActuatorLayout,
    plan: &AcquisitionPlan,
    (align_images, images): (&mut Array3<u16>, &mut Array3<u16>),
    progress: &mut Option<&mut dyn FnMut(usize, usize)>,
) -> Result<()>
where
    C: FrameSource + ?Sized,
    S: ActuatorSink + ?Sized,
{
    let total = plan.presets.len() + plan.u.ncols();
    let expected = camera.shape();
    let mut done = 0;
    let mut record = |command: &[f64], out: &mut Array3<u16>, k: usize| -> Result<()> {
        dm.write(command)?;
        let frame = camera.grab_image()?;
        if frame.dim() != expected {
            return Err(DeviceError::Camera(format!(
                "frame is {:?}, expected {expected:?}",
                frame.dim()
            )));
        }
        out.slice_mut(s![k, .., ..]).assign(&frame);
        done += 1;
        if let Some(cb) = progress.as_mut() {
            cb(done, total);
        }
        Ok(())
    };

    for (k, preset) in plan.presets.iter().enumerate() {
        record(&layout.preset(*preset, plan.preset_magnitude), align_images, k)?;
    }
    for (k, column) in plan.u.columns().into_iter().enumerate() {
        record(&column.to_vec(), images, k)?;
    }
    Ok(())
}
