//! Frame source that plays back a recorded poke dataset.

use std::path::Path;

use dmcal::PokeDataset;
use interf::PixelSize;
use log::info;
use ndarray::{s, Array2, Axis};

use crate::camera::FrameSource;
use crate::error::{DeviceError, Result};

pub struct DatasetReplay {
    dataset: PokeDataset,
    next: usize,
    looping: bool,
}

impl DatasetReplay {
    /// # Errors
    /// `Camera` when the dataset holds no frames.
    pub fn new(dataset: PokeDataset, looping: bool) -> Result<Self> {
        if dataset.images.len_of(Axis(0)) == 0 {
            return Err(DeviceError::Camera(format!(
                "dataset {} has no frames",
                dataset.dm_name
            )));
        }
        Ok(Self {
            dataset,
            next: 0,
            looping,
        })
    }

    pub fn open(path: &Path, looping: bool) -> Result<Self> {
        let dataset = PokeDataset::load(path)?;
        info!(
            "replaying {} frames of {} from {}",
            dataset.images.len_of(Axis(0)),
            dataset.dm_name,
            path.display()
        );
        Self::new(dataset, looping)
    }

    pub fn dataset(&self) -> &PokeDataset {
        &self.dataset
    }

    /// Index of the frame the next grab returns.
    pub fn position(&self) -> usize {
        self.next
    }
}

impl FrameSource for DatasetReplay {
    fn shape(&self) -> (usize, usize) {
        self.dataset.image_shape()
    }

    fn pixel_size(&self) -> PixelSize {
        self.dataset.pixel_size
    }

    fn grab_image(&mut self) -> Result<Array2<u16>> {
        let count = self.dataset.images.len_of(Axis(0));
        if self.next >= count {
            if !self.looping {
                return Err(DeviceError::Camera("end of recorded dataset".to_string()));
            }
            self.next = 0;
        }
        let frame = self.dataset.images.slice(s![self.next, .., ..]).to_owned();
        self.next += 1;
        Ok(frame)
    }
}
