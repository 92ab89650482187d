//! Frame source interface.

use interf::PixelSize;
use ndarray::Array2;

use crate::error::Result;

/// A camera, real or not, that hands out one interferogram per call.
pub trait FrameSource: Send {
    /// Frame shape `(rows, cols)`
    fn shape(&self) -> (usize, usize);

    fn pixel_size(&self) -> PixelSize;

    /// Block until the next frame is available.
    fn grab_image(&mut self) -> Result<Array2<u16>>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn shape(&self) -> (usize, usize) {
        (**self).shape()
    }

    fn pixel_size(&self) -> PixelSize {
        (**self).pixel_size()
    }

    fn grab_image(&mut self) -> Result<Array2<u16>> {
        (**self).grab_image()
    }
}
