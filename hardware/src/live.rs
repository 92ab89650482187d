//! Live fringe analysis.
//!
//! [`LiveAnalysis::run`] blocks on the camera, analyses each frame and hands
//! the result to a callback. The stop flag is checked between frames, so a
//! frame in flight always completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use interf::{AnalyseOptions, FringeAnalysis, FringeProducts};
use log::{debug, info, warn};

use crate::camera::FrameSource;
use crate::dm::ActuatorSink;
use crate::error::{DeviceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunMode {
    /// Analyse one frame; its error is returned
    Single,
    /// Keep going until stopped; errors are reported and skipped
    Repeat,
}

/// What the loop reports after each frame.
#[derive(Debug)]
pub enum LiveEvent<'a> {
    Frame {
        index: usize,
        /// Actuator poked for this frame, if a poke cycle is running
        poked: Option<usize>,
        products: &'a FringeProducts,
    },
    Failed {
        index: usize,
        error: &'a DeviceError,
    },
}

/// Pokes one actuator per frame, cycling through the mirror.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PokeCycle {
    pub magnitude: f64,
    next: usize,
}

impl PokeCycle {
    pub fn new(magnitude: f64) -> Self {
        Self { magnitude, next: 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveSummary {
    pub frames: usize,
    pub failures: usize,
}

pub struct LiveAnalysis<C> {
    camera: C,
    dm: Option<Box<dyn ActuatorSink>>,
    analysis: FringeAnalysis,
    options: AnalyseOptions,
    mode: RunMode,
    max_frames: Option<usize>,
    poke: Option<PokeCycle>,
    stop: Arc<AtomicBool>,
}

impl<C: FrameSource> LiveAnalysis<C> {
    pub fn new(camera: C, analysis: FringeAnalysis, mode: RunMode) -> Self {
        Self {
            camera,
            dm: None,
            analysis,
            options: AnalyseOptions::default(),
            mode,
            max_frames: None,
            poke: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: AnalyseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Poke actuators one at a time on `dm`, one per frame.
    pub fn with_poke_cycle(mut self, dm: Box<dyn ActuatorSink>, magnitude: f64) -> Self {
        self.dm = Some(dm);
        self.poke = Some(PokeCycle::new(magnitude));
        self
    }

    /// Flag that ends the loop before the next frame once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn analysis(&self) -> &FringeAnalysis {
        &self.analysis
    }

    pub fn into_parts(self) -> (C, FringeAnalysis) {
        (self.camera, self.analysis)
    }

    pub fn run(&mut self, mut on_event: impl FnMut(LiveEvent<'_>)) -> Result<LiveSummary> {
        let mut summary = LiveSummary::default();
        let limit = match self.mode {
            RunMode::Single => Some(1),
            RunMode::Repeat => self.max_frames,
        };
        info!("live analysis started ({} mode)", self.mode);

        let outcome = loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("stop requested");
                break Ok(());
            }
            if limit.is_some_and(|n| summary.frames >= n) {
                break Ok(());
            }
            let index = summary.frames;
            summary.frames += 1;

            match self.step() {
                Ok((poked, products)) => on_event(LiveEvent::Frame {
                    index,
                    poked,
                    products: &products,
                }),
                Err(error) => {
                    summary.failures += 1;
                    on_event(LiveEvent::Failed {
                        index,
                        error: &error,
                    });
                    match self.mode {
                        RunMode::Single => break Err(error),
                        RunMode::Repeat => warn!("frame {index}: {error}"),
                    }
                }
            }
        };

        self.release_dm();
        info!(
            "live analysis stopped after {} frames, {} failed",
            summary.frames, summary.failures
        );
        outcome.map(|_| summary)
    }

    fn step(&mut self) -> Result<(Option<usize>, FringeProducts)> {
        let poked = self.apply_poke()?;
        let image = self.camera.grab_image()?;
        let products = self.analysis.analyse(&image.view(), self.options)?;
        Ok((poked, products))
    }

    fn apply_poke(&mut self) -> Result<Option<usize>> {
        let (Some(dm), Some(cycle)) = (self.dm.as_mut(), self.poke.as_mut()) else {
            return Ok(None);
        };
        let n = dm.size();
        if n == 0 {
            return Ok(None);
        }
        let k = cycle.next % n;
        let mut u = vec![0.0; n];
        u[k] = cycle.magnitude;
        dm.write(&u)?;
        cycle.next = (k + 1) % n;
        Ok(Some(k))
    }

    fn release_dm(&mut self) {
        if let (Some(dm), Some(_)) = (self.dm.as_mut(), self.poke) {
            let zeros = vec![0.0; dm.size()];
            if let Err(e) = dm.write(&zeros) {
                warn!("could not return mirror to rest: {e}");
            }
        }
    }
}
