//! Presentation driver: turns wall-clock ticks into painted frames.

use anyhow::Result;
use tracing::debug;

use crate::backend::GraphicsBackend;
use crate::pass::ExternalTextures;
use crate::pipeline::{FrameInputs, Pipeline};

/// Weight of the newest sample in the smoothed frame rate.
const FRAME_RATE_SMOOTHING: f32 = 0.1;

pub struct EffectPlayer<B: GraphicsBackend> {
    pipeline: Pipeline<B>,
    paused: bool,
    redraw_requested: bool,
    time: f32,
    frame_rate: f32,
    last_tick: Option<f64>,
    mouse: [f32; 4],
    date: [f32; 4],
}

impl<B: GraphicsBackend> EffectPlayer<B> {
    pub fn new(pipeline: Pipeline<B>) -> Self {
        Self {
            pipeline,
            paused: false,
            redraw_requested: true,
            time: 0.0,
            frame_rate: 0.0,
            last_tick: None,
            mouse: [0.0; 4],
            date: [0.0; 4],
        }
    }

    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline<B> {
        &mut self.pipeline
    }

    pub fn into_pipeline(self) -> Pipeline<B> {
        self.pipeline
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Back to time zero and frame zero.
    pub fn restart(&mut self) {
        self.pipeline.restart();
        self.time = 0.0;
        self.request_redraw();
    }

    /// Paint one frame at the current time on the next tick, even if paused.
    pub fn request_redraw(&mut self) {
        self.redraw_requested = true;
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.pipeline.resize(width, height)?;
        self.request_redraw();
        Ok(())
    }

    pub fn set_mouse(&mut self, mouse: [f32; 4]) {
        self.mouse = mouse;
        self.request_redraw();
    }

    pub fn set_date(&mut self, date: [f32; 4]) {
        self.date = date;
    }

    pub fn key_down(&mut self, code: u8) {
        self.pipeline.key_down(code);
        self.request_redraw();
    }

    pub fn key_up(&mut self, code: u8) {
        self.pipeline.key_up(code);
        self.request_redraw();
    }

    /// Advance to wall-clock time `now` (seconds) and paint if running or if
    /// a redraw was requested. Compile completions are applied first. Returns
    /// whether a frame was painted.
    pub fn tick(&mut self, now: f64, external: Option<&dyn ExternalTextures>) -> Result<bool> {
        self.pipeline.poll_compiles();

        let delta = self.last_tick.map_or(0.0, |prev| (now - prev).max(0.0)) as f32;
        self.last_tick = Some(now);

        if self.paused {
            if !self.redraw_requested {
                return Ok(false);
            }
            debug!(time = self.time, "[player] redraw while paused");
            self.redraw_requested = false;
            self.paint(0.0, external)?;
            return Ok(true);
        }

        self.time += delta;
        if delta > 0.0 {
            let fps = 1.0 / delta;
            self.frame_rate = if self.frame_rate == 0.0 {
                fps
            } else {
                self.frame_rate + (fps - self.frame_rate) * FRAME_RATE_SMOOTHING
            };
        }
        self.redraw_requested = false;
        self.paint(delta, external)?;
        Ok(true)
    }

    fn paint(&mut self, time_delta: f32, external: Option<&dyn ExternalTextures>) -> Result<()> {
        let inputs = FrameInputs {
            time: self.time,
            time_delta,
            frame_rate: self.frame_rate,
            mouse: self.mouse,
            date: self.date,
            external,
        };
        self.pipeline.paint_frame(&inputs)
    }
}
