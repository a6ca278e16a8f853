//! Trajectory overlay rendering.
//!
//! For frame `i` the renderer looks at the window of rows
//! `[i, min(i + LOOKAHEAD, len))`, projects each end-effector position, and
//! draws:
//!
//! - a ring at every gripper transition inside the window (green for close,
//!   blue for open),
//! - a polyline through the projected points, colored `(0, G, T)` where `G`
//!   encodes the normalized image height of the segment end and `T` its
//!   position in the episode.
//!
//! Gripper transitions are edge-triggered over the whole episode, so a marker
//! appears exactly on the row where the gap crosses a threshold. Rendering is
//! a pure function of its inputs.

mod draw;
mod gripper;

pub use draw::{draw_line, draw_ring, Point};
pub use gripper::{GripperLatch, GripperThresholds, GripperTransition};

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::episode::EpisodeLog;
use crate::error::{PipelineError, Result};
use crate::projection::{CameraCalibration, Pixel};

/// Transform from projected pixel coordinates to drawing coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CanvasMapping {
    /// Draw at `(trunc u, trunc v)`.
    Identity,
    /// Draw at `(trunc(origin_u - u), trunc(origin_v - v))`, for captures
    /// stored rotated by 180°.
    Mirrored { origin_u: f64, origin_v: f64 },
}

impl CanvasMapping {
    /// Mapping for LIBERO captures at 256×256.
    pub const LIBERO: Self = Self::Mirrored {
        origin_u: 256.0,
        origin_v: 240.0,
    };

    #[must_use]
    pub fn map(&self, pixel: Pixel) -> Point {
        let (x, y) = match *self {
            Self::Identity => (pixel.u, pixel.v),
            Self::Mirrored { origin_u, origin_v } => (origin_u - pixel.u, origin_v - pixel.v),
        };
        // `as` truncates toward zero and saturates.
        Point::new(x as i32, y as i32)
    }
}

impl Default for CanvasMapping {
    fn default() -> Self {
        Self::LIBERO
    }
}

/// Number of rows in the trajectory window, the current one included.
pub const LOOKAHEAD: usize = 32;

/// Drawing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayStyle {
    pub thresholds: GripperThresholds,
    pub marker_radius: u32,
    pub marker_thickness: u32,
    pub line_thickness: u32,
    pub close_color: [u8; 3],
    pub open_color: [u8; 3],
    pub canvas: CanvasMapping,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            thresholds: GripperThresholds::default(),
            marker_radius: 5,
            marker_thickness: 2,
            line_thickness: 2,
            close_color: [0, 255, 0],
            open_color: [0, 0, 255],
            canvas: CanvasMapping::default(),
        }
    }
}

impl OverlayStyle {
    #[must_use]
    pub fn thresholds(mut self, thresholds: GripperThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn canvas(mut self, canvas: CanvasMapping) -> Self {
        self.canvas = canvas;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    pub row: usize,
    pub transition: GripperTransition,
    pub center: Point,
    pub color: Rgb<u8>,
}

/// Segment `index` of the window polyline, ending at its `index`-th point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub from: Point,
    pub to: Point,
    pub color: Rgb<u8>,
}

/// Everything drawn on one frame, in drawing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayPlan {
    pub markers: Vec<Marker>,
    pub segments: Vec<Segment>,
}

/// Per-episode projection and gripper transitions, shared by every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeTrack {
    /// Projected end-effector per row; `None` where projection is degenerate.
    pixels: Vec<Option<Pixel>>,
    transitions: Vec<Option<GripperTransition>>,
}

impl EpisodeTrack {
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[must_use]
    pub fn pixel(&self, row: usize) -> Option<Pixel> {
        self.pixels.get(row).copied().flatten()
    }

    #[must_use]
    pub fn transition(&self, row: usize) -> Option<GripperTransition> {
        self.transitions.get(row).copied().flatten()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    #[must_use]
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    #[must_use]
    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Project every row and replay the gripper latch from the open state.
    pub fn track(&self, log: &EpisodeLog, calibration: &CameraCalibration) -> Result<EpisodeTrack> {
        let mut latch = GripperLatch::new(self.style.thresholds);
        let mut pixels = Vec::with_capacity(log.len());
        let mut transitions = Vec::with_capacity(log.len());
        let mut skipped = 0usize;

        for row in 0..log.len() {
            let pixel = match calibration.project(&log.end_effector(row)?) {
                Ok(pixel) => Some(pixel),
                Err(err) => {
                    tracing::trace!("{} row {row}: {err}", log.episode());
                    skipped += 1;
                    None
                }
            };
            pixels.push(pixel);
            transitions.push(latch.step(log.gripper_gap(row)?));
        }

        if skipped > 0 {
            tracing::debug!(
                "{}: {skipped} of {} rows are behind the camera",
                log.episode(),
                log.len()
            );
        }
        Ok(EpisodeTrack {
            pixels,
            transitions,
        })
    }

    /// Compute the markers and segments for one frame.
    pub fn plan(
        &self,
        log: &EpisodeLog,
        frame_index: usize,
        calibration: &CameraCalibration,
    ) -> Result<OverlayPlan> {
        let len = log.len();
        if frame_index >= len {
            return Err(PipelineError::FrameOutOfRange {
                index: frame_index,
                len,
            });
        }
        let track = self.track(log, calibration)?;
        self.plan_track(&track, frame_index)
    }

    /// Like [`OverlayRenderer::plan`], reusing a precomputed track.
    pub fn plan_track(&self, track: &EpisodeTrack, frame_index: usize) -> Result<OverlayPlan> {
        let len = track.len();
        if frame_index >= len {
            return Err(PipelineError::FrameOutOfRange {
                index: frame_index,
                len,
            });
        }
        let end = frame_index.saturating_add(LOOKAHEAD).min(len);
        let canvas = self.style.canvas;

        let markers = (frame_index..end)
            .filter_map(|row| {
                let transition = track.transition(row)?;
                let center = canvas.map(track.pixel(row)?);
                let color = match transition {
                    GripperTransition::Close => self.style.close_color,
                    GripperTransition::Open => self.style.open_color,
                };
                Some(Marker {
                    row,
                    transition,
                    center,
                    color: Rgb(color),
                })
            })
            .collect();

        let points = (frame_index..end)
            .filter_map(|row| track.pixel(row))
            .collect::<Vec<_>>();
        let segments = polyline(&points, len, canvas);

        Ok(OverlayPlan { markers, segments })
    }

    /// Draw a plan onto a copy of `background`.
    #[must_use]
    pub fn draw(&self, background: &RgbImage, plan: &OverlayPlan) -> RgbImage {
        let mut frame = background.clone();
        for marker in &plan.markers {
            draw_ring(
                &mut frame,
                marker.center,
                self.style.marker_radius,
                marker.color,
                self.style.marker_thickness,
            );
        }
        for segment in &plan.segments {
            draw_line(
                &mut frame,
                segment.from,
                segment.to,
                segment.color,
                self.style.line_thickness,
            );
        }
        frame
    }

    /// Render the overlay for one frame.
    pub fn render(
        &self,
        background: &RgbImage,
        log: &EpisodeLog,
        frame_index: usize,
        calibration: &CameraCalibration,
    ) -> Result<RgbImage> {
        let plan = self.plan(log, frame_index, calibration)?;
        Ok(self.draw(background, &plan))
    }

    /// Like [`OverlayRenderer::render`], reusing a precomputed track.
    pub fn render_track(
        &self,
        background: &RgbImage,
        track: &EpisodeTrack,
        frame_index: usize,
    ) -> Result<RgbImage> {
        let plan = self.plan_track(track, frame_index)?;
        Ok(self.draw(background, &plan))
    }
}

/// Segments through the window points, colored by height and episode position.
fn polyline(points: &[Pixel], episode_len: usize, canvas: CanvasMapping) -> Vec<Segment> {
    if points.len() < 2 {
        return Vec::new();
    }

    // Larger is higher in the camera image.
    let heights = points.iter().map(|p| -p.v).collect::<Vec<_>>();
    let min = heights.iter().copied().fold(f64::INFINITY, f64::min);
    let max = heights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let denominator = episode_len.saturating_sub(1).max(1) as f64;

    (1..points.len())
        .map(|k| {
            let norm = if range > 0.0 {
                (heights[k] - min) / range
            } else {
                0.0
            };
            let green = (255.0 * norm).clamp(0.0, 255.0) as u8;
            let temporal = (255.0 * k as f64 / denominator).round().clamp(0.0, 255.0) as u8;
            Segment {
                index: k,
                from: canvas.map(points[k - 1]),
                to: canvas.map(points[k]),
                color: Rgb([0, green, temporal]),
            }
        })
        .collect()
}
