//! Attention heatmap rasterisation.
//!
//! Two-pass renderer: fixations (or raw gaze points when no fixation was
//! detected) are splatted into a floating-point intensity canvas as layered
//! radial falloffs, which is then box-chain Gaussian blurred, normalised by
//! its maximum and mapped through a gradient palette into an RGBA overlay.
//! The blur is self-contained; no platform canvas filter is involved.

use image::{imageops, Rgba, RgbaImage};
use regard_utils::num::TotalF32;
use regard_utils::timer::Timer;

use crate::error::Result;
use crate::fixation::Fixation;
use crate::model::GazePoint;

/// One colour stop of the heatmap gradient, with `at` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub at: f64,
    pub color: [u8; 3],
}

/// Default blue -> cyan -> green -> yellow -> orange -> red gradient.
pub const DEFAULT_GRADIENT: [GradientStop; 6] = [
    GradientStop { at: 0.0, color: [0, 0, 255] },
    GradientStop { at: 0.25, color: [0, 255, 255] },
    GradientStop { at: 0.45, color: [0, 255, 0] },
    GradientStop { at: 0.65, color: [255, 255, 0] },
    GradientStop { at: 0.85, color: [255, 165, 0] },
    GradientStop { at: 1.0, color: [255, 0, 0] },
];

#[derive(Debug, Clone)]
pub struct HeatmapConfig {
    /// Base splat radius in pixels.
    pub point_radius: f64,
    /// Overlay alpha at zero intensity.
    pub min_opacity: f64,
    /// Overlay alpha at peak intensity.
    pub max_opacity: f64,
    pub blur_sigma: f64,
    pub gradient: [GradientStop; 6],
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            point_radius: 50.0,
            min_opacity: 0.02,
            max_opacity: 0.75,
            blur_sigma: 25.0,
            gradient: DEFAULT_GRADIENT,
        }
    }
}

/// Optional overrides merged into a [`HeatmapConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatmapPatch {
    pub point_radius: Option<f64>,
    pub min_opacity: Option<f64>,
    pub max_opacity: Option<f64>,
    pub blur_sigma: Option<f64>,
    pub gradient: Option<[GradientStop; 6]>,
}

impl HeatmapConfig {
    pub fn merged(mut self, patch: &HeatmapPatch) -> Self {
        if let Some(v) = patch.point_radius {
            self.point_radius = v;
        }
        if let Some(v) = patch.min_opacity {
            self.min_opacity = v;
        }
        if let Some(v) = patch.max_opacity {
            self.max_opacity = v;
        }
        if let Some(v) = patch.blur_sigma {
            self.blur_sigma = v;
        }
        if let Some(v) = patch.gradient {
            self.gradient = v;
        }
        self
    }
}

/// Number of concentric falloff layers per splat.
const SPLAT_LAYERS: usize = 3;
/// Intensity contribution scale per layer.
const LAYER_ALPHA: f32 = 0.35;

/// Density heatmap renderer for one image session.
pub struct HeatmapGenerator {
    width: u32,
    height: u32,
    config: HeatmapConfig,
    intensity: Vec<f32>,
    palette: [[u8; 3]; 256],
    t_splat: Timer,
    t_blur: Timer,
    t_colorize: Timer,
}

impl HeatmapGenerator {
    pub fn new(width: u32, height: u32, config: HeatmapConfig) -> Self {
        let palette = build_palette(&config.gradient);
        Self {
            width,
            height,
            config,
            intensity: vec![0.0; (width * height) as usize],
            palette,
            t_splat: Timer::new("splat"),
            t_blur: Timer::new("blur"),
            t_colorize: Timer::new("colorize"),
        }
    }

    /// Profiling timers for the render passes.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_splat, &self.t_blur, &self.t_colorize].into_iter()
    }

    /// Splats fixations, weighted by their duration relative to the longest
    /// one. When the session produced no fixations, fall back to
    /// [`splat_gaze`](Self::splat_gaze).
    pub fn splat_fixations(&mut self, fixations: &[Fixation]) {
        let max_duration = fixations
            .iter()
            .map(|f| f.duration_ms)
            .fold(0.0_f64, f64::max)
            .max(1e-9);
        let radius = self.config.point_radius;
        self.t_splat.time(|| {
            for fixation in fixations {
                let weight = (fixation.duration_ms / max_duration) as f32;
                splat(
                    &mut self.intensity,
                    self.width,
                    self.height,
                    fixation.x,
                    fixation.y,
                    radius,
                    weight,
                );
            }
        });
    }

    /// Splats the session's fixations, or falls back to the raw gaze points
    /// when the session produced no fixation at all.
    pub fn splat(&mut self, fixations: &[Fixation], gaze: &[GazePoint]) {
        if fixations.is_empty() {
            self.splat_gaze(gaze);
        } else {
            self.splat_fixations(fixations);
        }
    }

    /// Splats raw gaze points with uniform weight.
    pub fn splat_gaze(&mut self, points: &[GazePoint]) {
        let radius = self.config.point_radius;
        self.t_splat.time(|| {
            for point in points {
                splat(
                    &mut self.intensity,
                    self.width,
                    self.height,
                    point.x,
                    point.y,
                    radius,
                    1.0,
                );
            }
        });
    }

    /// Blurs, normalises and colourises the accumulated intensity into an
    /// RGBA overlay.
    pub fn render(&mut self) -> RgbaImage {
        let (w, h) = (self.width as usize, self.height as usize);
        self.t_blur.time(|| {
            blur_gaussian(&mut self.intensity, w, h, self.config.blur_sigma);
        });

        let max = self
            .intensity
            .iter()
            .copied()
            .max_by_key(|v| TotalF32(*v))
            .unwrap_or(0.0);

        let min_opacity = self.config.min_opacity;
        let opacity_span = self.config.max_opacity - self.config.min_opacity;
        self.t_colorize.time(|| {
            let mut out = RgbaImage::new(self.width, self.height);
            if max <= 0.0 {
                return out;
            }
            for (pixel, &value) in out.pixels_mut().zip(self.intensity.iter()) {
                let norm = (value / max).clamp(0.0, 1.0) as f64;
                let [r, g, b] = self.palette[(norm * 255.0).round() as usize];
                let alpha = ((min_opacity + norm * opacity_span) * 255.0).round() as u8;
                *pixel = Rgba([r, g, b, alpha]);
            }
            out
        })
    }

    /// Renders the overlay on top of `base` (resized to the heatmap
    /// dimensions if needed) and returns PNG-encoded bytes.
    pub fn render_over(&mut self, base: &RgbaImage) -> Result<Vec<u8>> {
        use image::codecs::png::PngEncoder;
        use image::ImageEncoder;

        let overlay = self.render();
        let mut composed = if base.dimensions() == (self.width, self.height) {
            base.clone()
        } else {
            imageops::resize(base, self.width, self.height, imageops::FilterType::Triangle)
        };

        for (under, over) in composed.pixels_mut().zip(overlay.pixels()) {
            let alpha = over[3] as f32 / 255.0;
            for c in 0..3 {
                let blended = over[c] as f32 * alpha + under[c] as f32 * (1.0 - alpha);
                under[c] = blended.round() as u8;
            }
        }

        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes).write_image(
            composed.as_raw(),
            self.width,
            self.height,
            image::ColorType::Rgba8,
        )?;
        Ok(bytes)
    }
}

/// Adds one layered radial falloff to the intensity canvas.
fn splat(intensity: &mut [f32], width: u32, height: u32, x: f64, y: f64, radius: f64, weight: f32) {
    for layer in 0..SPLAT_LAYERS {
        let layer_radius = radius * (1.0 - 0.25 * layer as f64);
        if layer_radius <= 0.0 {
            continue;
        }
        let x0 = ((x - layer_radius).floor().max(0.0)) as u32;
        let y0 = ((y - layer_radius).floor().max(0.0)) as u32;
        let x1 = ((x + layer_radius).ceil().min(width as f64 - 1.0)).max(0.0) as u32;
        let y1 = ((y + layer_radius).ceil().min(height as f64 - 1.0)).max(0.0) as u32;
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = px as f64 - x;
                let dy = py as f64 - y;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist < layer_radius {
                    let falloff = (1.0 - dist / layer_radius) as f32;
                    intensity[(py * width + px) as usize] += weight * LAYER_ALPHA * falloff;
                }
            }
        }
    }
}

/// Approximates a Gaussian blur with three successive box blurs.
fn blur_gaussian(canvas: &mut Vec<f32>, width: usize, height: usize, sigma: f64) {
    if sigma <= 0.0 || width == 0 || height == 0 {
        return;
    }
    let mut scratch = vec![0.0f32; canvas.len()];
    for box_width in boxes_for_gauss(sigma, 3) {
        let radius = (box_width - 1) / 2;
        if radius == 0 {
            continue;
        }
        box_blur_horizontal(canvas, &mut scratch, width, height, radius);
        box_blur_vertical(&scratch, canvas, width, height, radius);
    }
}

/// Box widths whose chained application approximates a Gaussian of standard
/// deviation `sigma`.
fn boxes_for_gauss(sigma: f64, passes: usize) -> Vec<usize> {
    let n = passes as f64;
    let ideal = (12.0 * sigma * sigma / n + 1.0).sqrt();
    let mut lower = ideal.floor() as usize;
    if lower % 2 == 0 {
        lower = lower.saturating_sub(1);
    }
    let lower = lower.max(1);
    let upper = lower + 2;

    let m_ideal = (12.0 * sigma * sigma
        - (n * (lower * lower) as f64 + 4.0 * n * lower as f64 + 3.0 * n))
        / (-4.0 * lower as f64 - 4.0);
    let m = m_ideal.round().clamp(0.0, n) as usize;

    (0..passes).map(|i| if i < m { lower } else { upper }).collect()
}

fn box_blur_horizontal(src: &[f32], dst: &mut [f32], width: usize, height: usize, radius: usize) {
    let norm = 1.0 / (2 * radius + 1) as f32;
    for y in 0..height {
        let row = y * width;
        let clamp = |x: isize| row + (x.clamp(0, width as isize - 1)) as usize;
        let mut acc = 0.0f32;
        for i in -(radius as isize)..=(radius as isize) {
            acc += src[clamp(i)];
        }
        for x in 0..width {
            dst[row + x] = acc * norm;
            let xi = x as isize;
            acc += src[clamp(xi + radius as isize + 1)] - src[clamp(xi - radius as isize)];
        }
    }
}

fn box_blur_vertical(src: &[f32], dst: &mut [f32], width: usize, height: usize, radius: usize) {
    let norm = 1.0 / (2 * radius + 1) as f32;
    for x in 0..width {
        let clamp = |y: isize| (y.clamp(0, height as isize - 1)) as usize * width + x;
        let mut acc = 0.0f32;
        for i in -(radius as isize)..=(radius as isize) {
            acc += src[clamp(i)];
        }
        for y in 0..height {
            dst[y * width + x] = acc * norm;
            let yi = y as isize;
            acc += src[clamp(yi + radius as isize + 1)] - src[clamp(yi - radius as isize)];
        }
    }
}

/// Expands the gradient stops into a 256-entry lookup table.
fn build_palette(stops: &[GradientStop; 6]) -> [[u8; 3]; 256] {
    let mut palette = [[0u8; 3]; 256];
    for (i, entry) in palette.iter_mut().enumerate() {
        let t = i as f64 / 255.0;
        let mut segment = (stops[0], stops[stops.len() - 1]);
        for pair in stops.windows(2) {
            if t >= pair[0].at && t <= pair[1].at {
                segment = (pair[0], pair[1]);
                break;
            }
        }
        let (a, b) = segment;
        let span = (b.at - a.at).max(1e-9);
        let f = ((t - a.at) / span).clamp(0.0, 1.0);
        for c in 0..3 {
            entry[c] = (a.color[c] as f64 + f * (b.color[c] as f64 - a.color[c] as f64))
                .round() as u8;
        }
    }
    palette
}
