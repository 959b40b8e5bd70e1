//! Per-image tracking sessions and the results export.
//!
//! During tracking each stimulus image gets its own [`ImageSession`]: gaze
//! predictions are transformed from screen space into image-local
//! coordinates through the session's [`Viewport`], logged with per-sample
//! deltas, and fed to a fresh [`FixationDetector`]. All exported timestamps
//! are milliseconds relative to the session's tracking start.

use serde::Serialize;

use crate::cluster::RoiCluster;
use crate::calibration::CalibrationOutcome;
use crate::error::Result;
use crate::features::EyeFeatures;
use crate::fixation::{FixationConfig, FixationDetector, FixationMetrics};
use crate::model::{GazeModel, GazePoint};
use crate::quality::{self, QualityReport};

/// Where a stimulus image sits on screen, and its pixel dimensions.
///
/// Gaze points carried through [`map_to_image`](Self::map_to_image) are
/// image-local; everything else in the pipeline stays in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub screen_x: f64,
    pub screen_y: f64,
    pub screen_w: f64,
    pub screen_h: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl Viewport {
    /// An image stretched over the whole screen.
    pub fn fullscreen(screen_w: f64, screen_h: f64, image_width: u32, image_height: u32) -> Self {
        Self {
            screen_x: 0.0,
            screen_y: 0.0,
            screen_w,
            screen_h,
            image_width,
            image_height,
        }
    }

    /// Transforms a screen-space gaze point into image-local pixels.
    pub fn map_to_image(&self, point: GazePoint) -> GazePoint {
        GazePoint {
            x: (point.x - self.screen_x) / self.screen_w * self.image_width as f64,
            y: (point.y - self.screen_y) / self.screen_h * self.image_height as f64,
            ..point
        }
    }
}

/// One exported gaze sample (image-local, relative milliseconds).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GazeSampleRecord {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: i64,
    pub confidence: f64,
    pub dt_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FirstFixationRecord {
    pub x: f64,
    pub y: f64,
    pub time_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FixationRecord {
    pub x: f64,
    pub y: f64,
    pub duration_ms: i64,
    pub start_ms: i64,
    pub point_count: usize,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DimensionsRecord {
    pub width: u32,
    pub height: u32,
}

/// Per-image result block of the session export.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub image_index: usize,
    pub image_dimensions: DimensionsRecord,
    pub gaze_points: Vec<GazeSampleRecord>,
    pub first_fixation: Option<FirstFixationRecord>,
    pub fixations: Vec<FixationRecord>,
    pub total_view_time_ms: i64,
    pub fixation_count: usize,
    pub avg_fixation_duration_ms: i64,
    pub roi_clusters: Vec<RoiCluster>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRecord {
    pub method: String,
    pub mean_error_px: i64,
    pub validated: bool,
}

/// The complete per-session results document.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExport {
    pub calibration: CalibrationRecord,
    pub image_count: usize,
    pub images: Vec<ImageRecord>,
}

impl SessionExport {
    pub fn new(outcome: &CalibrationOutcome, images: Vec<ImageRecord>) -> Self {
        Self {
            calibration: CalibrationRecord {
                method: "poly2_ridge_cubic".to_owned(),
                mean_error_px: outcome.mean_error_px.round() as i64,
                validated: outcome.validated,
            },
            image_count: images.len(),
            images,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything produced by one image's tracking window.
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub record: ImageRecord,
    pub metrics: FixationMetrics,
    pub quality: QualityReport,
}

/// Tracks one stimulus image for a fixed viewing window.
///
/// The session owns its fixation detector and gaze buffer; a new session is
/// created per image and consumed by [`finish`](Self::finish).
pub struct ImageSession {
    index: usize,
    viewport: Viewport,
    tracking_start_ms: f64,
    detector: FixationDetector,
    samples: Vec<GazeSampleRecord>,
    last_rel_ts: Option<f64>,
}

impl ImageSession {
    pub fn new(
        index: usize,
        viewport: Viewport,
        tracking_start_ms: f64,
        config: FixationConfig,
    ) -> Self {
        Self {
            index,
            viewport,
            tracking_start_ms,
            detector: FixationDetector::new(0.0, config),
            samples: Vec::new(),
            last_rel_ts: None,
        }
    }

    /// Predicts from `features` and, if a gaze point comes out, logs it in
    /// image-local coordinates. Returns the image-local point.
    pub fn ingest(&mut self, features: &EyeFeatures, model: &mut GazeModel) -> Option<GazePoint> {
        let point = model.predict(features)?;
        Some(self.push_gaze(point))
    }

    /// Logs an already-predicted screen-space gaze point.
    pub fn push_gaze(&mut self, point: GazePoint) -> GazePoint {
        let mut local = self.viewport.map_to_image(point);
        local.timestamp_ms = point.timestamp_ms - self.tracking_start_ms;

        let dt = match self.last_rel_ts {
            Some(last) => local.timestamp_ms - last,
            None => 0.0,
        };
        self.last_rel_ts = Some(local.timestamp_ms);

        self.samples.push(GazeSampleRecord {
            x: local.x,
            y: local.y,
            timestamp_ms: local.timestamp_ms.round() as i64,
            confidence: local.confidence,
            dt_ms: dt.round() as i64,
        });
        self.detector.add_gaze_point(local);
        local
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Ends the viewing window: finalises fixations, clusters ROIs, grades
    /// the stream and assembles the export record.
    pub fn finish(self, expected_duration_ms: f64) -> ImageAnalysis {
        let gaze: Vec<GazePoint> = self.detector.gaze_log().to_vec();
        let metrics = self.detector.finish();
        let quality = quality::assess(
            &gaze,
            self.viewport.image_width as f64,
            self.viewport.image_height as f64,
            expected_duration_ms,
        );

        let record = ImageRecord {
            image_index: self.index,
            image_dimensions: DimensionsRecord {
                width: self.viewport.image_width,
                height: self.viewport.image_height,
            },
            gaze_points: self.samples,
            first_fixation: metrics.first_fixation.map(|f| FirstFixationRecord {
                x: f.x,
                y: f.y,
                time_ms: f.start_time_ms.round() as i64,
            }),
            fixations: metrics
                .fixations
                .iter()
                .map(|f| FixationRecord {
                    x: f.x,
                    y: f.y,
                    duration_ms: f.duration_ms.round() as i64,
                    start_ms: f.start_time_ms.round() as i64,
                    point_count: f.point_count,
                    avg_confidence: f.avg_confidence,
                })
                .collect(),
            total_view_time_ms: metrics.total_view_time_ms.round() as i64,
            fixation_count: metrics.fixation_count,
            avg_fixation_duration_ms: metrics.average_fixation_duration_ms.round() as i64,
            roi_clusters: metrics.roi_clusters.clone(),
        };

        ImageAnalysis {
            record,
            metrics,
            quality,
        }
    }
}
