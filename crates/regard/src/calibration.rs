//! Calibration orchestration.
//!
//! [`CalibrationManager`] drives the per-point sample collection over a
//! serpentine grid, gates samples on confidence, iris stability and head
//! stability, retries weak points, hands the collected set to
//! [`GazeModel::train`] and then runs the 9-point validation pass that fits
//! the affine post-correction.
//!
//! The manager owns no UI: the embedding application renders the current
//! [`CalibrationPoint`] and forwards every feature frame via
//! [`push_frame`](CalibrationManager::push_frame). Phase changes and point
//! progress are announced through a drainable event queue rather than
//! callbacks.

use std::collections::VecDeque;

use crate::features::{EyeFeatures, HeadPose};
use crate::model::{CalibrationSample, CorrectionPair, GazeModel, TrainingReport};

/// A calibration or validation target on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub rel_x: f64,
    pub rel_y: f64,
}

/// Phases of the calibration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    Instructions,
    Calibrating,
    Validating,
    Complete,
    Failed,
}

/// Final summary of a completed calibration.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationOutcome {
    /// Mean validation error, averaged per point.
    pub mean_error_px: f64,
    /// Pass/fail threshold derived from the screen diagonal.
    pub error_threshold_px: f64,
    pub passed: bool,
    /// Whether the validation pass ran (and a post-correction was fitted).
    pub validated: bool,
    pub training: TrainingReport,
}

/// Progress notifications drained via [`CalibrationManager::poll_event`].
#[derive(Debug, Clone)]
pub enum CalibrationEvent {
    PhaseChanged(CalibrationPhase),
    PointStarted { index: usize, point: CalibrationPoint },
    PointCompleted { index: usize, samples: usize },
    PointRetryQueued { index: usize },
    Trained(TrainingReport),
    Finished(CalibrationOutcome),
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub grid_rows: usize,
    pub grid_cols: usize,
    /// Margin between the screen border and the outermost grid points.
    pub grid_padding: f64,
    /// Margin used by the validation edge-mid points.
    pub validation_padding: f64,
    /// Frame rate of the landmark stream, used to size the settle window.
    pub fps: f64,
    /// Accepted samples that complete a point.
    pub samples_per_point: usize,
    /// Points finishing below this are queued for a retry.
    pub min_point_samples: usize,
    pub max_retries: u32,
    /// Forced point advance after this many post-settle frames.
    pub point_timeout_frames: u32,
    /// Validation predictions collected per point.
    pub validation_samples_per_point: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            grid_rows: 7,
            grid_cols: 7,
            grid_padding: 50.0,
            validation_padding: 100.0,
            fps: 30.0,
            samples_per_point: 35,
            min_point_samples: 20,
            max_retries: 2,
            point_timeout_frames: 180,
            validation_samples_per_point: 60,
        }
    }
}

const MIN_SAMPLE_CONFIDENCE: f64 = 0.40;
const MIN_VALIDATION_CONFIDENCE: f64 = 0.5;
const IRIS_JITTER_STD: f64 = 0.025;
const IRIS_BUFFER_LEN: usize = 15;
const MIN_FACE_CONFIDENCE: f64 = 0.30;
const MIN_EYE_OPENNESS: f64 = 0.08;
const MAX_POSE_DELTA: f64 = 0.12;
/// Validation points that must contribute before an affine fit is attempted.
const MIN_AFFINE_POINTS: usize = 3;

#[derive(Debug, Default)]
struct ValidationAccum {
    pairs: Vec<CorrectionPair>,
    errors: Vec<f64>,
}

pub struct CalibrationManager {
    config: CalibrationConfig,
    phase: CalibrationPhase,
    screen_width: f64,
    screen_height: f64,
    points: Vec<CalibrationPoint>,
    validation_points: Vec<CalibrationPoint>,
    /// Point indices still to visit, serpentine order plus retries.
    order: VecDeque<usize>,
    current: Option<usize>,
    retries: Vec<u32>,
    samples: Vec<CalibrationSample>,
    point_accepted: usize,
    settle_remaining: u32,
    frames_on_point: u32,
    iris_buffer: VecDeque<[f64; 2]>,
    last_pose: Option<HeadPose>,
    validation_index: usize,
    validation: Vec<ValidationAccum>,
    training: Option<TrainingReport>,
    failure: Option<String>,
    events: VecDeque<CalibrationEvent>,
}

impl CalibrationManager {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            phase: CalibrationPhase::Idle,
            screen_width: 0.0,
            screen_height: 0.0,
            points: Vec::new(),
            validation_points: Vec::new(),
            order: VecDeque::new(),
            current: None,
            retries: Vec::new(),
            samples: Vec::new(),
            point_accepted: 0,
            settle_remaining: 0,
            frames_on_point: 0,
            iris_buffer: VecDeque::with_capacity(IRIS_BUFFER_LEN),
            last_pose: None,
            validation_index: 0,
            validation: Vec::new(),
            training: None,
            failure: None,
            events: VecDeque::new(),
        }
    }

    #[inline]
    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Pass/fail threshold in pixels, derived from the screen diagonal.
    pub fn error_threshold_px(&self) -> f64 {
        let diagonal =
            (self.screen_width * self.screen_width + self.screen_height * self.screen_height)
                .sqrt();
        (diagonal * 0.055).round()
    }

    /// Number of stored calibration samples (diagnostic only; the samples
    /// themselves are consumed by training).
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn training_report(&self) -> Option<&TrainingReport> {
        self.training.as_ref()
    }

    /// The failure message when the calibration ended in
    /// [`CalibrationPhase::Failed`].
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// The target the user should currently look at.
    pub fn current_target(&self) -> Option<&CalibrationPoint> {
        match self.phase {
            CalibrationPhase::Calibrating => self.current.map(|i| &self.points[i]),
            CalibrationPhase::Validating => self.validation_points.get(self.validation_index),
            _ => None,
        }
    }

    /// (completed, total) calibration points, counting retries as new work.
    pub fn progress(&self) -> (usize, usize) {
        let remaining = self.order.len() + usize::from(self.current.is_some());
        let total = self.points.len().max(remaining);
        (total - remaining, total)
    }

    /// Drains one pending progress event.
    pub fn poll_event(&mut self) -> Option<CalibrationEvent> {
        self.events.pop_front()
    }

    /// Generates the grids for the given screen and shows the instructions.
    pub fn start(&mut self, screen_width: f64, screen_height: f64) {
        self.reset();
        self.screen_width = screen_width;
        self.screen_height = screen_height;
        self.points = serpentine_grid(
            self.config.grid_rows,
            self.config.grid_cols,
            screen_width,
            screen_height,
            self.config.grid_padding,
        );
        self.validation_points =
            validation_grid(screen_width, screen_height, self.config.validation_padding);
        self.retries = vec![0; self.points.len()];
        self.set_phase(CalibrationPhase::Instructions);
    }

    /// Leaves the instruction screen and begins collecting.
    pub fn begin(&mut self) {
        if self.phase != CalibrationPhase::Instructions {
            return;
        }
        self.order = (0..self.points.len()).collect();
        self.set_phase(CalibrationPhase::Calibrating);
        self.advance_to_next_point();
    }

    /// Aborts and returns to [`CalibrationPhase::Idle`] without touching the
    /// gaze model.
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.phase = CalibrationPhase::Idle;
        self.points.clear();
        self.validation_points.clear();
        self.order.clear();
        self.current = None;
        self.retries.clear();
        self.samples.clear();
        self.point_accepted = 0;
        self.settle_remaining = 0;
        self.frames_on_point = 0;
        self.iris_buffer.clear();
        self.last_pose = None;
        self.validation_index = 0;
        self.validation.clear();
        self.training = None;
        self.failure = None;
        self.events.clear();
    }

    /// Feeds one feature frame through the state machine.
    ///
    /// During collection the model is untouched; at the calibration/validation
    /// transitions the manager trains the model and fits its post-correction,
    /// holding the exclusive borrow only for the duration of this call.
    pub fn push_frame(&mut self, features: &EyeFeatures, model: &mut GazeModel) {
        match self.phase {
            CalibrationPhase::Calibrating => self.push_calibration_frame(features, model),
            CalibrationPhase::Validating => self.push_validation_frame(features, model),
            _ => {}
        }
    }

    fn push_calibration_frame(&mut self, features: &EyeFeatures, model: &mut GazeModel) {
        let Some(point_index) = self.current else {
            return;
        };

        if self.settle_remaining > 0 {
            self.settle_remaining -= 1;
            self.track_pose(features);
            return;
        }
        self.frames_on_point += 1;

        if self.accept_frame(features) {
            let point = self.points[point_index];
            self.samples.push(CalibrationSample {
                features: features.clone(),
                target_x: point.x,
                target_y: point.y,
            });
            self.point_accepted += 1;
        }

        let done = self.point_accepted >= self.config.samples_per_point
            || self.frames_on_point >= self.config.point_timeout_frames;
        if done {
            self.complete_current_point(model);
        }
    }

    /// The per-frame sample gate: face/eye/head stability, confidence, and
    /// the rolling iris-jitter check.
    fn accept_frame(&mut self, features: &EyeFeatures) -> bool {
        let stable = self.check_stability(features);
        if !stable {
            return false;
        }
        if features.confidence < MIN_SAMPLE_CONFIDENCE {
            return false;
        }

        let avg_rel = [
            0.5 * (features.left_iris_rel[0] + features.right_iris_rel[0]),
            0.5 * (features.left_iris_rel[1] + features.right_iris_rel[1]),
        ];
        if self.iris_buffer.len() == IRIS_BUFFER_LEN {
            self.iris_buffer.pop_front();
        }
        self.iris_buffer.push_back(avg_rel);

        if self.iris_buffer.len() == IRIS_BUFFER_LEN {
            let (std_x, std_y) = buffer_std(&self.iris_buffer);
            if std_x > IRIS_JITTER_STD || std_y > IRIS_JITTER_STD {
                return false;
            }
        }
        true
    }

    /// Face visible, eyes open, head not jerking since the previous frame.
    fn check_stability(&mut self, features: &EyeFeatures) -> bool {
        let pose_ok = match self.last_pose {
            Some(prev) => {
                let delta = (features.head_pose.yaw - prev.yaw).abs()
                    + (features.head_pose.pitch - prev.pitch).abs()
                    + (features.head_pose.roll - prev.roll).abs();
                delta <= MAX_POSE_DELTA
            }
            None => true,
        };
        self.last_pose = Some(features.head_pose);

        features.confidence >= MIN_FACE_CONFIDENCE
            && features.eye_openness >= MIN_EYE_OPENNESS
            && pose_ok
    }

    fn track_pose(&mut self, features: &EyeFeatures) {
        self.last_pose = Some(features.head_pose);
    }

    fn complete_current_point(&mut self, model: &mut GazeModel) {
        let Some(index) = self.current.take() else {
            return;
        };
        self.events.push_back(CalibrationEvent::PointCompleted {
            index,
            samples: self.point_accepted,
        });
        log::debug!(
            "calibration point {index} finished with {} samples",
            self.point_accepted
        );

        if self.point_accepted < self.config.min_point_samples
            && self.retries[index] < self.config.max_retries
        {
            self.retries[index] += 1;
            self.order.push_back(index);
            self.events
                .push_back(CalibrationEvent::PointRetryQueued { index });
        }

        if !self.advance_to_next_point() {
            self.finish_collection(model);
        }
    }

    fn advance_to_next_point(&mut self) -> bool {
        let Some(next) = self.order.pop_front() else {
            return false;
        };
        self.current = Some(next);
        self.point_accepted = 0;
        self.frames_on_point = 0;
        self.settle_remaining = self.settle_frames();
        self.iris_buffer.clear();
        self.events.push_back(CalibrationEvent::PointStarted {
            index: next,
            point: self.points[next],
        });
        true
    }

    fn settle_frames(&self) -> u32 {
        (self.config.fps * 1.5).round() as u32
    }

    fn finish_collection(&mut self, model: &mut GazeModel) {
        match model.train(&self.samples) {
            Ok(report) => {
                self.training = Some(report);
                self.events.push_back(CalibrationEvent::Trained(report));
                self.validation = (0..self.validation_points.len())
                    .map(|_| ValidationAccum::default())
                    .collect();
                self.validation_index = 0;
                self.frames_on_point = 0;
                self.settle_remaining = self.settle_frames();
                self.set_phase(CalibrationPhase::Validating);
            }
            Err(err) => {
                let message = err.to_string();
                log::warn!("calibration failed: {message}");
                self.failure = Some(message.clone());
                self.events.push_back(CalibrationEvent::Failed { message });
                self.set_phase(CalibrationPhase::Failed);
            }
        }
    }

    fn push_validation_frame(&mut self, features: &EyeFeatures, model: &mut GazeModel) {
        let Some(point) = self.validation_points.get(self.validation_index).copied() else {
            return;
        };

        // keep the prediction pipeline warm even while settling on the point
        let prediction = model.predict(features);
        if self.settle_remaining > 0 {
            self.settle_remaining -= 1;
            return;
        }
        self.frames_on_point += 1;

        if let Some(gaze) = prediction {
            if gaze.confidence >= MIN_VALIDATION_CONFIDENCE {
                let accum = &mut self.validation[self.validation_index];
                let error = ((point.x - gaze.x).powi(2) + (point.y - gaze.y).powi(2)).sqrt();
                accum.pairs.push(CorrectionPair {
                    predicted: [gaze.x, gaze.y],
                    actual: [point.x, point.y],
                });
                accum.errors.push(error);
            }
        }

        let collected = self.validation[self.validation_index].pairs.len();
        if collected >= self.config.validation_samples_per_point
            || self.frames_on_point >= self.config.point_timeout_frames
        {
            self.validation_index += 1;
            self.frames_on_point = 0;
            self.settle_remaining = self.settle_frames();
            if self.validation_index >= self.validation_points.len() {
                self.finish_validation(model);
            }
        }
    }

    fn finish_validation(&mut self, model: &mut GazeModel) {
        let contributed: Vec<(usize, &ValidationAccum)> = self
            .validation
            .iter()
            .enumerate()
            .filter(|(_, accum)| !accum.pairs.is_empty())
            .collect();

        // centre-weighted bias average: points near the screen centre say
        // more about global drift than peripheral ones
        let mut bias = [0.0, 0.0];
        let mut weight_sum = 0.0;
        let mut mean_point_error = 0.0;
        let mut all_pairs: Vec<CorrectionPair> = Vec::new();
        for (index, accum) in &contributed {
            let point = self.validation_points[*index];
            let dist_rel =
                ((point.rel_x - 0.5).powi(2) + (point.rel_y - 0.5).powi(2)).sqrt();
            let weight = 1.0 / (1.0 + dist_rel);
            for pair in &accum.pairs {
                bias[0] += weight * (pair.actual[0] - pair.predicted[0]);
                bias[1] += weight * (pair.actual[1] - pair.predicted[1]);
                weight_sum += weight;
            }
            mean_point_error +=
                accum.errors.iter().sum::<f64>() / accum.errors.len() as f64;
            all_pairs.extend_from_slice(&accum.pairs);
        }

        if contributed.len() >= MIN_AFFINE_POINTS {
            model.set_affine_correction(&all_pairs);
        } else if weight_sum > 0.0 {
            model.set_drift_offset(bias[0] / weight_sum, bias[1] / weight_sum);
        }

        let mean_error = if contributed.is_empty() {
            f64::INFINITY
        } else {
            mean_point_error / contributed.len() as f64
        };
        let threshold = self.error_threshold_px();
        let outcome = CalibrationOutcome {
            mean_error_px: mean_error,
            error_threshold_px: threshold,
            passed: mean_error <= threshold,
            validated: true,
            training: self.training.expect("validation implies training"),
        };
        log::debug!(
            "validation finished: mean error {:.1}px (threshold {threshold}px)",
            mean_error
        );
        self.events.push_back(CalibrationEvent::Finished(outcome));
        self.set_phase(CalibrationPhase::Complete);
    }

    fn set_phase(&mut self, phase: CalibrationPhase) {
        self.phase = phase;
        self.events.push_back(CalibrationEvent::PhaseChanged(phase));
    }
}

/// Row-major grid with alternating direction per row.
fn serpentine_grid(
    rows: usize,
    cols: usize,
    screen_width: f64,
    screen_height: f64,
    padding: f64,
) -> Vec<CalibrationPoint> {
    let step_x = (screen_width - 2.0 * padding) / (cols - 1) as f64;
    let step_y = (screen_height - 2.0 * padding) / (rows - 1) as f64;
    let mut points = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for i in 0..cols {
            let col = if row % 2 == 0 { i } else { cols - 1 - i };
            let x = padding + col as f64 * step_x;
            let y = padding + row as f64 * step_y;
            points.push(CalibrationPoint {
                id: points.len(),
                x,
                y,
                rel_x: x / screen_width,
                rel_y: y / screen_height,
            });
        }
    }
    points
}

/// Nine validation targets: centre, corners at relative 0.2/0.8 and the
/// padded edge midpoints.
fn validation_grid(screen_width: f64, screen_height: f64, padding: f64) -> Vec<CalibrationPoint> {
    let positions = [
        (0.5 * screen_width, 0.5 * screen_height),
        (0.2 * screen_width, 0.2 * screen_height),
        (0.8 * screen_width, 0.2 * screen_height),
        (0.2 * screen_width, 0.8 * screen_height),
        (0.8 * screen_width, 0.8 * screen_height),
        (0.5 * screen_width, padding),
        (screen_width - padding, 0.5 * screen_height),
        (0.5 * screen_width, screen_height - padding),
        (padding, 0.5 * screen_height),
    ];
    positions
        .iter()
        .enumerate()
        .map(|(id, &(x, y))| CalibrationPoint {
            id,
            x,
            y,
            rel_x: x / screen_width,
            rel_y: y / screen_height,
        })
        .collect()
}

fn buffer_std(buffer: &VecDeque<[f64; 2]>) -> (f64, f64) {
    let n = buffer.len() as f64;
    let mut mean = [0.0, 0.0];
    for v in buffer {
        mean[0] += v[0];
        mean[1] += v[1];
    }
    mean[0] /= n;
    mean[1] /= n;
    let mut var = [0.0, 0.0];
    for v in buffer {
        var[0] += (v[0] - mean[0]).powi(2);
        var[1] += (v[1] - mean[1]).powi(2);
    }
    ((var[0] / n).sqrt(), (var[1] / n).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::EyeFeatures;
    use crate::model::{GazeModel, GazeModelConfig};

    fn features(rel_x: f64, rel_y: f64, confidence: f64, t: f64) -> EyeFeatures {
        EyeFeatures {
            timestamp_ms: t,
            left_iris: [0.35, 0.4],
            right_iris: [0.55, 0.4],
            left_iris_rel: [rel_x, rel_y],
            right_iris_rel: [rel_x, rel_y],
            pupil_radius: 0.01,
            eye_openness: 0.3,
            left_ear: 0.3,
            right_ear: 0.3,
            head_pose: Default::default(),
            face_scale: 0.15,
            left_eye_width: 0.08,
            right_eye_width: 0.08,
            confidence,
        }
    }

    #[test]
    fn grid_is_serpentine() {
        let points = serpentine_grid(7, 7, 1920.0, 1080.0, 50.0);
        assert_eq!(points.len(), 49);
        // first row runs left to right, second row right to left
        assert_eq!(points[0].x, 50.0);
        assert_eq!(points[6].x, 1870.0);
        assert_eq!(points[7].x, 1870.0);
        assert_eq!(points[13].x, 50.0);
        for p in &points {
            assert!(p.x >= 50.0 && p.x <= 1870.0);
            assert!(p.y >= 50.0 && p.y <= 1030.0);
            assert!((p.rel_x - p.x / 1920.0).abs() < 1e-12);
        }
    }

    #[test]
    fn validation_grid_has_nine_points() {
        let points = validation_grid(1920.0, 1080.0, 100.0);
        assert_eq!(points.len(), 9);
        assert_eq!((points[0].x, points[0].y), (960.0, 540.0));
        assert_eq!((points[1].x, points[1].y), (384.0, 216.0));
        assert_eq!((points[5].x, points[5].y), (960.0, 100.0));
    }

    #[test]
    fn phases_follow_the_state_machine() {
        let mut manager = CalibrationManager::new(CalibrationConfig::default());
        assert_eq!(manager.phase(), CalibrationPhase::Idle);
        manager.start(1920.0, 1080.0);
        assert_eq!(manager.phase(), CalibrationPhase::Instructions);
        manager.begin();
        assert_eq!(manager.phase(), CalibrationPhase::Calibrating);
        assert!(manager.current_target().is_some());
        manager.cancel();
        assert_eq!(manager.phase(), CalibrationPhase::Idle);
        assert!(manager.current_target().is_none());
    }

    #[test]
    fn error_threshold_follows_the_diagonal() {
        let mut manager = CalibrationManager::new(CalibrationConfig::default());
        manager.start(1920.0, 1080.0);
        assert_eq!(manager.error_threshold_px(), 121.0);
    }

    #[test]
    fn settle_window_rejects_early_frames() {
        let config = CalibrationConfig {
            fps: 10.0, // settle = 15 frames
            ..CalibrationConfig::default()
        };
        let mut manager = CalibrationManager::new(config);
        let mut model = GazeModel::new(GazeModelConfig::default());
        manager.start(1920.0, 1080.0);
        manager.begin();

        let mut t = 0.0;
        for _ in 0..15 {
            manager.push_frame(&features(0.5, 0.5, 1.0, t), &mut model);
            t += 33.0;
        }
        assert_eq!(manager.sample_count(), 0);
        manager.push_frame(&features(0.5, 0.5, 1.0, t), &mut model);
        assert_eq!(manager.sample_count(), 1);
    }

    #[test]
    fn low_confidence_frames_are_not_sampled() {
        let config = CalibrationConfig {
            fps: 0.0, // no settle window
            ..CalibrationConfig::default()
        };
        let mut manager = CalibrationManager::new(config);
        let mut model = GazeModel::new(GazeModelConfig::default());
        manager.start(1920.0, 1080.0);
        manager.begin();

        manager.push_frame(&features(0.5, 0.5, 0.3, 0.0), &mut model);
        assert_eq!(manager.sample_count(), 0);
        manager.push_frame(&features(0.5, 0.5, 0.9, 33.0), &mut model);
        assert_eq!(manager.sample_count(), 1);
    }

    #[test]
    fn head_jerk_fails_the_stability_gate() {
        let config = CalibrationConfig {
            fps: 0.0,
            ..CalibrationConfig::default()
        };
        let mut manager = CalibrationManager::new(config);
        let mut model = GazeModel::new(GazeModelConfig::default());
        manager.start(1920.0, 1080.0);
        manager.begin();

        manager.push_frame(&features(0.5, 0.5, 1.0, 0.0), &mut model);
        let mut jerked = features(0.5, 0.5, 1.0, 33.0);
        jerked.head_pose.yaw = 0.2;
        manager.push_frame(&jerked, &mut model);
        assert_eq!(manager.sample_count(), 1);
    }

    #[test]
    fn jittery_iris_is_rejected_once_buffer_fills() {
        let config = CalibrationConfig {
            fps: 0.0,
            ..CalibrationConfig::default()
        };
        let mut manager = CalibrationManager::new(config);
        let mut model = GazeModel::new(GazeModelConfig::default());
        manager.start(1920.0, 1080.0);
        manager.begin();

        // alternate wildly so the rolling std shoots past the gate
        let mut t = 0.0;
        for i in 0..IRIS_BUFFER_LEN {
            let rel = if i % 2 == 0 { 0.3 } else { 0.7 };
            manager.push_frame(&features(rel, 0.5, 1.0, t), &mut model);
            t += 33.0;
        }
        let before = manager.sample_count();
        manager.push_frame(&features(0.3, 0.5, 1.0, t), &mut model);
        assert_eq!(manager.sample_count(), before);
    }

    #[test]
    fn weak_points_are_retried() {
        let config = CalibrationConfig {
            grid_rows: 2,
            grid_cols: 2,
            fps: 0.0,
            samples_per_point: 5,
            min_point_samples: 3,
            point_timeout_frames: 4,
            ..CalibrationConfig::default()
        };
        let mut manager = CalibrationManager::new(config);
        let mut model = GazeModel::new(GazeModelConfig::default());
        manager.start(1920.0, 1080.0);
        manager.begin();

        // all frames below the confidence gate: point 0 times out with no
        // samples and must be queued again
        for i in 0..4 {
            manager.push_frame(&features(0.5, 0.5, 0.1, i as f64 * 33.0), &mut model);
        }
        let mut retried = false;
        while let Some(event) = manager.poll_event() {
            if let CalibrationEvent::PointRetryQueued { index: 0 } = event {
                retried = true;
            }
        }
        assert!(retried);
        assert!(manager.order.contains(&0));
    }
}
