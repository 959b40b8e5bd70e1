//! I-VT fixation detection.
//!
//! Classifies an ordered gaze stream into fixations and saccades using a
//! windowed velocity threshold, with blink-gap handling and a spatial radius
//! check, then summarises the session into [`FixationMetrics`] including the
//! DBSCAN regions of interest.

use regard_utils::num::TotalF64;

use crate::cluster::{self, RoiCluster};
use crate::model::GazePoint;

/// Detection parameters; the defaults follow the windowed I-VT setup with a
/// 55 px/s velocity threshold.
#[derive(Debug, Clone)]
pub struct FixationConfig {
    /// Velocity below which a sample continues the current fixation, px/s.
    pub velocity_threshold: f64,
    pub min_fixation_duration_ms: f64,
    /// Samples farther than this from the running fixation centre start a
    /// new fixation even at low velocity.
    pub max_fixation_radius: f64,
    pub dbscan_eps: f64,
    pub dbscan_min_pts: usize,
}

impl Default for FixationConfig {
    fn default() -> Self {
        Self {
            velocity_threshold: 55.0,
            min_fixation_duration_ms: 100.0,
            max_fixation_radius: 40.0,
            dbscan_eps: 35.0,
            dbscan_min_pts: 5,
        }
    }
}

/// Optional overrides merged into a [`FixationConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FixationPatch {
    pub velocity_threshold: Option<f64>,
    pub min_fixation_duration_ms: Option<f64>,
    pub max_fixation_radius: Option<f64>,
    pub dbscan_eps: Option<f64>,
    pub dbscan_min_pts: Option<usize>,
}

impl FixationConfig {
    pub fn merged(mut self, patch: &FixationPatch) -> Self {
        if let Some(v) = patch.velocity_threshold {
            self.velocity_threshold = v;
        }
        if let Some(v) = patch.min_fixation_duration_ms {
            self.min_fixation_duration_ms = v;
        }
        if let Some(v) = patch.max_fixation_radius {
            self.max_fixation_radius = v;
        }
        if let Some(v) = patch.dbscan_eps {
            self.dbscan_eps = v;
        }
        if let Some(v) = patch.dbscan_min_pts {
            self.dbscan_min_pts = v;
        }
        self
    }
}

/// A maintained low-velocity gaze cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fixation {
    /// Confidence-weighted centre.
    pub x: f64,
    pub y: f64,
    pub start_time_ms: f64,
    pub end_time_ms: f64,
    pub duration_ms: f64,
    pub point_count: usize,
    pub avg_confidence: f64,
}

/// Ballistic transition between two consecutive fixations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Saccade {
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub start_time_ms: f64,
    pub end_time_ms: f64,
    /// Windowed velocity measured at the break, px/s.
    pub velocity: f64,
}

/// End-of-tracking summary.
#[derive(Debug, Clone, Default)]
pub struct FixationMetrics {
    pub first_fixation: Option<Fixation>,
    pub time_to_first_fixation_ms: Option<f64>,
    pub first_three_fixations: Vec<Fixation>,
    pub longest_fixation: Option<Fixation>,
    pub total_fixation_duration_ms: f64,
    pub total_view_time_ms: f64,
    pub fixation_count: usize,
    pub average_fixation_duration_ms: f64,
    pub fixations: Vec<Fixation>,
    pub saccades: Vec<Saccade>,
    pub roi_clusters: Vec<RoiCluster>,
}

const MIN_POINT_CONFIDENCE: f64 = 0.3;
/// Timestamp gaps in this range are treated as blinks.
const BLINK_GAP_MS: (f64, f64) = (100.0, 400.0);
/// Frames discarded after a blink while the eye re-opens.
const POST_BLINK_SKIP: u32 = 2;
const VELOCITY_WINDOW: usize = 3;

/// Online I-VT detector for one tracking session.
///
/// Points must be fed in monotonic timestamp order; the detector owns its
/// gaze buffer and fixation list for the lifetime of one image's tracking
/// and is not reusable across sessions.
pub struct FixationDetector {
    config: FixationConfig,
    tracking_start_ms: f64,
    gaze_log: Vec<GazePoint>,
    window: Vec<GazePoint>,
    current: Vec<GazePoint>,
    current_entry_velocity: f64,
    current_follows_blink: bool,
    fixations: Vec<Fixation>,
    saccades: Vec<Saccade>,
    post_blink: u32,
    last_valid_ts: Option<f64>,
}

impl FixationDetector {
    pub fn new(tracking_start_ms: f64, config: FixationConfig) -> Self {
        Self {
            config,
            tracking_start_ms,
            gaze_log: Vec::new(),
            window: Vec::with_capacity(VELOCITY_WINDOW),
            current: Vec::new(),
            current_entry_velocity: 0.0,
            current_follows_blink: true,
            fixations: Vec::new(),
            saccades: Vec::new(),
            post_blink: 0,
            last_valid_ts: None,
        }
    }

    #[inline]
    pub fn gaze_log(&self) -> &[GazePoint] {
        &self.gaze_log
    }

    #[inline]
    pub fn fixations(&self) -> &[Fixation] {
        &self.fixations
    }

    /// Ingests one gaze point.
    pub fn add_gaze_point(&mut self, point: GazePoint) {
        self.gaze_log.push(point);
        if point.confidence < MIN_POINT_CONFIDENCE {
            return;
        }

        if let Some(last) = self.last_valid_ts {
            let gap = point.timestamp_ms - last;
            if gap > BLINK_GAP_MS.0 && gap < BLINK_GAP_MS.1 {
                // blink: close the open fixation and skip the next frames
                // while the eye settles; no saccade is emitted across the gap
                log::trace!("blink gap of {gap:.0}ms at {:.0}ms", point.timestamp_ms);
                self.finalize_current();
                self.current_follows_blink = true;
                self.post_blink = POST_BLINK_SKIP;
                self.window.clear();
            }
        }
        self.last_valid_ts = Some(point.timestamp_ms);

        if self.post_blink > 0 {
            self.post_blink -= 1;
            return;
        }

        if self.window.len() == VELOCITY_WINDOW {
            self.window.remove(0);
        }
        self.window.push(point);
        let velocity = windowed_velocity(&self.window);

        let in_radius = match self.current_center() {
            Some((cx, cy)) => {
                let dist = ((point.x - cx).powi(2) + (point.y - cy).powi(2)).sqrt();
                dist < self.config.max_fixation_radius
            }
            None => true,
        };

        if velocity < self.config.velocity_threshold && in_radius {
            self.current.push(point);
        } else {
            self.finalize_current();
            self.current.push(point);
            self.current_entry_velocity = velocity;
            self.current_follows_blink = false;
        }
    }

    /// Confidence-weighted centre of the in-progress fixation.
    fn current_center(&self) -> Option<(f64, f64)> {
        if self.current.is_empty() {
            return None;
        }
        let mut x = 0.0;
        let mut y = 0.0;
        let mut weight = 0.0;
        for p in &self.current {
            let w = p.confidence.max(1e-6);
            x += w * p.x;
            y += w * p.y;
            weight += w;
        }
        Some((x / weight, y / weight))
    }

    /// Emits the in-progress fixation if it lasted long enough, together with
    /// the saccade linking it to its predecessor.
    fn finalize_current(&mut self) {
        let Some((&first, &last)) = self.current.first().zip(self.current.last()) else {
            return;
        };
        let duration = last.timestamp_ms - first.timestamp_ms;
        if duration < self.config.min_fixation_duration_ms {
            self.current.clear();
            return;
        }

        let (x, y) = self.current_center().expect("current is non-empty");
        let avg_confidence =
            self.current.iter().map(|p| p.confidence).sum::<f64>() / self.current.len() as f64;
        let fixation = Fixation {
            x,
            y,
            start_time_ms: first.timestamp_ms,
            end_time_ms: last.timestamp_ms,
            duration_ms: duration,
            point_count: self.current.len(),
            avg_confidence,
        };

        if !self.current_follows_blink {
            if let Some(prev) = self.fixations.last() {
                self.saccades.push(Saccade {
                    start: [prev.x, prev.y],
                    end: [fixation.x, fixation.y],
                    start_time_ms: prev.end_time_ms,
                    end_time_ms: fixation.start_time_ms,
                    velocity: self.current_entry_velocity,
                });
            }
        }
        self.fixations.push(fixation);
        self.current.clear();
    }

    /// Finalises the session and computes the summary metrics.
    pub fn finish(mut self) -> FixationMetrics {
        self.finalize_current();

        let total_fixation_duration_ms: f64 =
            self.fixations.iter().map(|f| f.duration_ms).sum();
        let fixation_count = self.fixations.len();
        let average_fixation_duration_ms = if fixation_count == 0 {
            0.0
        } else {
            total_fixation_duration_ms / fixation_count as f64
        };
        let total_view_time_ms = self
            .gaze_log
            .last()
            .map(|p| p.timestamp_ms - self.tracking_start_ms)
            .unwrap_or(0.0);

        let roi_clusters = cluster::cluster_fixations(
            &self.fixations,
            self.config.dbscan_eps,
            self.config.dbscan_min_pts,
        );

        let first_fixation = self.fixations.first().copied();
        FixationMetrics {
            first_fixation,
            time_to_first_fixation_ms: first_fixation
                .map(|f| f.start_time_ms - self.tracking_start_ms),
            first_three_fixations: self.fixations.iter().take(3).copied().collect(),
            longest_fixation: self
                .fixations
                .iter()
                .max_by_key(|f| TotalF64(f.duration_ms))
                .copied(),
            total_fixation_duration_ms,
            total_view_time_ms,
            fixation_count,
            average_fixation_duration_ms,
            fixations: self.fixations,
            saccades: self.saccades,
            roi_clusters,
        }
    }
}

/// Velocity over the rolling window: distance between its first and last
/// point divided by the elapsed time, in px/s.
fn windowed_velocity(window: &[GazePoint]) -> f64 {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return 0.0;
    };
    let dt = last.timestamp_ms - first.timestamp_ms;
    if dt <= 0.0 {
        return 0.0;
    }
    let dist = ((last.x - first.x).powi(2) + (last.y - first.y).powi(2)).sqrt();
    dist / dt * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, y: f64, t: f64) -> GazePoint {
        GazePoint {
            x,
            y,
            timestamp_ms: t,
            confidence: 0.9,
        }
    }

    fn detector() -> FixationDetector {
        FixationDetector::new(0.0, FixationConfig::default())
    }

    #[test]
    fn steady_gaze_is_one_fixation() {
        let mut det = detector();
        // 20 points at 50ms intervals with <=2px jitter
        for i in 0..20 {
            let jitter = if i % 2 == 0 { 1.5 } else { -1.5 };
            det.add_gaze_point(point(100.0 + jitter, 100.0 - jitter, i as f64 * 50.0));
        }
        let metrics = det.finish();
        assert_eq!(metrics.fixation_count, 1);
        assert!(metrics.saccades.is_empty());
        let fixation = metrics.first_fixation.unwrap();
        assert!(fixation.duration_ms >= 900.0, "{}", fixation.duration_ms);
        assert!((fixation.x - 100.0).abs() <= 2.0);
        assert!((fixation.y - 100.0).abs() <= 2.0);
        assert_eq!(fixation.point_count, 20);
        assert!((fixation.avg_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn low_confidence_points_are_logged_but_ignored() {
        let mut det = detector();
        for i in 0..10 {
            let mut p = point(100.0, 100.0, i as f64 * 50.0);
            p.confidence = 0.1;
            det.add_gaze_point(p);
        }
        assert_eq!(det.gaze_log().len(), 10);
        let metrics = det.finish();
        assert_eq!(metrics.fixation_count, 0);
    }

    #[test]
    fn two_clusters_emit_a_saccade() {
        let mut det = detector();
        let mut t = 0.0;
        for _ in 0..10 {
            det.add_gaze_point(point(100.0, 100.0, t));
            t += 50.0;
        }
        for _ in 0..10 {
            det.add_gaze_point(point(400.0, 400.0, t));
            t += 50.0;
        }
        let metrics = det.finish();
        assert_eq!(metrics.fixation_count, 2);
        assert_eq!(metrics.saccades.len(), 1);

        let saccade = &metrics.saccades[0];
        let first = &metrics.fixations[0];
        let second = &metrics.fixations[1];
        assert_eq!(saccade.start_time_ms, first.end_time_ms);
        assert!(saccade.end_time_ms <= second.start_time_ms + 1e-9);
        assert!(saccade.velocity > 55.0, "{}", saccade.velocity);
        assert!((second.x - 400.0).abs() < 1.0);
    }

    #[test]
    fn fixation_timestamps_are_monotone() {
        let mut det = detector();
        let mut t = 0.0;
        for cluster in 0..4 {
            let cx = 100.0 + 300.0 * cluster as f64;
            for _ in 0..8 {
                det.add_gaze_point(point(cx, 200.0, t));
                t += 40.0;
            }
        }
        let metrics = det.finish();
        assert!(metrics.fixation_count >= 2);
        for f in &metrics.fixations {
            assert!(f.start_time_ms <= f.end_time_ms);
            assert!(f.duration_ms >= 100.0);
        }
        for pair in metrics.fixations.windows(2) {
            assert!(pair[0].end_time_ms <= pair[1].start_time_ms);
        }
        for s in &metrics.saccades {
            assert!(s.start_time_ms <= s.end_time_ms);
        }
    }

    #[test]
    fn blink_gap_splits_fixations_without_saccade() {
        let mut det = detector();
        let mut t = 0.0;
        for _ in 0..10 {
            det.add_gaze_point(point(50.0, 50.0, t));
            t += 30.0;
        }
        // 150ms blink gap (last point at 270ms, next at 420ms)
        t += 120.0;
        for _ in 0..10 {
            det.add_gaze_point(point(50.0, 50.0, t));
            t += 30.0;
        }
        let metrics = det.finish();
        assert_eq!(metrics.fixation_count, 2, "{:?}", metrics.fixations);
        assert!(metrics.saccades.is_empty());
        // the two post-blink frames are discarded before the second fixation
        assert_eq!(metrics.fixations[1].point_count, 8);
        assert!(metrics.fixations[1].start_time_ms >= 480.0);
    }

    #[test]
    fn short_dwells_are_dropped() {
        let mut det = detector();
        det.add_gaze_point(point(10.0, 10.0, 0.0));
        det.add_gaze_point(point(10.0, 10.0, 40.0));
        let metrics = det.finish();
        assert_eq!(metrics.fixation_count, 0);
        assert_eq!(metrics.total_view_time_ms, 40.0);
    }

    #[test]
    fn patch_merges_into_config() {
        let config = FixationConfig::default().merged(&FixationPatch {
            dbscan_eps: Some(50.0),
            ..FixationPatch::default()
        });
        assert_eq!(config.dbscan_eps, 50.0);
        assert_eq!(config.velocity_threshold, 55.0);
    }

    #[test]
    fn metrics_summarise_the_session() {
        let mut det = FixationDetector::new(100.0, FixationConfig::default());
        let mut t = 200.0;
        for _ in 0..10 {
            det.add_gaze_point(point(100.0, 100.0, t));
            t += 50.0;
        }
        for _ in 0..20 {
            det.add_gaze_point(point(500.0, 400.0, t));
            t += 50.0;
        }
        let metrics = det.finish();
        assert_eq!(metrics.fixation_count, 2);
        assert_eq!(metrics.time_to_first_fixation_ms, Some(100.0));
        let longest = metrics.longest_fixation.unwrap();
        assert!((longest.x - 500.0).abs() < 1.0);
        assert_eq!(metrics.first_three_fixations.len(), 2);
        assert!(
            (metrics.total_fixation_duration_ms
                - metrics.fixations.iter().map(|f| f.duration_ms).sum::<f64>())
            .abs()
                < 1e-9
        );
        assert!(metrics.average_fixation_duration_ms > 0.0);
        assert_eq!(metrics.total_view_time_ms, t - 50.0 - 100.0);
    }
}
