//! Session quality grading.
//!
//! Summarises a gaze stream into a 0-100 score from four components: the
//! fraction of points landing on screen, the effective sampling rate, the
//! fraction of confident samples, and how much of the expected viewing
//! window was actually covered.

use crate::model::GazePoint;

/// Letter grade buckets over the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QualityReport {
    pub gaze_on_screen_percent: f64,
    pub sampling_rate_hz: f64,
    pub data_integrity_percent: f64,
    /// Actual over expected viewing duration, capped at 1.
    pub duration_ratio: f64,
    pub score: f64,
    pub grade: Grade,
}

/// Sampling rate at which the rate component saturates.
const NOMINAL_RATE_HZ: f64 = 25.0;
const CONFIDENT_SAMPLE: f64 = 0.4;

/// Grades a gaze sequence recorded over a viewing window of
/// `expected_duration_ms` against image dimensions `width` x `height`.
pub fn assess(
    points: &[GazePoint],
    width: f64,
    height: f64,
    expected_duration_ms: f64,
) -> QualityReport {
    let count = points.len() as f64;

    let on_screen = points
        .iter()
        .filter(|p| {
            p.x >= -0.05 * width
                && p.x <= 1.05 * width
                && p.y >= -0.05 * height
                && p.y <= 1.05 * height
        })
        .count() as f64;
    let gaze_on_screen_percent = if count > 0.0 {
        on_screen / count * 100.0
    } else {
        0.0
    };

    let sampling_rate_hz = match (points.first(), points.last()) {
        (Some(first), Some(last)) if last.timestamp_ms > first.timestamp_ms => {
            count / ((last.timestamp_ms - first.timestamp_ms) / 1000.0)
        }
        _ => 0.0,
    };

    let confident = points
        .iter()
        .filter(|p| p.confidence > CONFIDENT_SAMPLE)
        .count() as f64;
    let data_integrity_percent = if count > 0.0 {
        confident / count * 100.0
    } else {
        0.0
    };

    let actual_duration_ms = match (points.first(), points.last()) {
        (Some(first), Some(last)) => last.timestamp_ms - first.timestamp_ms,
        _ => 0.0,
    };
    let duration_ratio = if expected_duration_ms > 0.0 {
        (actual_duration_ms / expected_duration_ms).min(1.0)
    } else {
        0.0
    };

    let rate_component = (sampling_rate_hz / NOMINAL_RATE_HZ * 100.0).min(100.0);
    let score = 0.35 * gaze_on_screen_percent
        + 0.20 * rate_component
        + 0.30 * data_integrity_percent
        + 0.15 * duration_ratio * 100.0;

    let grade = if score >= 80.0 {
        Grade::A
    } else if score >= 60.0 {
        Grade::B
    } else if score >= 40.0 {
        Grade::C
    } else {
        Grade::D
    };

    QualityReport {
        gaze_on_screen_percent,
        sampling_rate_hz,
        data_integrity_percent,
        duration_ratio,
        score,
        grade,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(count: usize, dt_ms: f64, confidence: f64) -> Vec<GazePoint> {
        (0..count)
            .map(|i| GazePoint {
                x: 320.0,
                y: 240.0,
                timestamp_ms: i as f64 * dt_ms,
                confidence,
            })
            .collect()
    }

    #[test]
    fn clean_session_grades_a() {
        // 30Hz, all on screen, all confident, full duration
        let points = stream(150, 33.3, 0.9);
        let report = assess(&points, 640.0, 480.0, 5000.0);
        assert!(report.gaze_on_screen_percent > 99.0);
        assert!(report.sampling_rate_hz > 25.0);
        assert!(report.score >= 80.0, "{}", report.score);
        assert_eq!(report.grade, Grade::A);
    }

    #[test]
    fn off_screen_points_hurt_the_score() {
        let mut points = stream(100, 33.3, 0.9);
        for p in points.iter_mut().take(50) {
            p.x = 5000.0;
        }
        let report = assess(&points, 640.0, 480.0, 3300.0);
        assert!((report.gaze_on_screen_percent - 50.0).abs() < 1.0);
        assert!(report.grade != Grade::A);
    }

    #[test]
    fn slightly_outside_counts_as_on_screen() {
        let mut points = stream(10, 40.0, 0.9);
        points[0].x = -30.0; // within the 5% tolerance band of a 640px image
        let report = assess(&points, 640.0, 480.0, 400.0);
        assert_eq!(report.gaze_on_screen_percent, 100.0);
    }

    #[test]
    fn low_confidence_reduces_integrity() {
        let points = stream(100, 33.3, 0.2);
        let report = assess(&points, 640.0, 480.0, 3300.0);
        assert_eq!(report.data_integrity_percent, 0.0);
        assert!(report.score < 80.0);
    }

    #[test]
    fn truncated_session_reduces_duration_ratio() {
        // one second of data against a five second viewing window
        let points = stream(30, 33.3, 0.9);
        let report = assess(&points, 640.0, 480.0, 5000.0);
        assert!(report.duration_ratio < 0.25);
    }

    #[test]
    fn empty_stream_grades_d() {
        let report = assess(&[], 640.0, 480.0, 5000.0);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.grade, Grade::D);
    }
}
