//! End-to-end pipeline test: synthetic landmark frames are pushed through
//! feature extraction, calibration, validation, tracking, analytics and the
//! results export.

use once_cell::sync::Lazy;

use regard::calibration::{
    CalibrationConfig, CalibrationEvent, CalibrationManager, CalibrationOutcome, CalibrationPhase,
};
use regard::features::FeatureExtractor;
use regard::fixation::FixationConfig;
use regard::heatmap::{HeatmapConfig, HeatmapGenerator};
use regard::landmark::{Landmark, LandmarkFrame, LANDMARK_COUNT, LEFT_IRIS, RIGHT_IRIS};
use regard::model::{GazeModel, GazeModelConfig};
use regard::quality::Grade;
use regard::session::{ImageSession, SessionExport, Viewport};

const SCREEN_W: f64 = 1920.0;
const SCREEN_H: f64 = 1080.0;

/// Builds a frontal synthetic face with the iris at `(rel_x, rel_y)` inside
/// both eye contours.
fn synthetic_frame(rel_x: f64, rel_y: f64, timestamp_ms: f64) -> LandmarkFrame {
    let mut points = vec![Landmark::default(); LANDMARK_COUNT];
    let mut set = |idx: usize, x: f64, y: f64| {
        points[idx] = Landmark::new(x as f32, y as f32, 0.0);
    };

    // left eye contour
    set(33, 0.30, 0.40);
    set(133, 0.38, 0.40);
    set(159, 0.34, 0.38);
    set(145, 0.34, 0.42);
    set(160, 0.32, 0.385);
    set(158, 0.36, 0.385);
    set(153, 0.36, 0.415);
    set(144, 0.32, 0.415);

    // right eye contour
    set(362, 0.52, 0.40);
    set(263, 0.60, 0.40);
    set(386, 0.56, 0.38);
    set(374, 0.56, 0.42);
    set(387, 0.58, 0.385);
    set(385, 0.54, 0.385);
    set(380, 0.54, 0.415);
    set(373, 0.58, 0.415);

    set(1, 0.45, 0.40 + 0.62 * 0.30);
    set(10, 0.45, 0.20);
    set(199, 0.45, 0.75);
    set(61, 0.38, 0.62);
    set(291, 0.52, 0.62);

    let ring = [(0.0, 0.0), (0.004, 0.0), (0.0, 0.004), (-0.004, 0.0), (0.0, -0.004)];
    let lx = 0.38 + rel_x * (0.30 - 0.38);
    let ly = 0.38 + rel_y * (0.42 - 0.38);
    for (&idx, &(dx, dy)) in LEFT_IRIS.iter().zip(&ring) {
        set(idx, lx + dx, ly + dy);
    }
    let rx = 0.52 + rel_x * (0.60 - 0.52);
    let ry = 0.38 + rel_y * (0.42 - 0.38);
    for (&idx, &(dx, dy)) in RIGHT_IRIS.iter().zip(&ring) {
        set(idx, rx + dx, ry + dy);
    }

    LandmarkFrame::new(points, timestamp_ms)
}

fn model_config() -> GazeModelConfig {
    GazeModelConfig {
        screen_width: SCREEN_W,
        screen_height: SCREEN_H,
        ..GazeModelConfig::default()
    }
}

/// Runs a full calibration + validation session once; tests share the
/// resulting model artefact.
static CALIBRATED: Lazy<(String, CalibrationOutcome)> = Lazy::new(|| {
    let mut rng = fastrand::Rng::with_seed(11);
    let extractor = FeatureExtractor::new();
    let mut model = GazeModel::new(model_config());
    let mut manager = CalibrationManager::new(CalibrationConfig {
        grid_rows: 5,
        grid_cols: 5,
        fps: 10.0,
        samples_per_point: 20,
        min_point_samples: 5,
        validation_samples_per_point: 20,
        ..CalibrationConfig::default()
    });

    manager.start(SCREEN_W, SCREEN_H);
    assert_eq!(manager.phase(), CalibrationPhase::Instructions);
    manager.begin();

    let mut t = 0.0;
    let mut outcome = None;
    let mut frames = 0;
    while matches!(
        manager.phase(),
        CalibrationPhase::Calibrating | CalibrationPhase::Validating
    ) {
        frames += 1;
        assert!(frames < 20_000, "calibration did not converge");
        let target = *manager.current_target().expect("an active target");
        let rel_x = target.x / SCREEN_W + (rng.f64() - 0.5) * 0.004;
        let rel_y = target.y / SCREEN_H + (rng.f64() - 0.5) * 0.004;
        let features = extractor.extract(&synthetic_frame(rel_x, rel_y, t));
        assert!(features.confidence > 0.5, "synthetic frame lost the face");
        manager.push_frame(&features, &mut model);
        t += 33.0;

        while let Some(event) = manager.poll_event() {
            if let CalibrationEvent::Finished(o) = event {
                outcome = Some(o);
            }
        }
    }

    assert_eq!(
        manager.phase(),
        CalibrationPhase::Complete,
        "calibration failed: {:?}",
        manager.failure()
    );
    (model.export_model().unwrap(), outcome.unwrap())
});

#[test]
fn calibration_completes_and_validates() {
    let (_, outcome) = &*CALIBRATED;
    assert!(outcome.validated);
    assert_eq!(outcome.error_threshold_px, 121.0);
    assert!(
        outcome.passed,
        "validation error {:.1}px above threshold",
        outcome.mean_error_px
    );
    assert!(outcome.training.samples_used >= 80);
    assert!(outcome.training.mean_error_px < 30.0);
}

#[test]
fn tracked_image_yields_fixations_heatmap_and_export() {
    let (model_json, outcome) = &*CALIBRATED;
    let mut model = GazeModel::new(model_config());
    model.import_model(model_json).unwrap();

    let extractor = FeatureExtractor::new();
    let viewport = Viewport::fullscreen(SCREEN_W, SCREEN_H, 960, 540);
    let start_ms = 100_000.0;
    let mut session = ImageSession::new(0, viewport, start_ms, FixationConfig::default());

    // dwell on two spots of the stimulus for ~1.3s each
    let mut t = start_ms;
    for (screen_x, screen_y) in [(400.0, 300.0), (1400.0, 800.0)] {
        for _ in 0..40 {
            let features =
                extractor.extract(&synthetic_frame(screen_x / SCREEN_W, screen_y / SCREEN_H, t));
            session.ingest(&features, &mut model);
            t += 33.0;
        }
    }
    assert!(session.sample_count() > 70);

    let analysis = session.finish((t - start_ms).round());
    assert_eq!(analysis.record.image_index, 0);
    assert!(
        analysis.metrics.fixation_count >= 2,
        "{:?}",
        analysis.metrics.fixations
    );

    // fixation centres are image-local (the image is half the screen size)
    let first = analysis.metrics.first_fixation.unwrap();
    assert!((first.x - 200.0).abs() < 12.0, "first fixation x {}", first.x);
    assert!((first.y - 150.0).abs() < 12.0, "first fixation y {}", first.y);
    let last = analysis.metrics.fixations.last().unwrap();
    assert!((last.x - 700.0).abs() < 12.0, "last fixation x {}", last.x);
    assert!((last.y - 400.0).abs() < 12.0, "last fixation y {}", last.y);

    assert_eq!(analysis.quality.grade, Grade::A, "{:?}", analysis.quality);

    // heatmap over the stimulus
    let base = image::RgbaImage::from_pixel(960, 540, image::Rgba([200, 200, 200, 255]));
    let mut heatmap = HeatmapGenerator::new(960, 540, HeatmapConfig::default());
    heatmap.splat_fixations(&analysis.metrics.fixations);
    let png = heatmap.render_over(&base).unwrap();
    assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);

    // results document
    let export = SessionExport::new(outcome, vec![analysis.record]);
    let json = export.to_json().unwrap();
    assert!(json.contains("\"image_count\": 1"));
    assert!(json.contains("\"method\": \"poly2_ridge_cubic\""));
    assert!(json.contains("\"validated\": true"));
    assert!(json.contains("\"gaze_points\""));
}
