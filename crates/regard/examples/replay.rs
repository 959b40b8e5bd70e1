//! Replays a synthetic gaze session through the whole pipeline: calibration,
//! validation, tracking of one stimulus image, analytics, and the JSON +
//! heatmap exports.
//!
//! Run with `RUST_LOG=debug` to watch the calibration progress.

use log::LevelFilter;

use regard::calibration::{CalibrationConfig, CalibrationManager, CalibrationPhase};
use regard::features::FeatureExtractor;
use regard::fixation::FixationConfig;
use regard::heatmap::{HeatmapConfig, HeatmapGenerator};
use regard::landmark::{Landmark, LandmarkFrame, LANDMARK_COUNT, LEFT_IRIS, RIGHT_IRIS};
use regard::model::{GazeModel, GazeModelConfig};
use regard::session::{ImageSession, SessionExport, Viewport};
use regard_utils::timer::FpsCounter;

const SCREEN_W: f64 = 1920.0;
const SCREEN_H: f64 = 1080.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter(Some(env!("CARGO_CRATE_NAME")), LevelFilter::Debug)
        .filter(Some("regard"), LevelFilter::Debug)
        .init();

    let extractor = FeatureExtractor::new();
    let mut model = GazeModel::new(GazeModelConfig {
        screen_width: SCREEN_W,
        screen_height: SCREEN_H,
        ..GazeModelConfig::default()
    });
    let mut manager = CalibrationManager::new(CalibrationConfig {
        fps: 30.0,
        ..CalibrationConfig::default()
    });

    // calibration + validation on a synthetic "user" who looks exactly at
    // every target
    manager.start(SCREEN_W, SCREEN_H);
    manager.begin();
    let mut fps = FpsCounter::new("calibration");
    let mut t = 0.0;
    while matches!(
        manager.phase(),
        CalibrationPhase::Calibrating | CalibrationPhase::Validating
    ) {
        let target = *manager.current_target().expect("active calibration target");
        let features = extractor.extract(&synthetic_frame(
            target.x / SCREEN_W,
            target.y / SCREEN_H,
            t,
        ));
        manager.push_frame(&features, &mut model);
        fps.tick_with(model.timers());
        t += 33.0;
    }
    match manager.phase() {
        CalibrationPhase::Complete => {}
        phase => {
            log::error!("calibration ended in {phase:?}: {:?}", manager.failure());
            return Ok(());
        }
    }
    let outcome = loop {
        match manager.poll_event() {
            Some(regard::calibration::CalibrationEvent::Finished(outcome)) => break outcome,
            Some(_) => continue,
            None => unreachable!("completed calibration emits an outcome"),
        }
    };
    log::info!(
        "calibrated: mean validation error {:.1}px (threshold {:.0}px), passed: {}",
        outcome.mean_error_px,
        outcome.error_threshold_px,
        outcome.passed
    );

    // track one stimulus image while the user dwells on three spots
    let viewport = Viewport::fullscreen(SCREEN_W, SCREEN_H, 1280, 720);
    let mut session = ImageSession::new(0, viewport, t, FixationConfig::default());
    for (x, y) in [(500.0, 300.0), (1400.0, 400.0), (900.0, 800.0)] {
        for _ in 0..45 {
            let features = extractor.extract(&synthetic_frame(x / SCREEN_W, y / SCREEN_H, t));
            session.ingest(&features, &mut model);
            t += 33.0;
        }
    }

    let analysis = session.finish(3.0 * 45.0 * 33.0);
    log::info!(
        "tracked {} gaze points, {} fixations, {} ROI clusters, quality {:?} ({:.0})",
        analysis.record.gaze_points.len(),
        analysis.record.fixation_count,
        analysis.record.roi_clusters.len(),
        analysis.quality.grade,
        analysis.quality.score,
    );

    // bake the exports
    let out_dir = std::env::temp_dir();
    let base = image::RgbaImage::from_pixel(1280, 720, image::Rgba([235, 235, 235, 255]));
    let mut heatmap = HeatmapGenerator::new(1280, 720, HeatmapConfig::default());
    heatmap.splat_fixations(&analysis.metrics.fixations);
    let png = heatmap.render_over(&base)?;
    let heatmap_path = out_dir.join("regard-heatmap.png");
    std::fs::write(&heatmap_path, png)?;

    let export = SessionExport::new(&outcome, vec![analysis.record]);
    let json_path = out_dir.join("regard-session.json");
    std::fs::write(&json_path, export.to_json()?)?;

    log::info!(
        "wrote {} and {}",
        heatmap_path.display(),
        json_path.display()
    );
    Ok(())
}

/// Synthetic frontal face with the iris at `(rel_x, rel_y)` in both eyes.
fn synthetic_frame(rel_x: f64, rel_y: f64, timestamp_ms: f64) -> LandmarkFrame {
    let mut points = vec![Landmark::default(); LANDMARK_COUNT];
    let mut set = |idx: usize, x: f64, y: f64| {
        points[idx] = Landmark::new(x as f32, y as f32, 0.0);
    };

    set(33, 0.30, 0.40);
    set(133, 0.38, 0.40);
    set(159, 0.34, 0.38);
    set(145, 0.34, 0.42);
    set(160, 0.32, 0.385);
    set(158, 0.36, 0.385);
    set(153, 0.36, 0.415);
    set(144, 0.32, 0.415);

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
