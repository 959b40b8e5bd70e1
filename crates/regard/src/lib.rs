//! Webcam gaze estimation and attention analysis.
//!
//! `regard` turns a stream of face-mesh landmarks into a calibrated point of
//! regard on screen, then into attention analytics: fixations, saccades,
//! regions of interest, heatmaps and quality grades.
//!
//! The pipeline, leaves first:
//!
//! 1. [`features`] extracts a tilt-invariant per-frame feature vector from
//!    raw landmarks.
//! 2. [`model`] regresses features to screen coordinates with a polynomial
//!    ridge model, post-corrections and adaptive smoothing ([`filter`]).
//! 3. [`calibration`] orchestrates per-point sample collection, training and
//!    the validation pass.
//! 4. [`fixation`], [`cluster`], [`heatmap`], [`quality`] and [`session`]
//!    analyse the tracked gaze stream and bake the results into reports.
//!
//! Landmark detection, camera handling and UI are external; see
//! [`landmark::LandmarkSource`] for the single contract the core needs.

pub mod calibration;
pub mod cluster;
pub mod error;
pub mod features;
pub mod filter;
pub mod fixation;
pub mod heatmap;
pub mod landmark;
pub mod model;
pub mod quality;
pub mod session;
pub mod worker;

pub use error::{Error, Result};
pub use features::{EyeFeatures, FeatureExtractor, HeadPose};
pub use fixation::{Fixation, FixationConfig, FixationDetector, FixationMetrics, Saccade};
pub use model::{
    CalibrationSample, GazeModel, GazeModelConfig, GazePoint, ReferencePose, TrainingReport,
};
pub use calibration::{CalibrationManager, CalibrationPhase, CalibrationPoint};
pub use cluster::RoiCluster;
pub use heatmap::{HeatmapConfig, HeatmapGenerator};
pub use quality::{Grade, QualityReport};
pub use session::{ImageSession, SessionExport, Viewport};
