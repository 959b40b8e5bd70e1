//! Selective polynomial feature basis.
//!
//! The regressor works on a 20-entry raw feature vector whose layout is fixed
//! (see [`raw_features`]). Instead of the full ~237-term second-order
//! expansion, the basis keeps the interactions that matter for gaze: full
//! quadratic and cubic structure over the iris block, cross products between
//! iris and head-pose deltas for head-movement compensation, and a quadratic
//! over the pose block itself.

use crate::features::EyeFeatures;

use super::ReferencePose;

/// Number of raw features fed into the expansion.
pub const RAW_FEATURES: usize = 20;

// raw feature vector layout
const IRIS_LO: usize = 0;
const IRIS_HI: usize = 6; // exclusive
const POSE_LO: usize = 8;
const POSE_HI: usize = 12; // exclusive

/// Number of polynomial terms produced by [`expand_into`]:
/// bias + linear + iris quadratic + iris×pose + pose quadratic + iris cubic.
pub const BASIS_TERMS: usize = 1 + RAW_FEATURES + 21 + 24 + 10 + 6;

/// Assembles the raw feature vector for one frame.
///
/// Head pose and face scale enter as deltas from the calibration reference
/// pose, which makes the learned mapping robust against the user settling
/// into a slightly different resting position than during calibration.
pub fn raw_features(features: &EyeFeatures, reference: &ReferencePose) -> [f64; RAW_FEATURES] {
    let scale_delta = if reference.face_scale > 1e-9 {
        features.face_scale / reference.face_scale - 1.0
    } else {
        0.0
    };

    [
        // iris block (quadratic + cubic structure)
        features.left_iris_rel[0],
        features.left_iris_rel[1],
        features.right_iris_rel[0],
        features.right_iris_rel[1],
        0.5 * (features.left_iris_rel[0] + features.right_iris_rel[0]),
        0.5 * (features.left_iris_rel[1] + features.right_iris_rel[1]),
        // vergence + openness
        features.left_iris_rel[0] - features.right_iris_rel[0],
        features.eye_openness,
        // pose block (deltas from the reference pose)
        features.head_pose.yaw - reference.yaw,
        features.head_pose.pitch - reference.pitch,
        features.head_pose.roll - reference.roll,
        scale_delta,
        // remaining linear terms
        features.left_ear,
        features.right_ear,
        features.left_eye_width,
        features.right_eye_width,
        features.left_iris[0],
        features.left_iris[1],
        features.right_iris[0],
        features.right_iris[1],
    ]
}

/// Expands a (normalised) raw feature vector into the polynomial basis.
///
/// `out` is cleared and refilled; reusing the buffer keeps the per-frame hot
/// path allocation-free.
pub fn expand_into(raw: &[f64; RAW_FEATURES], out: &mut Vec<f64>) {
    out.clear();
    out.reserve(BASIS_TERMS);

    out.push(1.0);
    out.extend_from_slice(raw);

    for i in IRIS_LO..IRIS_HI {
        for j in i..IRIS_HI {
            out.push(raw[i] * raw[j]);
        }
    }
    for i in IRIS_LO..IRIS_HI {
        for p in POSE_LO..POSE_HI {
            out.push(raw[i] * raw[p]);
        }
    }
    for i in POSE_LO..POSE_HI {
        for j in i..POSE_HI {
            out.push(raw[i] * raw[j]);
        }
    }
    for i in IRIS_LO..IRIS_HI {
        out.push(raw[i] * raw[i] * raw[i]);
    }

    debug_assert_eq!(out.len(), BASIS_TERMS);
}
