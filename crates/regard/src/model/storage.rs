//! Model artefact import/export.
//!
//! The artefact is a JSON document with camelCase keys. Exporting an
//! untrained model produces null weight fields, which a subsequent import
//! refuses; a failed import leaves the model exactly as it was.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{AffineCorrection, Correction, GazeModel, ReferencePose};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelFile {
    weights_x: Option<Vec<f64>>,
    weights_y: Option<Vec<f64>>,
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
    lambda: f64,
    drift_offset_x: f64,
    drift_offset_y: f64,
    ref_pose: Option<RefPoseFile>,
    affine_correction: Option<AffineCorrection>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefPoseFile {
    yaw: f64,
    pitch: f64,
    roll: f64,
    face_scale: f64,
}

impl GazeModel {
    /// Serialises the trained state (weights, normalisation moments, chosen
    /// regularisation, reference pose and post-correction) to JSON.
    pub fn export_model(&self) -> Result<String> {
        let (drift_x, drift_y) = match self.correction {
            Correction::Drift { dx, dy } => (dx, dy),
            _ => (0.0, 0.0),
        };
        let file = ModelFile {
            weights_x: self.is_trained().then(|| self.weights_x.clone()),
            weights_y: self.is_trained().then(|| self.weights_y.clone()),
            feature_means: self.feature_means.clone(),
            feature_stds: self.feature_stds.clone(),
            lambda: self.lambda,
            drift_offset_x: drift_x,
            drift_offset_y: drift_y,
            ref_pose: self.reference_pose.map(|p| RefPoseFile {
                yaw: p.yaw,
                pitch: p.pitch,
                roll: p.roll,
                face_scale: p.face_scale,
            }),
            affine_correction: self.affine_correction(),
        };
        Ok(serde_json::to_string(&file)?)
    }

    /// Restores a model from a JSON artefact produced by
    /// [`export_model`](Self::export_model).
    ///
    /// Runtime state (filters, history) is reset. On error the model is left
    /// unchanged.
    pub fn import_model(&mut self, json: &str) -> Result<()> {
        let file: ModelFile = serde_json::from_str(json)
            .map_err(|e| Error::ModelImportInvalid(e.to_string()))?;

        let (weights_x, weights_y) = match (file.weights_x, file.weights_y) {
            (Some(x), Some(y)) if !x.is_empty() && x.len() == y.len() => (x, y),
            _ => {
                return Err(Error::ModelImportInvalid(
                    "missing or empty weight vectors".into(),
                ))
            }
        };
        if weights_x.len() != super::poly::BASIS_TERMS {
            return Err(Error::ModelImportInvalid(format!(
                "expected {} weights, found {}",
                super::poly::BASIS_TERMS,
                weights_x.len(),
            )));
        }
        if file.feature_means.len() != super::poly::RAW_FEATURES
            || file.feature_stds.len() != super::poly::RAW_FEATURES
        {
            return Err(Error::ModelImportInvalid(
                "unexpected feature moment lengths".into(),
            ));
        }
        let finite = weights_x.iter().chain(&weights_y).all(|v| v.is_finite());
        if !finite {
            return Err(Error::ModelImportInvalid(
                "non-finite weight values".into(),
            ));
        }

        self.weights_x = weights_x;
        self.weights_y = weights_y;
        self.feature_means = file.feature_means;
        self.feature_stds = file.feature_stds;
        self.lambda = file.lambda;
        self.reference_pose = file.ref_pose.map(|p| ReferencePose {
            yaw: p.yaw,
            pitch: p.pitch,
            roll: p.roll,
            face_scale: p.face_scale,
        });
        self.correction = match file.affine_correction {
            Some(affine) => Correction::Affine(affine),
            None if file.drift_offset_x != 0.0 || file.drift_offset_y != 0.0 => Correction::Drift {
                dx: file.drift_offset_x,
                dy: file.drift_offset_y,
            },
            None => Correction::None,
        };
        self.reset();
        Ok(())
    }
}
