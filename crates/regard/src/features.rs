//! Per-frame feature extraction.
//!
//! Turns a raw [`LandmarkFrame`] into the invariant [`EyeFeatures`] vector the
//! gaze regressor consumes: the iris position expressed relative to the eye
//! contour (compensated for head tilt), the six-point Eye Aspect Ratio, a
//! coarse head-pose estimate, and a per-frame confidence in `[0, 1]`.

use nalgebra::Vector2;

use crate::landmark::{
    LandmarkFrame, MeshIdx, LEFT_EYE_EAR, LEFT_IRIS, RIGHT_EYE_EAR, RIGHT_IRIS,
};

/// Clip range for the horizontal relative iris coordinate.
pub const REL_X_RANGE: (f64, f64) = (-0.15, 1.15);
/// Clip range for the vertical relative iris coordinate.
pub const REL_Y_RANGE: (f64, f64) = (-0.10, 1.10);

/// Head orientation in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// The per-frame feature vector.
///
/// All fields are finite. The relative iris coordinates are clipped to
/// [`REL_X_RANGE`]/[`REL_Y_RANGE`], and `confidence` is zero exactly when no
/// face was visible in the frame.
#[derive(Debug, Clone, Default)]
pub struct EyeFeatures {
    pub timestamp_ms: f64,
    /// Absolute iris centres in normalised image coordinates.
    pub left_iris: [f64; 2],
    pub right_iris: [f64; 2],
    /// Iris position within the eye contour, tilt-compensated.
    pub left_iris_rel: [f64; 2],
    pub right_iris_rel: [f64; 2],
    pub pupil_radius: f64,
    /// Mean Eye Aspect Ratio of both eyes.
    pub eye_openness: f64,
    pub left_ear: f64,
    pub right_ear: f64,
    pub head_pose: HeadPose,
    /// Inter-ocular distance in normalised image coordinates.
    pub face_scale: f64,
    pub left_eye_width: f64,
    pub right_eye_width: f64,
    pub confidence: f64,
}

impl EyeFeatures {
    /// The zero-confidence frame emitted when no face is present.
    pub fn absent(timestamp_ms: f64) -> Self {
        Self {
            timestamp_ms,
            left_iris_rel: [0.5, 0.5],
            right_iris_rel: [0.5, 0.5],
            ..Self::default()
        }
    }

    fn all_finite(&self) -> bool {
        [
            self.left_iris[0],
            self.left_iris[1],
            self.right_iris[0],
            self.right_iris[1],
            self.left_iris_rel[0],
            self.left_iris_rel[1],
            self.right_iris_rel[0],
            self.right_iris_rel[1],
            self.pupil_radius,
            self.eye_openness,
            self.left_ear,
            self.right_ear,
            self.head_pose.yaw,
            self.head_pose.pitch,
            self.head_pose.roll,
            self.face_scale,
            self.left_eye_width,
            self.right_eye_width,
            self.confidence,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Computes [`EyeFeatures`] from landmark frames.
pub struct FeatureExtractor {
    iris_offset: Option<[f64; 2]>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self { iris_offset: None }
    }

    /// Sets (or clears) the additive iris offset from the manual pre-calibration
    /// alignment step. The offset is applied in normalised image space.
    pub fn set_iris_offset(&mut self, offset: Option<[f64; 2]>) {
        self.iris_offset = offset;
    }

    /// Extracts the feature vector for one frame.
    ///
    /// Returns a zero-confidence [`EyeFeatures::absent`] frame when no face is
    /// present or required landmarks are missing.
    pub fn extract(&self, frame: &LandmarkFrame) -> EyeFeatures {
        if !frame.face_present {
            return EyeFeatures::absent(frame.timestamp_ms);
        }
        match self.extract_inner(frame) {
            Some(features) if features.all_finite() => features,
            _ => EyeFeatures::absent(frame.timestamp_ms),
        }
    }

    fn extract_inner(&self, frame: &LandmarkFrame) -> Option<EyeFeatures> {
        let left_iris = self.iris_centroid(frame, &LEFT_IRIS)?;
        let right_iris = self.iris_centroid(frame, &RIGHT_IRIS)?;

        let left_eye = EyeContour::from_frame(
            frame,
            MeshIdx::LeftEyeInnerCorner,
            MeshIdx::LeftEyeOuterCorner,
            MeshIdx::LeftEyeTop,
            MeshIdx::LeftEyeBottom,
        )?;
        let right_eye = EyeContour::from_frame(
            frame,
            MeshIdx::RightEyeInnerCorner,
            MeshIdx::RightEyeOuterCorner,
            MeshIdx::RightEyeTop,
            MeshIdx::RightEyeBottom,
        )?;

        let (left_rel, left_rel_raw) = left_eye.relative_iris(left_iris);
        let (right_rel, right_rel_raw) = right_eye.relative_iris(right_iris);

        let left_ear = ear(frame, &LEFT_EYE_EAR)?;
        let right_ear = ear(frame, &RIGHT_EYE_EAR)?;
        let eye_openness = 0.5 * (left_ear + right_ear);

        let left_outer = point(frame, MeshIdx::LeftEyeOuterCorner as usize)?;
        let right_outer = point(frame, MeshIdx::RightEyeOuterCorner as usize)?;
        let face_scale = (right_outer - left_outer).norm();

        let head_pose = head_pose(frame, left_outer, right_outer, face_scale)?;

        let pupil_radius = 0.5
            * (iris_ring_radius(frame, &LEFT_IRIS, left_iris)
                + iris_ring_radius(frame, &RIGHT_IRIS, right_iris));

        let confidence = confidence(
            eye_openness,
            face_scale,
            left_iris,
            right_iris,
            &left_rel_raw,
            &right_rel_raw,
            &left_rel,
            &right_rel,
            head_pose.yaw,
        );

        Some(EyeFeatures {
            timestamp_ms: frame.timestamp_ms,
            left_iris: [left_iris.x, left_iris.y],
            right_iris: [right_iris.x, right_iris.y],
            left_iris_rel: left_rel,
            right_iris_rel: right_rel,
            pupil_radius,
            eye_openness,
            left_ear,
            right_ear,
            head_pose,
            face_scale,
            left_eye_width: left_eye.width(),
            right_eye_width: right_eye.width(),
            confidence,
        })
    }

    /// Centroid of the five iris ring landmarks, plus the manual offset.
    fn iris_centroid(&self, frame: &LandmarkFrame, ring: &[usize; 5]) -> Option<Vector2<f64>> {
        let mut sum = Vector2::zeros();
        for &idx in ring {
            sum += point(frame, idx)?;
        }
        let mut center = sum / ring.len() as f64;
        if let Some([dx, dy]) = self.iris_offset {
            center.x += dx;
            center.y += dy;
        }
        Some(center)
    }
}

fn point(frame: &LandmarkFrame, index: usize) -> Option<Vector2<f64>> {
    let lm = frame.get(index)?;
    Some(Vector2::new(lm.x as f64, lm.y as f64))
}

fn depth(frame: &LandmarkFrame, index: usize) -> Option<f64> {
    frame.get(index).map(|lm| lm.z as f64)
}

struct EyeContour {
    inner: Vector2<f64>,
    outer: Vector2<f64>,
    top: Vector2<f64>,
    bottom: Vector2<f64>,
}

impl EyeContour {
    fn from_frame(
        frame: &LandmarkFrame,
        inner: MeshIdx,
        outer: MeshIdx,
        top: MeshIdx,
        bottom: MeshIdx,
    ) -> Option<Self> {
        Some(Self {
            inner: point(frame, inner as usize)?,
            outer: point(frame, outer as usize)?,
            top: point(frame, top as usize)?,
            bottom: point(frame, bottom as usize)?,
        })
    }

    fn width(&self) -> f64 {
        (self.outer - self.inner).norm()
    }

    /// Iris position within the eye contour, in an eye-axis-aligned frame so
    /// that head roll does not shift the coordinates.
    ///
    /// Returns the clipped coordinates plus the unclipped ones (the latter
    /// feed the confidence ramp).
    fn relative_iris(&self, iris: Vector2<f64>) -> ([f64; 2], [f64; 2]) {
        let axis = self.outer - self.inner;
        if axis.norm() < 0.001 {
            // degenerate eye, e.g. fully closed or occluded
            return ([0.5, 0.5], [0.5, 0.5]);
        }
        let rel_x = (iris - self.inner).dot(&axis) / axis.norm_squared();

        let perp = Vector2::new(-axis.y, axis.x).normalize();
        let top_p = (self.top - self.inner).dot(&perp);
        let bottom_p = (self.bottom - self.inner).dot(&perp);
        let iris_p = (iris - self.inner).dot(&perp);
        let span = bottom_p - top_p;
        let rel_y = if span.abs() < 1e-9 {
            0.5
        } else {
            (iris_p - top_p) / span
        };

        let clipped = [
            rel_x.clamp(REL_X_RANGE.0, REL_X_RANGE.1),
            rel_y.clamp(REL_Y_RANGE.0, REL_Y_RANGE.1),
        ];
        (clipped, [rel_x, rel_y])
    }
}

/// Standard six-point Eye Aspect Ratio: `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`.
fn ear(frame: &LandmarkFrame, idx: &[usize; 6]) -> Option<f64> {
    let p1 = point(frame, idx[0])?;
    let p2 = point(frame, idx[1])?;
    let p3 = point(frame, idx[2])?;
    let p4 = point(frame, idx[3])?;
    let p5 = point(frame, idx[4])?;
    let p6 = point(frame, idx[5])?;

    let horizontal = (p1 - p4).norm();
    if horizontal < 1e-9 {
        return Some(0.0);
    }
    Some(((p2 - p6).norm() + (p3 - p5).norm()) / (2.0 * horizontal))
}

fn iris_ring_radius(frame: &LandmarkFrame, ring: &[usize; 5], center: Vector2<f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0;
    // ring[0] is the centre landmark itself
    for &idx in &ring[1..] {
        if let Some(p) = point(frame, idx) {
            sum += (p - center).norm();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Nominal nose-tip drop below the eye line, as a fraction of the inter-ocular
/// distance. Only the deviation from this baseline matters downstream, since
/// the regressor works on deltas from the calibration reference pose.
const NOSE_DROP_RATIO: f64 = 0.62;

fn head_pose(
    frame: &LandmarkFrame,
    left_outer: Vector2<f64>,
    right_outer: Vector2<f64>,
    face_scale: f64,
) -> Option<HeadPose> {
    let nose = point(frame, MeshIdx::NoseTip as usize)?;
    let forehead = point(frame, MeshIdx::Forehead as usize)?;
    let chin = point(frame, MeshIdx::Chin as usize)?;

    let eye_axis = right_outer - left_outer;
    let roll = eye_axis.y.atan2(eye_axis.x);

    let eye_dist = face_scale.max(1e-6);
    let eyes_mid = 0.5 * (left_outer + right_outer);

    let yaw_nose = (2.0 * (nose.x - eyes_mid.x) / eye_dist).atan();
    let pitch_nose = (2.0 * ((nose.y - eyes_mid.y) / eye_dist - NOSE_DROP_RATIO)).atan();

    let (yaw, pitch);
    if frame.has_depth {
        let lz = depth(frame, MeshIdx::LeftEyeOuterCorner as usize)?;
        let rz = depth(frame, MeshIdx::RightEyeOuterCorner as usize)?;
        let yaw_depth = (rz - lz).atan2(eye_dist);
        yaw = if (yaw_depth - yaw_nose).abs() < 0.2 {
            0.5 * (yaw_depth + yaw_nose)
        } else {
            yaw_nose
        };

        let nose_z = depth(frame, MeshIdx::NoseTip as usize)?;
        let face_mid_z = 0.5
            * (depth(frame, MeshIdx::Forehead as usize)? + depth(frame, MeshIdx::Chin as usize)?);
        let face_height = (forehead - chin).norm().max(1e-6);
        let pitch_depth = (nose_z - face_mid_z).atan2(face_height);
        pitch = 0.5 * (pitch_depth + pitch_nose);
    } else {
        yaw = yaw_nose;
        pitch = pitch_nose;
    }

    Some(HeadPose { yaw, pitch, roll })
}

/// Penalty ramp for unclipped relative iris coordinates that leave
/// `[-0.3, 1.3]`: full weight inside, fading to zero 0.2 beyond the bound.
fn range_penalty(v: f64) -> f64 {
    let excess = (-0.3 - v).max(v - 1.3).max(0.0);
    (1.0 - excess / 0.2).clamp(0.0, 1.0)
}

#[allow(clippy::too_many_arguments)]
fn confidence(
    eye_openness: f64,
    face_scale: f64,
    left_iris: Vector2<f64>,
    right_iris: Vector2<f64>,
    left_rel_raw: &[f64; 2],
    right_rel_raw: &[f64; 2],
    left_rel: &[f64; 2],
    right_rel: &[f64; 2],
    yaw: f64,
) -> f64 {
    let mut confidence = 1.0_f64;

    if eye_openness < 0.15 {
        confidence *= (eye_openness / 0.15).max(0.0);
    }
    if face_scale < 0.08 {
        confidence *= (face_scale / 0.08).max(0.0);
    }
    // an iris centred at the origin means the provider produced garbage
    if left_iris.norm() < 1e-9 || right_iris.norm() < 1e-9 {
        return 0.0;
    }

    for v in left_rel_raw.iter().chain(right_rel_raw.iter()) {
        confidence *= range_penalty(*v);
    }

    // eyes normally move together; large disagreement means one of the two
    // iris fits is off, unless the head is turned enough to foreshorten an eye
    let tolerance = 0.3 + (1.5 * yaw.abs()).min(0.25);
    let diff = ((left_rel[0] - right_rel[0]).powi(2) + (left_rel[1] - right_rel[1]).powi(2)).sqrt();
    if diff > tolerance {
        confidence *= (tolerance / diff).clamp(0.25, 1.0);
    }

    confidence.clamp(0.0, 1.0)
}
