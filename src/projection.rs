//! World-to-pixel projection for a calibrated pinhole camera.
//!
//! The extrinsic matrix is the camera pose in the world frame (camera to
//! world), so a world point is brought into the camera frame with
//! `x_c = Rᵀ (x_w − t)`. The camera looks along `+z`; the image row axis is
//! inverted relative to camera `y`, hence `v = fy·(−y/z) + cy`.

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Projected pixel coordinate, before any canvas mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel {
    pub u: f64,
    pub v: f64,
}

/// A world point that cannot be projected.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    /// The point is on or behind the image plane (or the depth is not finite).
    #[error("point has non-positive camera depth {depth}")]
    NonPositiveDepth { depth: f64 },
}

/// Project a world point into pixel coordinates.
pub fn project(
    world: &Vector3<f64>,
    extrinsic: &Matrix4<f64>,
    intrinsic: &Matrix3<f64>,
) -> Result<Pixel, ProjectionError> {
    let rotation = extrinsic.fixed_view::<3, 3>(0, 0);
    let translation = extrinsic.fixed_view::<3, 1>(0, 3);
    let camera = rotation.transpose() * (world - translation);

    if !(camera.z > 0.0) || !camera.z.is_finite() {
        return Err(ProjectionError::NonPositiveDepth { depth: camera.z });
    }

    let x_norm = camera.x / camera.z;
    let y_norm = camera.y / camera.z;

    let (fx, cx) = (intrinsic[(0, 0)], intrinsic[(0, 2)]);
    let (fy, cy) = (intrinsic[(1, 1)], intrinsic[(1, 2)]);

    Ok(Pixel {
        u: fx * x_norm + cx,
        v: fy * (-y_norm) + cy,
    })
}

/// Intrinsic and extrinsic matrices of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationRepr", into = "CalibrationRepr")]
pub struct CameraCalibration {
    /// 3×3 pixel projection matrix.
    pub intrinsic: Matrix3<f64>,
    /// 4×4 camera pose in the world frame.
    pub extrinsic: Matrix4<f64>,
}

impl CameraCalibration {
    #[must_use]
    pub fn new(intrinsic: Matrix3<f64>, extrinsic: Matrix4<f64>) -> Self {
        Self {
            intrinsic,
            extrinsic,
        }
    }

    /// Build from row-major arrays. The extrinsic may have 3 or 4 rows.
    pub fn from_rows(intrinsic: [[f64; 3]; 3], extrinsic: &[[f64; 4]]) -> Result<Self, String> {
        Ok(Self::new(
            Matrix3::from_fn(|r, c| intrinsic[r][c]),
            extrinsic_from_rows(extrinsic)?,
        ))
    }

    /// Project a world point with this camera.
    pub fn project(&self, world: &Vector3<f64>) -> Result<Pixel, ProjectionError> {
        project(world, &self.extrinsic, &self.intrinsic)
    }

    /// Principal point `(cx, cy)`.
    #[must_use]
    pub fn principal_point(&self) -> Pixel {
        Pixel {
            u: self.intrinsic[(0, 2)],
            v: self.intrinsic[(1, 2)],
        }
    }

    /// Camera center in world coordinates.
    #[must_use]
    pub fn position(&self) -> Vector3<f64> {
        self.extrinsic.fixed_view::<3, 1>(0, 3).into_owned()
    }
}

/// Expand a 3×4 or 4×4 row-major pose into a homogeneous 4×4 matrix.
pub fn extrinsic_from_rows(rows: &[[f64; 4]]) -> Result<Matrix4<f64>, String> {
    match rows.len() {
        3 | 4 => {}
        n => return Err(format!("extrinsic must have 3 or 4 rows, got {n}")),
    }
    let mut matrix = Matrix4::identity();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            matrix[(r, c)] = *value;
        }
    }
    Ok(matrix)
}

#[derive(Serialize, Deserialize)]
struct CalibrationRepr {
    intrinsic: [[f64; 3]; 3],
    extrinsic: Vec<[f64; 4]>,
}

impl TryFrom<CalibrationRepr> for CameraCalibration {
    type Error = String;

    fn try_from(repr: CalibrationRepr) -> Result<Self, Self::Error> {
        Self::from_rows(repr.intrinsic, &repr.extrinsic)
    }
}

impl From<CameraCalibration> for CalibrationRepr {
    fn from(calibration: CameraCalibration) -> Self {
        let k = &calibration.intrinsic;
        let e = &calibration.extrinsic;
        Self {
            intrinsic: std::array::from_fn(|r| std::array::from_fn(|c| k[(r, c)])),
            extrinsic: (0..4)
                .map(|r| std::array::from_fn(|c| e[(r, c)]))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Unit};

    fn intrinsic() -> Matrix3<f64> {
        Matrix3::new(100.0, 0.0, 128.0, 0.0, 110.0, 120.0, 0.0, 0.0, 1.0)
    }

    fn pose(rotation: Rotation3<f64>, t: Vector3<f64>) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
        m
    }

    #[test]
    fn test_optical_axis_maps_to_principal_point() {
        let rotation = Rotation3::from_axis_angle(
            &Unit::new_normalize(Vector3::new(0.3, -1.0, 0.5)),
            0.8,
        );
        let t = Vector3::new(0.5, -0.2, 1.4);
        let extrinsic = pose(rotation, t);

        // One unit along the camera's viewing axis.
        let world = t + rotation * Vector3::z();
        let pixel = project(&world, &extrinsic, &intrinsic()).unwrap();
        assert!((pixel.u - 128.0).abs() < 1e-9);
        assert!((pixel.v - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_axis_is_flipped() {
        let extrinsic = pose(Rotation3::identity(), Vector3::new(0.0, 0.0, -2.0));
        // +y in the camera frame moves up in the image (smaller v).
        let pixel = project(&Vector3::new(0.2, 0.4, 0.0), &extrinsic, &intrinsic()).unwrap();
        assert!((pixel.u - (100.0 * 0.1 + 128.0)).abs() < 1e-9);
        assert!((pixel.v - (110.0 * -0.2 + 120.0)).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_depth_is_reported() {
        let extrinsic = pose(Rotation3::identity(), Vector3::zeros());
        let err = project(&Vector3::new(1.0, 1.0, 0.0), &extrinsic, &intrinsic()).unwrap_err();
        assert_eq!(err, ProjectionError::NonPositiveDepth { depth: 0.0 });
        assert!(project(&Vector3::new(0.0, 0.0, -3.0), &extrinsic, &intrinsic()).is_err());
        assert!(project(&Vector3::new(0.0, 0.0, f64::NAN), &extrinsic, &intrinsic()).is_err());
    }

    #[test]
    fn test_projection_is_continuous() {
        let calibration = CameraCalibration::new(
            intrinsic(),
            pose(Rotation3::identity(), Vector3::new(0.0, 0.0, -1.0)),
        );
        let a = calibration.project(&Vector3::new(0.1, 0.1, 0.5)).unwrap();
        let b = calibration
            .project(&Vector3::new(0.1 + 1e-7, 0.1, 0.5))
            .unwrap();
        assert!((a.u - b.u).abs() < 1e-4);
        assert!((a.v - b.v).abs() < 1e-4);
        assert_eq!(a, calibration.project(&Vector3::new(0.1, 0.1, 0.5)).unwrap());
    }

    #[test]
    fn test_three_row_extrinsic_is_padded() {
        let rows = [
            [1.0, 0.0, 0.0, 0.5],
            [0.0, 1.0, 0.0, 0.25],
            [0.0, 0.0, 1.0, 2.0],
        ];
        let m = extrinsic_from_rows(&rows).unwrap();
        assert_eq!(m[(3, 3)], 1.0);
        assert_eq!(m[(3, 0)], 0.0);
        assert_eq!(m[(1, 3)], 0.25);
        assert!(extrinsic_from_rows(&rows[..2]).is_err());
    }

    #[test]
    fn test_calibration_json_roundtrip() {
        let json = r#"{
            "intrinsic": [[100, 0, 128], [0, 110, 120], [0, 0, 1]],
            "extrinsic": [[1, 0, 0, 0.5], [0, 1, 0, 0], [0, 0, 1, -2]]
        }"#;
        let calibration: CameraCalibration = serde_json::from_str(json).unwrap();
        assert_eq!(calibration.intrinsic, intrinsic());
        assert_eq!(calibration.position(), Vector3::new(0.5, 0.0, -2.0));

        let text = serde_json::to_string(&calibration).unwrap();
        let back: CameraCalibration = serde_json::from_str(&text).unwrap();
        assert_eq!(back, calibration);
    }
}
