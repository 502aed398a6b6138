use crate::HomographyError;

/// The family of 2d transforms a homography estimate is restricted to.
///
/// The discriminants are stable and used as the wire value of the type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HomographyType {
    /// Full projective transform, eight degrees of freedom.
    #[default]
    Projective = 0,
    /// Affine transform.
    Affine = 1,
    /// Rotation, uniform scale and translation.
    Similarity = 2,
    /// Similarity in coordinates normalised by the focal length only.
    SimilarityU = 3,
    /// Pure translation.
    Translation = 4,
    /// In-plane rotation about the origin.
    Rotation = 5,
    /// In-plane rotation in coordinates normalised by the focal length only.
    RotationU = 6,
    /// Uniform scaling about the origin.
    Scaling = 7,
    /// Uniform scale and translation.
    ScaleTranslation = 8,
    /// Rigid motion, rotation and translation.
    RotationTranslation = 9,
    /// Rotation and uniform scale about the origin.
    RotationScale = 10,
    /// Homography induced by a pure camera rotation, `H = R`.
    CameraRotation = 11,
    /// Camera rotation with an unknown focal scale, `H = F R F^-1`.
    CameraRotationFocal = 12,
    /// Camera rotation with focal scale and one radial distortion coefficient.
    CameraRotationFocalDistortion = 13,
}

impl HomographyType {
    /// All types in discriminant order.
    pub const ALL: [HomographyType; 14] = [
        HomographyType::Projective,
        HomographyType::Affine,
        HomographyType::Similarity,
        HomographyType::SimilarityU,
        HomographyType::Translation,
        HomographyType::Rotation,
        HomographyType::RotationU,
        HomographyType::Scaling,
        HomographyType::ScaleTranslation,
        HomographyType::RotationTranslation,
        HomographyType::RotationScale,
        HomographyType::CameraRotation,
        HomographyType::CameraRotationFocal,
        HomographyType::CameraRotationFocalDistortion,
    ];

    /// Number of free parameters of the model.
    pub fn nr_parameters(self) -> usize {
        match self {
            HomographyType::Projective => 8,
            HomographyType::Affine => 6,
            HomographyType::Similarity | HomographyType::SimilarityU => 4,
            HomographyType::Translation => 2,
            HomographyType::Rotation | HomographyType::RotationU | HomographyType::Scaling => 1,
            HomographyType::ScaleTranslation | HomographyType::RotationTranslation => 3,
            HomographyType::RotationScale => 2,
            HomographyType::CameraRotation => 3,
            HomographyType::CameraRotationFocal => 4,
            HomographyType::CameraRotationFocalDistortion => 5,
        }
    }

    /// Size of a minimal sample for the closed-form solver.
    pub fn min_points(self) -> usize {
        match self {
            HomographyType::Projective => 4,
            HomographyType::Affine => 3,
            HomographyType::Similarity
            | HomographyType::SimilarityU
            | HomographyType::ScaleTranslation
            | HomographyType::RotationTranslation
            | HomographyType::CameraRotation
            | HomographyType::CameraRotationFocal => 2,
            HomographyType::CameraRotationFocalDistortion => 3,
            HomographyType::Translation
            | HomographyType::Rotation
            | HomographyType::RotationU
            | HomographyType::Scaling
            | HomographyType::RotationScale => 1,
        }
    }

    /// Whether the model is a rotation of the camera about its centre.
    pub fn is_camera_rotation(self) -> bool {
        matches!(
            self,
            HomographyType::CameraRotation
                | HomographyType::CameraRotationFocal
                | HomographyType::CameraRotationFocalDistortion
        )
    }

    /// Whether only the focal length is used to normalise coordinates.
    pub fn is_uncalibrated(self) -> bool {
        matches!(self, HomographyType::SimilarityU | HomographyType::RotationU)
    }

    /// Whether the model has a focal scale parameter.
    pub fn has_focal_scale(self) -> bool {
        matches!(
            self,
            HomographyType::CameraRotationFocal | HomographyType::CameraRotationFocalDistortion
        )
    }

    /// Whether the model has a radial distortion parameter.
    pub fn has_radial_distortion(self) -> bool {
        self == HomographyType::CameraRotationFocalDistortion
    }
}

impl TryFrom<u8> for HomographyType {
    type Error = HomographyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| HomographyError::InvalidParameter(format!("homography type {value}")))
    }
}

impl From<HomographyType> for u8 {
    fn from(kind: HomographyType) -> Self {
        kind as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_wire_values() -> Result<(), HomographyError> {
        for (i, kind) in HomographyType::ALL.iter().enumerate() {
            assert_eq!(u8::from(*kind) as usize, i);
            assert_eq!(HomographyType::try_from(i as u8)?, *kind);
        }
        assert!(HomographyType::try_from(14).is_err());
        assert_eq!(HomographyType::default(), HomographyType::Projective);
        Ok(())
    }

    #[test]
    fn test_type_dimensions() {
        let params: Vec<usize> = HomographyType::ALL.iter().map(|k| k.nr_parameters()).collect();
        assert_eq!(params, [8, 6, 4, 4, 2, 1, 1, 1, 3, 3, 2, 3, 4, 5]);
        let points: Vec<usize> = HomographyType::ALL.iter().map(|k| k.min_points()).collect();
        assert_eq!(points, [4, 3, 2, 2, 1, 1, 1, 1, 2, 2, 1, 2, 2, 3]);

        // a minimal sample carries two equations per point
        for kind in HomographyType::ALL {
            assert!(2 * kind.min_points() >= kind.nr_parameters());
        }
    }

    #[test]
    fn test_type_flags() {
        let camera: Vec<u8> = HomographyType::ALL
            .iter()
            .filter(|k| k.is_camera_rotation())
            .map(|&k| k.into())
            .collect();
        assert_eq!(camera, [11, 12, 13]);
        assert!(HomographyType::SimilarityU.is_uncalibrated());
        assert!(HomographyType::RotationU.is_uncalibrated());
        assert!(!HomographyType::Similarity.is_uncalibrated());
        assert!(HomographyType::CameraRotationFocal.has_focal_scale());
        assert!(!HomographyType::CameraRotation.has_focal_scale());
        assert!(HomographyType::CameraRotationFocalDistortion.has_radial_distortion());
    }
}
