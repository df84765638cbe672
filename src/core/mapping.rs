use ndarray::Array3;

/// Opaque bidirectional deformable transform between subject space and a
/// template/reference space, supplied by an external registration stage.
///
/// `transform` carries a subject-space field into template space;
/// `transform_inverse` carries a template-space field (an atlas ROI or
/// probability map) into subject space. Implementations must be shareable
/// across worker threads.
pub trait SpatialMapping: Send + Sync {
    fn transform(&self, field: &Array3<f64>) -> Array3<f64>;
    fn transform_inverse(&self, field: &Array3<f64>) -> Array3<f64>;
}

/// The do-nothing mapping, for data that is already in the reference grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapping;

impl SpatialMapping for IdentityMapping {
    fn transform(&self, field: &Array3<f64>) -> Array3<f64> {
        field.clone()
    }

    fn transform_inverse(&self, field: &Array3<f64>) -> Array3<f64> {
        field.clone()
    }
}
