pub mod cluster;
pub mod core;
pub mod dti;
pub mod geometry;
pub mod profile;
pub mod registration;
pub mod segmentation;
pub mod utils;

pub use crate::core::mapping::{IdentityMapping, SpatialMapping};
pub use crate::core::streamline::{Streamline, StreamlineSet};
pub use crate::core::volume::{patch_up_roi, MaskVolume};
pub use crate::segmentation::{
    clean_bundle, clean_by_endpoints, Algo, BundleSpec, CleanParams, ClusterAtlas,
    EndpointTarget, FiberGroup, RecoParams, RoiRule, Segmentation, SegmentationContext,
    SegmentationError, SegmentationResult, WaypointParams,
};
