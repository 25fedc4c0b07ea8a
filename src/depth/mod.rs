//! Depth map post-processing and temporal consistency.

mod consistency;
mod postprocess;

pub use consistency::{ConfirmedDepth, ConsistencyFilter, ConsistencySettings};
pub use postprocess::{
    BilateralSettings, DepthRange, bilateral_filter, compute_depth_map_mask, compute_normals,
    compute_sparse_mask, force_in_range,
};
