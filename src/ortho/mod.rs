//! Orthorectification of frames onto georeferenced grids.

mod rectification;
mod surface;

pub use rectification::{
    LAYER_COLOR, LAYER_ELEVATED, LAYER_ELEVATION, LAYER_ELEVATION_ANGLE, LAYER_NUM_OBSERVATIONS,
    LAYER_VALID, backproject_from_grid, compute_elevation_angle, rectify,
};
pub use surface::surface_from_points;
