//! Georeferenced grid maps shared by surface models and orthophotos.

mod grid_map;

pub use grid_map::{CvGridMap, LayerData, Roi};
