//! File output of stage artifacts.

pub mod export;

pub use export::{DiskExporter, load_depth_csv, write_depth_csv};
