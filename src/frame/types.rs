//! Core ID types and the posed image container.

use anyhow::{Result, bail};
use nalgebra::{Point2, Vector3};

use crate::frame::camera::PinholeCamera;
use crate::frame::depthmap::Depthmap;
use crate::frame::image::RgbaImage;
use crate::grid::CvGridMap;

/// Unique identifier of a frame within one source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Identifier of the image source (one per UAV / camera).
///
/// Ordered, so that buffer selection policies can be deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub u32);

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CAM{}", self.0)
    }
}

/// How the surface attached to a frame should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceAssumption {
    /// Flat ground at elevation 0.
    #[default]
    Planar,
    /// Use the per-cell elevation of the surface model.
    Elevation,
}

/// A posed, undistorted image with everything downstream stages attach to it.
///
/// Frames are moved between buffers and stages, never cloned by the pipeline.
#[derive(Debug)]
pub struct Frame {
    pub id: FrameId,
    pub camera_id: CameraId,
    pub timestamp_ns: u64,
    pub image: RgbaImage,
    pub camera: PinholeCamera,
    /// Sparse 3D points (world frame) observed in this frame.
    pub sparse_points: Vec<Vector3<f64>>,
    /// Surface model with at least `elevation` and `valid` layers.
    pub surface: Option<CvGridMap>,
    pub surface_assumption: SurfaceAssumption,
    pub depthmap: Option<Depthmap>,
    pub is_keyframe: bool,
    pub has_accurate_pose: bool,
}

impl Frame {
    /// Create a keyframe with an accurate pose and no attached data.
    pub fn new(
        id: FrameId,
        camera_id: CameraId,
        timestamp_ns: u64,
        image: RgbaImage,
        camera: PinholeCamera,
    ) -> Result<Self> {
        if image.width() != camera.width() || image.height() != camera.height() {
            bail!(
                "Frame {}: image size {}x{} does not match camera {}x{}",
                id,
                image.width(),
                image.height(),
                camera.width(),
                camera.height()
            );
        }
        Ok(Self {
            id,
            camera_id,
            timestamp_ns,
            image,
            camera,
            sparse_points: Vec::new(),
            surface: None,
            surface_assumption: SurfaceAssumption::default(),
            depthmap: None,
            is_keyframe: true,
            has_accurate_pose: true,
        })
    }

    pub fn with_sparse_points(mut self, points: Vec<Vector3<f64>>) -> Self {
        self.sparse_points = points;
        self
    }

    pub fn with_surface(mut self, surface: CvGridMap, assumption: SurfaceAssumption) -> Self {
        self.surface = Some(surface);
        self.surface_assumption = assumption;
        self
    }

    /// Whether the frame carries what dense reconstruction needs.
    pub fn is_densifiable(&self) -> bool {
        self.is_keyframe && self.has_accurate_pose && !self.sparse_points.is_empty()
    }

    /// Median depth (camera z) of the sparse points in front of the camera.
    pub fn median_scene_depth(&self) -> Option<f64> {
        let mut depths: Vec<f64> = self
            .sparse_points
            .iter()
            .map(|p| self.camera.world_to_camera(p).z)
            .filter(|z| z.is_finite() && *z > 0.0)
            .collect();
        if depths.is_empty() {
            return None;
        }
        let mid = depths.len() / 2;
        let (_, median, _) = depths.select_nth_unstable_by(mid, f64::total_cmp);
        Some(*median)
    }

    /// Sparse points projected into `camera` (which may be a resized frame camera).
    ///
    /// Points behind the camera are skipped; points outside the image are kept.
    pub fn sparse_points_in(&self, camera: &PinholeCamera) -> Vec<(Point2<f64>, f64)> {
        self.sparse_points
            .iter()
            .filter_map(|p| camera.project_with_depth(p))
            .collect()
    }
}
