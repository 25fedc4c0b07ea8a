use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, Writer};
use image::{GrayImage, Luma};
use nalgebra::{DMatrix, Vector3};
use tracing::debug;

use crate::frame::{Depthmap, FrameId, RgbaImage, is_valid_depth};
use crate::stage::{Artifact, SaveSink};

/// Writes stage artifacts as CSV and PNG files.
///
/// Layout: `<stage_dir>/<kind>/<kind>_<frame id>.<ext>`. Depth maps are
/// written twice, as raw CSV values and as a grayscale PNG preview.
#[derive(Debug, Default)]
pub struct DiskExporter {
    stage_dir: Option<PathBuf>,
}

impl DiskExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn artifact_path(&self, kind: &str, id: FrameId, ext: &str) -> Result<PathBuf> {
        let Some(stage_dir) = &self.stage_dir else {
            bail!("Exporter not initialized, cannot save {} of frame {}", kind, id);
        };
        let dir = stage_dir.join(kind);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir.join(format!("{}_{}.{}", kind, id.0, ext)))
    }

    fn save_depthmap(&self, kind: &str, id: FrameId, depthmap: &Depthmap) -> Result<()> {
        let csv_path = self.artifact_path(kind, id, "csv")?;
        write_depth_csv(&csv_path, depthmap.data())?;
        let png_path = self.artifact_path(kind, id, "png")?;
        depth_preview(depthmap.data())
            .save(&png_path)
            .with_context(|| format!("Failed to write {}", png_path.display()))?;
        Ok(())
    }

    fn save_image(&self, kind: &str, id: FrameId, img: &RgbaImage) -> Result<()> {
        let path = self.artifact_path(kind, id, "png")?;
        img.save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn save_points(&self, kind: &str, id: FrameId, points: &[Vector3<f64>]) -> Result<()> {
        let path = self.artifact_path(kind, id, "csv")?;
        let mut wtr = Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        wtr.write_record(["x", "y", "z"])?;
        for p in points {
            wtr.write_record([p.x.to_string(), p.y.to_string(), p.z.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn save_normals(&self, kind: &str, id: FrameId, normals: &DMatrix<Vector3<f32>>) -> Result<()> {
        let path = self.artifact_path(kind, id, "csv")?;
        let mut wtr = Writer::from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        wtr.write_record(["row", "col", "nx", "ny", "nz"])?;
        for r in 0..normals.nrows() {
            for c in 0..normals.ncols() {
                let n = &normals[(r, c)];
                if n.norm_squared() == 0.0 {
                    continue;
                }
                wtr.write_record([
                    r.to_string(),
                    c.to_string(),
                    n.x.to_string(),
                    n.y.to_string(),
                    n.z.to_string(),
                ])?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

impl SaveSink for DiskExporter {
    fn init(&mut self, stage_dir: &Path) -> Result<()> {
        fs::create_dir_all(stage_dir)
            .with_context(|| format!("Failed to create {}", stage_dir.display()))?;
        self.stage_dir = Some(stage_dir.to_path_buf());
        Ok(())
    }

    fn save(&mut self, id: FrameId, artifact: Artifact<'_>) -> Result<()> {
        let kind = artifact.kind();
        debug!("Saving {} of frame {}", kind, id);
        match artifact {
            Artifact::BilateralDepth(d) | Artifact::DenseDepth(d) | Artifact::GuidedDepth(d) => {
                self.save_depthmap(kind, id, d)
            }
            Artifact::SourceImage(img) | Artifact::Thumbnail(img) => self.save_image(kind, id, img),
            Artifact::SparsePoints(points) => self.save_points(kind, id, points),
            Artifact::Normals(normals) => self.save_normals(kind, id, normals),
        }
    }
}

/// One CSV record per depth map row. Invalid cells keep their sentinel value.
pub fn write_depth_csv(path: &Path, depth: &DMatrix<f32>) -> Result<()> {
    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for r in 0..depth.nrows() {
        wtr.write_record(depth.row(r).iter().map(|d| d.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a depth map written by [`write_depth_csv`].
pub fn load_depth_csv(path: &Path) -> Result<DMatrix<f32>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut values = Vec::new();
    let mut cols = None;
    let mut rows = 0;
    for rec in rdr.records() {
        let rec = rec?;
        match cols {
            None => cols = Some(rec.len()),
            Some(n) if n != rec.len() => {
                bail!("Row {} of {} has {} values, expected {}", rows, path.display(), rec.len(), n)
            }
            Some(_) => {}
        }
        for field in rec.iter() {
            values.push(field.trim().parse::<f32>()?);
        }
        rows += 1;
    }
    Ok(DMatrix::from_row_slice(rows, cols.unwrap_or(0), &values))
}

/// Grayscale preview, near is bright. Invalid cells are black.
fn depth_preview(depth: &DMatrix<f32>) -> GrayImage {
    let (lo, hi) = depth
        .iter()
        .copied()
        .filter(|&d| is_valid_depth(d))
        .fold((f32::MAX, f32::MIN), |(lo, hi), d| (lo.min(d), hi.max(d)));
    let span = if hi > lo { hi - lo } else { 1.0 };

    GrayImage::from_fn(depth.ncols() as u32, depth.nrows() as u32, |x, y| {
        let d = depth[(y as usize, x as usize)];
        if !is_valid_depth(d) {
            return Luma([0]);
        }
        let t = 1.0 - (d - lo) / span;
        Luma([(55.0 + 200.0 * t).round() as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::INVALID_DEPTH;
    use crate::test_utils::{ALTITUDE, survey_frame};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aerial_dense_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_depth_csv_round_trip() {
        let dir = scratch_dir("depth_csv");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("depth.csv");
        let depth = DMatrix::from_row_slice(2, 3, &[1.5, INVALID_DEPTH, 3.25, 4.0, 5.0, 6.5]);

        write_depth_csv(&path, &depth).unwrap();
        assert_eq!(load_depth_csv(&path).unwrap(), depth);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_save_requires_init() {
        let frame = survey_frame(0, 0, 0.0);
        let mut exporter = DiskExporter::new();
        assert!(exporter.save(frame.id, Artifact::SourceImage(&frame.image)).is_err());
    }

    #[test]
    fn test_exporter_writes_artifacts() {
        let dir = scratch_dir("exporter");
        let frame = survey_frame(7, 0, 0.0);
        let cam = frame.camera.clone();
        let data = DMatrix::from_element(cam.height() as usize, cam.width() as usize, ALTITUDE as f32);
        let depthmap = Depthmap::new(data, cam).unwrap();

        let mut exporter = DiskExporter::new();
        exporter.init(&dir).unwrap();
        exporter.save(frame.id, Artifact::DenseDepth(&depthmap)).unwrap();
        exporter.save(frame.id, Artifact::SourceImage(&frame.image)).unwrap();
        exporter
            .save(frame.id, Artifact::SparsePoints(&frame.sparse_points))
            .unwrap();

        assert!(dir.join("dense/dense_7.png").exists());
        assert!(dir.join("img/img_7.png").exists());
        let loaded = load_depth_csv(&dir.join("dense/dense_7.csv")).unwrap();
        assert_eq!(loaded, *depthmap.data());

        let mut rdr = ReaderBuilder::new()
            .from_path(dir.join("sparse/sparse_7.csv"))
            .unwrap();
        assert_eq!(rdr.records().count(), frame.sparse_points.len());
        fs::remove_dir_all(&dir).unwrap();
    }
}
