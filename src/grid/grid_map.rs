//! Georeferenced grid with named layers.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use nalgebra::DMatrix;

/// Geographic rectangle anchored at its lower-left corner (e.g. UTM easting/northing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Roi {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Typed content of one grid layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerData {
    /// Scalar field, e.g. elevation or elevation angle.
    Float(DMatrix<f32>),
    /// Boolean mask, e.g. validity.
    Mask(DMatrix<bool>),
    /// Counter field, e.g. number of observations.
    Count(DMatrix<u16>),
    /// RGBA color, e.g. orthophoto.
    Color(DMatrix<[u8; 4]>),
}

impl LayerData {
    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            LayerData::Float(m) => m.shape(),
            LayerData::Mask(m) => m.shape(),
            LayerData::Count(m) => m.shape(),
            LayerData::Color(m) => m.shape(),
        }
    }
}

/// Regular grid over a geographic ROI.
///
/// Cell `(r, c)` sits at `x = roi.x + c * resolution`, `y = roi.y + r * resolution`.
/// Every layer has exactly `rows x cols` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct CvGridMap {
    roi: Roi,
    resolution: f64,
    rows: usize,
    cols: usize,
    layers: BTreeMap<String, LayerData>,
}

impl CvGridMap {
    /// Grid covering `roi` at `resolution` (the GSD).
    pub fn new(roi: Roi, resolution: f64) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            bail!("Invalid grid resolution {}", resolution);
        }
        if !(roi.width.is_finite() && roi.height.is_finite() && roi.width >= 0.0 && roi.height >= 0.0) {
            bail!("Invalid region of interest {:?}", roi);
        }
        let cols = (roi.width / resolution).round() as usize + 1;
        let rows = (roi.height / resolution).round() as usize + 1;
        Ok(Self {
            roi,
            resolution,
            rows,
            cols,
            layers: BTreeMap::new(),
        })
    }

    /// Grid of `rows x cols` cells whose first cell sits at `(x, y)`.
    pub fn from_origin(x: f64, y: f64, rows: usize, cols: usize, resolution: f64) -> Result<Self> {
        if rows == 0 || cols == 0 {
            bail!("Grid must have at least one cell, got {}x{}", rows, cols);
        }
        let roi = Roi::new(
            x,
            y,
            (cols - 1) as f64 * resolution,
            (rows - 1) as f64 * resolution,
        );
        let mut grid = Self::new(roi, resolution)?;
        grid.rows = rows;
        grid.cols = cols;
        Ok(grid)
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// (rows, cols)
    pub fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Add or replace a layer. Its shape must equal the grid size.
    pub fn add(&mut self, name: &str, data: LayerData) -> Result<()> {
        if data.shape() != (self.rows, self.cols) {
            bail!(
                "Layer '{}' has shape {:?}, grid is {:?}",
                name,
                data.shape(),
                (self.rows, self.cols)
            );
        }
        self.layers.insert(name.to_string(), data);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<LayerData> {
        self.layers.remove(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&LayerData> {
        self.layers.get(name)
    }

    pub fn float(&self, name: &str) -> Option<&DMatrix<f32>> {
        match self.layers.get(name)? {
            LayerData::Float(m) => Some(m),
            _ => None,
        }
    }

    pub fn mask(&self, name: &str) -> Option<&DMatrix<bool>> {
        match self.layers.get(name)? {
            LayerData::Mask(m) => Some(m),
            _ => None,
        }
    }

    pub fn count(&self, name: &str) -> Option<&DMatrix<u16>> {
        match self.layers.get(name)? {
            LayerData::Count(m) => Some(m),
            _ => None,
        }
    }

    pub fn color(&self, name: &str) -> Option<&DMatrix<[u8; 4]>> {
        match self.layers.get(name)? {
            LayerData::Color(m) => Some(m),
            _ => None,
        }
    }

    /// Geographic position (x, y) of a cell.
    pub fn position(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.roi.x + col as f64 * self.resolution,
            self.roi.y + row as f64 * self.resolution,
        )
    }

    /// Cell nearest to a geographic position, if inside the grid.
    pub fn index_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let c = ((x - self.roi.x) / self.resolution).round();
        let r = ((y - self.roi.y) / self.resolution).round();
        if !(c >= 0.0 && r >= 0.0) {
            return None;
        }
        let (r, c) = (r as usize, c as usize);
        if r < self.rows && c < self.cols {
            Some((r, c))
        } else {
            None
        }
    }
}
