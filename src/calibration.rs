// Copyright 2025 Statiq Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Calibration data feeding for static quantization
//!
//! The quantizer pulls preprocessed tensors one at a time through a
//! [`CalibrationDataReader`]. The directory-backed implementation discovers
//! image files up front but decodes lazily, so peak memory stays at one image
//! regardless of dataset size.

use crate::preprocess;
use crate::{Result, StatiqError};
use ndarray::Array4;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One calibration sample: the model's input name mapped to a preprocessed tensor
pub type CalibrationSample = HashMap<String, Array4<f32>>;

/// Pull-based source of calibration samples
pub trait CalibrationDataReader {
    /// Return the next sample, or `None` once every sample of the current
    /// pass has been consumed exactly once.
    fn next_sample(&mut self) -> Result<Option<CalibrationSample>>;

    /// Reset the cursor to the beginning, enabling a second identical pass.
    fn rewind(&mut self);
}

/// Image file extensions considered calibration data
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Calibration reader over a directory tree of images
///
/// Paths are visited in filesystem-discovery order; that order is stable for
/// repeated passes within a run but not guaranteed across platforms.
pub struct ImageDirReader {
    paths: Vec<PathBuf>,
    input_name: String,
    target_size: u32,
    cursor: usize,
}

impl ImageDirReader {
    /// Discover images under `dir` recursively and build a reader feeding
    /// tensors keyed by `input_name`.
    pub fn new<P: AsRef<Path>>(dir: P, input_name: &str, target_size: u32) -> Result<Self> {
        let paths = discover_images(dir.as_ref())?;
        if paths.is_empty() {
            return Err(StatiqError::CalibrationFailed {
                reason: format!(
                    "no calibration images found under {}",
                    dir.as_ref().display()
                ),
            });
        }

        log::info!(
            "Discovered {} calibration images under {}",
            paths.len(),
            dir.as_ref().display()
        );

        Ok(Self {
            paths,
            input_name: input_name.to_string(),
            target_size,
            cursor: 0,
        })
    }

    /// Number of discovered images
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Discovered paths in visit order
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl CalibrationDataReader for ImageDirReader {
    fn next_sample(&mut self) -> Result<Option<CalibrationSample>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        log::debug!("Calibration sample {}: {}", self.cursor, path.display());
        let tensor = preprocess::preprocess_image(path, self.target_size)?;

        let mut sample = HashMap::with_capacity(1);
        sample.insert(self.input_name.clone(), tensor);
        Ok(Some(sample))
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }
}

fn discover_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| StatiqError::CalibrationFailed {
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_image = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Running min/max over every value fed through it
///
/// The per-tensor range drives scale/zero-point selection for activations.
#[derive(Debug, Clone, Copy)]
pub struct TensorRange {
    pub min: f32,
    pub max: f32,
}

impl TensorRange {
    pub fn new() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    /// Fold a batch of values into the range
    pub fn observe<'a, I: IntoIterator<Item = &'a f32>>(&mut self, values: I) {
        for &v in values {
            if v.is_nan() {
                continue;
            }
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
    }

    /// True once at least one finite value has been observed
    pub fn is_valid(&self) -> bool {
        self.min <= self.max && self.min.is_finite() && self.max.is_finite()
    }
}

impl Default for TensorRange {
    fn default() -> Self {
        Self::new()
    }
}
