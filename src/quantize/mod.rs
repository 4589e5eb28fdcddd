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

//! Post-training static INT8 quantization
//!
//! [`StaticQuantizer`] drives the whole pipeline: it loads the source model,
//! pulls calibration samples through a [`CalibrationDataReader`] to establish
//! activation ranges, rewrites the graph into QDQ form and writes the result
//! to a separate file.

pub mod qdq;

#[cfg(feature = "onnx")]
mod observer;

use crate::calibration::CalibrationDataReader;
#[cfg(not(feature = "onnx"))]
use crate::calibration::TensorRange;
use crate::config::{QuantConfig, QuantFormat, QuantType};
use crate::model::OnnxModel;
use crate::{Result, StatiqError};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use qdq::QdqStats;

/// Minimum default-domain opset with QuantizeLinear/DequantizeLinear support
const MIN_OPSET: i64 = 10;

/// Scale and zero point mapping a float range onto an 8-bit grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

/// Compute quantization parameters for a value range.
///
/// The range is widened to include zero so that zero is exactly
/// representable. Signed INT8 uses symmetric quantization (zero point 0,
/// range [-127, 127]); unsigned UINT8 uses the asymmetric [0, 255] mapping.
pub fn compute_params(min: f32, max: f32, qtype: QuantType) -> QuantParams {
    let min = min.min(0.0);
    let max = max.max(0.0);

    match qtype {
        QuantType::Int8 => {
            let abs_max = min.abs().max(max.abs());
            let scale = if abs_max < f32::EPSILON {
                1.0
            } else {
                abs_max / 127.0
            };
            QuantParams {
                scale,
                zero_point: 0,
            }
        }
        QuantType::Uint8 => {
            if (max - min).abs() < f32::EPSILON {
                return QuantParams {
                    scale: 1.0,
                    zero_point: 0,
                };
            }
            let scale = (max - min) / 255.0;
            let zero_point = (-min / scale).round().clamp(0.0, 255.0) as i32;
            QuantParams { scale, zero_point }
        }
    }
}

/// Quantize float values to their 8-bit storage bytes.
///
/// Signed values are clamped to [-127, 127] and bit-cast; unsigned values are
/// clamped to [0, 255].
pub fn quantize_values(values: &[f32], params: &QuantParams, qtype: QuantType) -> Vec<u8> {
    use rayon::prelude::*;

    let scale = params.scale;
    let zero_point = params.zero_point as f32;

    match qtype {
        QuantType::Int8 => values
            .par_iter()
            .map(|&x| ((x / scale).round() + zero_point).clamp(-127.0, 127.0) as i8 as u8)
            .collect(),
        QuantType::Uint8 => values
            .par_iter()
            .map(|&x| ((x / scale).round() + zero_point).clamp(0.0, 255.0) as u8)
            .collect(),
    }
}

/// Result of a quantization run
#[derive(Debug, Clone, Serialize)]
pub struct QuantizationSummary {
    pub model_input: PathBuf,
    pub model_output: PathBuf,
    pub original_size_bytes: u64,
    pub quantized_size_bytes: u64,
    /// Fraction of the original size that was shaved off
    pub compression_ratio: f32,
    pub weights_quantized: usize,
    pub activations_quantized: usize,
    pub nodes_added: usize,
    pub calibration_samples: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Static quantization driver
pub struct StaticQuantizer {
    config: QuantConfig,
}

impl StaticQuantizer {
    pub fn new(config: QuantConfig) -> Self {
        Self { config }
    }

    /// Quantize the model at `input` and write the QDQ result to `output`.
    ///
    /// The reader is rewound and consumed once to establish activation
    /// ranges; the source file is never modified.
    pub fn quantize_file(
        &self,
        input: &Path,
        output: &Path,
        reader: &mut dyn CalibrationDataReader,
    ) -> Result<QuantizationSummary> {
        if self.config.format == QuantFormat::QOperator {
            return Err(StatiqError::UnsupportedFormat {
                format: "qoperator".to_string(),
            });
        }

        let model = OnnxModel::load(input)?;
        if let Some(version) = model.opset_version() {
            if version < MIN_OPSET {
                return Err(StatiqError::QuantizationFailed {
                    reason: format!(
                        "opset {} is below the minimum {} required for QDQ",
                        version, MIN_OPSET
                    ),
                });
            }
        }

        let input_name = model.input_name()?;
        log::info!("Model input tensor: {}", input_name);

        let (ranges, calibration_samples) = self.collect_ranges(&model, &input_name, reader)?;
        log::info!(
            "Calibrated {} tensor ranges from {} samples",
            ranges.len(),
            calibration_samples
        );

        let mut proto = model.into_proto();
        let graph = proto
            .graph
            .as_mut()
            .ok_or_else(|| StatiqError::EmptyModel {
                path: input.display().to_string(),
            })?;

        let stats = qdq::quantize_graph(graph, &ranges, &self.config)?;
        OnnxModel::save_proto(&proto, output)?;

        let original_size_bytes = std::fs::metadata(input)?.len();
        let quantized_size_bytes = std::fs::metadata(output)?.len();
        let compression_ratio = if original_size_bytes > 0 {
            1.0 - (quantized_size_bytes as f32 / original_size_bytes as f32)
        } else {
            0.0
        };

        log::info!(
            "Quantized {} weights and {} activations ({} nodes added), {:.1}% size reduction",
            stats.weights_quantized,
            stats.activations_quantized,
            stats.nodes_added,
            compression_ratio * 100.0
        );

        Ok(QuantizationSummary {
            model_input: input.to_path_buf(),
            model_output: output.to_path_buf(),
            original_size_bytes,
            quantized_size_bytes,
            compression_ratio,
            weights_quantized: stats.weights_quantized,
            activations_quantized: stats.activations_quantized,
            nodes_added: stats.nodes_added,
            calibration_samples,
            created_at: chrono::Utc::now(),
        })
    }

    /// Observe activation ranges over the full calibration set by running an
    /// augmented copy of the model that exposes every intermediate tensor.
    #[cfg(feature = "onnx")]
    fn collect_ranges(
        &self,
        model: &OnnxModel,
        input_name: &str,
        reader: &mut dyn CalibrationDataReader,
    ) -> Result<(HashMap<String, TensorRange>, usize)> {
        observer::observe_activation_ranges(model, input_name, reader)
    }

    /// Without an inference session only the model input range can be
    /// measured; intermediate activations stay in float.
    #[cfg(not(feature = "onnx"))]
    fn collect_ranges(
        &self,
        _model: &OnnxModel,
        input_name: &str,
        reader: &mut dyn CalibrationDataReader,
    ) -> Result<(HashMap<String, TensorRange>, usize)> {
        log::warn!(
            "built without the `onnx` feature: quantizing weights and model input only, \
             intermediate activation ranges will not be calibrated"
        );

        let mut range = TensorRange::new();
        let mut samples = 0;

        reader.rewind();
        while let Some(sample) = reader.next_sample()? {
            let tensor = sample
                .get(input_name)
                .ok_or_else(|| StatiqError::CalibrationFailed {
                    reason: format!("sample does not contain input tensor {}", input_name),
                })?;
            range.observe(tensor.iter());
            samples += 1;
        }

        if samples == 0 {
            return Err(StatiqError::CalibrationFailed {
                reason: "calibration reader yielded no samples".to_string(),
            });
        }

        let mut ranges = HashMap::new();
        ranges.insert(input_name.to_string(), range);
        Ok((ranges, samples))
    }
}
