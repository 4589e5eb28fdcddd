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

//! Configuration management for statiq

use crate::{Result, StatiqError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Quantized model representation style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantFormat {
    /// Explicit QuantizeLinear/DequantizeLinear node pairs around computation
    Qdq,
    /// Fused quantized operators (QLinearConv etc.)
    QOperator,
}

/// Integer type used for quantized weights or activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    /// Signed 8-bit, symmetric (zero point 0)
    Int8,
    /// Unsigned 8-bit, asymmetric
    Uint8,
}

/// Global configuration for a quantization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub preprocess: PreprocessConfig,
    pub quantization: QuantConfig,
}

/// Input/output locations for the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Source FP32 ONNX model
    pub model_input: PathBuf,
    /// Destination for the quantized model (must differ from the input)
    pub model_output: PathBuf,
    /// Directory searched recursively for calibration images
    pub calibration_images: PathBuf,
}

/// Image preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Square network input size in pixels (e.g. 640 for YOLO-family detectors)
    pub target_size: u32,
}

/// Quantization parameters, defaulting to the configuration the NudeNet
/// 640m detector was quantized with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantConfig {
    pub format: QuantFormat,
    pub weight_type: QuantType,
    pub activation_type: QuantType,
    /// Per-channel weight scales on axis 0 instead of a single per-tensor scale
    pub per_channel: bool,
    /// Operator types eligible for quantization
    pub op_types_to_quantize: Vec<String>,
}

/// Operators eligible for quantization by default
pub const DEFAULT_OP_TYPES: &[&str] = &[
    "Conv",
    "MatMul",
    "Add",
    "Mul",
    "Div",
    "Sub",
    "Reshape",
    "Transpose",
    "Split",
    "Sigmoid",
    "Softmax",
    "MaxPool",
    "Resize",
];

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            format: QuantFormat::Qdq,
            weight_type: QuantType::Int8,
            activation_type: QuantType::Int8,
            per_channel: false,
            op_types_to_quantize: DEFAULT_OP_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                model_input: PathBuf::from("model.onnx"),
                model_output: PathBuf::from("model_int8.onnx"),
                calibration_images: PathBuf::from("calibration"),
            },
            preprocess: PreprocessConfig { target_size: 640 },
            quantization: QuantConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| StatiqError::Configuration(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StatiqError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.preprocess.target_size == 0 {
            return Err(StatiqError::Configuration(
                "target_size must be greater than 0".to_string(),
            ));
        }

        if self.paths.model_input == self.paths.model_output {
            return Err(StatiqError::Configuration(
                "model_output must differ from model_input".to_string(),
            ));
        }

        if self.quantization.op_types_to_quantize.is_empty() {
            return Err(StatiqError::Configuration(
                "op_types_to_quantize must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preprocess.target_size, 640);
        assert_eq!(config.quantization.format, QuantFormat::Qdq);
        assert_eq!(config.quantization.weight_type, QuantType::Int8);
        assert_eq!(config.quantization.activation_type, QuantType::Int8);
    }

    #[test]
    fn test_default_op_allow_list() {
        let config = QuantConfig::default();
        assert_eq!(config.op_types_to_quantize.len(), 13);
        assert!(config.op_types_to_quantize.iter().any(|op| op == "Conv"));
        assert!(config.op_types_to_quantize.iter().any(|op| op == "Resize"));
        assert!(!config.op_types_to_quantize.iter().any(|op| op == "Relu"));
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save(temp_file.path()).unwrap();
        let loaded = Config::load(temp_file.path()).unwrap();

        assert_eq!(
            config.preprocess.target_size,
            loaded.preprocess.target_size
        );
        assert_eq!(
            config.quantization.op_types_to_quantize,
            loaded.quantization.op_types_to_quantize
        );
    }

    #[test]
    fn test_same_input_output_rejected() {
        let mut config = Config::default();
        config.paths.model_output = config.paths.model_input.clone();
        assert!(config.validate().is_err());
    }
}
