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

//! Error handling for statiq

use thiserror::Error;

/// Result type alias for statiq operations
pub type Result<T> = std::result::Result<T, StatiqError>;

/// Error types for the quantization pipeline
#[derive(Error, Debug)]
pub enum StatiqError {
    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("Model has no graph: {path}")]
    EmptyModel { path: String },

    #[error("Quantization failed: {reason}")]
    QuantizationFailed { reason: String },

    #[error("Calibration failed: {reason}")]
    CalibrationFailed { reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported quantization format: {format}")]
    UnsupportedFormat { format: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<candle_core::Error> for StatiqError {
    fn from(err: candle_core::Error) -> Self {
        StatiqError::ModelLoad(err.to_string())
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for StatiqError {
    fn from(err: ort::Error) -> Self {
        StatiqError::OnnxRuntime(err.to_string())
    }
}
