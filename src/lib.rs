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

//! # Statiq
//!
//! Post-training static INT8 quantization for ONNX object detection models.
//!
//! Statiq rewrites an FP32 model into QDQ form: weights are stored as signed
//! 8-bit tensors with a dequantize step at the point of use, and activations
//! whose ranges were calibrated against a folder of representative images get
//! explicit QuantizeLinear/DequantizeLinear pairs. The source model is never
//! modified; the result is written to a separate file.
//!
//! ## Example
//!
//! ```no_run
//! use statiq::calibration::ImageDirReader;
//! use statiq::config::QuantConfig;
//! use statiq::quantize::StaticQuantizer;
//! use std::path::Path;
//!
//! # fn main() -> statiq::Result<()> {
//! let mut reader = ImageDirReader::new("calibration/", "images", 640)?;
//! let quantizer = StaticQuantizer::new(QuantConfig::default());
//! let summary = quantizer.quantize_file(
//!     Path::new("model.onnx"),
//!     Path::new("model_int8.onnx"),
//!     &mut reader,
//! )?;
//! println!("saved {:.1}%", summary.compression_ratio * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod config;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod quantize;

pub use calibration::{CalibrationDataReader, CalibrationSample, ImageDirReader, TensorRange};
pub use config::{Config, QuantConfig, QuantFormat, QuantType};
pub use error::{Result, StatiqError};
pub use model::OnnxModel;
pub use quantize::{QuantizationSummary, StaticQuantizer};

/// Re-export of the generated ONNX protobuf types for callers that build or
/// inspect models directly
pub use candle_onnx::onnx as onnx_proto;

/// Version of the statiq library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for the library
pub fn init() {
    let _ = env_logger::try_init();
    log::info!("Statiq v{} initialized", VERSION);
}
