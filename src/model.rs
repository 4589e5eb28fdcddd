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

//! ONNX model loading and inspection
//!
//! The source model is read once into its protobuf representation and never
//! mutated in place; the quantizer works on a copy and writes the result to a
//! distinct path.

use crate::{Result, StatiqError};
use candle_onnx::onnx::tensor_shape_proto::dimension;
use candle_onnx::onnx::{GraphProto, ModelProto, TensorProto};
use prost::Message;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// An ONNX model artifact loaded from disk
#[derive(Debug, Clone)]
pub struct OnnxModel {
    proto: ModelProto,
    path: PathBuf,
}

impl OnnxModel {
    /// Load a model from an ONNX protobuf file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let proto = candle_onnx::read_file(path)?;

        let model = Self {
            proto,
            path: path.to_path_buf(),
        };
        let graph = model.graph()?;

        log::info!(
            "Loaded ONNX model {}: {} nodes, {} initializers, opset {}",
            path.display(),
            graph.node.len(),
            graph.initializer.len(),
            model.opset_version().unwrap_or(0)
        );

        Ok(model)
    }

    /// Serialize a model protobuf to a file
    pub fn save_proto<P: AsRef<Path>>(proto: &ModelProto, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), proto.encode_to_vec())?;
        Ok(())
    }

    pub fn proto(&self) -> &ModelProto {
        &self.proto
    }

    /// Consume the model, yielding an owned protobuf the quantizer may rewrite
    pub fn into_proto(self) -> ModelProto {
        self.proto
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn graph(&self) -> Result<&GraphProto> {
        self.proto
            .graph
            .as_ref()
            .ok_or_else(|| StatiqError::EmptyModel {
                path: self.path.display().to_string(),
            })
    }

    /// Opset version of the default ONNX domain, if declared
    pub fn opset_version(&self) -> Option<i64> {
        self.proto
            .opset_import
            .iter()
            .find(|o| o.domain.is_empty() || o.domain == "ai.onnx")
            .map(|o| o.version)
    }

    /// Name of the first true graph input (initializers excluded)
    ///
    /// This is the key calibration samples are fed under, matching what an
    /// inference session would report as the model's input.
    pub fn input_name(&self) -> Result<String> {
        let graph = self.graph()?;
        let initializers: HashSet<&str> = graph
            .initializer
            .iter()
            .map(|t| t.name.as_str())
            .collect();

        graph
            .input
            .iter()
            .find(|i| !initializers.contains(i.name.as_str()))
            .map(|i| i.name.clone())
            .ok_or_else(|| StatiqError::ModelLoad("model declares no graph input".to_string()))
    }

    /// Declared shape of the first graph input; dynamic dimensions become -1
    pub fn input_shape(&self) -> Option<Vec<i64>> {
        let graph = self.proto.graph.as_ref()?;
        let input = graph.input.first()?;
        let tensor = match input.r#type.as_ref()?.value.as_ref()? {
            candle_onnx::onnx::type_proto::Value::TensorType(t) => t,
            _ => return None,
        };
        let dims = tensor
            .shape
            .as_ref()?
            .dim
            .iter()
            .map(|d| match d.value.as_ref() {
                Some(dimension::Value::DimValue(v)) => *v,
                _ => -1,
            })
            .collect();
        Some(dims)
    }

    /// Discover the input name by opening an inference session, the way the
    /// original tooling does. Requires the `onnx` feature.
    #[cfg(feature = "onnx")]
    pub fn session_input_name(&self) -> Result<String> {
        let session = ort::session::Session::builder()?.commit_from_file(&self.path)?;
        session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| StatiqError::ModelLoad("session declares no input".to_string()))
    }
}

/// Extract float values from a tensor, decoding `raw_data` when present
pub fn tensor_f32_data(tensor: &TensorProto) -> Result<Vec<f32>> {
    use candle_onnx::onnx::tensor_proto::DataType;

    if tensor.data_type != DataType::Float as i32 {
        return Err(StatiqError::Internal(format!(
            "tensor {} is not float32 (data_type {})",
            tensor.name, tensor.data_type
        )));
    }

    if !tensor.raw_data.is_empty() {
        if tensor.raw_data.len() % 4 != 0 {
            return Err(StatiqError::Internal(format!(
                "tensor {} raw data length {} is not a multiple of 4",
                tensor.name,
                tensor.raw_data.len()
            )));
        }
        return Ok(tensor
            .raw_data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect());
    }

    Ok(tensor.float_data.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_onnx::onnx::tensor_proto::DataType;

    #[test]
    fn test_tensor_f32_from_float_data() {
        let tensor = TensorProto {
            name: "w".to_string(),
            data_type: DataType::Float as i32,
            dims: vec![2],
            float_data: vec![1.5, -2.5],
            ..Default::default()
        };
        assert_eq!(tensor_f32_data(&tensor).unwrap(), vec![1.5, -2.5]);
    }

    #[test]
    fn test_tensor_f32_from_raw_data() {
        let mut raw = Vec::new();
        for v in [0.25f32, 4.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let tensor = TensorProto {
            name: "w".to_string(),
            data_type: DataType::Float as i32,
            dims: vec![2],
            raw_data: raw,
            ..Default::default()
        };
        assert_eq!(tensor_f32_data(&tensor).unwrap(), vec![0.25, 4.0]);
    }

    #[test]
    fn test_tensor_f32_rejects_non_float() {
        let tensor = TensorProto {
            name: "w".to_string(),
            data_type: DataType::Int8 as i32,
            ..Default::default()
        };
        assert!(tensor_f32_data(&tensor).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(OnnxModel::load("/nonexistent/model.onnx").is_err());
    }
}
