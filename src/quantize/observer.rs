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

//! Activation range observation via an augmented inference session
//!
//! To calibrate intermediate tensors the model is copied, every float tensor
//! declared in the graph's value info is promoted to a graph output, and the
//! copy is run over the full calibration set. The per-tensor min/max folded
//! over all samples drives activation scale selection.

use crate::calibration::{CalibrationDataReader, TensorRange};
use crate::model::OnnxModel;
use crate::{Result, StatiqError};
use candle_onnx::onnx::tensor_proto::DataType;
use candle_onnx::onnx::type_proto;
use candle_onnx::onnx::ValueInfoProto;
use std::collections::{HashMap, HashSet};

/// Run the calibration set through an augmented copy of `model` and return
/// the observed range per tensor name plus the sample count.
pub fn observe_activation_ranges(
    model: &OnnxModel,
    input_name: &str,
    reader: &mut dyn CalibrationDataReader,
) -> Result<(HashMap<String, TensorRange>, usize)> {
    let graph = model.graph()?;
    let existing_outputs: HashSet<&str> = graph.output.iter().map(|o| o.name.as_str()).collect();

    // Only tensors with declared float type can be promoted to outputs; a
    // model without inferred value info calibrates graph outputs only.
    let promoted: Vec<ValueInfoProto> = graph
        .value_info
        .iter()
        .filter(|vi| !existing_outputs.contains(vi.name.as_str()) && is_float(vi))
        .cloned()
        .collect();

    if promoted.is_empty() {
        log::warn!(
            "model carries no float value info; only graph inputs and outputs \
             will be calibrated (run shape inference on the model to improve coverage)"
        );
    } else {
        log::info!("Observing {} intermediate tensors", promoted.len());
    }

    let mut observed: Vec<String> = promoted.iter().map(|vi| vi.name.clone()).collect();
    observed.extend(graph.output.iter().map(|o| o.name.clone()));

    let mut augmented = model.proto().clone();
    let augmented_graph = augmented
        .graph
        .as_mut()
        .ok_or_else(|| StatiqError::EmptyModel {
            path: model.path().display().to_string(),
        })?;
    augmented_graph.output.extend(promoted);

    let temp = tempfile::Builder::new()
        .prefix("statiq-augmented-")
        .suffix(".onnx")
        .tempfile()?;
    OnnxModel::save_proto(&augmented, temp.path())?;

    let session = ort::session::Session::builder()?.commit_from_file(temp.path())?;

    let mut ranges: HashMap<String, TensorRange> = HashMap::new();
    let mut samples = 0;

    reader.rewind();
    while let Some(sample) = reader.next_sample()? {
        let tensor = sample
            .get(input_name)
            .ok_or_else(|| StatiqError::CalibrationFailed {
                reason: format!("sample does not contain input tensor {}", input_name),
            })?;
        ranges
            .entry(input_name.to_string())
            .or_default()
            .observe(tensor.iter());

        let outputs = session.run(ort::inputs![input_name => tensor.view()]?)?;
        for name in &observed {
            // Non-float graph outputs (index tensors etc.) are left unranged
            match outputs[name.as_str()].try_extract_tensor::<f32>() {
                Ok(view) => ranges.entry(name.clone()).or_default().observe(view.iter()),
                Err(_) => continue,
            }
        }

        samples += 1;
        log::debug!("Observed sample {}", samples);
    }

    if samples == 0 {
        return Err(StatiqError::CalibrationFailed {
            reason: "calibration reader yielded no samples".to_string(),
        });
    }

    Ok((ranges, samples))
}

fn is_float(vi: &ValueInfoProto) -> bool {
    matches!(
        vi.r#type.as_ref().and_then(|t| t.value.as_ref()),
        Some(type_proto::Value::TensorType(t)) if t.elem_type == DataType::Float as i32
    )
}
