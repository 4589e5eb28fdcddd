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

//! QDQ graph rewriting
//!
//! Rewrites a float graph into quantize-dequantize form. Weight initializers
//! feeding eligible operators are stored as 8-bit tensors and dequantized at
//! the point of use; activations with calibrated ranges get an explicit
//! QuantizeLinear/DequantizeLinear pair inserted after their producer. Nodes
//! whose operator type is not on the allow list keep their float inputs.

use super::{compute_params, quantize_values, QuantParams};
use crate::calibration::TensorRange;
use crate::config::{QuantConfig, QuantType};
use crate::model::tensor_f32_data;
use crate::Result;
use candle_onnx::onnx::attribute_proto::AttributeType;
use candle_onnx::onnx::tensor_proto::DataType;
use candle_onnx::onnx::{AttributeProto, GraphProto, NodeProto, TensorProto};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Counters describing what a rewrite touched
#[derive(Debug, Clone, Copy, Default)]
pub struct QdqStats {
    /// Weight initializers converted to 8-bit storage
    pub weights_quantized: usize,
    /// Activation tensors that received a Q/DQ pair
    pub activations_quantized: usize,
    /// Net growth of the graph's node count
    pub nodes_added: usize,
}

/// A weight initializer scheduled for quantization
struct WeightPlan {
    init_idx: usize,
    name: String,
    dims: Vec<i64>,
    values: Vec<f32>,
    /// (node index, input slot) of every allow-listed consumer
    consumers: Vec<(usize, usize)>,
    /// True when no float consumer remains and the original can be dropped
    exclusive: bool,
}

/// Quantized payload for one weight, computed off the graph
struct QuantizedWeight {
    name: String,
    dims: Vec<i64>,
    data: Vec<u8>,
    scales: Vec<f32>,
    zero_points: Vec<i32>,
    consumers: Vec<(usize, usize)>,
    exclusive: bool,
    per_channel: bool,
}

/// Rewrite `graph` into QDQ form in place.
///
/// `ranges` holds calibrated min/max per tensor name; tensors without a valid
/// range are left in float. Graph outputs are never wrapped so the model's
/// external signature is preserved.
pub fn quantize_graph(
    graph: &mut GraphProto,
    ranges: &HashMap<String, TensorRange>,
    config: &QuantConfig,
) -> Result<QdqStats> {
    let allowed: HashSet<&str> = config
        .op_types_to_quantize
        .iter()
        .map(|s| s.as_str())
        .collect();

    let original_node_count = graph.node.len();

    let weights = plan_weights(graph, &allowed)?;
    let weights: Vec<QuantizedWeight> = weights
        .into_par_iter()
        .map(|plan| quantize_weight(plan, config))
        .collect();

    // (node index, input slot) -> replacement tensor name
    let mut weight_rewires: HashMap<(usize, usize), String> = HashMap::new();
    let mut removed_initializers: HashSet<String> = HashSet::new();
    let mut weight_dq_nodes: Vec<NodeProto> = Vec::with_capacity(weights.len());
    let mut new_initializers: Vec<TensorProto> = Vec::new();

    for weight in &weights {
        let quantized_name = format!("{}_quantized", weight.name);
        let scale_name = format!("{}_scale", weight.name);
        let zp_name = format!("{}_zero_point", weight.name);
        let dq_output = format!("{}_dequantized", weight.name);

        new_initializers.push(TensorProto {
            name: quantized_name.clone(),
            data_type: storage_data_type(config.weight_type),
            dims: weight.dims.clone(),
            raw_data: weight.data.clone(),
            ..Default::default()
        });
        new_initializers.push(scale_tensor(&scale_name, &weight.scales, weight.per_channel));
        new_initializers.push(zero_point_tensor(
            &zp_name,
            &weight.zero_points,
            config.weight_type,
            weight.per_channel,
        ));

        let mut dq = NodeProto {
            op_type: "DequantizeLinear".to_string(),
            name: format!("{}_DequantizeLinear", weight.name),
            input: vec![quantized_name, scale_name, zp_name],
            output: vec![dq_output.clone()],
            ..Default::default()
        };
        if weight.per_channel {
            dq.attribute.push(axis_attribute(0));
        }
        weight_dq_nodes.push(dq);

        for &slot in &weight.consumers {
            weight_rewires.insert(slot, dq_output.clone());
        }
        if weight.exclusive {
            removed_initializers.insert(weight.name.clone());
        }
    }

    // Activation pass. A tensor qualifies when its range was calibrated, it
    // is not an initializer or graph output, and at least one adjacent node
    // is allow-listed.
    let initializer_names: HashSet<String> =
        graph.initializer.iter().map(|t| t.name.clone()).collect();
    let output_names: HashSet<&str> = graph.output.iter().map(|o| o.name.as_str()).collect();

    let mut consumer_allowed: HashMap<&str, bool> = HashMap::new();
    for node in &graph.node {
        let node_allowed = allowed.contains(node.op_type.as_str());
        for input in &node.input {
            let entry = consumer_allowed.entry(input.as_str()).or_insert(false);
            *entry |= node_allowed;
        }
    }

    let mut eligible_inputs: Vec<String> = Vec::new();
    for input in &graph.input {
        let name = input.name.as_str();
        if initializer_names.contains(name) {
            continue;
        }
        let ranged = ranges.get(name).map(|r| r.is_valid()).unwrap_or(false);
        if ranged && consumer_allowed.get(name).copied().unwrap_or(false) {
            eligible_inputs.push(name.to_string());
        }
    }

    let mut eligible_outputs: HashSet<String> = HashSet::new();
    for node in &graph.node {
        let producer_allowed = allowed.contains(node.op_type.as_str());
        for output in &node.output {
            let name = output.as_str();
            if output_names.contains(name) || initializer_names.contains(name) {
                continue;
            }
            let ranged = ranges.get(name).map(|r| r.is_valid()).unwrap_or(false);
            let touches_allowed =
                producer_allowed || consumer_allowed.get(name).copied().unwrap_or(false);
            if ranged && touches_allowed {
                eligible_outputs.insert(name.to_string());
            }
        }
    }

    let mut eligible_output_list: Vec<String> = eligible_outputs.iter().cloned().collect();
    eligible_output_list.sort();

    // Consumers of a wrapped tensor read the dequantized copy instead
    let mut activation_rewires: HashMap<String, String> = HashMap::new();
    for name in eligible_inputs.iter().chain(eligible_output_list.iter()) {
        activation_rewires.insert(name.clone(), format!("{}_qdq", name));
        let range = &ranges[name.as_str()];
        let params = compute_params(range.min, range.max, config.activation_type);
        new_initializers.push(scale_tensor(
            &format!("{}_scale", name),
            &[params.scale],
            false,
        ));
        new_initializers.push(zero_point_tensor(
            &format!("{}_zero_point", name),
            &[params.zero_point],
            config.activation_type,
            false,
        ));
    }

    let activations_quantized = activation_rewires.len();

    // Rebuild the node list: weight dequantizers first, then input Q/DQ
    // pairs, then the original nodes with Q/DQ pairs trailing each producer.
    let old_nodes = std::mem::take(&mut graph.node);
    let mut new_nodes: Vec<NodeProto> = Vec::with_capacity(old_nodes.len() + 4 * activations_quantized);
    new_nodes.extend(weight_dq_nodes);

    for name in &eligible_inputs {
        push_qdq_pair(&mut new_nodes, name);
    }

    for (node_idx, mut node) in old_nodes.into_iter().enumerate() {
        for (input_idx, input) in node.input.iter_mut().enumerate() {
            if let Some(replacement) = weight_rewires.get(&(node_idx, input_idx)) {
                *input = replacement.clone();
            } else if let Some(replacement) = activation_rewires.get(input.as_str()) {
                *input = replacement.clone();
            }
        }
        let outputs: Vec<String> = node.output.clone();
        new_nodes.push(node);
        for output in outputs {
            if eligible_outputs.contains(&output) {
                push_qdq_pair(&mut new_nodes, &output);
            }
        }
    }

    let nodes_added = new_nodes.len() - original_node_count;
    graph.node = new_nodes;

    graph
        .initializer
        .retain(|t| !removed_initializers.contains(&t.name));
    graph.initializer.extend(new_initializers);

    Ok(QdqStats {
        weights_quantized: weights.len(),
        activations_quantized,
        nodes_added,
    })
}

/// Collect float initializers of rank two or higher that feed at least one
/// allow-listed node.
fn plan_weights(graph: &GraphProto, allowed: &HashSet<&str>) -> Result<Vec<WeightPlan>> {
    let init_index: HashMap<&str, usize> = graph
        .initializer
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    // initializer index -> (allowed consumers, total consumers)
    let mut usage: HashMap<usize, (Vec<(usize, usize)>, usize)> = HashMap::new();
    for (node_idx, node) in graph.node.iter().enumerate() {
        let node_allowed = allowed.contains(node.op_type.as_str());
        for (input_idx, input) in node.input.iter().enumerate() {
            if let Some(&init_idx) = init_index.get(input.as_str()) {
                let entry = usage.entry(init_idx).or_default();
                entry.1 += 1;
                if node_allowed {
                    entry.0.push((node_idx, input_idx));
                }
            }
        }
    }

    let mut plans = Vec::new();
    for (init_idx, (consumers, total)) in usage {
        if consumers.is_empty() {
            continue;
        }
        let tensor = &graph.initializer[init_idx];
        if tensor.data_type != DataType::Float as i32 || tensor.dims.len() < 2 {
            continue;
        }
        let values = tensor_f32_data(tensor)?;
        if values.is_empty() {
            continue;
        }
        let exclusive = consumers.len() == total;
        plans.push(WeightPlan {
            init_idx,
            name: tensor.name.clone(),
            dims: tensor.dims.clone(),
            values,
            consumers,
            exclusive,
        });
    }

    // Deterministic output order regardless of hash iteration
    plans.sort_by_key(|p| p.init_idx);
    Ok(plans)
}

fn quantize_weight(plan: WeightPlan, config: &QuantConfig) -> QuantizedWeight {
    let per_channel = config.per_channel && plan.dims.len() >= 2 && plan.dims[0] > 0;

    let (data, scales, zero_points) = if per_channel {
        let channels = plan.dims[0] as usize;
        let chunk_len = plan.values.len() / channels;
        let mut data = Vec::with_capacity(plan.values.len());
        let mut scales = Vec::with_capacity(channels);
        let mut zero_points = Vec::with_capacity(channels);
        for chunk in plan.values.chunks(chunk_len) {
            let params = chunk_params(chunk, config.weight_type);
            data.extend(quantize_values(chunk, &params, config.weight_type));
            scales.push(params.scale);
            zero_points.push(params.zero_point);
        }
        (data, scales, zero_points)
    } else {
        let params = chunk_params(&plan.values, config.weight_type);
        let data = quantize_values(&plan.values, &params, config.weight_type);
        (data, vec![params.scale], vec![params.zero_point])
    };

    QuantizedWeight {
        name: plan.name,
        dims: plan.dims,
        data,
        scales,
        zero_points,
        consumers: plan.consumers,
        exclusive: plan.exclusive,
        per_channel,
    }
}

fn chunk_params(values: &[f32], qtype: QuantType) -> QuantParams {
    let mut range = TensorRange::new();
    range.observe(values.iter());
    compute_params(range.min, range.max, qtype)
}

/// Append a QuantizeLinear/DequantizeLinear pair reading `tensor` and
/// producing `{tensor}_qdq`.
fn push_qdq_pair(nodes: &mut Vec<NodeProto>, tensor: &str) {
    let scale = format!("{}_scale", tensor);
    let zp = format!("{}_zero_point", tensor);
    let quantized = format!("{}_quantized", tensor);

    nodes.push(NodeProto {
        op_type: "QuantizeLinear".to_string(),
        name: format!("{}_QuantizeLinear", tensor),
        input: vec![tensor.to_string(), scale.clone(), zp.clone()],
        output: vec![quantized.clone()],
        ..Default::default()
    });
    nodes.push(NodeProto {
        op_type: "DequantizeLinear".to_string(),
        name: format!("{}_DequantizeLinear", tensor),
        input: vec![quantized, scale, zp],
        output: vec![format!("{}_qdq", tensor)],
        ..Default::default()
    });
}

fn storage_data_type(qtype: QuantType) -> i32 {
    match qtype {
        QuantType::Int8 => DataType::Int8 as i32,
        QuantType::Uint8 => DataType::Uint8 as i32,
    }
}

fn scale_tensor(name: &str, scales: &[f32], per_channel: bool) -> TensorProto {
    TensorProto {
        name: name.to_string(),
        data_type: DataType::Float as i32,
        dims: if per_channel {
            vec![scales.len() as i64]
        } else {
            Vec::new()
        },
        float_data: scales.to_vec(),
        ..Default::default()
    }
}

fn zero_point_tensor(
    name: &str,
    zero_points: &[i32],
    qtype: QuantType,
    per_channel: bool,
) -> TensorProto {
    let raw_data: Vec<u8> = match qtype {
        QuantType::Int8 => zero_points.iter().map(|&z| z as i8 as u8).collect(),
        QuantType::Uint8 => zero_points.iter().map(|&z| z as u8).collect(),
    };
    TensorProto {
        name: name.to_string(),
        data_type: storage_data_type(qtype),
        dims: if per_channel {
            vec![zero_points.len() as i64]
        } else {
            Vec::new()
        },
        raw_data,
        ..Default::default()
    }
}

fn axis_attribute(axis: i64) -> AttributeProto {
    AttributeProto {
        name: "axis".to_string(),
        r#type: AttributeType::Int as i32,
        i: axis,
        ..Default::default()
    }
}
