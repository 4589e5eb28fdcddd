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

//! End-to-end static quantization over a synthetic model and image folder

use image::{Rgb, RgbImage};
use statiq::calibration::ImageDirReader;
use statiq::config::{QuantConfig, QuantFormat};
use statiq::model::OnnxModel;
use statiq::onnx_proto::tensor_proto::DataType;
use statiq::onnx_proto::{
    GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, ValueInfoProto,
};
use statiq::quantize::StaticQuantizer;
use statiq::StatiqError;
use std::path::Path;

fn value_info(name: &str) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        ..Default::default()
    }
}

/// A single-Conv model with one 2x3x3x3 weight
fn tiny_conv_model(opset: i64) -> ModelProto {
    let weight_values: Vec<f32> = (0..54).map(|i| i as f32 / 27.0 - 1.0).collect();
    let graph = GraphProto {
        name: "tiny".to_string(),
        node: vec![NodeProto {
            op_type: "Conv".to_string(),
            name: "conv".to_string(),
            input: vec!["images".to_string(), "conv_w".to_string()],
            output: vec!["conv_out".to_string()],
            ..Default::default()
        }],
        initializer: vec![TensorProto {
            name: "conv_w".to_string(),
            data_type: DataType::Float as i32,
            dims: vec![2, 3, 3, 3],
            float_data: weight_values,
            ..Default::default()
        }],
        input: vec![value_info("images")],
        output: vec![value_info("conv_out")],
        ..Default::default()
    };

    ModelProto {
        ir_version: 8,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: opset,
        }],
        graph: Some(graph),
        ..Default::default()
    }
}

fn write_calibration_images(dir: &Path, count: usize) {
    for i in 0..count {
        let shade = (40 * (i + 1)) as u8;
        RgbImage::from_pixel(48, 32, Rgb([shade, shade / 2, 255 - shade]))
            .save(dir.join(format!("img_{}.png", i)))
            .unwrap();
    }
}

#[test]
fn test_quantize_file_produces_qdq_model() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.onnx");
    let output_path = dir.path().join("model_int8.onnx");
    let images_dir = dir.path().join("calibration");
    std::fs::create_dir(&images_dir).unwrap();
    write_calibration_images(&images_dir, 3);

    OnnxModel::save_proto(&tiny_conv_model(13), &model_path).unwrap();

    let mut reader = ImageDirReader::new(&images_dir, "images", 32).unwrap();
    let quantizer = StaticQuantizer::new(QuantConfig::default());
    let summary = quantizer
        .quantize_file(&model_path, &output_path, &mut reader)
        .unwrap();

    assert_eq!(summary.weights_quantized, 1);
    assert_eq!(summary.activations_quantized, 1);
    assert_eq!(summary.calibration_samples, 3);
    assert!(summary.quantized_size_bytes > 0);

    // Source model is untouched
    let original = OnnxModel::load(&model_path).unwrap();
    assert!(original
        .graph()
        .unwrap()
        .initializer
        .iter()
        .any(|t| t.name == "conv_w"));

    let quantized = OnnxModel::load(&output_path).unwrap();
    let graph = quantized.graph().unwrap();

    let weight = graph
        .initializer
        .iter()
        .find(|t| t.name == "conv_w_quantized")
        .unwrap();
    assert_eq!(weight.data_type, DataType::Int8 as i32);
    assert_eq!(weight.raw_data.len(), 54);
    assert!(!graph.initializer.iter().any(|t| t.name == "conv_w"));

    let conv = graph.node.iter().find(|n| n.name == "conv").unwrap();
    assert_eq!(conv.input[0], "images_qdq");
    assert_eq!(conv.input[1], "conv_w_dequantized");

    // Calibration images live in [0, 1], giving a positive input scale
    let input_scale = graph
        .initializer
        .iter()
        .find(|t| t.name == "images_scale")
        .unwrap();
    assert!(input_scale.float_data[0] > 0.0);

    // Model signature is preserved
    assert_eq!(graph.output[0].name, "conv_out");
}

#[test]
fn test_qoperator_format_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.onnx");
    let images_dir = dir.path().join("calibration");
    std::fs::create_dir(&images_dir).unwrap();
    write_calibration_images(&images_dir, 1);

    OnnxModel::save_proto(&tiny_conv_model(13), &model_path).unwrap();

    let config = QuantConfig {
        format: QuantFormat::QOperator,
        ..QuantConfig::default()
    };
    let mut reader = ImageDirReader::new(&images_dir, "images", 32).unwrap();
    let result = StaticQuantizer::new(config).quantize_file(
        &model_path,
        &dir.path().join("out.onnx"),
        &mut reader,
    );

    assert!(matches!(
        result,
        Err(StatiqError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_old_opset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.onnx");
    let images_dir = dir.path().join("calibration");
    std::fs::create_dir(&images_dir).unwrap();
    write_calibration_images(&images_dir, 1);

    OnnxModel::save_proto(&tiny_conv_model(9), &model_path).unwrap();

    let mut reader = ImageDirReader::new(&images_dir, "images", 32).unwrap();
    let result = StaticQuantizer::new(QuantConfig::default()).quantize_file(
        &model_path,
        &dir.path().join("out.onnx"),
        &mut reader,
    );

    assert!(matches!(
        result,
        Err(StatiqError::QuantizationFailed { .. })
    ));
}
