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

//! Command line driver for static quantization
//!
//! Reads a TOML configuration (default `statiq.toml`, or the first argument),
//! calibrates over the configured image folder and writes the quantized
//! model. A missing configuration file is created with defaults so the paths
//! can be filled in.

use statiq::calibration::ImageDirReader;
use statiq::config::Config;
use statiq::model::OnnxModel;
use statiq::quantize::StaticQuantizer;
use statiq::Result;
use std::path::Path;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or("statiq.toml");

    if let Err(e) = run(config_path) {
        log::error!("{}", e);
        process::exit(1);
    }
}

fn run(config_path: &str) -> Result<()> {
    if !Path::new(config_path).exists() {
        let defaults = Config::default();
        defaults.save(config_path)?;
        log::warn!(
            "wrote default configuration to {}; edit the paths and run again",
            config_path
        );
        return Ok(());
    }

    let config = Config::load(config_path)?;
    config.validate()?;

    let model = OnnxModel::load(&config.paths.model_input)?;
    let input_name = model.input_name()?;
    drop(model);

    let mut reader = ImageDirReader::new(
        &config.paths.calibration_images,
        &input_name,
        config.preprocess.target_size,
    )?;

    let quantizer = StaticQuantizer::new(config.quantization.clone());
    let summary = quantizer.quantize_file(
        &config.paths.model_input,
        &config.paths.model_output,
        &mut reader,
    )?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
