// 该文件是 Shanan （山南西风） 项目的一部分。
// src/factory.rs - 模型与数据集工厂
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 由模型名构造模型与配对的数据集

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  dataset::{DatasetError, ManifestDataset},
  label::{CocoLabel, DetrLabel, VehicleLabel, WithLabel},
  model::{LinearBoxHead, ModelError, RecordedDetector, RecordedSetPredictor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
  Yolov5,
  Detr,
  MambaTrain,
  MambaEval,
}

const MODEL_NAMES: [(ModelKind, &str); 4] = [
  (ModelKind::Yolov5, "yolov5"),
  (ModelKind::Detr, "detr"),
  (ModelKind::MambaTrain, "mamba_train"),
  (ModelKind::MambaEval, "mamba_eval"),
];

impl ModelKind {
  pub fn name(&self) -> &'static str {
    MODEL_NAMES[*self as usize].1
  }

  /// 该模型是否走训练流程
  pub fn is_training(&self) -> bool {
    matches!(self, ModelKind::MambaTrain)
  }
}

impl fmt::Display for ModelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for ModelKind {
  type Err = FactoryError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    MODEL_NAMES
      .iter()
      .find(|(_, name)| *name == s)
      .map(|(kind, _)| *kind)
      .ok_or_else(|| FactoryError::UnknownModel(s.to_string()))
  }
}

/// 计算设备，显式传入工厂
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Accelerator(u32),
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => f.write_str("cpu"),
      Device::Accelerator(index) => write!(f, "cuda:{}", index),
    }
  }
}

impl FromStr for Device {
  type Err = FactoryError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim().to_lowercase();
    match s.as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" => Ok(Device::Accelerator(0)),
      _ => s
        .strip_prefix("cuda:")
        .and_then(|index| index.parse().ok())
        .map(Device::Accelerator)
        .ok_or_else(|| FactoryError::InvalidDevice(s.clone())),
    }
  }
}

#[derive(Error, Debug)]
pub enum FactoryError {
  #[error("未知模型: {0}")]
  UnknownModel(String),
  #[error("模型 {0} 暂不可用")]
  Unavailable(ModelKind),
  #[error("模型 {model} 不支持设备 {device}")]
  UnsupportedDevice { model: ModelKind, device: Device },
  #[error("无效的设备: {0}")]
  InvalidDevice(String),
  #[error("模型 {0} 需要预测记录文件")]
  MissingPredictions(ModelKind),
  #[error("数据集错误: {0}")]
  Dataset(#[from] DatasetError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
}

#[derive(Debug, Clone)]
pub struct FactoryOptions {
  pub dataset: Url,
  /// 回放模型使用的预测记录
  pub predictions: Option<PathBuf>,
  pub device: Device,
  pub limit: Option<usize>,
}

impl FactoryOptions {
  pub fn new(dataset: Url) -> Self {
    Self {
      dataset,
      predictions: None,
      device: Device::default(),
      limit: None,
    }
  }

  pub fn with_predictions(mut self, predictions: Option<PathBuf>) -> Self {
    self.predictions = predictions;
    self
  }

  pub fn with_device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }
}

pub enum LoadedModel {
  Detector(RecordedDetector<CocoLabel>),
  SetPredictor(RecordedSetPredictor<DetrLabel>),
  Trainable(LinearBoxHead),
}

impl fmt::Debug for LoadedModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LoadedModel::Detector(_) => f.write_str("Detector"),
      LoadedModel::SetPredictor(_) => f.write_str("SetPredictor"),
      LoadedModel::Trainable(head) => write!(f, "Trainable({} classes)", head.num_classes()),
    }
  }
}

fn predictions_for(kind: ModelKind, options: &FactoryOptions) -> Result<&PathBuf, FactoryError> {
  options
    .predictions
    .as_ref()
    .ok_or(FactoryError::MissingPredictions(kind))
}

/// 构造模型与数据集
///
/// 设备选择只影响执行位置，不改变输出；回放模型与设备无关。
pub fn load_model(
  kind: ModelKind,
  options: &FactoryOptions,
) -> Result<(LoadedModel, ManifestDataset), FactoryError> {
  info!("加载模型 {} (设备 {})", kind, options.device);

  let model = match kind {
    ModelKind::Yolov5 => {
      LoadedModel::Detector(RecordedDetector::open(predictions_for(kind, options)?)?)
    }
    ModelKind::Detr => {
      LoadedModel::SetPredictor(RecordedSetPredictor::open(predictions_for(kind, options)?)?)
    }
    ModelKind::MambaTrain => {
      if options.device != Device::Cpu {
        return Err(FactoryError::UnsupportedDevice {
          model: kind,
          device: options.device,
        });
      }
      LoadedModel::Trainable(LinearBoxHead::new(VehicleLabel::num_labels()))
    }
    ModelKind::MambaEval => return Err(FactoryError::Unavailable(kind)),
  };

  let dataset = ManifestDataset::from_url(&options.dataset)?.with_limit(options.limit);
  Ok((model, dataset))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn options(dir: &std::path::Path) -> FactoryOptions {
    let manifest = dir.join("manifest.jsonl");
    fs::write(&manifest, "{\"image\": \"a.png\"}\n{\"image\": \"b.png\"}\n").unwrap();
    FactoryOptions::new(Url::parse(&format!("manifest://{}", manifest.display())).unwrap())
  }

  #[test]
  fn model_names_round_trip() {
    for (kind, name) in MODEL_NAMES {
      assert_eq!(name.parse::<ModelKind>().unwrap(), kind);
      assert_eq!(kind.to_string(), name);
    }
    assert!(matches!(
      "resnet".parse::<ModelKind>(),
      Err(FactoryError::UnknownModel(name)) if name == "resnet"
    ));
  }

  #[test]
  fn device_parsing() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Accelerator(0));
    assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Accelerator(2));
    assert!("tpu".parse::<Device>().is_err());
  }

  #[test]
  fn mamba_eval_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      load_model(ModelKind::MambaEval, &options(dir.path())),
      Err(FactoryError::Unavailable(ModelKind::MambaEval))
    ));
  }

  #[test]
  fn trainable_head_is_cpu_only() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path()).with_device(Device::Accelerator(0));
    assert!(matches!(
      load_model(ModelKind::MambaTrain, &opts),
      Err(FactoryError::UnsupportedDevice { .. })
    ));

    let opts = options(dir.path()).with_limit(Some(1));
    let (model, dataset) = load_model(ModelKind::MambaTrain, &opts).unwrap();
    assert!(matches!(model, LoadedModel::Trainable(ref h) if h.num_classes() == 8));
    assert_eq!(dataset.len(), 1);
  }

  #[test]
  fn recorded_models_need_predictions() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      load_model(ModelKind::Yolov5, &options(dir.path())),
      Err(FactoryError::MissingPredictions(ModelKind::Yolov5))
    ));

    let records = dir.path().join("detr.json");
    fs::write(&records, "{}").unwrap();
    let opts = options(dir.path()).with_predictions(Some(records));
    let (model, dataset) = load_model(ModelKind::Detr, &opts).unwrap();
    assert!(matches!(model, LoadedModel::SetPredictor(_)));
    assert_eq!(dataset.len(), 2);
  }
}
