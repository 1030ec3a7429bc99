// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/linear_head.rs - 可训练的线性边界框头
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

use std::fmt;

use burn::module::{AutodiffModule, Module};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData, activation::sigmoid};
use image::imageops::{self, FilterType};
use tracing::debug;

use crate::{
  dataset::ImageSample,
  model::{HeadOutput, HeadPrediction, Model, ModelError, TrainBackend, Trainable},
};

/// 特征网格边长：图像缩放到 8x8 RGB
pub const FEATURE_GRID: u32 = 8;
const FEATURE_LEN: usize = (FEATURE_GRID * FEATURE_GRID * 3) as usize;
const BOX_DIMS: usize = 4;

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;

type HeadOptimizer = OptimizerAdaptor<
  Adam,
  BoxHead<TrainBackend>,
  TrainBackend,
>;

/// 两个并列的线性层：分类 logits 与经 sigmoid 的归一化中心点 (cx, cy, w, h)
#[derive(Module, Debug)]
pub struct BoxHead<B: Backend> {
  classifier: Linear<B>,
  regressor: Linear<B>,
}

impl<B: Backend> BoxHead<B> {
  pub fn new(num_classes: usize, device: &B::Device) -> Self {
    let classifier = LinearConfig::new(FEATURE_LEN, num_classes)
      .with_initializer(Initializer::Zeros)
      .init(device);
    let regressor = LinearConfig::new(FEATURE_LEN, BOX_DIMS)
      .with_initializer(Initializer::Zeros)
      .init(device);
    Self {
      classifier,
      regressor,
    }
  }

  /// 输入形状 `[1, FEATURE_LEN]`
  pub fn forward(&self, features: Tensor<B, 2>) -> HeadPrediction<B> {
    let class_logits = self.classifier.forward(features.clone());
    let bbox = sigmoid(self.regressor.forward(features));
    HeadPrediction { class_logits, bbox }
  }
}

fn extract_features<B: Backend>(sample: &ImageSample, device: &B::Device) -> Tensor<B, 2> {
  let resized = imageops::resize(&sample.image, FEATURE_GRID, FEATURE_GRID, FilterType::Triangle);
  let values: Vec<f32> = resized
    .into_raw()
    .into_iter()
    .map(|v| v as f32 / 255.0)
    .collect();
  Tensor::from_data(TensorData::new(values, [1, FEATURE_LEN]), device)
}

/// 线性分类 + 边界框回归头
///
/// 特征为缩放到 8x8 的 RGB 图像（归一化到 [0, 1]）。
/// 参数零初始化，优化器为 Adam。
pub struct LinearBoxHead {
  num_classes: usize,
  device: <TrainBackend as Backend>::Device,
  module: BoxHead<TrainBackend>,
  optim: HeadOptimizer,
  steps: usize,
}

impl fmt::Debug for LinearBoxHead {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinearBoxHead")
      .field("num_classes", &self.num_classes)
      .field("module", &self.module)
      .field("steps", &self.steps)
      .finish()
  }
}

impl LinearBoxHead {
  pub fn new(num_classes: usize) -> Self {
    let device = Default::default();
    let module = BoxHead::new(num_classes, &device);
    let optim = AdamConfig::new()
      .with_beta_1(ADAM_BETA1)
      .with_beta_2(ADAM_BETA2)
      .with_epsilon(ADAM_EPS)
      .init();
    Self {
      num_classes,
      device,
      module,
      optim,
      steps: 0,
    }
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn steps(&self) -> usize {
    self.steps
  }
}

impl Model for LinearBoxHead {
  type Input = ImageSample;
  type Output = HeadOutput;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    // 推理走内层后端，不建立计算图
    let module = self.module.valid();
    let features = extract_features(input, &self.device);
    module.forward(features).to_output()
  }
}

impl Trainable for LinearBoxHead {
  type Input = ImageSample;
  type Error = ModelError;

  fn forward(&self, input: &Self::Input) -> Result<HeadPrediction<TrainBackend>, Self::Error> {
    let features = extract_features(input, &self.device);
    Ok(self.module.forward(features))
  }

  fn step(&mut self, loss: Tensor<TrainBackend, 1>, learning_rate: f64) {
    let grads = GradientsParams::from_grads(loss.backward(), &self.module);
    self.module = self.optim.step(learning_rate, self.module.clone(), grads);
    self.steps += 1;
    debug!("第 {} 次参数更新", self.steps);
  }
}
