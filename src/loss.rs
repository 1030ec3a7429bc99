// 该文件是 Shanan （山南西风） 项目的一部分。
// src/loss.rs - 训练损失
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

//! 训练头的组合损失：边界框 Huber (smooth-L1) + 分类交叉熵

use burn::nn::loss::{CrossEntropyLossConfig, HuberLoss, HuberLossConfig, Reduction};
use burn::tensor::{ElementConversion, Int, Tensor, backend::Backend};

use crate::model::HeadPrediction;

const HUBER_DELTA: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct LossConfig {
  pub bbox_weight: f32,
  pub class_weight: f32,
  /// Huber 损失由二次段切换到线性段的阈值
  pub delta: f32,
}

impl Default for LossConfig {
  fn default() -> Self {
    Self {
      bbox_weight: 1.0,
      class_weight: 1.0,
      delta: HUBER_DELTA,
    }
  }
}

impl LossConfig {
  pub fn with_weights(mut self, bbox_weight: f32, class_weight: f32) -> Self {
    self.bbox_weight = bbox_weight;
    self.class_weight = class_weight;
    self
  }

  pub fn with_delta(mut self, delta: f32) -> Self {
    self.delta = delta;
    self
  }
}

/// 三个分量均为单元素张量，`total` 仍挂在计算图上
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
  pub total: Tensor<B, 1>,
  pub bbox: Tensor<B, 1>,
  pub class: Tensor<B, 1>,
}

/// 单元素张量的数值
pub fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
  tensor.clone().into_scalar().elem::<f32>()
}

#[derive(Debug, Clone)]
pub struct BoxLoss {
  config: LossConfig,
  huber: HuberLoss,
}

impl Default for BoxLoss {
  fn default() -> Self {
    Self::new(LossConfig::default())
  }
}

impl BoxLoss {
  pub fn new(config: LossConfig) -> Self {
    let huber = HuberLossConfig::new(config.delta).init();
    Self { config, huber }
  }

  /// `target_box` 为归一化中心点形式，`target_class` 为类别编号
  pub fn compute<B: Backend>(
    &self,
    prediction: &HeadPrediction<B>,
    target_box: &[f32; 4],
    target_class: usize,
  ) -> LossOutput<B> {
    let device = prediction.bbox.device();
    let target_box = Tensor::<B, 2>::from_floats([*target_box], &device);
    let target_class = Tensor::<B, 1, Int>::from_ints([target_class as i32], &device);

    let bbox = self
      .huber
      .forward(prediction.bbox.clone(), target_box, Reduction::Mean);
    let class = CrossEntropyLossConfig::new()
      .init(&device)
      .forward(prediction.class_logits.clone(), target_class);

    let total = bbox.clone().mul_scalar(self.config.bbox_weight)
      + class.clone().mul_scalar(self.config.class_weight);
    LossOutput { total, bbox, class }
  }
}
