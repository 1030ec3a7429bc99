// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型特征与输出类型
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

use std::marker::PhantomData;

use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Tensor, backend::Backend};
use serde::Deserialize;
use thiserror::Error;

/// 训练使用的后端：CPU 上的 ndarray，外加自动微分
pub type TrainBackend = Autodiff<NdArray>;

/// 推理模型：只读地对一个输入执行前向计算
///
/// `infer` 只拿到 `&self`，推理过程中不累积梯度，也不修改参数。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 可训练模型：单目标的分类 + 边界框回归头
///
/// `forward` 的输出挂在自动微分的计算图上。`step` 对损失反向传播，
/// 每一步都从一份新的梯度开始。
pub trait Trainable {
  type Input;
  type Error;

  fn forward(&self, input: &Self::Input) -> Result<HeadPrediction<TrainBackend>, Self::Error>;
  fn step(&mut self, loss: Tensor<TrainBackend, 1>, learning_rate: f64);
}

/// 检测器给出的类别，可能是数字编号，也可能是类别名
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawClass {
  Id(u32),
  Name(String),
}

/// 检测器的一条原始输出，bbox 为原图像素空间的 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Deserialize)]
pub struct DetectItem {
  pub bbox: Vec<f32>,
  #[serde(default)]
  pub score: Option<f32>,
  pub class: RawClass,
}

/// 检测器风格的输出，`T` 为其类别编号所在的标签空间
#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem]>,
  _label: PhantomData<T>,
}

impl<T> DetectResult<T> {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
      _label: PhantomData,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// 集合预测（DETR 风格）的原始张量
///
/// - `logits`: `num_queries * (num_classes + 1)`，最后一列为“无目标”
/// - `boxes`: `num_queries * 4`，归一化中心点形式 (cx, cy, w, h)
#[derive(Debug, Clone)]
pub struct SetPrediction<T> {
  pub num_queries: usize,
  pub num_classes: usize,
  pub logits: Vec<f32>,
  pub boxes: Vec<f32>,
  _label: PhantomData<T>,
}

impl<T> SetPrediction<T> {
  pub fn new(num_queries: usize, num_classes: usize, logits: Vec<f32>, boxes: Vec<f32>) -> Self {
    Self {
      num_queries,
      num_classes,
      logits,
      boxes,
      _label: PhantomData,
    }
  }
}

/// 训练头的输出：类别 logits 与一个归一化中心点形式的边界框
#[derive(Debug, Clone, PartialEq)]
pub struct HeadOutput {
  pub class_logits: Vec<f32>,
  pub bbox: [f32; 4],
}

/// 训练头的张量输出，形状为 `[1, num_classes]` 与 `[1, 4]`
#[derive(Debug, Clone)]
pub struct HeadPrediction<B: Backend> {
  pub class_logits: Tensor<B, 2>,
  pub bbox: Tensor<B, 2>,
}

impl<B: Backend> HeadPrediction<B> {
  pub fn num_classes(&self) -> usize {
    self.class_logits.dims()[1]
  }

  /// 取出数值，脱离计算图
  pub fn to_output(&self) -> Result<HeadOutput, ModelError> {
    let class_logits = self
      .class_logits
      .to_data()
      .to_vec::<f32>()
      .map_err(|e| ModelError::TensorData(format!("{:?}", e)))?;
    let bbox = self
      .bbox
      .to_data()
      .to_vec::<f32>()
      .map_err(|e| ModelError::TensorData(format!("{:?}", e)))?;
    let bbox = <[f32; 4]>::try_from(bbox).map_err(|v| {
      ModelError::TensorData(format!("边界框应有 4 个分量, 实际 {}", v.len()))
    })?;
    Ok(HeadOutput { class_logits, bbox })
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("预测记录解析错误: {0}")]
  RecordParseError(#[from] serde_json::Error),
  #[error("找不到样本 {0} 的预测记录")]
  MissingRecord(String),
  #[error("张量数据错误: {0}")]
  TensorData(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

mod linear_head;
mod recorded;

pub use self::linear_head::{BoxHead, FEATURE_GRID, LinearBoxHead};
pub use self::recorded::{RecordedDetector, RecordedSetPredictor};
