// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 评估与训练任务
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

use std::time::Instant;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info, warn};

use crate::{
  adapter::{AdaptPrediction, Adapted, AdapterConfig},
  dataset::{Dataset, ImageSample},
  label::{VehicleLabel, WithLabel},
  loss::{BoxLoss, LossConfig, scalar},
  metrics::{ImageEvaluation, MetricsConfig, MetricsResult, calculate_metrics},
  model::{Model, Trainable},
  output::Render,
};

const DEFAULT_EPOCHS: usize = 1000;
const DEFAULT_LEARNING_RATE: f64 = 0.01;

pub trait Task<I, M, O>: Sized {
  type Report;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Report, Self::Error>;
}

#[derive(Debug, Clone, Default)]
pub struct EvalConfig {
  pub metrics: MetricsConfig,
  pub adapter: AdapterConfig,
  /// 为 true 时在开始前清空输出目录，并渲染每个样本
  pub visualize: bool,
  pub limit: Option<usize>,
}

impl EvalConfig {
  pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
    self.metrics = metrics;
    self
  }

  pub fn with_adapter(mut self, adapter: AdapterConfig) -> Self {
    self.adapter = adapter;
    self
  }

  pub fn with_visualize(mut self, visualize: bool) -> Self {
    self.visualize = visualize;
    self
  }

  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
  pub metrics: MetricsResult,
  /// 参与评估的样本数
  pub images: usize,
  pub rejected_predictions: usize,
  pub skipped_renders: usize,
}

/// 单次评估：推理、转换、渲染，最后在整个数据集上计算一次指标
#[derive(Debug, Clone, Default)]
pub struct EvaluateTask {
  config: EvalConfig,
}

impl EvaluateTask {
  pub fn new(config: EvalConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &EvalConfig {
    &self.config
  }
}

impl<
  P: AdaptPrediction,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageSample>,
  M: Model<Input = ImageSample, Output = P, Error = ME>,
  O: Render<ImageSample, Adapted, Error = RE>,
> Task<I, M, O> for EvaluateTask
{
  type Report = EvaluationReport;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Report, Self::Error> {
    info!("开始评估任务...");
    if self.config.visualize {
      output.prepare()?;
    }

    let mut evaluations = Vec::new();
    let mut rejected_predictions = 0;
    let mut skipped_renders = 0;

    for (index, sample) in input.enumerate() {
      if self.config.limit.is_some_and(|n| index >= n) {
        info!("达到指定样本数 {}, 退出评估循环", index);
        break;
      }

      let now = Instant::now();
      let raw = model.infer(&sample)?;
      let adapted = raw.adapt(&sample, &self.config.adapter);
      debug!(
        "样本 {} 推理完成，耗时: {:.2?}，{} 个预测，{} 个被拒绝",
        sample.id,
        now.elapsed(),
        adapted.boxes.len(),
        adapted.rejected.len()
      );
      rejected_predictions += adapted.rejected.len();

      if self.config.visualize {
        if let Err(e) = output.render_result(&sample, &adapted) {
          warn!("样本 {} 渲染失败，已跳过: {}", sample.id, e);
          skipped_renders += 1;
        }
      }

      evaluations.push(ImageEvaluation::new(adapted.boxes, sample.ground_truth));
    }

    let metrics = calculate_metrics(&evaluations, &self.config.metrics)?;
    info!(
      "Precision: {}, Recall: {}, mAP: {}",
      metrics.precision, metrics.recall, metrics.map
    );

    Ok(EvaluationReport {
      metrics,
      images: evaluations.len(),
      rejected_predictions,
      skipped_renders,
    })
  }
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
  pub epochs: usize,
  pub learning_rate: f64,
  pub loss: LossConfig,
  pub metrics: MetricsConfig,
  pub adapter: AdapterConfig,
  /// 每个 epoch 打乱样本顺序所用的随机种子，`None` 时按数据集顺序
  pub shuffle: Option<u64>,
}

impl Default for TrainConfig {
  fn default() -> Self {
    Self {
      epochs: DEFAULT_EPOCHS,
      learning_rate: DEFAULT_LEARNING_RATE,
      loss: LossConfig::default(),
      metrics: MetricsConfig::default(),
      adapter: AdapterConfig::default(),
      shuffle: None,
    }
  }
}

impl TrainConfig {
  pub fn with_epochs(mut self, epochs: usize) -> Self {
    self.epochs = epochs;
    self
  }

  pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
    self.learning_rate = learning_rate;
    self
  }

  pub fn with_loss(mut self, loss: LossConfig) -> Self {
    self.loss = loss;
    self
  }

  pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
    self.metrics = metrics;
    self
  }

  pub fn with_adapter(mut self, adapter: AdapterConfig) -> Self {
    self.adapter = adapter;
    self
  }

  pub fn with_shuffle(mut self, seed: Option<u64>) -> Self {
    self.shuffle = seed;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
  pub epoch: usize,
  /// 本轮所有样本损失之和
  pub loss: f64,
  pub samples: usize,
  pub metrics: MetricsResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
  pub epochs: Vec<EpochSummary>,
}

impl TrainReport {
  pub fn last(&self) -> Option<&EpochSummary> {
    self.epochs.last()
  }
}

/// 训练目标：第一个真值框（归一化中心点形式）及其类别编号
fn training_target(sample: &ImageSample) -> Option<([f32; 4], usize)> {
  let Some(gt) = sample.ground_truth.first() else {
    warn!("样本 {} 没有真值标签，跳过", sample.id);
    return None;
  };
  if sample.ground_truth.len() > 1 {
    debug!(
      "样本 {} 有 {} 个真值标签，只使用第一个",
      sample.id,
      sample.ground_truth.len()
    );
  }
  let Some(label) = VehicleLabel::from_label_str(&gt.label) else {
    warn!("样本 {} 的类别 {} 不在类别表中，跳过", sample.id, gt.label);
    return None;
  };

  let target = gt
    .to_normalized_center(sample.original_width as f32, sample.original_height as f32)
    .to_array();
  Some((target, label.to_label_id() as usize))
}

/// 一个 epoch 的样本顺序
fn epoch_order(len: usize, rng: Option<&mut StdRng>) -> Vec<usize> {
  let mut order: Vec<usize> = (0..len).collect();
  if let Some(rng) = rng {
    order.shuffle(rng);
  }
  order
}

/// 固定轮数的单目标训练，每轮结束后报告损失与指标
#[derive(Debug, Clone, Default)]
pub struct TrainTask {
  config: TrainConfig,
}

impl TrainTask {
  pub fn new(config: TrainConfig) -> Self {
    Self { config }
  }

  pub fn run_task<D, M, E>(self, dataset: &D, model: &mut M) -> anyhow::Result<TrainReport>
  where
    D: Dataset + ?Sized,
    M: Trainable<Input = ImageSample, Error = E>,
    E: std::error::Error + Sync + Send + 'static,
  {
    info!(
      "开始训练任务: {} 轮, 学习率 {}",
      self.config.epochs, self.config.learning_rate
    );
    let loss_fn = BoxLoss::new(self.config.loss.clone());
    let mut rng = self.config.shuffle.map(|seed| {
      debug!("训练样本按种子 {} 打乱", seed);
      StdRng::seed_from_u64(seed)
    });
    let mut report = TrainReport::default();

    for epoch in 0..self.config.epochs {
      let mut epoch_loss = 0.0f64;
      let mut samples = 0;
      let mut evaluations = Vec::new();

      let order = epoch_order(dataset.len(), rng.as_mut());
      for sample in dataset.samples_in(order) {
        let Some((target_box, target_class)) = training_target(&sample) else {
          continue;
        };

        let prediction = model.forward(&sample)?;
        anyhow::ensure!(
          target_class < prediction.num_classes(),
          "类别编号 {} 超出模型输出的类别数 {}",
          target_class,
          prediction.num_classes()
        );
        let loss = loss_fn.compute(&prediction, &target_box, target_class);
        let output = prediction.to_output()?;
        epoch_loss += scalar(&loss.total) as f64;
        model.step(loss.total, self.config.learning_rate);
        samples += 1;

        let adapted = output.adapt(&sample, &self.config.adapter);
        evaluations.push(ImageEvaluation::new(adapted.boxes, sample.ground_truth));
      }

      info!("Epoch: {}, Loss: {}", epoch, epoch_loss);
      let metrics = calculate_metrics(&evaluations, &self.config.metrics)?;
      info!(
        "Precision: {}, Recall: {}, mAP: {}",
        metrics.precision, metrics.recall, metrics.map
      );

      report.epochs.push(EpochSummary {
        epoch,
        loss: epoch_loss,
        samples,
        metrics,
      });
    }

    info!("训练完成");
    Ok(report)
  }
}
