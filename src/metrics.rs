// 该文件是 Shanan （山南西风） 项目的一部分。
// src/metrics.rs - 检测指标
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

//! 检测指标：精度、召回率与 mAP
//!
//! 在整个评估集上一次性计算，不做流式累积。

use std::collections::BTreeMap;

use thiserror::Error;

use crate::bbox::BoundingBox;

pub mod ap;
pub mod matching;

pub use self::matching::{Match, match_image};

const DEFAULT_IOU_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
  #[error("IoU 阈值无效: {0}，应位于 (0, 1]")]
  InvalidThreshold(f64),
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
  pub iou_threshold: f64,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

impl MetricsConfig {
  pub fn with_iou_threshold(mut self, iou_threshold: f64) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  fn validate(&self) -> Result<(), MetricsError> {
    if self.iou_threshold > 0.0 && self.iou_threshold <= 1.0 {
      Ok(())
    } else {
      Err(MetricsError::InvalidThreshold(self.iou_threshold))
    }
  }
}

/// 一张图像上对齐的预测与真值
#[derive(Debug, Clone, Default)]
pub struct ImageEvaluation {
  pub predictions: Vec<BoundingBox>,
  pub ground_truths: Vec<BoundingBox>,
}

impl ImageEvaluation {
  pub fn new(predictions: Vec<BoundingBox>, ground_truths: Vec<BoundingBox>) -> Self {
    Self {
      predictions,
      ground_truths,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsResult {
  pub precision: f64,
  pub recall: f64,
  pub map: f64,
  pub true_positives: usize,
  pub false_positives: usize,
  pub false_negatives: usize,
  /// 仅包含在真值中出现过的类别
  pub per_class_ap: BTreeMap<String, f64>,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
  if denominator > 0 {
    numerator as f64 / denominator as f64
  } else {
    0.0
  }
}

#[derive(Default)]
struct ClassRecord {
  num_ground_truth: usize,
  /// (置信度, 是否 TP)
  detections: Vec<(f64, bool)>,
}

/// 计算整个评估集上的精度、召回率与 mAP
pub fn calculate_metrics(
  images: &[ImageEvaluation],
  config: &MetricsConfig,
) -> Result<MetricsResult, MetricsError> {
  config.validate()?;

  let mut result = MetricsResult::default();
  let mut classes: BTreeMap<String, ClassRecord> = BTreeMap::new();

  for image in images {
    for gt in &image.ground_truths {
      classes.entry(gt.label.clone()).or_default().num_ground_truth += 1;
    }

    let matches = match_image(&image.predictions, &image.ground_truths, config.iou_threshold);
    let hits = matches.iter().filter(|m| m.is_true_positive()).count();
    result.true_positives += hits;
    result.false_positives += matches.len() - hits;
    result.false_negatives += image.ground_truths.len() - hits;

    for m in matches {
      let label = &image.predictions[m.prediction].label;
      classes
        .entry(label.clone())
        .or_default()
        .detections
        .push((m.confidence, m.is_true_positive()));
    }
  }

  result.precision = ratio(
    result.true_positives,
    result.true_positives + result.false_positives,
  );
  result.recall = ratio(
    result.true_positives,
    result.true_positives + result.false_negatives,
  );

  for (label, mut record) in classes {
    if record.num_ground_truth == 0 {
      continue;
    }
    record.detections.sort_by(|a, b| b.0.total_cmp(&a.0));
    let hits: Vec<bool> = record.detections.iter().map(|&(_, tp)| tp).collect();
    let (precisions, recalls) = ap::precision_recall_curve(&hits, record.num_ground_truth);
    result
      .per_class_ap
      .insert(label, ap::calculate_ap(&precisions, &recalls));
  }

  let aps: Vec<f64> = result.per_class_ap.values().copied().collect();
  result.map = ap::calculate_map(&aps);

  Ok(result)
}
