// 该文件是 Shanan （山南西风） 项目的一部分。
// src/adapter.rs - 模型输出到边界框的转换
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

//! 原始模型输出到像素空间 `BoundingBox` 的转换
//!
//! 每个模型家族的原始输出形状不同，统一通过 [`AdaptPrediction`] 转为可与真值比较的框。
//! 单条预测的错误不会中断整个样本，被拒绝的预测记录在 [`Adapted::rejected`] 中。

use thiserror::Error;
use tracing::debug;

use crate::{
  bbox::{BoundingBox, CenterBox},
  dataset::{ImageSample, RawLabel},
  label::{VehicleLabel, WithLabel, canonical_label},
  model::{DetectResult, HeadOutput, RawClass, SetPrediction},
};

const DEFAULT_SCORE_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdaptError {
  #[error("边界框字段缺失: 需要 4 个坐标, 实际 {found} 个")]
  MissingBoxFields { found: usize },
  #[error("边界框包含非有限值: {0:?}")]
  NonFiniteBox(Vec<f32>),
  #[error("边界框坐标颠倒: {0:?}")]
  InvertedBox([f32; 4]),
  #[error("未知类别: {0}")]
  UnknownClass(String),
  #[error("类别置信度非有限值: {0}")]
  NonFiniteScore(f32),
  #[error("输出张量形状不匹配: 期望 {expected}, 实际 {found}")]
  ShapeMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
  /// 集合预测中保留查询的最低类别概率
  pub score_threshold: f32,
}

impl Default for AdapterConfig {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_SCORE_THRESHOLD,
    }
  }
}

impl AdapterConfig {
  pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
    self.score_threshold = score_threshold;
    self
  }
}

/// 转换结果：有效框与被拒绝的预测
#[derive(Debug, Clone, Default)]
pub struct Adapted {
  pub boxes: Vec<BoundingBox>,
  pub rejected: Vec<AdaptError>,
}

impl Adapted {
  fn push(&mut self, result: Result<BoundingBox, AdaptError>) {
    match result {
      Ok(bbox) => self.boxes.push(bbox),
      Err(e) => {
        debug!("预测被拒绝: {}", e);
        self.rejected.push(e);
      }
    }
  }
}

pub trait AdaptPrediction {
  fn adapt(&self, sample: &ImageSample, config: &AdapterConfig) -> Adapted;
}

fn checked_corners(values: &[f32]) -> Result<[f32; 4], AdaptError> {
  let corners: [f32; 4] = values
    .try_into()
    .map_err(|_| AdaptError::MissingBoxFields {
      found: values.len(),
    })?;
  if !corners.iter().all(|v| v.is_finite()) {
    return Err(AdaptError::NonFiniteBox(values.to_vec()));
  }
  if corners[0] > corners[2] || corners[1] > corners[3] {
    return Err(AdaptError::InvertedBox(corners));
  }
  Ok(corners)
}

fn resolve_class<T: WithLabel>(class: &RawClass) -> Result<&'static str, AdaptError> {
  let label = match class {
    RawClass::Id(id) => T::from_label_id(*id),
    RawClass::Name(name) => T::from_label_str(name),
  };
  label.map(|l| l.to_label_str()).ok_or_else(|| {
    AdaptError::UnknownClass(match class {
      RawClass::Id(id) => id.to_string(),
      RawClass::Name(name) => name.clone(),
    })
  })
}

/// 数值稳定的 softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
  values
    .iter()
    .copied()
    .enumerate()
    .fold(None, |best, (idx, v)| match best {
      Some((_, b)) if b >= v => best,
      _ => Some((idx, v)),
    })
}

fn center_to_pixels(
  center: &[f32],
  sample: &ImageSample,
  label: &str,
) -> Result<BoundingBox, AdaptError> {
  let values: &[f32; 4] = center
    .try_into()
    .map_err(|_| AdaptError::MissingBoxFields {
      found: center.len(),
    })?;
  if !values.iter().all(|v| v.is_finite()) {
    return Err(AdaptError::NonFiniteBox(center.to_vec()));
  }
  if values[2] < 0.0 || values[3] < 0.0 {
    return Err(AdaptError::InvertedBox(*values));
  }
  Ok(CenterBox::from_slice(values).to_pixel_corners(
    sample.original_width as f32,
    sample.original_height as f32,
    canonical_label(label),
  ))
}

/// 标注文件中的真值标签 -> 像素空间边界框
pub fn adapt_ground_truth(raw: &RawLabel) -> Result<BoundingBox, AdaptError> {
  let values: Vec<f32> = [raw.xmin, raw.ymin, raw.xmax, raw.ymax]
    .into_iter()
    .flatten()
    .collect();
  let [xmin, ymin, xmax, ymax] = checked_corners(&values)?;
  if raw.class.trim().is_empty() {
    return Err(AdaptError::UnknownClass(raw.class.clone()));
  }
  Ok(BoundingBox::new(
    xmin,
    ymin,
    xmax,
    ymax,
    canonical_label(&raw.class),
  ))
}

impl<T: WithLabel> AdaptPrediction for DetectResult<T> {
  /// 检测器输出已在像素空间，只做字段校验与标签规范化
  fn adapt(&self, _sample: &ImageSample, _config: &AdapterConfig) -> Adapted {
    let mut adapted = Adapted::default();
    for item in self.items.iter() {
      let result = checked_corners(&item.bbox).and_then(|[xmin, ymin, xmax, ymax]| {
        let label = resolve_class::<T>(&item.class)?;
        let bbox = BoundingBox::new(xmin, ymin, xmax, ymax, canonical_label(label));
        Ok(match item.score {
          Some(score) => bbox.with_confidence(score),
          None => bbox,
        })
      });
      adapted.push(result);
    }
    adapted
  }
}

impl<T: WithLabel> AdaptPrediction for SetPrediction<T> {
  fn adapt(&self, sample: &ImageSample, config: &AdapterConfig) -> Adapted {
    let mut adapted = Adapted::default();
    // 形状来自记录文件，溢出时按形状不匹配拒绝整张图像
    let shape = self.num_classes.checked_add(1).and_then(|columns| {
      let logits = self.num_queries.checked_mul(columns)?;
      let boxes = self.num_queries.checked_mul(4)?;
      Some((columns, logits, boxes))
    });
    let Some((columns, expected_logits, expected_boxes)) = shape else {
      adapted.push(Err(AdaptError::ShapeMismatch {
        expected: usize::MAX,
        found: self.logits.len(),
      }));
      return adapted;
    };

    if self.logits.len() != expected_logits {
      adapted.push(Err(AdaptError::ShapeMismatch {
        expected: expected_logits,
        found: self.logits.len(),
      }));
      return adapted;
    }
    if self.boxes.len() != expected_boxes {
      adapted.push(Err(AdaptError::ShapeMismatch {
        expected: expected_boxes,
        found: self.boxes.len(),
      }));
      return adapted;
    }

    for (logits, center) in self.logits.chunks(columns).zip(self.boxes.chunks(4)) {
      let probs = softmax(logits);
      let Some((class_idx, score)) = argmax(&probs) else {
        continue;
      };
      if !score.is_finite() {
        adapted.push(Err(AdaptError::NonFiniteScore(score)));
        continue;
      }
      // 无目标查询或低置信度查询不是预测
      if class_idx == self.num_classes || score < config.score_threshold {
        continue;
      }
      let result = T::from_label_id(class_idx as u32)
        .ok_or_else(|| AdaptError::UnknownClass(class_idx.to_string()))
        .and_then(|label| center_to_pixels(center, sample, label.to_label_str()))
        .map(|bbox| bbox.with_confidence(score));
      adapted.push(result);
    }
    adapted
  }
}

impl AdaptPrediction for HeadOutput {
  fn adapt(&self, sample: &ImageSample, _config: &AdapterConfig) -> Adapted {
    let mut adapted = Adapted::default();
    let probs = softmax(&self.class_logits);
    let result = match argmax(&probs) {
      Some((_, score)) if !score.is_finite() => Err(AdaptError::NonFiniteScore(score)),
      Some((idx, score)) => VehicleLabel::from_label_id(idx as u32)
        .ok_or_else(|| AdaptError::UnknownClass(idx.to_string()))
        .and_then(|label| center_to_pixels(&self.bbox, sample, label.to_label_str()))
        .map(|bbox| bbox.with_confidence(score)),
      None => Err(AdaptError::ShapeMismatch {
        expected: VehicleLabel::num_labels(),
        found: 0,
      }),
    };
    adapted.push(result);
    adapted
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    label::{CocoLabel, DetrLabel},
    model::DetectItem,
  };
  use image::RgbImage;

  fn sample(width: u32, height: u32) -> ImageSample {
    ImageSample::new("s", RgbImage::new(width, height), vec![])
  }

  #[test]
  fn detector_output_resolves_ids_and_names() {
    let result = DetectResult::<CocoLabel>::new(vec![
      DetectItem {
        bbox: vec![1.0, 2.0, 3.0, 4.0],
        score: Some(0.9),
        class: RawClass::Id(2),
      },
      DetectItem {
        bbox: vec![5.0, 6.0, 7.0, 8.0],
        score: None,
        class: RawClass::Name("Truck".into()),
      },
    ]);
    let adapted = result.adapt(&sample(10, 10), &AdapterConfig::default());
    assert!(adapted.rejected.is_empty());
    assert_eq!(adapted.boxes[0].label, "car");
    assert_eq!(adapted.boxes[0].confidence, Some(0.9));
    assert_eq!(adapted.boxes[1].label, "truck");
  }

  #[test]
  fn malformed_detections_are_skipped_individually() {
    let result = DetectResult::<CocoLabel>::new(vec![
      DetectItem {
        bbox: vec![1.0, 2.0, 3.0],
        score: Some(0.9),
        class: RawClass::Id(2),
      },
      DetectItem {
        bbox: vec![1.0, 2.0, 3.0, 4.0],
        score: Some(0.8),
        class: RawClass::Id(999),
      },
      DetectItem {
        bbox: vec![f32::NAN, 2.0, 3.0, 4.0],
        score: Some(0.8),
        class: RawClass::Id(2),
      },
      DetectItem {
        bbox: vec![0.0, 0.0, 10.0, 10.0],
        score: Some(0.7),
        class: RawClass::Id(2),
      },
    ]);
    let adapted = result.adapt(&sample(10, 10), &AdapterConfig::default());
    assert_eq!(adapted.boxes.len(), 1);
    assert_eq!(adapted.boxes[0].confidence, Some(0.7));
    assert_eq!(adapted.rejected.len(), 3);
    assert_eq!(adapted.rejected[0], AdaptError::MissingBoxFields { found: 3 });
    assert_eq!(adapted.rejected[1], AdaptError::UnknownClass("999".into()));
    // NaN 不等于自身，只比较变体
    assert!(matches!(adapted.rejected[2], AdaptError::NonFiniteBox(_)));
  }

  #[test]
  fn set_prediction_rescales_by_original_size() {
    // 两个查询、两个类别（+ 无目标）
    let logits = vec![
      0.0, 10.0, 0.0, // 类别 1 (bicycle)
      0.0, 0.0, 10.0, // 无目标
    ];
    let boxes = vec![0.5, 0.5, 0.2, 0.4, 0.1, 0.1, 0.1, 0.1];
    let prediction = SetPrediction::<CocoLabel>::new(2, 2, logits, boxes);
    let adapted = prediction.adapt(&sample(1000, 500), &AdapterConfig::default());

    assert!(adapted.rejected.is_empty());
    assert_eq!(adapted.boxes.len(), 1);
    let b = &adapted.boxes[0];
    assert_eq!(b.label, "bicycle");
    assert!((b.xmin - 400.0).abs() < 1e-3);
    assert!((b.ymin - 150.0).abs() < 1e-3);
    assert!((b.xmax - 600.0).abs() < 1e-3);
    assert!((b.ymax - 350.0).abs() < 1e-3);
  }

  #[test]
  fn set_prediction_decodes_category_id_slots() {
    // 91 个槽位 + 无目标；槽位 3 为 car，槽位 12 为空缺编号
    let columns = DetrLabel::num_labels() + 1;
    let mut logits = vec![0.0; 2 * columns];
    logits[3] = 20.0;
    logits[columns + 12] = 20.0;
    let prediction = SetPrediction::<DetrLabel>::new(2, 91, logits, vec![0.5; 8]);
    let adapted = prediction.adapt(&sample(10, 10), &AdapterConfig::default());

    assert_eq!(adapted.boxes.len(), 1);
    assert_eq!(adapted.boxes[0].label, "car");
    assert_eq!(adapted.rejected, vec![AdaptError::UnknownClass("12".into())]);
  }

  #[test]
  fn set_prediction_drops_low_confidence_queries() {
    let logits = vec![0.0, 0.1, 0.0];
    let prediction = SetPrediction::<CocoLabel>::new(1, 2, logits, vec![0.5; 4]);
    let adapted = prediction.adapt(&sample(10, 10), &AdapterConfig::default());
    assert!(adapted.boxes.is_empty());
    assert!(adapted.rejected.is_empty());

    let relaxed = AdapterConfig::default().with_score_threshold(0.0);
    let logits = vec![0.0, 0.1, 0.0];
    let prediction = SetPrediction::<CocoLabel>::new(1, 2, logits, vec![0.5; 4]);
    assert_eq!(prediction.adapt(&sample(10, 10), &relaxed).boxes.len(), 1);
  }

  #[test]
  fn set_prediction_shape_mismatch_rejects_image() {
    let prediction = SetPrediction::<CocoLabel>::new(2, 2, vec![0.0; 5], vec![0.5; 8]);
    let adapted = prediction.adapt(&sample(10, 10), &AdapterConfig::default());
    assert!(adapted.boxes.is_empty());
    assert_eq!(
      adapted.rejected,
      vec![AdaptError::ShapeMismatch {
        expected: 6,
        found: 5
      }]
    );
  }

  #[test]
  fn set_prediction_with_overflowing_shape_is_rejected() {
    let prediction = SetPrediction::<CocoLabel>::new(0, usize::MAX, vec![], vec![]);
    let adapted = prediction.adapt(&sample(10, 10), &AdapterConfig::default());
    assert!(adapted.boxes.is_empty());
    assert_eq!(
      adapted.rejected,
      vec![AdaptError::ShapeMismatch {
        expected: usize::MAX,
        found: 0
      }]
    );

    let prediction = SetPrediction::<CocoLabel>::new(usize::MAX, 2, vec![], vec![]);
    let adapted = prediction.adapt(&sample(10, 10), &AdapterConfig::default());
    assert!(matches!(
      adapted.rejected[..],
      [AdaptError::ShapeMismatch { .. }]
    ));
  }

  #[test]
  fn non_finite_scores_are_rejected() {
    let logits = vec![0.0, f32::NAN, 0.0, 0.0, 10.0, 0.0];
    let prediction = SetPrediction::<CocoLabel>::new(2, 2, logits, vec![0.5; 8]);
    let adapted = prediction.adapt(&sample(10, 10), &AdapterConfig::default());
    assert_eq!(adapted.boxes.len(), 1);
    assert!(matches!(
      adapted.rejected[..],
      [AdaptError::NonFiniteScore(_)]
    ));

    let output = HeadOutput {
      class_logits: vec![0.0, f32::INFINITY, 0.0],
      bbox: [0.5; 4],
    };
    let adapted = output.adapt(&sample(10, 10), &AdapterConfig::default());
    assert!(adapted.boxes.is_empty());
    assert!(matches!(
      adapted.rejected[..],
      [AdaptError::NonFiniteScore(_)]
    ));
  }

  #[test]
  fn head_output_uses_vehicle_table() {
    let output = HeadOutput {
      class_logits: vec![0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0],
      bbox: [0.5, 0.5, 1.0, 1.0],
    };
    let adapted = output.adapt(&sample(100, 50), &AdapterConfig::default());
    assert_eq!(adapted.boxes[0].label, "bus");
    assert_eq!(adapted.boxes[0].corners(), [0.0, 0.0, 100.0, 50.0]);
  }

  #[test]
  fn ground_truth_requires_all_fields() {
    let raw = RawLabel {
      xmin: Some(1.0),
      ymin: Some(1.0),
      xmax: None,
      ymax: Some(2.0),
      class: "Car".into(),
    };
    assert_eq!(
      adapt_ground_truth(&raw),
      Err(AdaptError::MissingBoxFields { found: 3 })
    );
  }
}
