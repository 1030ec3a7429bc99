// 该文件是 Shanan （山南西风） 项目的一部分。
// src/metrics/matching.rs - 预测与真值匹配
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

use crate::bbox::BoundingBox;

/// 一条预测的匹配结果
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
  /// 预测在输入中的下标
  pub prediction: usize,
  /// 匹配到的真值下标
  pub ground_truth: Option<usize>,
  pub iou: f64,
  pub confidence: f64,
}

impl Match {
  pub fn is_true_positive(&self) -> bool {
    self.ground_truth.is_some()
  }
}

/// 缺失置信度的预测按 1.0 处理
pub(crate) fn confidence_of(bbox: &BoundingBox) -> f64 {
  bbox.confidence.map(f64::from).unwrap_or(1.0)
}

/// 单张图像上的贪心匹配
///
/// 预测按置信度降序访问（稳定排序，置信度相同时保持输入顺序），
/// 每个预测与同类别、尚未匹配、IoU 最高的真值配对，IoU 相同取下标较小者。
/// 每个真值最多匹配一次，每个预测最多匹配一次。
/// 返回的顺序与访问顺序一致。
pub fn match_image(
  predictions: &[BoundingBox],
  ground_truths: &[BoundingBox],
  iou_threshold: f64,
) -> Vec<Match> {
  let mut order: Vec<usize> = (0..predictions.len()).collect();
  order.sort_by(|&a, &b| {
    confidence_of(&predictions[b]).total_cmp(&confidence_of(&predictions[a]))
  });

  let mut matched_gt = vec![false; ground_truths.len()];
  let mut matches = Vec::with_capacity(predictions.len());

  for pred_idx in order {
    let pred = &predictions[pred_idx];

    let mut best_iou = 0.0;
    let mut best_gt = None;
    for (gt_idx, gt) in ground_truths.iter().enumerate() {
      if matched_gt[gt_idx] || gt.label != pred.label {
        continue;
      }
      let iou = pred.iou(gt);
      if iou > best_iou {
        best_iou = iou;
        best_gt = Some(gt_idx);
      }
    }

    let ground_truth = best_gt.filter(|_| best_iou >= iou_threshold);
    if let Some(gt_idx) = ground_truth {
      matched_gt[gt_idx] = true;
    }

    matches.push(Match {
      prediction: pred_idx,
      ground_truth,
      iou: best_iou,
      confidence: confidence_of(pred),
    });
  }

  matches
}

#[cfg(test)]
mod tests {
  use super::*;

  fn car(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> BoundingBox {
    BoundingBox::new(xmin, ymin, xmax, ymax, "car")
  }

  #[test]
  fn one_ground_truth_matches_once() {
    let predictions = vec![car(0.0, 0.0, 10.0, 10.0), car(0.0, 0.0, 9.0, 9.0)];
    let ground_truths = vec![car(0.0, 0.0, 10.0, 10.0)];

    let matches = match_image(&predictions, &ground_truths, 0.5);
    assert_eq!(matches.len(), 2);
    assert_eq!(matches.iter().filter(|m| m.is_true_positive()).count(), 1);
    assert_eq!(matches[0].prediction, 0);
    assert_eq!(matches[0].ground_truth, Some(0));
  }

  #[test]
  fn higher_confidence_wins() {
    let predictions = vec![
      car(0.0, 0.0, 10.0, 10.0).with_confidence(0.5),
      car(0.0, 0.0, 9.0, 9.0).with_confidence(0.9),
    ];
    let ground_truths = vec![car(0.0, 0.0, 10.0, 10.0)];

    let matches = match_image(&predictions, &ground_truths, 0.5);
    assert_eq!(matches[0].prediction, 1);
    assert!(matches[0].is_true_positive());
    assert!(!matches[1].is_true_positive());
  }

  #[test]
  fn equal_iou_prefers_lower_ground_truth_index() {
    let predictions = vec![car(0.0, 0.0, 10.0, 10.0)];
    let ground_truths = vec![car(0.0, 0.0, 10.0, 10.0), car(0.0, 0.0, 10.0, 10.0)];
    let matches = match_image(&predictions, &ground_truths, 0.5);
    assert_eq!(matches[0].ground_truth, Some(0));
  }

  #[test]
  fn labels_must_agree() {
    let predictions = vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0, "bus")];
    let ground_truths = vec![car(0.0, 0.0, 10.0, 10.0)];
    let matches = match_image(&predictions, &ground_truths, 0.5);
    assert!(!matches[0].is_true_positive());
    assert_eq!(matches[0].iou, 0.0);
  }

  #[test]
  fn nan_confidence_keeps_a_total_order() {
    let predictions: Vec<_> = (0..40)
      .map(|i| {
        let confidence = if i % 3 == 0 { f32::NAN } else { i as f32 / 40.0 };
        car(0.0, 0.0, 10.0, 10.0).with_confidence(confidence)
      })
      .collect();
    let ground_truths = vec![car(0.0, 0.0, 10.0, 10.0)];

    let matches = match_image(&predictions, &ground_truths, 0.5);
    assert_eq!(matches.len(), 40);
    assert_eq!(matches.iter().filter(|m| m.is_true_positive()).count(), 1);
    let finite: Vec<f64> = matches
      .iter()
      .map(|m| m.confidence)
      .filter(|c| c.is_finite())
      .collect();
    assert!(finite.windows(2).all(|w| w[0] >= w[1]));
  }

  #[test]
  fn below_threshold_is_false_positive() {
    let predictions = vec![car(0.0, 0.0, 10.0, 10.0)];
    let ground_truths = vec![car(5.0, 5.0, 15.0, 15.0)];
    let matches = match_image(&predictions, &ground_truths, 0.5);
    assert!(!matches[0].is_true_positive());
    assert!(matches[0].iou > 0.0);
  }
}
