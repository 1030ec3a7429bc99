// 该文件是 Shanan （山南西风） 项目的一部分。
// src/metrics/ap.rs - 平均精度
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

//! 平均精度（AP）与 mAP

const RECALL_LEVELS: usize = 101;

/// 101 点插值：每个召回率水平取召回率不低于它的最大精度
pub fn interpolate_precision(precisions: &[f64], recalls: &[f64]) -> Vec<f64> {
  (0..RECALL_LEVELS)
    .map(|i| {
      let level = i as f64 / (RECALL_LEVELS - 1) as f64;
      precisions
        .iter()
        .zip(recalls)
        .filter(|&(_, &r)| r >= level)
        .map(|(&p, _)| p)
        .fold(0.0f64, f64::max)
    })
    .collect()
}

/// 由按置信度降序排列的 TP 标记构建精度-召回曲线
pub fn precision_recall_curve(
  is_true_positive: &[bool],
  num_ground_truth: usize,
) -> (Vec<f64>, Vec<f64>) {
  let mut precisions = Vec::with_capacity(is_true_positive.len());
  let mut recalls = Vec::with_capacity(is_true_positive.len());
  let (mut tp, mut fp) = (0usize, 0usize);

  for &hit in is_true_positive {
    if hit {
      tp += 1;
    } else {
      fp += 1;
    }
    precisions.push(tp as f64 / (tp + fp) as f64);
    recalls.push(if num_ground_truth > 0 {
      tp as f64 / num_ground_truth as f64
    } else {
      0.0
    });
  }

  (precisions, recalls)
}

pub fn calculate_ap(precisions: &[f64], recalls: &[f64]) -> f64 {
  if precisions.is_empty() || recalls.is_empty() {
    return 0.0;
  }
  let interpolated = interpolate_precision(precisions, recalls);
  interpolated.iter().sum::<f64>() / interpolated.len() as f64
}

pub fn calculate_map(class_aps: &[f64]) -> f64 {
  if class_aps.is_empty() {
    return 0.0;
  }
  class_aps.iter().sum::<f64>() / class_aps.len() as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn perfect_curve_gives_ap_one() {
    let (p, r) = precision_recall_curve(&[true, true, true, true], 4);
    assert!((calculate_ap(&p, &r) - 1.0).abs() < 1e-10);
  }

  #[test]
  fn empty_curve_gives_zero() {
    assert_eq!(calculate_ap(&[], &[]), 0.0);
    assert_eq!(calculate_map(&[]), 0.0);
  }

  #[test]
  fn half_recall_halves_ap() {
    let (p, r) = precision_recall_curve(&[true], 2);
    // 召回率 0.00..=0.50 共 51 个水平精度为 1
    assert!((calculate_ap(&p, &r) - 51.0 / 101.0).abs() < 1e-10);
  }

  #[test]
  fn false_positive_first_lowers_precision() {
    let (p, r) = precision_recall_curve(&[false, true], 1);
    assert_eq!(p, vec![0.0, 0.5]);
    assert_eq!(r, vec![0.0, 1.0]);
    assert!((calculate_ap(&p, &r) - 0.5).abs() < 1e-10);
  }

  #[test]
  fn map_is_mean_of_class_aps() {
    assert!((calculate_map(&[0.8, 0.9, 0.75, 0.85]) - 0.825).abs() < 1e-10);
  }
}
