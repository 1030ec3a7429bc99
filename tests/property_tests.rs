// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/property_tests.rs - 性质测试
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

//! 基于 proptest 的性质测试

use std::collections::HashSet;

use proptest::prelude::*;
use shanan_eval::{
  bbox::BoundingBox,
  metrics::{ImageEvaluation, MetricsConfig, calculate_metrics, match_image},
};

fn arb_box() -> impl Strategy<Value = BoundingBox> {
  (
    0.0f32..200.0,
    0.0f32..200.0,
    1.0f32..80.0,
    1.0f32..80.0,
    prop::sample::select(vec!["car", "bus", "truck"]),
    prop::option::of(0.0f32..=1.0),
  )
    .prop_map(|(x, y, w, h, label, confidence)| {
      let bbox = BoundingBox::new(x, y, x + w, y + h, label);
      match confidence {
        Some(c) => bbox.with_confidence(c),
        None => bbox,
      }
    })
}

fn arb_image() -> impl Strategy<Value = ImageEvaluation> {
  (
    prop::collection::vec(arb_box(), 0..8),
    prop::collection::vec(arb_box(), 0..8),
  )
    .prop_map(|(predictions, ground_truths)| ImageEvaluation::new(predictions, ground_truths))
}

proptest! {
  #[test]
  fn prop_iou_symmetric_and_bounded(a in arb_box(), b in arb_box()) {
    let ab = a.iou(&b);
    let ba = b.iou(&a);
    prop_assert!((ab - ba).abs() < 1e-9);
    prop_assert!((0.0..=1.0).contains(&ab), "IoU out of range: {}", ab);
  }

  #[test]
  fn prop_iou_with_self_is_one(a in arb_box()) {
    prop_assert!((a.iou(&a) - 1.0).abs() < 1e-9);
  }

  #[test]
  fn prop_center_corner_round_trip(
    a in arb_box(),
    width in 100u32..2000,
    height in 100u32..2000,
  ) {
    let (w, h) = (width as f32, height as f32);
    let back = a.to_normalized_center(w, h).to_pixel_corners(w, h, a.label.clone());
    for (x, y) in a.corners().iter().zip(back.corners().iter()) {
      prop_assert!((x - y).abs() < 1e-2, "{:?} != {:?}", a.corners(), back.corners());
    }
    prop_assert_eq!(back.label, a.label);
  }

  #[test]
  fn prop_precision_recall_in_unit_range(
    images in prop::collection::vec(arb_image(), 0..5),
    threshold in 0.05f64..=1.0,
  ) {
    let config = MetricsConfig::default().with_iou_threshold(threshold);
    let result = calculate_metrics(&images, &config).unwrap();
    prop_assert!((0.0..=1.0).contains(&result.precision));
    prop_assert!((0.0..=1.0).contains(&result.recall));
    prop_assert!((0.0..=1.0).contains(&result.map));

    let predictions: usize = images.iter().map(|i| i.predictions.len()).sum();
    let ground_truths: usize = images.iter().map(|i| i.ground_truths.len()).sum();
    prop_assert_eq!(result.true_positives + result.false_positives, predictions);
    prop_assert_eq!(result.true_positives + result.false_negatives, ground_truths);
  }

  #[test]
  fn prop_matching_is_injective(
    predictions in prop::collection::vec(arb_box(), 0..10),
    ground_truths in prop::collection::vec(arb_box(), 0..10),
  ) {
    let matches = match_image(&predictions, &ground_truths, 0.3);
    prop_assert_eq!(matches.len(), predictions.len());

    let mut seen = HashSet::new();
    for m in matches.iter().filter(|m| m.is_true_positive()) {
      let gt = m.ground_truth.unwrap();
      prop_assert!(seen.insert(gt), "ground truth {} matched twice", gt);
      prop_assert_eq!(&predictions[m.prediction].label, &ground_truths[gt].label);
      prop_assert!(m.iou >= 0.3);
    }
  }

  #[test]
  fn prop_perfect_predictions_score_one(ground_truths in prop::collection::vec(arb_box(), 1..8)) {
    let predictions = ground_truths
      .iter()
      .cloned()
      .map(|b| b.with_confidence(0.9))
      .collect();
    let images = vec![ImageEvaluation::new(predictions, ground_truths)];
    let result = calculate_metrics(&images, &MetricsConfig::default()).unwrap();
    prop_assert!((result.recall - 1.0).abs() < 1e-9);
    prop_assert!((result.precision - 1.0).abs() < 1e-9);
    prop_assert!((result.map - 1.0).abs() < 1e-9);
  }
}

#[test]
fn empty_ground_truth_yields_zero() {
  let images = vec![ImageEvaluation::new(
    vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0, "car").with_confidence(0.5)],
    vec![],
  )];
  let result = calculate_metrics(&images, &MetricsConfig::default()).unwrap();
  assert_eq!(result.recall, 0.0);
  assert_eq!(result.precision, 0.0);
  assert_eq!(result.map, 0.0);
}
