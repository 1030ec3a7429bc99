// 该文件是 Shanan （山南西风） 项目的一部分。
// src/label.rs - 类别表
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

/// 类别编号与类别名之间的双向映射
///
/// 每个标签空间都由一张固定的表给出，训练与评估共用同一张表，
/// 不在各处做零散的字符串比较。
pub trait WithLabel: Sized + fmt::Debug {
  fn to_label_str(&self) -> &'static str;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;

  /// 按名字查找，大小写不敏感
  fn from_label_str(name: &str) -> Option<Self>;

  /// 表中的类别数量
  fn num_labels() -> usize;
}

/// 统一的比较用标签：去除首尾空白并转为小写
pub fn canonical_label(name: &str) -> String {
  name.trim().to_lowercase()
}

/// 车辆类别表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleLabel {
  Car,
  Ambulance,
  Bicycle,
  Bus,
  Helicopter,
  Motorcycle,
  Truck,
  Van,
}

const VEHICLE_CLASSES: [(VehicleLabel, &str); 8] = [
  (VehicleLabel::Car, "Car"),
  (VehicleLabel::Ambulance, "Ambulance"),
  (VehicleLabel::Bicycle, "Bicycle"),
  (VehicleLabel::Bus, "Bus"),
  (VehicleLabel::Helicopter, "Helicopter"),
  (VehicleLabel::Motorcycle, "Motorcycle"),
  (VehicleLabel::Truck, "Truck"),
  (VehicleLabel::Van, "Van"),
];

impl VehicleLabel {
  pub fn all() -> impl Iterator<Item = VehicleLabel> {
    VEHICLE_CLASSES.iter().map(|(label, _)| *label)
  }
}

impl WithLabel for VehicleLabel {
  fn to_label_str(&self) -> &'static str {
    VEHICLE_CLASSES[self.to_label_id() as usize].1
  }

  fn to_label_id(&self) -> u32 {
    *self as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    VEHICLE_CLASSES.get(id as usize).map(|(label, _)| *label)
  }

  fn from_label_str(name: &str) -> Option<Self> {
    let name = name.trim();
    VEHICLE_CLASSES
      .iter()
      .find(|(_, n)| n.eq_ignore_ascii_case(name))
      .map(|(label, _)| *label)
  }

  fn num_labels() -> usize {
    VEHICLE_CLASSES.len()
  }
}

impl fmt::Display for VehicleLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.to_label_str())
  }
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// COCO 检测器的类别，编号即 `COCO_CLASSES` 中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CocoLabel(u32);

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> &'static str {
    COCO_CLASSES[self.0 as usize]
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Option<Self> {
    ((id as usize) < COCO_CLASSES.len()).then_some(CocoLabel(id))
  }

  fn from_label_str(name: &str) -> Option<Self> {
    let name = name.trim();
    COCO_CLASSES
      .iter()
      .position(|n| n.eq_ignore_ascii_case(name))
      .map(|idx| CocoLabel(idx as u32))
  }

  fn num_labels() -> usize {
    COCO_CLASSES.len()
  }
}

/// COCO 原始类别编号空间中未使用的编号
const UNUSED_SLOT: &str = "N/A";

/// 集合预测器（DETR）的类别槽位，下标即 COCO 标注中的类别编号
pub const DETR_SLOTS: [&str; 91] = [
  UNUSED_SLOT,
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  UNUSED_SLOT,
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  UNUSED_SLOT,
  "backpack",
  "umbrella",
  UNUSED_SLOT,
  UNUSED_SLOT,
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  UNUSED_SLOT,
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  UNUSED_SLOT,
  "dining table",
  UNUSED_SLOT,
  UNUSED_SLOT,
  "toilet",
  UNUSED_SLOT,
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  UNUSED_SLOT,
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 集合预测器的类别，编号为 COCO 原始类别编号，空缺编号不是合法类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetrLabel(u32);

impl WithLabel for DetrLabel {
  fn to_label_str(&self) -> &'static str {
    DETR_SLOTS[self.0 as usize]
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Option<Self> {
    DETR_SLOTS
      .get(id as usize)
      .filter(|name| **name != UNUSED_SLOT)
      .map(|_| DetrLabel(id))
  }

  fn from_label_str(name: &str) -> Option<Self> {
    let name = name.trim();
    if name.eq_ignore_ascii_case(UNUSED_SLOT) {
      return None;
    }
    DETR_SLOTS
      .iter()
      .position(|n| n.eq_ignore_ascii_case(name))
      .map(|idx| DetrLabel(idx as u32))
  }

  /// 槽位数，包括空缺编号
  fn num_labels() -> usize {
    DETR_SLOTS.len()
  }
}
