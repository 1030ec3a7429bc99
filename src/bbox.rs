// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bbox.rs - 边界框
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

/// 单个边界框，角点形式 [xmin, ymin, xmax, ymax]
///
/// 坐标可以是像素坐标，也可以是归一化坐标，取决于产生它的模块。
/// 评估阶段的所有边界框都位于原始图像的像素空间中。
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
  /// 规范化后的小写类别名
  pub label: String,
  /// 置信度，真值框为 None
  pub confidence: Option<f32>,
}

/// 归一化中心点形式 (cx, cy, w, h)，取值相对于模型输入分辨率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterBox {
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
}

impl BoundingBox {
  pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, label: impl Into<String>) -> Self {
    Self {
      xmin,
      ymin,
      xmax,
      ymax,
      label: label.into(),
      confidence: None,
    }
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = Some(confidence);
    self
  }

  pub fn width(&self) -> f32 {
    self.xmax - self.xmin
  }

  pub fn height(&self) -> f32 {
    self.ymax - self.ymin
  }

  pub fn area(&self) -> f64 {
    let width = (self.xmax as f64 - self.xmin as f64).max(0.0);
    let height = (self.ymax as f64 - self.ymin as f64).max(0.0);
    width * height
  }

  /// 坐标均为有限值且 xmin <= xmax, ymin <= ymax
  pub fn is_well_formed(&self) -> bool {
    self.corners().iter().all(|v| v.is_finite()) && self.xmin <= self.xmax && self.ymin <= self.ymax
  }

  pub fn corners(&self) -> [f32; 4] {
    [self.xmin, self.ymin, self.xmax, self.ymax]
  }

  /// 计算两个边界框的 IoU，联合面积为 0 时返回 0
  pub fn iou(&self, other: &BoundingBox) -> f64 {
    let x_left = self.xmin.max(other.xmin) as f64;
    let y_top = self.ymin.max(other.ymin) as f64;
    let x_right = self.xmax.min(other.xmax) as f64;
    let y_bottom = self.ymax.min(other.ymax) as f64;

    if x_right < x_left || y_bottom < y_top {
      return 0.0;
    }

    let intersection = (x_right - x_left) * (y_bottom - y_top);
    let union = self.area() + other.area() - intersection;
    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// 像素角点 -> 归一化中心点，使用原始图像尺寸
  pub fn to_normalized_center(&self, image_width: f32, image_height: f32) -> CenterBox {
    CenterBox {
      cx: (self.xmin + self.xmax) / 2.0 / image_width,
      cy: (self.ymin + self.ymax) / 2.0 / image_height,
      w: self.width() / image_width,
      h: self.height() / image_height,
    }
  }
}

impl CenterBox {
  pub fn from_slice(values: &[f32; 4]) -> Self {
    Self {
      cx: values[0],
      cy: values[1],
      w: values[2],
      h: values[3],
    }
  }

  pub fn to_array(self) -> [f32; 4] {
    [self.cx, self.cy, self.w, self.h]
  }

  /// 归一化中心点 -> 原始图像像素空间的角点形式
  ///
  /// 缩放必须使用原始（缩放前）图像尺寸，而不是模型输入分辨率。
  pub fn to_pixel_corners(
    self,
    image_width: f32,
    image_height: f32,
    label: impl Into<String>,
  ) -> BoundingBox {
    let half_w = self.w / 2.0;
    let half_h = self.h / 2.0;
    BoundingBox::new(
      (self.cx - half_w) * image_width,
      (self.cy - half_h) * image_height,
      (self.cx + half_w) * image_width,
      (self.cy + half_h) * image_height,
      label,
    )
  }
}
