// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 边界框绘制
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

// 真值框与预测框的绘制

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::{bbox::BoundingBox, label::canonical_label, output::VisualizeError};

/// 真值框颜色（绿色）
pub const GROUND_TRUTH_COLOR: [u8; 3] = [0, 255, 0];
/// 预测框颜色（红色）
pub const PREDICTION_COLOR: [u8; 3] = [255, 0, 0];

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10;
const DEFAULT_MONITORED_CLASS: &str = "car";
const DEFAULT_FONT_PATHS: [&str; 3] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  /// 只绘制该类别的预测，None 表示绘制全部预测
  monitored: Option<String>,
}

fn load_font(path: &Path) -> Result<FontArc, VisualizeError> {
  let font_error = |e: &dyn std::fmt::Display| {
    VisualizeError::FontError(format!("{}: {}", path.display(), e))
  };
  let data = std::fs::read(path).map_err(|e| font_error(&e))?;
  FontArc::try_from_vec(data).map_err(|e| font_error(&e))
}

impl Default for Draw {
  fn default() -> Self {
    let font = DEFAULT_FONT_PATHS
      .iter()
      .find_map(|p| load_font(Path::new(p)).ok());
    if font.is_none() {
      warn!("未找到默认字体，可视化时不绘制文本标签");
    }

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      monitored: Some(DEFAULT_MONITORED_CLASS.to_string()),
    }
  }
}

impl Draw {
  /// 不加载字体、只绘制边框
  pub fn without_font() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      monitored: Some(DEFAULT_MONITORED_CLASS.to_string()),
    }
  }

  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, VisualizeError> {
    self.font = Some(load_font(path.as_ref())?);
    Ok(self)
  }

  pub fn with_monitored(mut self, monitored: Option<&str>) -> Self {
    self.monitored = monitored.map(canonical_label);
    self
  }

  pub fn monitored(&self) -> Option<&str> {
    self.monitored.as_deref()
  }

  fn is_monitored(&self, bbox: &BoundingBox) -> bool {
    self
      .monitored
      .as_ref()
      .is_none_or(|class| *class == bbox.label)
  }

  /// 在图像上绘制一个两像素宽的矩形边框及其标签
  ///
  /// 返回是否实际绘制（完全落在图像外的框不绘制）。
  pub fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    bbox: &BoundingBox,
    color: [u8; 3],
  ) -> Result<bool, VisualizeError> {
    if !bbox.is_well_formed() {
      return Err(VisualizeError::MalformedBox(bbox.corners()));
    }
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return Ok(false);
    }

    let x_min = (bbox.xmin.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.ymin.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.xmax.ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox.ymax.ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return Ok(false);
    }

    let width = (x_max - x_min + 1) as u32;
    let height = (y_max - y_min + 1) as u32;
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(width, height), Rgb(color));
    // 绘制第二个边框以增加可见度
    if width > 2 && height > 2 {
      draw_hollow_rect_mut(
        image,
        Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2),
        Rgb(color),
      );
    }

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(color),
        x_min + LABEL_OFFSET,
        y_min + LABEL_OFFSET,
        PxScale::from(self.font_size),
        font,
        &bbox.label,
      );
    }

    Ok(true)
  }

  /// 绘制全部真值框与受监控类别的预测框
  ///
  /// 真值框无效时整张图像失败；无效的预测框只跳过该框。
  pub fn draw_detections(
    &self,
    image: &mut RgbImage,
    ground_truths: &[BoundingBox],
    predictions: &[BoundingBox],
  ) -> Result<usize, VisualizeError> {
    let mut drawn = 0;
    for gt in ground_truths {
      if self.draw_bbox_with_label(image, gt, GROUND_TRUTH_COLOR)? {
        drawn += 1;
      }
    }

    for pred in predictions.iter().filter(|p| self.is_monitored(p)) {
      match self.draw_bbox_with_label(image, pred, PREDICTION_COLOR) {
        Ok(true) => drawn += 1,
        Ok(false) => {}
        Err(e) => debug!("跳过预测框: {}", e),
      }
    }

    Ok(drawn)
  }
}
