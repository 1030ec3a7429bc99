// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/visualizer.rs - 可视化输出
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

use std::cell::Cell;
use std::path::PathBuf;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl,
  adapter::Adapted,
  dataset::ImageSample,
  output::{OutputDirectory, OutputDirectoryError, Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum VisualizeError {
  #[error("无法读取图像 {path}: {reason}")]
  UnreadableImage { path: PathBuf, reason: String },
  #[error("边界框无效: {0:?}")]
  MalformedBox([f32; 4]),
  #[error("字体加载错误: {0}")]
  FontError(String),
  #[error("图像保存错误: {0}")]
  Save(#[from] image::ImageError),
  #[error("输出目录错误: {0}")]
  Directory(#[from] OutputDirectoryError),
}

/// 把真值框与预测框画到样本图像的副本上，并按序号保存到输出目录
pub struct Visualizer {
  directory: OutputDirectory,
  draw: Draw,
  counter: Cell<usize>,
}

impl FromUrl for Visualizer {
  type Error = VisualizeError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    Ok(Self::new(OutputDirectory::from_url(uri)?, Draw::default()))
  }
}

impl Visualizer {
  pub fn new(directory: OutputDirectory, draw: Draw) -> Self {
    Self {
      directory,
      draw,
      counter: Cell::new(0),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn directory(&self) -> &OutputDirectory {
    &self.directory
  }

  fn next_index(&self) -> usize {
    let index = self.counter.get();
    self.counter.set(index + 1);
    index
  }

  fn source_image(sample: &ImageSample) -> Result<RgbImage, VisualizeError> {
    match &sample.source {
      Some(path) => {
        let unreadable = |reason: String| VisualizeError::UnreadableImage {
          path: path.clone(),
          reason,
        };
        let image = ImageReader::open(path)
          .map_err(|e| unreadable(e.to_string()))?
          .decode()
          .map_err(|e| unreadable(e.to_string()))?;
        Ok(image.into_rgb8())
      }
      None => Ok(sample.image.clone()),
    }
  }
}

impl Render<ImageSample, Adapted> for Visualizer {
  type Error = VisualizeError;

  fn render_result(&self, frame: &ImageSample, result: &Adapted) -> Result<(), Self::Error> {
    // 失败的样本同样占用一个序号，文件名与样本顺序一一对应
    let index = self.next_index();
    let mut image = Self::source_image(frame)?;
    let drawn = self
      .draw
      .draw_detections(&mut image, &frame.ground_truth, &result.boxes)?;

    let path = self.directory.image_path(index);
    image.save(&path)?;
    debug!("保存可视化结果 {} ({} 个框)", path.display(), drawn);
    Ok(())
  }

  fn prepare(&self) -> Result<(), Self::Error> {
    self.counter.set(0);
    self.directory.prepare()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bbox::BoundingBox;

  #[test]
  fn saves_sequentially_numbered_images() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}", dir.path().join("out").display())).unwrap();
    let visualizer = Visualizer::from_url(&url).unwrap().with_draw(Draw::without_font());
    visualizer.prepare().unwrap();

    let sample = ImageSample::new(
      "s",
      RgbImage::new(30, 30),
      vec![BoundingBox::new(2.0, 2.0, 20.0, 20.0, "car")],
    );
    for _ in 0..3 {
      visualizer.render_result(&sample, &Adapted::default()).unwrap();
    }
    for i in 0..3 {
      assert!(visualizer.directory().image_path(i).is_file());
    }
  }

  #[test]
  fn malformed_ground_truth_skips_image() {
    let dir = tempfile::tempdir().unwrap();
    let directory = OutputDirectory::new(dir.path()).unwrap();
    let visualizer = Visualizer::new(directory, Draw::without_font());
    let sample = ImageSample::new(
      "s",
      RgbImage::new(30, 30),
      vec![BoundingBox::new(20.0, 2.0, 2.0, 20.0, "car")],
    );
    assert!(matches!(
      visualizer.render_result(&sample, &Adapted::default()),
      Err(VisualizeError::MalformedBox(_))
    ));
    assert!(!visualizer.directory().image_path(0).exists());
  }
}
