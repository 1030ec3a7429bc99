// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 渲染输出
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

use crate::{adapter::Adapted, dataset::ImageSample};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;

  /// 开始新一轮运行前调用，用于清理上一轮的输出
  fn prepare(&self) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<Frame, Output, R: Render<Frame, Output>> Render<Frame, Output> for &R {
  type Error = R::Error;

  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error> {
    (**self).render_result(frame, result)
  }

  fn prepare(&self) -> Result<(), Self::Error> {
    (**self).prepare()
  }
}

mod directory;
pub use self::directory::{OutputDirectory, OutputDirectoryError};

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod visualizer;
#[cfg(feature = "save_image_file")]
pub use self::visualizer::{VisualizeError, Visualizer};

/// 不产生任何输出
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Render<ImageSample, Adapted> for Discard {
  type Error = std::convert::Infallible;

  fn render_result(&self, _frame: &ImageSample, _result: &Adapted) -> Result<(), Self::Error> {
    Ok(())
  }
}
