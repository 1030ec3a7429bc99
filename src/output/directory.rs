// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory.rs - 图像输出目录
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

use std::{
  fs,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum OutputDirectoryError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输出目录路径为空")]
  EmptyPath,
  #[error("输出路径不是目录: {0}")]
  NotADirectory(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 单个、固定的图像输出目录
///
/// 每次运行开始时调用 [`OutputDirectory::prepare`]：目录不存在则创建，
/// 存在则删除其中的文件，不触碰目录以外的任何路径。
#[derive(Debug, Clone)]
pub struct OutputDirectory {
  directory: PathBuf,
}

impl FromUrlWithScheme for OutputDirectory {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for OutputDirectory {
  type Error = OutputDirectoryError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputDirectoryError::SchemeMismatch);
    }
    Self::new(uri.path())
  }
}

impl OutputDirectory {
  pub fn new(directory: impl Into<PathBuf>) -> Result<Self, OutputDirectoryError> {
    let directory = directory.into();
    if directory.as_os_str().is_empty() {
      return Err(OutputDirectoryError::EmptyPath);
    }
    Ok(Self { directory })
  }

  pub fn path(&self) -> &Path {
    &self.directory
  }

  /// 第 `index` 张可视化图像的文件路径
  pub fn image_path(&self, index: usize) -> PathBuf {
    self.directory.join(format!("image_{}.png", index))
  }

  /// 创建目录并清空其中上一轮留下的文件
  pub fn prepare(&self) -> Result<(), OutputDirectoryError> {
    if !self.directory.exists() {
      info!("创建输出目录: {}", self.directory.display());
      fs::create_dir_all(&self.directory)?;
      return Ok(());
    }
    if !self.directory.is_dir() {
      return Err(OutputDirectoryError::NotADirectory(self.directory.clone()));
    }

    let mut removed = 0usize;
    for entry in fs::read_dir(&self.directory)? {
      let path = entry?.path();
      if path.is_file() {
        fs::remove_file(&path)?;
        removed += 1;
      } else {
        warn!("输出目录中存在子目录，已保留: {}", path.display());
      }
    }
    info!(
      "已清空输出目录 {}，删除 {} 个文件",
      self.directory.display(),
      removed
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prepare_creates_missing_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let out = OutputDirectory::new(tmp.path().join("imgs")).unwrap();
    out.prepare().unwrap();
    assert!(out.path().is_dir());
  }

  #[test]
  fn prepare_removes_stale_files_only_inside() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("imgs");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("image_7.png"), b"stale").unwrap();
    fs::write(tmp.path().join("keep.txt"), b"keep").unwrap();

    let out = OutputDirectory::new(&dir).unwrap();
    out.prepare().unwrap();

    assert!(dir.is_dir());
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    assert!(tmp.path().join("keep.txt").exists());
  }

  #[test]
  fn image_paths_are_sequential() {
    let out = OutputDirectory::new("imgs").unwrap();
    assert_eq!(out.image_path(3), PathBuf::from("imgs/image_3.png"));
  }

  #[test]
  fn from_url_requires_folder_scheme() {
    let url = Url::parse("folder:///tmp/imgs").unwrap();
    assert_eq!(
      OutputDirectory::from_url(&url).unwrap().path(),
      Path::new("/tmp/imgs")
    );
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      OutputDirectory::from_url(&url),
      Err(OutputDirectoryError::SchemeMismatch)
    ));
  }
}
