// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dataset.rs - 清单数据集
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

use image::{ImageReader, RgbImage};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, adapter::adapt_ground_truth, bbox::BoundingBox};

/// 数据集产生的一个样本，产生后只读
#[derive(Debug, Clone)]
pub struct ImageSample {
  /// 样本标识，清单数据集中为图像文件名
  pub id: String,
  pub image: RgbImage,
  pub original_width: u32,
  pub original_height: u32,
  /// 原始图像像素空间中的真值框
  pub ground_truth: Vec<BoundingBox>,
  /// 未经变换的原始图像文件，可视化时优先使用
  pub source: Option<PathBuf>,
}

impl ImageSample {
  pub fn new(id: impl Into<String>, image: RgbImage, ground_truth: Vec<BoundingBox>) -> Self {
    let (original_width, original_height) = image.dimensions();
    Self {
      id: id.into(),
      image,
      original_width,
      original_height,
      ground_truth,
      source: None,
    }
  }

  pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
    self.source = Some(source.into());
    self
  }
}

/// 标注文件中的一个真值标签，坐标缺失时由适配器拒绝
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLabel {
  pub xmin: Option<f32>,
  pub ymin: Option<f32>,
  pub xmax: Option<f32>,
  pub ymax: Option<f32>,
  #[serde(alias = "label_class")]
  pub class: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
  #[serde(default)]
  id: Option<String>,
  image: PathBuf,
  #[serde(default)]
  labels: Vec<RawLabel>,
}

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("清单第 {line} 行解析失败: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
  #[error("图像读取错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("查询参数无效: {0}")]
  InvalidQuery(String),
}

/// 可按下标读取的数据集，训练循环每个 epoch 遍历一次
pub trait Dataset {
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 读取第 `index` 个样本，越界或读取失败时为 `None`
  fn sample(&self, index: usize) -> Option<ImageSample>;

  fn samples(&self) -> Box<dyn Iterator<Item = ImageSample> + '_> {
    self.samples_in((0..self.len()).collect())
  }

  /// 按给定顺序遍历，读取失败的样本被跳过
  fn samples_in(&self, order: Vec<usize>) -> Box<dyn Iterator<Item = ImageSample> + '_> {
    Box::new(order.into_iter().filter_map(move |index| self.sample(index)))
  }
}

impl Dataset for Vec<ImageSample> {
  fn len(&self) -> usize {
    self.as_slice().len()
  }

  fn sample(&self, index: usize) -> Option<ImageSample> {
    self.as_slice().get(index).cloned()
  }
}

/// JSON Lines 清单数据集
///
/// 每行一个对象：`{"image": "a.jpg", "labels": [{"xmin": .., "class": "Car"}]}`，
/// 图像路径相对清单所在目录。图像在遍历时才解码。
#[derive(Debug, Clone)]
pub struct ManifestDataset {
  root: PathBuf,
  entries: Vec<ManifestEntry>,
}

impl FromUrlWithScheme for ManifestDataset {
  const SCHEME: &'static str = "manifest";
}

impl FromUrl for ManifestDataset {
  type Error = DatasetError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DatasetError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let mut limit = None;
    for (k, v) in url.query_pairs() {
      if k == "limit" {
        let n = v
          .parse::<usize>()
          .map_err(|_| DatasetError::InvalidQuery(format!("limit={}", v)))?;
        limit = Some(n);
      }
    }

    Self::open(url.path(), limit)
  }
}

impl ManifestDataset {
  pub fn open(path: impl AsRef<Path>, limit: Option<usize>) -> Result<Self, DatasetError> {
    let path = path.as_ref();
    info!("读取数据集清单: {}", path.display());
    let content = fs::read_to_string(path)?;
    let root = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_default();

    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<ManifestEntry>(line) {
        Ok(entry) => entries.push(entry),
        Err(source) => {
          let err = DatasetError::ParseError {
            line: idx + 1,
            source,
          };
          warn!("跳过清单条目: {}", err);
        }
      }
      if limit.is_some_and(|n| entries.len() >= n) {
        debug!("已达到样本数量上限 {:?}", limit);
        break;
      }
    }

    info!("数据集共 {} 个样本", entries.len());
    Ok(Self { root, entries })
  }

  /// 只保留前 `limit` 个样本
  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    if let Some(n) = limit {
      self.entries.truncate(n);
    }
    self
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn load(&self, entry: &ManifestEntry) -> Result<ImageSample, DatasetError> {
    let path = if entry.image.is_absolute() {
      entry.image.clone()
    } else {
      self.root.join(&entry.image)
    };
    let image = ImageReader::open(&path)?.decode()?.into_rgb8();

    let ground_truth = entry
      .labels
      .iter()
      .filter_map(|raw| match adapt_ground_truth(raw) {
        Ok(bbox) => Some(bbox),
        Err(e) => {
          warn!("样本 {} 的真值标签无效，已跳过: {}", path.display(), e);
          None
        }
      })
      .collect();

    let id = entry.id.clone().unwrap_or_else(|| {
      entry
        .image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
    });

    Ok(ImageSample::new(id, image, ground_truth).with_source(path))
  }

  pub fn iter(&self) -> ManifestIter<'_> {
    ManifestIter {
      dataset: self,
      position: 0,
    }
  }
}

impl Dataset for ManifestDataset {
  fn len(&self) -> usize {
    self.entries.len()
  }

  fn sample(&self, index: usize) -> Option<ImageSample> {
    let entry = self.entries.get(index)?;
    match self.load(entry) {
      Ok(sample) => Some(sample),
      Err(e) => {
        warn!("无法读取样本 {}: {}", entry.image.display(), e);
        None
      }
    }
  }

  fn samples(&self) -> Box<dyn Iterator<Item = ImageSample> + '_> {
    Box::new(self.iter())
  }
}

pub struct ManifestIter<'a> {
  dataset: &'a ManifestDataset,
  position: usize,
}

impl Iterator for ManifestIter<'_> {
  type Item = ImageSample;

  fn next(&mut self) -> Option<Self::Item> {
    while self.position < self.dataset.entries.len() {
      self.position += 1;
      if let Some(sample) = self.dataset.sample(self.position - 1) {
        return Some(sample);
      }
    }
    None
  }
}
