// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/recorded.rs - 预测记录回放模型
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

use std::{collections::HashMap, fs, marker::PhantomData, path::Path};

use serde::{Deserialize, de::DeserializeOwned};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  dataset::ImageSample,
  label::WithLabel,
  model::{DetectItem, DetectResult, Model, ModelError, SetPrediction},
};

const RECORDED_SCHEME: &str = "recorded";

#[derive(Debug, Clone, Deserialize)]
struct DetectorRecord {
  items: Vec<DetectItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct SetRecord {
  num_queries: usize,
  num_classes: usize,
  logits: Vec<f32>,
  boxes: Vec<f32>,
}

fn load_records<R: DeserializeOwned>(path: &Path) -> Result<HashMap<String, R>, ModelError> {
  info!("加载预测记录: {}", path.display());
  let content = fs::read_to_string(path)?;
  let records: HashMap<String, R> = serde_json::from_str(&content)?;
  debug!("共 {} 条预测记录", records.len());
  Ok(records)
}

fn check_scheme(url: &Url) -> Result<(), ModelError> {
  if url.scheme() != RECORDED_SCHEME {
    return Err(ModelError::ModelPathError(format!(
      "模型路径必须使用 {} 方案",
      RECORDED_SCHEME
    )));
  }
  Ok(())
}

/// 回放外部运行时导出的检测器输出（角点形式，像素坐标）
///
/// 记录文件是以样本标识为键的 JSON 对象：
/// `{"a.jpg": {"items": [{"bbox": [x0, y0, x1, y1], "score": 0.9, "class": 2}]}}`
#[derive(Debug, Clone)]
pub struct RecordedDetector<T> {
  records: HashMap<String, Vec<DetectItem>>,
  _label: PhantomData<T>,
}

impl<T> RecordedDetector<T> {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let records = load_records::<DetectorRecord>(path.as_ref())?
      .into_iter()
      .map(|(id, record)| (id, record.items))
      .collect();
    Ok(Self::from_records(records))
  }

  pub fn from_records(records: HashMap<String, Vec<DetectItem>>) -> Self {
    Self {
      records,
      _label: PhantomData,
    }
  }
}

impl<T> FromUrlWithScheme for RecordedDetector<T> {
  const SCHEME: &'static str = RECORDED_SCHEME;
}

impl<T> FromUrl for RecordedDetector<T> {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url)?;
    Self::open(url.path())
  }
}

impl<T: WithLabel> Model for RecordedDetector<T> {
  type Input = ImageSample;
  type Output = DetectResult<T>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let items = self
      .records
      .get(&input.id)
      .ok_or_else(|| ModelError::MissingRecord(input.id.clone()))?;
    Ok(DetectResult::new(items.clone()))
  }
}

/// 回放集合预测模型的原始张量（归一化中心点形式）
///
/// `{"a.jpg": {"num_queries": 2, "num_classes": 80, "logits": [...], "boxes": [...]}}`
#[derive(Debug, Clone)]
pub struct RecordedSetPredictor<T> {
  records: HashMap<String, SetRecord>,
  _label: PhantomData<T>,
}

impl<T> RecordedSetPredictor<T> {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    Ok(Self {
      records: load_records(path.as_ref())?,
      _label: PhantomData,
    })
  }

  pub fn insert(&mut self, id: impl Into<String>, prediction: SetPrediction<T>) {
    self.records.insert(
      id.into(),
      SetRecord {
        num_queries: prediction.num_queries,
        num_classes: prediction.num_classes,
        logits: prediction.logits,
        boxes: prediction.boxes,
      },
    );
  }
}

impl<T> Default for RecordedSetPredictor<T> {
  fn default() -> Self {
    Self {
      records: HashMap::new(),
      _label: PhantomData,
    }
  }
}

impl<T> FromUrlWithScheme for RecordedSetPredictor<T> {
  const SCHEME: &'static str = RECORDED_SCHEME;
}

impl<T> FromUrl for RecordedSetPredictor<T> {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url)?;
    Self::open(url.path())
  }
}

impl<T: WithLabel> Model for RecordedSetPredictor<T> {
  type Input = ImageSample;
  type Output = SetPrediction<T>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let record = self
      .records
      .get(&input.id)
      .ok_or_else(|| ModelError::MissingRecord(input.id.clone()))?;
    Ok(SetPrediction::new(
      record.num_queries,
      record.num_classes,
      record.logits.clone(),
      record.boxes.clone(),
    ))
  }
}
