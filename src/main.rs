// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 评估与训练命令行程序
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_eval::{
  adapter::{AdaptPrediction, AdapterConfig},
  dataset::{ImageSample, ManifestDataset},
  factory::{Device, FactoryOptions, LoadedModel, ModelKind, load_model},
  metrics::MetricsConfig,
  model::Model,
  output::Discard,
  task::{EvalConfig, EvaluateTask, Task, TrainConfig, TrainTask},
};

/// 检测模型评估与训练
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型名: yolov5, detr, mamba_train, mamba_eval
  #[arg(long, value_name = "MODEL")]
  pub model: String,
  /// 数据集清单，例如 manifest:///data/val.jsonl?limit=500
  #[arg(long, value_name = "DATASET")]
  pub dataset: Url,
  /// 回放模型的预测记录文件
  #[arg(long, value_name = "FILE")]
  pub predictions: Option<PathBuf>,
  /// 可视化输出目录
  #[arg(long, value_name = "OUTPUT", default_value = "folder:///imgs")]
  pub output: Url,
  /// 保存带边界框的图像
  #[arg(long)]
  pub save_images: bool,
  /// 最多使用的样本数
  #[arg(long, value_name = "COUNT")]
  pub limit: Option<usize>,
  #[arg(long, default_value = "1000", value_name = "COUNT")]
  pub epochs: usize,
  #[arg(long, default_value = "0.01", value_name = "RATE")]
  pub learning_rate: f64,
  /// 训练时每个 epoch 打乱样本顺序
  #[arg(long)]
  pub shuffle: bool,
  /// 打乱顺序使用的随机种子
  #[arg(long, default_value = "42", value_name = "SEED")]
  pub seed: u64,
  /// 判定为 TP 的最小 IoU (0.0 - 1.0]
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub iou_threshold: f64,
  /// 集合预测保留查询的最低概率
  #[arg(long, default_value = "0.7", value_name = "THRESHOLD")]
  pub score_threshold: f32,
  /// 可视化时绘制的预测类别，all 表示全部
  #[arg(long, default_value = "car", value_name = "CLASS")]
  pub monitor: String,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: String,
}

#[cfg(feature = "save_image_file")]
fn run_visualized<M, P, E>(
  task: EvaluateTask,
  dataset: &ManifestDataset,
  model: M,
  args: &Args,
) -> Result<()>
where
  M: Model<Input = ImageSample, Output = P, Error = E>,
  P: AdaptPrediction,
  E: std::error::Error + Sync + Send + 'static,
{
  use shanan_eval::output::{OutputDirectory, Visualizer, draw::Draw};
  use shanan_eval::FromUrl;

  let draw = match &args.font {
    Some(font) => Draw::without_font().with_font_file(font)?,
    None => Draw::default(),
  };
  let monitored = (args.monitor != "all").then_some(args.monitor.as_str());
  let visualizer = Visualizer::new(
    OutputDirectory::from_url(&args.output)?,
    draw.with_monitored(monitored),
  );
  let report = task.run_task(dataset.iter(), model, visualizer)?;
  info!(
    "评估完成: {} 张图像, {} 个预测被拒绝, {} 张图像渲染失败",
    report.images, report.rejected_predictions, report.skipped_renders
  );
  Ok(())
}

#[cfg(not(feature = "save_image_file"))]
fn run_visualized<M, P, E>(
  task: EvaluateTask,
  dataset: &ManifestDataset,
  model: M,
  _args: &Args,
) -> Result<()>
where
  M: Model<Input = ImageSample, Output = P, Error = E>,
  P: AdaptPrediction,
  E: std::error::Error + Sync + Send + 'static,
{
  warn!("未启用 save_image_file 特性，不保存图像");
  run_plain(task, dataset, model)
}

fn run_plain<M, P, E>(task: EvaluateTask, dataset: &ManifestDataset, model: M) -> Result<()>
where
  M: Model<Input = ImageSample, Output = P, Error = E>,
  P: AdaptPrediction,
  E: std::error::Error + Sync + Send + 'static,
{
  let report = task.run_task(dataset.iter(), model, Discard)?;
  info!(
    "评估完成: {} 张图像, {} 个预测被拒绝",
    report.images, report.rejected_predictions
  );
  Ok(())
}

fn evaluate<M, P, E>(
  model: M,
  dataset: &ManifestDataset,
  args: &Args,
  config: EvalConfig,
) -> Result<()>
where
  M: Model<Input = ImageSample, Output = P, Error = E>,
  P: AdaptPrediction,
  E: std::error::Error + Sync + Send + 'static,
{
  if args.save_images {
    run_visualized(EvaluateTask::new(config.with_visualize(true)), dataset, model, args)
  } else {
    run_plain(EvaluateTask::new(config), dataset, model)
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("使用模型: {}", args.model);
  info!("数据集: {}", args.dataset);

  let kind: ModelKind = args.model.parse()?;
  let device: Device = args.device.parse()?;
  let options = FactoryOptions::new(args.dataset.clone())
    .with_predictions(args.predictions.clone())
    .with_device(device)
    .with_limit(args.limit);
  let (model, dataset) = load_model(kind, &options)?;
  if dataset.is_empty() {
    warn!("数据集为空");
  }

  let metrics = MetricsConfig::default().with_iou_threshold(args.iou_threshold);
  let adapter = AdapterConfig::default().with_score_threshold(args.score_threshold);
  let eval_config = EvalConfig::default()
    .with_metrics(metrics.clone())
    .with_adapter(adapter.clone());

  match model {
    LoadedModel::Detector(model) => evaluate(model, &dataset, &args, eval_config)?,
    LoadedModel::SetPredictor(model) => evaluate(model, &dataset, &args, eval_config)?,
    LoadedModel::Trainable(mut head) => {
      if args.save_images {
        warn!("训练模式不保存图像");
      }
      let config = TrainConfig::default()
        .with_epochs(args.epochs)
        .with_learning_rate(args.learning_rate)
        .with_metrics(metrics)
        .with_adapter(adapter)
        .with_shuffle(args.shuffle.then_some(args.seed));
      let report = TrainTask::new(config).run_task(&dataset, &mut head)?;
      if let Some(last) = report.last() {
        info!("最终损失: {}", last.loss);
      }
    }
  }

  Ok(())
}
