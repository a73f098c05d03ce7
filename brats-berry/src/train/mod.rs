//! HGG/LGG 分级分类器训练.
//!
//! 每个 epoch 依次经过 [`Phase`] 中的各个状态: 按分层 batch 训练, 记录训练指标,
//! 验证, 最后写检查点、日志和损失曲线. 固定 epoch 数后结束, 不支持断点续训,
//! 任何错误都会中止整个训练.
//!
//! 输入是病例数据源 ([`CaseSource`]), 每个病例采样一个 2D patch `(C, H, W)`,
//! 标签为病例级分级 (HGG = 1, LGG = 0).

mod metrics;
mod model;
mod plot;
mod report;
mod schedule;

use std::fs;
use std::io;
use std::path::PathBuf;

use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use log::{debug, info};
use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::augment::ContrastAugment;
use crate::dataset::{fold_split, CaseSource, LoadCaseError};
use crate::sampler::{DataLoader2d, SamplerConfig, StratifiedBatchSampler, StratifyError};
use crate::Idx2d;

pub use metrics::{roc_auc, BinaryMetrics};
pub use model::{bce_with_logits, ClassifierConfig, HggLggClassifier};
pub use plot::{plot_losses, render_losses};
pub use report::{log_loss, log_metrics, loss_line, metrics_block, Split};
pub use schedule::PolyLrScheduler;

/// 训练使用的后端.
pub type TrainBackend = Autodiff<NdArray<f32>>;

/// 验证使用的后端 (无自动微分).
pub type ValidBackend = NdArray<f32>;

type Model = HggLggClassifier<TrainBackend>;

/// 检查点目录名.
pub const CHECKPOINT_DIR: &str = "checkpoints";

/// 损失曲线文件名.
pub const LOSS_PLOT: &str = "loss_plot.png";

const VALID_SEED_OFFSET: u64 = 2;

/// 一次训练的全部配置. 由入口程序显式构造, 训练过程不读取任何环境变量.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// 输出目录: 日志、检查点和损失曲线.
    pub output: PathBuf,

    /// epoch 数.
    pub epochs: usize,

    /// 初始学习率.
    pub learning_rate: f64,

    /// 多项式衰减指数.
    pub lr_exponent: f64,

    /// SGD 动量 (Nesterov).
    pub momentum: f64,

    /// batch 大小.
    pub batch_size: usize,

    /// 交叉验证折数.
    pub n_folds: usize,

    /// 用作验证集的折.
    pub fold: usize,

    /// 2D patch 大小.
    pub patch_size: Idx2d,

    /// 采样时强制包含前景的样本比例.
    pub oversample_foreground_percent: f64,

    /// BCE 正类权重. 为 `None` 时取训练集 `负类数 / 正类数` (LGG / HGG).
    pub pos_weight: Option<f32>,

    /// 随机种子, 决定采样、数据增强和分层打乱.
    pub seed: u64,

    /// 只跑一个 epoch, 且每个阶段只处理第一个 batch.
    pub dry_run: bool,

    /// 网络结构.
    pub model: ClassifierConfig,

    /// 训练时的对比度增强.
    pub augment: ContrastAugment,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("results"),
            epochs: 100,
            learning_rate: 1e-3,
            lr_exponent: 0.9,
            momentum: 0.99,
            batch_size: 5,
            n_folds: 5,
            fold: 0,
            patch_size: (128, 128),
            oversample_foreground_percent: 0.33,
            pos_weight: None,
            seed: 42,
            dry_run: false,
            model: ClassifierConfig::default(),
            augment: ContrastAugment::default(),
        }
    }
}

/// 训练错误.
#[derive(Debug, Error)]
pub enum TrainError {
    /// 加载病例失败.
    #[error(transparent)]
    Load(#[from] LoadCaseError),

    /// 病例没有分级标签.
    #[error("case `{0}` has no grade label")]
    MissingLabel(String),

    /// 折编号越界.
    #[error("fold {fold} out of range for {n_folds} folds")]
    InvalidFold {
        /// 折编号.
        fold: usize,
        /// 折数.
        n_folds: usize,
    },

    /// 训练集或验证集为空.
    #[error("{0} split is empty")]
    EmptySplit(&'static str),

    /// 无法分层划分训练集.
    #[error(transparent)]
    Stratify(#[from] StratifyError),

    /// 读取张量数据失败.
    #[error("tensor data: {0}")]
    Tensor(String),

    /// 保存检查点失败.
    #[error("checkpoint: {0}")]
    Checkpoint(String),

    /// 绘图失败.
    #[error(transparent)]
    Plot(#[from] image::ImageError),

    /// 写日志等 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 训练状态. 括号中为 epoch 编号 (从 1 开始).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// 计算本 epoch 的学习率.
    EpochStart(usize),

    /// 遍历训练 batch.
    TrainBatches(usize),

    /// 训练完成, 记录训练指标.
    TrainComplete(usize),

    /// 遍历验证 batch.
    ValidateBatches(usize),

    /// 写检查点、日志和损失曲线.
    CheckpointAndLog(usize),

    /// 结束.
    Done,
}

/// 一个阶段 (训练或验证) 的结果.
#[derive(Clone, Debug)]
pub struct SplitOutcome {
    /// 平均损失.
    pub loss: f64,

    /// 指标.
    pub metrics: BinaryMetrics,

    /// 处理的样本数.
    pub samples: usize,
}

/// 一个 epoch 的结果.
#[derive(Clone, Debug)]
pub struct EpochRecord {
    /// epoch 编号 (从 1 开始).
    pub epoch: usize,

    /// 学习率.
    pub learning_rate: f64,

    /// 训练结果.
    pub train: SplitOutcome,

    /// 验证结果.
    pub valid: SplitOutcome,
}

/// 训练器. 持有数据、采样器和调度器, 模型和优化器只在 [`Trainer::run`] 内存在.
pub struct Trainer<S> {
    cfg: RunConfig,
    loader: DataLoader2d<S>,
    train_keys: Vec<String>,
    train_labels: Vec<u8>,
    valid_keys: Vec<String>,
    valid_labels: Vec<u8>,
    batches: StratifiedBatchSampler,
    scheduler: PolyLrScheduler,
    pos_weight: f32,
    rng: StdRng,
    device: <TrainBackend as Backend>::Device,
}

impl<S: CaseSource> Trainer<S> {
    /// 按 `cfg.fold` 划分数据源并准备采样器.
    pub fn new(source: S, cfg: RunConfig) -> Result<Self, TrainError> {
        if cfg.fold >= cfg.n_folds {
            return Err(TrainError::InvalidFold {
                fold: cfg.fold,
                n_folds: cfg.n_folds,
            });
        }
        let keys = source.keys().to_vec();
        let (train_idx, valid_idx) = fold_split(keys.len(), cfg.n_folds, cfg.fold);
        let labelled = |idx: Vec<usize>| -> Result<(Vec<String>, Vec<u8>), TrainError> {
            let mut ks = Vec::with_capacity(idx.len());
            let mut ls = Vec::with_capacity(idx.len());
            for i in idx {
                let key = &keys[i];
                let label = source
                    .case_label(key)?
                    .ok_or_else(|| TrainError::MissingLabel(key.clone()))?;
                ks.push(key.clone());
                ls.push(label);
            }
            Ok((ks, ls))
        };
        let (train_keys, train_labels) = labelled(train_idx)?;
        let (valid_keys, valid_labels) = labelled(valid_idx)?;
        if train_keys.is_empty() {
            return Err(TrainError::EmptySplit("training"));
        }
        if valid_keys.is_empty() {
            return Err(TrainError::EmptySplit("validation"));
        }

        let batches = StratifiedBatchSampler::new(&train_labels, cfg.batch_size, true, cfg.seed)?;
        let pos_weight = cfg.pos_weight.unwrap_or_else(|| {
            let pos = train_labels.iter().filter(|l| **l != 0).count();
            let neg = train_labels.len() - pos;
            if pos == 0 || neg == 0 {
                1.0
            } else {
                neg as f32 / pos as f32
            }
        });
        info!(
            "fold {}/{}: {} training cases, {} validation cases, pos_weight = {pos_weight:.4}",
            cfg.fold,
            cfg.n_folds,
            train_keys.len(),
            valid_keys.len()
        );

        let sampler_cfg = SamplerConfig {
            batch_size: cfg.batch_size,
            patch_size: cfg.patch_size,
            final_patch_size: cfg.patch_size,
            oversample_foreground_percent: cfg.oversample_foreground_percent,
            annotated_key: None,
        };
        Ok(Self {
            loader: DataLoader2d::new(source, sampler_cfg, cfg.seed),
            scheduler: PolyLrScheduler::new(cfg.learning_rate, cfg.epochs.max(1), cfg.lr_exponent),
            rng: StdRng::seed_from_u64(cfg.seed.wrapping_add(1)),
            device: Default::default(),
            train_keys,
            train_labels,
            valid_keys,
            valid_labels,
            batches,
            pos_weight,
            cfg,
        })
    }

    /// 实际使用的正类权重.
    #[inline]
    pub fn pos_weight(&self) -> f32 {
        self.pos_weight
    }

    /// 训练集病例键.
    #[inline]
    pub fn train_keys(&self) -> &[String] {
        &self.train_keys
    }

    /// 验证集病例键.
    #[inline]
    pub fn valid_keys(&self) -> &[String] {
        &self.valid_keys
    }

    /// 运行全部 epoch, 返回每个 epoch 的结果.
    pub fn run(mut self) -> Result<Vec<EpochRecord>, TrainError> {
        let output = self.cfg.output.clone();
        fs::create_dir_all(output.join(CHECKPOINT_DIR))?;

        let mut model = Model::new(&self.cfg.model, &self.device);
        let mut optim = SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.cfg.momentum)
                    .with_dampening(0.0)
                    .with_nesterov(true),
            ))
            .init::<TrainBackend, Model>();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();

        let mut history: Vec<EpochRecord> = Vec::new();
        let mut lr = self.cfg.learning_rate;
        let mut train: Option<SplitOutcome> = None;
        let mut valid: Option<SplitOutcome> = None;
        let mut phase = Phase::EpochStart(1);
        if self.cfg.epochs == 0 {
            phase = Phase::Done;
        }

        loop {
            debug!("{phase:?}");
            phase = match phase {
                Phase::EpochStart(e) => {
                    lr = self.scheduler.step(Some(e - 1));
                    Phase::TrainBatches(e)
                }
                Phase::TrainBatches(e) => {
                    let (m, outcome) = self.train_epoch(model, &mut optim, lr)?;
                    model = m;
                    train = Some(outcome);
                    Phase::TrainComplete(e)
                }
                Phase::TrainComplete(e) => {
                    if let Some(t) = &train {
                        log_metrics(&output, Split::Train, e, t.loss, &t.metrics)?;
                    }
                    Phase::ValidateBatches(e)
                }
                Phase::ValidateBatches(e) => {
                    valid = Some(self.validate(&model)?);
                    Phase::CheckpointAndLog(e)
                }
                Phase::CheckpointAndLog(e) => {
                    let (t, v) = match (train.take(), valid.take()) {
                        (Some(t), Some(v)) => (t, v),
                        _ => unreachable!("checkpoint phase reached without both splits"),
                    };
                    log_metrics(&output, Split::Validation, e, v.loss, &v.metrics)?;
                    let ckpt = output.join(CHECKPOINT_DIR).join(format!("model_{e:02}"));
                    model
                        .clone()
                        .save_file(&ckpt, &recorder)
                        .map_err(|err| TrainError::Checkpoint(format!("{err:?}")))?;
                    log_loss(&output, Split::Validation, e, v.loss)?;
                    log_loss(&output, Split::Train, e, t.loss)?;

                    info!(
                        "epoch {e}: lr = {lr:.6}, train loss = {:.4}, validation loss = {:.4}, \
                         validation accuracy = {:.4}",
                        t.loss, v.loss, v.metrics.accuracy
                    );
                    history.push(EpochRecord {
                        epoch: e,
                        learning_rate: lr,
                        train: t,
                        valid: v,
                    });
                    let train_losses: Vec<f64> = history.iter().map(|r| r.train.loss).collect();
                    let valid_losses: Vec<f64> = history.iter().map(|r| r.valid.loss).collect();
                    plot_losses(&train_losses, &valid_losses, output.join(LOSS_PLOT))?;

                    if e >= self.cfg.epochs || self.cfg.dry_run {
                        Phase::Done
                    } else {
                        Phase::EpochStart(e + 1)
                    }
                }
                Phase::Done => break,
            };
        }
        Ok(history)
    }

    /// 一个训练 epoch. 损失为各 batch 平均损失的均值.
    fn train_epoch<O: Optimizer<Model, TrainBackend>>(
        &mut self,
        mut model: Model,
        optim: &mut O,
        lr: f64,
    ) -> Result<(Model, SplitOutcome), TrainError> {
        let mut total = 0.0f64;
        let mut n_batches = 0usize;
        let mut preds = Vec::with_capacity(self.train_keys.len());
        let mut labels = Vec::with_capacity(self.train_keys.len());

        for group in self.batches.iter() {
            let keys: Vec<String> = group.iter().map(|&i| self.train_keys[i].clone()).collect();
            let ys: Vec<u8> = group.iter().map(|&i| self.train_labels[i]).collect();
            let mut batch = self.loader.generate_batch_for(keys)?;
            for sample in batch.data.axis_iter_mut(Axis(0)) {
                self.cfg.augment.apply(sample, &mut self.rng);
            }

            let x = images_to_tensor::<TrainBackend>(&batch.data, &self.device);
            let y = labels_to_tensor::<TrainBackend>(&ys, &self.device);
            let logits = model.forward(x);
            let loss = bce_with_logits(logits.clone(), y, self.pos_weight).mean();
            let loss_value = first_value(loss.clone().detach().into_data())?;
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);

            debug!("train batch {n_batches}: keys = {:?}, loss = {loss_value:.6}", batch.keys);
            total += loss_value as f64;
            n_batches += 1;
            preds.extend(hard_predictions(logits.detach().into_data())?);
            labels.extend(ys);
            if self.cfg.dry_run {
                break;
            }
        }

        let loss = if n_batches == 0 { 0.0 } else { total / n_batches as f64 };
        Ok((
            model,
            SplitOutcome {
                loss,
                metrics: BinaryMetrics::compute(&labels, &preds),
                samples: labels.len(),
            },
        ))
    }

    /// 验证. 损失为不加权 BCE 之和除以样本数.
    ///
    /// 每个 epoch 都用同一个种子采样, 因此验证输入在各 epoch 间相同.
    fn validate(&mut self, model: &Model) -> Result<SplitOutcome, TrainError> {
        let seed = self.cfg.seed.wrapping_add(VALID_SEED_OFFSET);
        let train_rng = self.loader.swap_rng(StdRng::seed_from_u64(seed));
        let outcome = self.validate_batches(model);
        self.loader.swap_rng(train_rng);
        outcome
    }

    fn validate_batches(&mut self, model: &Model) -> Result<SplitOutcome, TrainError> {
        let model = model.valid();
        let mut total = 0.0f64;
        let mut preds = Vec::with_capacity(self.valid_keys.len());
        let mut labels = Vec::with_capacity(self.valid_keys.len());

        let order: Vec<usize> = (0..self.valid_keys.len()).collect();
        for chunk in order.chunks(self.cfg.batch_size) {
            let keys: Vec<String> = chunk.iter().map(|&i| self.valid_keys[i].clone()).collect();
            let ys: Vec<u8> = chunk.iter().map(|&i| self.valid_labels[i]).collect();
            let batch = self.loader.generate_batch_for(keys)?;

            let x = images_to_tensor::<ValidBackend>(&batch.data, &self.device);
            let y = labels_to_tensor::<ValidBackend>(&ys, &self.device);
            let logits = model.forward(x);
            let loss = bce_with_logits(logits.clone(), y, 1.0).sum();
            total += first_value(loss.into_data())? as f64;
            preds.extend(hard_predictions(logits.into_data())?);
            labels.extend(ys);
            if self.cfg.dry_run {
                break;
            }
        }

        let samples = labels.len();
        Ok(SplitOutcome {
            loss: if samples == 0 { 0.0 } else { total / samples as f64 },
            metrics: BinaryMetrics::compute(&labels, &preds),
            samples,
        })
    }
}

/// 用 `cfg` 在 `source` 上训练.
pub fn train<S: CaseSource>(source: S, cfg: RunConfig) -> Result<Vec<EpochRecord>, TrainError> {
    Trainer::new(source, cfg)?.run()
}

fn images_to_tensor<B: Backend>(data: &Array4<f32>, device: &B::Device) -> Tensor<B, 4> {
    let (b, c, h, w) = data.dim();
    let values: Vec<f32> = data.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [b, c, h, w]), device)
}

fn labels_to_tensor<B: Backend>(labels: &[u8], device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = labels.iter().map(|&l| f32::from(l)).collect();
    Tensor::from_data(TensorData::new(values, [labels.len(), 1]), device)
}

fn to_f32_vec(data: TensorData) -> Result<Vec<f32>, TrainError> {
    data.to_vec::<f32>()
        .map_err(|e| TrainError::Tensor(format!("{e:?}")))
}

fn first_value(data: TensorData) -> Result<f32, TrainError> {
    Ok(to_f32_vec(data)?.first().copied().unwrap_or(f32::NAN))
}

/// logit 大于 0 (即概率大于 0.5) 预测为正类.
fn hard_predictions(logits: TensorData) -> Result<Vec<u8>, TrainError> {
    Ok(to_f32_vec(logits)?
        .into_iter()
        .map(|v| u8::from(v > 0.0))
        .collect())
}
