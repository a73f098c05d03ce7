//! 数据目录的默认位置.

use std::env;
use std::path::PathBuf;

use brats_berry::dataset::home_dataset_dir_with;

fn from_env_or_home(var: &str, fallback: &[&str]) -> PathBuf {
    match env::var(var) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => home_dataset_dir_with(fallback).unwrap_or_else(|| fallback.iter().collect()),
    }
}

/// 获取预测结果根目录.
///
/// 1. 若环境变量 `$BRATS_RESULTS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/results/Dataset032_BraTS2018`.
pub fn results_dir_from_env_or_home() -> PathBuf {
    from_env_or_home("BRATS_RESULTS_DIR", &["results", "Dataset032_BraTS2018"])
}

/// 获取原始 BraTS 2018 训练集目录 (含 `HGG/` 和 `LGG/`).
///
/// 1. 若环境变量 `$BRATS_TRAIN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/BraTS_2018/train`.
pub fn train_dir_from_env_or_home() -> PathBuf {
    from_env_or_home("BRATS_TRAIN_DIR", &["BraTS_2018", "train"])
}

/// 获取训练框架原始数据集目录.
///
/// 1. 若环境变量 `$BRATS_RAW_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/raw/Dataset032_BraTS2018`.
pub fn raw_dir_from_env_or_home() -> PathBuf {
    from_env_or_home("BRATS_RAW_DIR", &["raw", "Dataset032_BraTS2018"])
}
