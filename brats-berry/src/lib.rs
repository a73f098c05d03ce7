#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 BraTS 脑肿瘤 MRI 数据集的标签转换、2D 切片采样和 HGG/LGG 分级分类训练.
//!
//! # 注意
//!
//! 1. 原始 BraTS 标签为 0, 1, 2, 4, 训练与采样内部一律使用连续标签 0, 1, 2, 3,
//!   提交前再转换回去. 见 [`remap`].
//! 2. 数据在内存中的格式统一为 `(z, H, W)` (单个体积) 或 `(C, z, H, W)` (病例),
//!   与 nifti 文件中的 `[W, H, z]` 互为转置.
//! 3. 在非期望情况下 (例如采样器内部不变量被破坏), 程序会直接 panic.
//!
//! # 功能
//!
//! ### 标签转换与后处理 ✅
//!
//! 单文件与整个目录的正反向转换, 目录转换可借助 `rayon` 并行, 单个文件失败不影响其他文件.
//! 后处理把很少的增强肿瘤体素改为坏死.
//!
//! 实现位于 `brats-berry/src/remap.rs` 和 `brats-berry/src/post_proc.rs`.
//!
//! ### 数据集 ✅
//!
//! 原始 BraTS 目录 (`HGG/`, `LGG/`) 和预处理后的 npz 目录都实现了 [`dataset::CaseSource`].
//! 预处理时为每个类别/区域记录前景体素坐标.
//!
//! 实现位于 `brats-berry/src/dataset`.
//!
//! ### 2D 切片采样 ✅
//!
//! 按固定比例强制采样前景, 包围盒越界部分图像填 0, 分割填 -1.
//! 另有按标签分层的 batch 划分.
//!
//! 实现位于 `brats-berry/src/sampler`.
//!
//! ### 分级分类训练 ✅
//!
//! 基于 `burn` 的小型 CNN, 多项式学习率衰减, 每个 epoch 写日志、检查点和损失曲线.
//! 需要 `train` feature.
//!
//! 实现位于 `brats-berry/src/train`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引 `(z, h, w)`.
pub type Idx3d = (usize, usize, usize);

/// 四维索引 `(c, z, h, w)`.
pub type Idx4d = (usize, usize, usize, usize);

/// 3D MRI nii 文件基础数据结构.
mod data;

pub use data::{LabelVolume, NiftiHeaderAttr, ScanVolume, VolumeError};

pub mod archive;
pub mod augment;
pub mod consts;
pub mod dataset;
pub mod post_proc;
pub mod remap;
pub mod sampler;

cfg_if::cfg_if! {
    if #[cfg(feature = "train")] {
        pub mod train;
    }
}

pub mod prelude;
