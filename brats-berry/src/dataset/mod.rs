//! 数据集操作.
//!
//! 一个病例 ([`Case`]) 由多通道图像、分割标签和属性 ([`CaseProperties`]) 组成.
//! 属性中最重要的是 [`ClassLocations`]: 对每个类别/区域, 记录若干前景体素的坐标,
//! 2D 切片采样器依靠它来快速定位含前景的切片.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{MAX_LOCATIONS_PER_KEY, MIN_LOCATION_COVERAGE};
use crate::data::VolumeError;
use crate::remap::RemapError;
use crate::Idx4d;

pub mod brats;
mod npz_folder;

pub use brats::{BratsFolder, DatasetJson};
pub use npz_folder::NpzCaseFolder;

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 列出 `dir` 下满足 `keep` 的条目名, 按字典序排列.
fn list_names<F>(dir: &Path, keep: F) -> io::Result<Vec<String>>
where
    F: Fn(&fs::FileType, &str) -> bool,
{
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        if let Some(name) = entry.file_name().to_str() {
            if keep(&ty, name) {
                ans.push(name.to_owned());
            }
        }
    }
    ans.sort_unstable();
    Ok(ans)
}

/// 列出 `dir` 下以 `suffix` 结尾的普通文件名 (不含目录部分), 按字典序排列.
pub fn subfiles<P: AsRef<Path>>(dir: P, suffix: &str) -> io::Result<Vec<String>> {
    list_names(dir.as_ref(), |ty, name| ty.is_file() && name.ends_with(suffix))
}

/// 列出 `dir` 下以 `prefix` 开头的子目录名, 按字典序排列.
pub fn subdirs<P: AsRef<Path>>(dir: P, prefix: &str) -> io::Result<Vec<String>> {
    list_names(dir.as_ref(), |ty, name| ty.is_dir() && name.starts_with(prefix))
}

/// 类别或区域的键.
///
/// 采样时需要区分 "某个前景类别/区域" 和 "所有已标注区域", 后者只在存在
/// ignore 标签时出现. 用枚举把这一区别显式化.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RegionKey {
    /// 单个标签.
    Class(i16),

    /// 多个标签的并集, 例如 BraTS 的全肿瘤 (1, 2, 3).
    Region(Vec<i16>),

    /// 除 ignore 标签外的所有标签 (包括背景), 即所有已标注体素.
    Annotated(Vec<i16>),
}

impl RegionKey {
    /// 由全部标签和 ignore 标签构造 [`RegionKey::Annotated`].
    pub fn annotated<I: IntoIterator<Item = i16>>(all_labels: I, ignore_label: i16) -> Self {
        Self::Annotated(
            all_labels
                .into_iter()
                .filter(|l| *l != ignore_label)
                .collect(),
        )
    }

    /// 是否为 "所有已标注体素" 键?
    #[inline]
    pub fn is_annotated(&self) -> bool {
        matches!(self, Self::Annotated(_))
    }

    /// 体素值 `label` 是否属于该类别/区域?
    #[inline]
    pub fn contains(&self, label: i16) -> bool {
        match self {
            Self::Class(c) => *c == label,
            Self::Region(ls) | Self::Annotated(ls) => ls.contains(&label),
        }
    }
}

/// 每个类别/区域的前景体素坐标表. 坐标格式为 `(c, z, h, w)`, 其中 `z` 为切片索引.
///
/// 键的顺序即插入顺序, 随机选择时以此为准.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassLocations {
    entries: Vec<(RegionKey, Vec<Idx4d>)>,
}

impl ClassLocations {
    /// 创建空表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入 (或覆盖) 键 `key` 的坐标列表.
    pub fn insert(&mut self, key: RegionKey, locations: Vec<Idx4d>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = locations,
            None => self.entries.push((key, locations)),
        }
    }

    /// 获取键 `key` 的坐标列表.
    #[inline]
    pub fn get(&self, key: &RegionKey) -> Option<&[Idx4d]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// 按插入顺序迭代所有键.
    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &RegionKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// 键个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空表?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 至少记录了一个坐标的键, 按插入顺序排列.
    pub fn eligible(&self) -> Vec<&RegionKey> {
        self.entries
            .iter()
            .filter_map(|(k, v)| (!v.is_empty()).then_some(k))
            .collect()
    }

    /// 键 `key` 在第 `z` 层切片上的坐标, 投影为 `(h, w)`.
    pub fn in_slice(&self, key: &RegionKey, z: usize) -> Vec<(usize, usize)> {
        self.get(key)
            .unwrap_or_default()
            .iter()
            .filter_map(|&(_, lz, h, w)| (lz == z).then_some((h, w)))
            .collect()
    }

    /// 从 `(c, z, h, w)` 格式的分割中为每个 `keys` 收集前景坐标.
    ///
    /// 每个键最多保留 [`MAX_LOCATIONS_PER_KEY`] 个坐标, 但至少保留
    /// [`MIN_LOCATION_COVERAGE`] 比例的坐标, 以免大目标被过度稀疏化.
    /// 保留的坐标保持行优先顺序. 结果由 `seed` 唯一确定.
    pub fn sample_from_seg(seg: ArrayView4<i16>, keys: &[RegionKey], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ans = Self::new();
        for key in keys {
            let all: Vec<Idx4d> = seg
                .indexed_iter()
                .filter_map(|(pos, v)| key.contains(*v).then_some(pos))
                .collect();
            let n = all.len();
            let target = n
                .min(MAX_LOCATIONS_PER_KEY)
                .max((n as f64 * MIN_LOCATION_COVERAGE).ceil() as usize);
            let locations = if target >= n {
                all
            } else {
                let mut picked = rand::seq::index::sample(&mut rng, n, target).into_vec();
                picked.sort_unstable();
                picked.into_iter().map(|i| all[i]).collect()
            };
            ans.insert(key.clone(), locations);
        }
        ans
    }
}

/// 病例属性.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseProperties {
    /// 各类别/区域的前景坐标.
    pub class_locations: ClassLocations,

    /// 体素分辨率 (z, H, W), 以毫米为单位.
    pub spacing: [f64; 3],

    /// 病例级分类标签 (例如 HGG = 1, LGG = 0). 没有时为 `None`.
    pub label: Option<u8>,
}

/// 一个病例: 多通道图像 `(C, z, H, W)` 和分割 `(1, z, H, W)`.
///
/// 每个训练步内只读.
#[derive(Clone, Debug)]
pub struct Case {
    /// 病例标识.
    pub id: String,

    /// 多通道图像.
    pub data: Array4<f32>,

    /// 分割标签.
    pub seg: Array4<i16>,

    /// 属性.
    pub properties: CaseProperties,
}

impl Case {
    /// 水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.data.dim().1
    }

    /// 通道个数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }
}

/// 加载病例错误.
#[derive(Debug, Error)]
pub enum LoadCaseError {
    /// 数据源中不存在该病例.
    #[error("no such case `{0}`")]
    MissingCase(String),

    /// 图像和分割形状不一致.
    #[error("case `{0}`: image and segmentation shapes differ")]
    ShapeMismatch(String),

    /// 读写 nii 文件错误.
    #[error(transparent)]
    Volume(#[from] VolumeError),

    /// 标签转换错误.
    #[error(transparent)]
    Remap(#[from] RemapError),

    /// 读取 npz 文件错误.
    #[error("npz: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    /// 写入 npz 文件错误.
    #[error("npz: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    /// 属性文件编解码错误.
    #[error("properties: {0}")]
    Properties(#[from] bincode::Error),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 可按键随机访问的病例数据源.
pub trait CaseSource {
    /// 所有病例键, 顺序固定.
    fn keys(&self) -> &[String];

    /// 加载键为 `key` 的病例.
    fn load_case(&self, key: &str) -> Result<Case, LoadCaseError>;

    /// 获取病例级分类标签. 默认实现会加载整个病例, 实现者应尽量覆盖它.
    fn case_label(&self, key: &str) -> Result<Option<u8>, LoadCaseError> {
        Ok(self.load_case(key)?.properties.label)
    }

    /// 病例个数.
    #[inline]
    fn len(&self) -> usize {
        self.keys().len()
    }

    /// 是否没有病例?
    #[inline]
    fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// 内存中的病例集合.
#[derive(Debug, Default)]
pub struct InMemoryCases {
    keys: Vec<String>,
    cases: HashMap<String, Case>,
}

impl InMemoryCases {
    /// 从病例迭代器创建. 重复的 `id` 以后者为准.
    pub fn from_cases<I: IntoIterator<Item = Case>>(cases: I) -> Self {
        let mut ans = Self::default();
        for case in cases {
            if !ans.cases.contains_key(&case.id) {
                ans.keys.push(case.id.clone());
            }
            ans.cases.insert(case.id.clone(), case);
        }
        ans
    }
}

impl CaseSource for InMemoryCases {
    #[inline]
    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn load_case(&self, key: &str) -> Result<Case, LoadCaseError> {
        self.cases
            .get(key)
            .cloned()
            .ok_or_else(|| LoadCaseError::MissingCase(key.to_owned()))
    }

    fn case_label(&self, key: &str) -> Result<Option<u8>, LoadCaseError> {
        self.cases
            .get(key)
            .map(|c| c.properties.label)
            .ok_or_else(|| LoadCaseError::MissingCase(key.to_owned()))
    }
}

/// 将 `0..n` 按第 `fold` 折 (共 `n_folds` 折) 划分为 (训练集, 验证集) 索引.
///
/// 索引 `i` 当且仅当 `i % n_folds == fold` 时进入验证集. 划分完全确定.
///
/// # 注意
///
/// `n_folds` 为 0 或 `fold >= n_folds` 时程序 panic.
pub fn fold_split(n: usize, n_folds: usize, fold: usize) -> (Vec<usize>, Vec<usize>) {
    assert!(fold < n_folds, "fold {fold} out of range for {n_folds} folds");
    (0..n).partition(|i| i % n_folds != fold)
}
