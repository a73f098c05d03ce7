//! 原始 BraTS 2018 目录结构的读取与导入.
//!
//! 原始训练集按分级分为 `HGG/` 和 `LGG/` 两个目录, 每个病例一个子目录
//! `Brats18_*`, 其中包含 `{case}_{t1,t1ce,t2,flair,seg}.nii.gz` 五个文件.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    subdirs, Case, CaseProperties, CaseSource, ClassLocations, LoadCaseError, RegionKey,
};
use crate::consts::contiguous::{ENHANCING_TUMOR, TUMOR_CORE, WHOLE_TUMOR};
use crate::consts::{Grade, CHANNEL_NAMES, MODALITIES, NII_GZ};
use crate::data::{LabelVolume, NiftiHeaderAttr, ScanVolume};
use crate::remap::{self, RemapError};

/// 病例子目录名前缀.
pub const CASE_PREFIX: &str = "Brats18";

/// 前景坐标采样使用的固定种子.
const LOCATION_SEED: u64 = 1234;

/// BraTS 区域训练使用的三个区域: 全肿瘤, 肿瘤核心, 增强肿瘤.
pub fn brats_regions() -> Vec<RegionKey> {
    vec![
        RegionKey::Region(WHOLE_TUMOR.to_vec()),
        RegionKey::Region(TUMOR_CORE.to_vec()),
        RegionKey::Region(ENHANCING_TUMOR.to_vec()),
    ]
}

/// 病例目录下某个模态 (或 `seg`) 的文件路径.
#[inline]
pub fn modality_path(case_dir: &Path, case: &str, modality: &str) -> PathBuf {
    case_dir.join(format!("{case}_{modality}{NII_GZ}"))
}

#[derive(Debug)]
struct Entry {
    dir: PathBuf,
    grade: Grade,
}

/// 原始 BraTS 训练集目录. 每次 [`CaseSource::load_case`] 都会从 nii 文件读取.
///
/// 分割标签在加载时转换为连续标签, 病例级标签为分级 (HGG = 1, LGG = 0).
#[derive(Debug)]
pub struct BratsFolder {
    keys: Vec<String>,
    entries: HashMap<String, Entry>,
    regions: Vec<RegionKey>,
}

impl BratsFolder {
    /// 扫描 `root/HGG` 和 `root/LGG`. 缺失的分级目录视为空.
    pub fn scan<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref();
        let mut keys = Vec::new();
        let mut entries = HashMap::new();
        for grade in [Grade::Hgg, Grade::Lgg] {
            let grade_dir = root.join(grade.dir_name());
            if !grade_dir.is_dir() {
                debug!("{} does not exist, skipped", grade_dir.display());
                continue;
            }
            for case in subdirs(&grade_dir, CASE_PREFIX)? {
                let dir = grade_dir.join(&case);
                keys.push(case.clone());
                entries.insert(case, Entry { dir, grade });
            }
        }
        Ok(Self {
            keys,
            entries,
            regions: brats_regions(),
        })
    }

    /// 替换采样前景坐标时使用的区域.
    pub fn with_regions(mut self, regions: Vec<RegionKey>) -> Self {
        self.regions = regions;
        self
    }

    /// 病例 `key` 的分级.
    #[inline]
    pub fn grade(&self, key: &str) -> Option<Grade> {
        self.entries.get(key).map(|e| e.grade)
    }

    fn entry(&self, key: &str) -> Result<&Entry, LoadCaseError> {
        self.entries
            .get(key)
            .ok_or_else(|| LoadCaseError::MissingCase(key.to_owned()))
    }
}

impl CaseSource for BratsFolder {
    #[inline]
    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn load_case(&self, key: &str) -> Result<Case, LoadCaseError> {
        let entry = self.entry(key)?;
        let mismatch = || LoadCaseError::ShapeMismatch(key.to_owned());

        let mut scans = Vec::with_capacity(MODALITIES.len());
        for m in MODALITIES {
            scans.push(ScanVolume::open(modality_path(&entry.dir, key, m))?.into_data());
        }
        let views: Vec<_> = scans.iter().map(|s| s.view()).collect();
        let data = ndarray::stack(Axis(0), &views).map_err(|_| mismatch())?;

        let label = LabelVolume::open(modality_path(&entry.dir, key, "seg"))?;
        let spacing = label.pix_dim();
        let seg = remap::forward(&label.data())?
            .mapv(i16::from)
            .insert_axis(Axis(0));
        if seg.shape()[1..] != data.shape()[1..] {
            return Err(mismatch());
        }

        let class_locations =
            ClassLocations::sample_from_seg(seg.view(), &self.regions, LOCATION_SEED);
        debug!("loaded case {key} with shape {:?}", data.shape());
        Ok(Case {
            id: key.to_owned(),
            data,
            seg,
            properties: CaseProperties {
                class_locations,
                spacing,
                label: Some(entry.grade.label()),
            },
        })
    }

    fn case_label(&self, key: &str) -> Result<Option<u8>, LoadCaseError> {
        Ok(Some(self.entry(key)?.grade.label()))
    }
}

/// 导入数据集错误.
#[derive(Debug, Error)]
pub enum ImportError {
    /// 标签转换错误.
    #[error(transparent)]
    Remap(#[from] RemapError),

    /// 写入 `dataset.json` 错误.
    #[error("dataset.json: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 标签定义: 单个标签或区域.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelSpec {
    /// 单个标签.
    One(i16),

    /// 区域 (多个标签的并集).
    Many(Vec<i16>),
}

/// 原始数据集描述文件 `dataset.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetJson {
    /// 通道索引 -> 模态名.
    pub channel_names: BTreeMap<String, String>,

    /// 标签名 -> 标签定义.
    pub labels: BTreeMap<String, LabelSpec>,

    /// 训练病例数.
    #[serde(rename = "numTraining")]
    pub num_training: usize,

    /// 文件后缀.
    pub file_ending: String,

    /// 区域训练时各区域的类别顺序.
    pub regions_class_order: Vec<i16>,

    /// 数据集名.
    pub name: String,

    /// 许可证.
    pub licence: String,

    /// 引用.
    pub reference: String,

    /// 版本.
    pub release: String,
}

impl DatasetJson {
    /// BraTS 2018 区域训练的描述.
    pub fn brats2018(num_training: usize) -> Self {
        let channel_names = CHANNEL_NAMES
            .iter()
            .enumerate()
            .map(|(i, n)| (i.to_string(), n.to_string()))
            .collect();
        let labels = [
            ("background", LabelSpec::One(0)),
            ("whole tumor", LabelSpec::Many(WHOLE_TUMOR.to_vec())),
            ("tumor core", LabelSpec::Many(TUMOR_CORE.to_vec())),
            ("enhancing tumor", LabelSpec::Many(ENHANCING_TUMOR.to_vec())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect();
        Self {
            channel_names,
            labels,
            num_training,
            file_ending: NII_GZ.to_owned(),
            regions_class_order: vec![1, 2, 3],
            name: "BraTS2018".to_owned(),
            licence: "see BraTS2018".to_owned(),
            reference: "see BraTS2019 license".to_owned(),
            release: "0.0".to_owned(),
        }
    }

    /// 以缩进格式写入 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ImportError> {
        let file = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// 将病例目录中的四个模态复制为 `{dst}/{case}_{0000..0003}.nii.gz`.
fn copy_modalities(case_dir: &Path, case: &str, dst: &Path) -> io::Result<()> {
    for (i, m) in MODALITIES.iter().enumerate() {
        fs::copy(
            modality_path(case_dir, case, m),
            dst.join(format!("{case}_{i:04}{NII_GZ}")),
        )?;
    }
    Ok(())
}

/// 将原始 BraTS 2018 目录导入为训练框架的原始数据集布局.
///
/// - `train_dir/{HGG,LGG}/{case}` -> `out_base/imagesTr` 与 `out_base/labelsTr`,
///   分割标签转换为连续标签;
/// - `test_dir/{case}` (若给出) -> `out_base/imagesTs`;
/// - 写入 `out_base/dataset.json`.
///
/// 任何病例中出现非法标签都会中止导入.
pub fn import_raw_dataset(
    train_dir: &Path,
    test_dir: Option<&Path>,
    out_base: &Path,
) -> Result<DatasetJson, ImportError> {
    let images_tr = out_base.join("imagesTr");
    let images_ts = out_base.join("imagesTs");
    let labels_tr = out_base.join("labelsTr");
    for d in [&images_tr, &images_ts, &labels_tr] {
        fs::create_dir_all(d)?;
    }

    let mut num_training = 0usize;
    for grade in [Grade::Hgg, Grade::Lgg] {
        let grade_dir = train_dir.join(grade.dir_name());
        for case in subdirs(&grade_dir, CASE_PREFIX)? {
            let case_dir = grade_dir.join(&case);
            copy_modalities(&case_dir, &case, &images_tr)?;
            remap::convert_to_contiguous(
                modality_path(&case_dir, &case, "seg"),
                labels_tr.join(format!("{case}{NII_GZ}")),
            )?;
            num_training += 1;
        }
        info!("imported {} cases so far ({})", num_training, grade.dir_name());
    }

    if let Some(test_dir) = test_dir {
        let cases = subdirs(test_dir, CASE_PREFIX)?;
        for case in cases.iter() {
            copy_modalities(&test_dir.join(case), case, &images_ts)?;
        }
        info!("imported {} test cases", cases.len());
    }

    let json = DatasetJson::brats2018(num_training);
    json.save(out_base.join("dataset.json"))?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_json_shape() {
        let json = DatasetJson::brats2018(285);
        let text = serde_json::to_string(&json).unwrap();
        assert!(text.contains("\"numTraining\":285"));
        assert!(text.contains("\"whole tumor\":[1,2,3]"));
        assert!(text.contains("\"background\":0"));
        assert_eq!(json.channel_names["3"], "Flair");

        let back: DatasetJson = serde_json::from_str(&text).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn test_scan_lists_cases_by_grade() {
        let dir = tempfile::tempdir().unwrap();
        for (grade, case) in [("HGG", "Brats18_A_1"), ("HGG", "Brats18_A_2"), ("LGG", "Brats18_B_1")] {
            fs::create_dir_all(dir.path().join(grade).join(case)).unwrap();
        }
        fs::create_dir_all(dir.path().join("HGG").join("notes")).unwrap();

        let folder = BratsFolder::scan(dir.path()).unwrap();
        assert_eq!(folder.keys(), &["Brats18_A_1", "Brats18_A_2", "Brats18_B_1"]);
        assert_eq!(folder.grade("Brats18_B_1"), Some(Grade::Lgg));
        assert_eq!(folder.case_label("Brats18_A_2").unwrap(), Some(1));
        assert!(folder.case_label("notes").is_err());
    }
}
