//! 训练数据采样.
//!
//! - [`DataLoader2d`]: 从 3D 病例中选取 2D 切片和 patch, 带前景过采样;
//! - [`StratifiedBatchSampler`]: 按二分类标签分层地把索引划分为若干 batch.

mod bbox;
mod stratified;

use log::{debug, warn};
use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::consts::{DATA_PAD_VALUE, SEG_PAD_VALUE};
use crate::dataset::{Case, CaseProperties, CaseSource, ClassLocations, LoadCaseError, RegionKey};
use crate::Idx2d;

pub use bbox::{crop_and_pad, BBox2d, BBoxPolicy};
pub use stratified::{Batches, StratifiedBatchSampler, StratifyError};

/// 2D 采样器配置.
#[derive(Clone, Debug)]
pub struct SamplerConfig {
    /// 每个 batch 的样本数.
    pub batch_size: usize,

    /// 采样 patch 大小 (H, W).
    pub patch_size: Idx2d,

    /// 数据增强后的最终 patch 大小. 二者之差是包围盒允许伸出切片的范围.
    pub final_patch_size: Idx2d,

    /// 每个 batch 中强制包含前景的样本比例.
    pub oversample_foreground_percent: f64,

    /// 存在 ignore 标签时, "所有已标注体素" 对应的键.
    pub annotated_key: Option<RegionKey>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            patch_size: (128, 128),
            final_patch_size: (128, 128),
            oversample_foreground_percent: 0.33,
            annotated_key: None,
        }
    }
}

/// 一个训练 batch.
#[derive(Debug)]
pub struct Batch {
    /// 图像, `(B, C, H, W)`, 切片外填充 0.
    pub data: Array4<f32>,

    /// 分割, `(B, 1, H, W)`, 切片外填充 -1.
    pub seg: Array4<i16>,

    /// 各样本所属病例的属性.
    pub properties: Vec<CaseProperties>,

    /// 各样本所属病例的键.
    pub keys: Vec<String>,
}

/// 2D 切片 patch 采样器.
///
/// 对每个样本, 先选类别/区域, 再选含该类别的切片, 最后在切片上选包围盒并裁剪/填充.
pub struct DataLoader2d<S> {
    source: S,
    cfg: SamplerConfig,
    policy: BBoxPolicy,
    rng: StdRng,
}

impl<S: CaseSource> DataLoader2d<S> {
    /// 创建采样器. 随机性完全由 `seed` 决定.
    ///
    /// # 注意
    ///
    /// `batch_size` 为 0, patch 为空或 `oversample_foreground_percent` 不在 `[0, 1]`
    /// 内时程序 panic.
    pub fn new(source: S, cfg: SamplerConfig, seed: u64) -> Self {
        assert!(cfg.batch_size > 0, "batch size must be positive");
        assert!(
            cfg.patch_size.0 > 0 && cfg.patch_size.1 > 0,
            "patch size must be positive"
        );
        assert!(
            (0.0..=1.0).contains(&cfg.oversample_foreground_percent),
            "oversample percent must lie in [0, 1]"
        );
        let policy = BBoxPolicy::new(cfg.patch_size, cfg.final_patch_size);
        Self {
            source,
            cfg,
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 底层数据源.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &SamplerConfig {
        &self.cfg
    }

    /// 换入新的随机数发生器, 返回原来的那个.
    #[inline]
    pub fn swap_rng(&mut self, rng: StdRng) -> StdRng {
        std::mem::replace(&mut self.rng, rng)
    }

    /// batch 中第 `sample_idx` 个样本是否强制包含前景.
    ///
    /// 前 `round(B * (1 - p))` 个样本不强制, 其余强制. 取整时 .5 向偶数舍入.
    #[inline]
    pub fn get_do_oversample(&self, sample_idx: usize) -> bool {
        let free = (self.cfg.batch_size as f64 * (1.0 - self.cfg.oversample_foreground_percent))
            .round_ties_even() as usize;
        sample_idx >= free
    }

    /// 有放回地均匀选取一个 batch 的病例键.
    pub fn get_indices(&mut self) -> Vec<String> {
        let keys = self.source.keys();
        assert!(!keys.is_empty(), "case source is empty");
        (0..self.cfg.batch_size)
            .map(|_| keys[self.rng.gen_range(0..keys.len())].clone())
            .collect()
    }

    /// 随机选取病例并生成一个 batch.
    pub fn generate_train_batch(&mut self) -> Result<Batch, LoadCaseError> {
        let keys = self.get_indices();
        self.generate_batch_for(keys)
    }

    /// 用指定的病例键生成一个 batch. batch 大小为 `keys.len()`,
    /// 前景过采样仍按配置的 batch 大小计算位置.
    pub fn generate_batch_for(&mut self, keys: Vec<String>) -> Result<Batch, LoadCaseError> {
        let (ph, pw) = self.policy.patch();
        let mut data_all: Option<Array4<f32>> = None;
        let mut seg_all: Option<Array4<i16>> = None;
        let mut properties = Vec::with_capacity(keys.len());

        for (j, key) in keys.iter().enumerate() {
            let force_fg = self.get_do_oversample(j);
            let case = self.source.load_case(key)?;

            // 第一个病例决定通道数.
            let data_all = data_all.get_or_insert_with(|| {
                Array4::from_elem((keys.len(), case.channels(), ph, pw), DATA_PAD_VALUE)
            });
            let seg_all = seg_all.get_or_insert_with(|| {
                Array4::from_elem((keys.len(), case.seg.dim().0, ph, pw), SEG_PAD_VALUE)
            });
            if data_all.dim().1 != case.channels() || seg_all.dim().1 != case.seg.dim().0 {
                return Err(LoadCaseError::ShapeMismatch(case.id));
            }

            self.sample_case(
                &case,
                force_fg,
                data_all.index_axis_mut(Axis(0), j),
                seg_all.index_axis_mut(Axis(0), j),
            );
            properties.push(case.properties);
        }

        Ok(Batch {
            data: data_all.unwrap_or_else(|| Array4::zeros((0, 0, ph, pw))),
            seg: seg_all.unwrap_or_else(|| Array4::zeros((0, 0, ph, pw))),
            properties,
            keys,
        })
    }

    /// 选择类别/区域.
    ///
    /// - 不强制前景: 有已标注键时选它, 否则不作约束;
    /// - 强制前景: 在有坐标的键中均匀选择. 已标注键只有在它是唯一候选时才保留.
    pub fn select_region(
        &mut self,
        force_fg: bool,
        locations: &ClassLocations,
    ) -> Option<RegionKey> {
        if !force_fg {
            return self.cfg.annotated_key.clone();
        }
        let mut eligible = locations.eligible();
        let annotated_at = eligible.iter().position(|k| k.is_annotated());
        if let Some(i) = annotated_at {
            if eligible.len() > 1 {
                eligible.remove(i);
            }
        }
        eligible.choose(&mut self.rng).map(|k| (*k).clone())
    }

    /// 对单个病例采样, 写入 batch 中的一行.
    fn sample_case(
        &mut self,
        case: &Case,
        force_fg: bool,
        data_out: ndarray::ArrayViewMut3<f32>,
        seg_out: ndarray::ArrayViewMut3<i16>,
    ) {
        let locations = &case.properties.class_locations;
        let mut selected = self.select_region(force_fg, locations);

        // 选切片: 有键时从该键记录的坐标中选, 否则在所有切片中选.
        let recorded = selected
            .as_ref()
            .and_then(|k| locations.get(k))
            .filter(|l| !l.is_empty());
        let z = match recorded {
            Some(locs) => locs[self.rng.gen_range(0..locs.len())].1,
            None => {
                if let Some(k) = selected.take() {
                    warn!("case {} has no voxel recorded for {k:?}", case.id);
                }
                self.rng.gen_range(0..case.len_z())
            }
        };

        let data = case.data.index_axis(Axis(1), z);
        let seg = case.seg.index_axis(Axis(1), z);
        let (_, h, w) = data.dim();

        let bbox = match selected {
            Some(ref key) => {
                let anchors = locations.in_slice(key, z);
                assert!(
                    !anchors.is_empty(),
                    "slice {z} was drawn from {key:?} but holds none of its voxels"
                );
                let anchor = anchors[self.rng.gen_range(0..anchors.len())];
                self.policy.anchored((h, w), anchor)
            }
            None => self.policy.random((h, w), &mut self.rng),
        };
        debug!(
            "case {}: force_fg = {force_fg}, key = {selected:?}, slice = {z}, bbox = {bbox:?}",
            case.id
        );

        crop_and_pad(data, &bbox, DATA_PAD_VALUE, data_out);
        crop_and_pad(seg, &bbox, SEG_PAD_VALUE, seg_out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryCases;
    use crate::Idx4d;
    use ndarray::Array4;

    const WT: [i16; 3] = [1, 2, 3];

    /// 形状为 (2, z, h, w) 的病例, 第 `tumor_z` 层中心有一块 3x3 的肿瘤.
    fn case_with_tumor(id: &str, z: usize, h: usize, w: usize, tumor_z: usize) -> Case {
        let data = Array4::from_elem((2, z, h, w), 1.0f32);
        let mut seg = Array4::<i16>::zeros((1, z, h, w));
        for dh in 0..3 {
            for dw in 0..3 {
                seg[(0, tumor_z, h / 2 - 1 + dh, w / 2 - 1 + dw)] = 2;
            }
        }
        let keys = [RegionKey::Region(WT.to_vec()), RegionKey::Class(3)];
        let class_locations = ClassLocations::sample_from_seg(seg.view(), &keys, 0);
        Case {
            id: id.to_owned(),
            data,
            seg,
            properties: CaseProperties {
                class_locations,
                ..Default::default()
            },
        }
    }

    fn loader(cases: Vec<Case>, cfg: SamplerConfig) -> DataLoader2d<InMemoryCases> {
        DataLoader2d::new(InMemoryCases::from_cases(cases), cfg, 42)
    }

    #[test]
    fn test_do_oversample_positions() {
        let cfg = SamplerConfig {
            batch_size: 6,
            oversample_foreground_percent: 0.33,
            ..Default::default()
        };
        let dl = loader(vec![case_with_tumor("a", 3, 8, 8, 1)], cfg);
        let forced: Vec<bool> = (0..6).map(|j| dl.get_do_oversample(j)).collect();
        // round(6 * 0.67) = 4
        assert_eq!(forced, vec![false, false, false, false, true, true]);
    }

    #[test]
    fn test_do_oversample_rounds_half_to_even() {
        let cfg = SamplerConfig {
            batch_size: 5,
            oversample_foreground_percent: 0.5,
            ..Default::default()
        };
        let dl = loader(vec![case_with_tumor("a", 3, 8, 8, 1)], cfg);
        let forced: Vec<bool> = (0..5).map(|j| dl.get_do_oversample(j)).collect();
        // round(2.5) = 2
        assert_eq!(forced, vec![false, false, true, true, true]);

        let cfg = SamplerConfig {
            batch_size: 1,
            oversample_foreground_percent: 0.5,
            ..Default::default()
        };
        let dl = loader(vec![case_with_tumor("a", 3, 8, 8, 1)], cfg);
        // round(0.5) = 0
        assert!(dl.get_do_oversample(0));
    }

    #[test]
    fn test_batch_shape_is_fixed() {
        let cfg = SamplerConfig {
            batch_size: 4,
            patch_size: (12, 6),
            final_patch_size: (12, 6),
            oversample_foreground_percent: 0.5,
            annotated_key: None,
        };
        let cases = vec![
            case_with_tumor("small", 4, 5, 5, 2),
            case_with_tumor("large", 6, 30, 40, 3),
        ];
        let mut dl = loader(cases, cfg);
        for _ in 0..20 {
            let batch = dl.generate_train_batch().unwrap();
            assert_eq!(batch.data.dim(), (4, 2, 12, 6));
            assert_eq!(batch.seg.dim(), (4, 1, 12, 6));
            assert_eq!(batch.keys.len(), 4);
            assert_eq!(batch.properties.len(), 4);
        }
    }

    #[test]
    fn test_padding_values() {
        // 5x5 的切片, 16x16 的 patch: 必然有填充.
        let cfg = SamplerConfig {
            batch_size: 2,
            patch_size: (16, 16),
            final_patch_size: (16, 16),
            oversample_foreground_percent: 0.5,
            annotated_key: None,
        };
        let mut dl = loader(vec![case_with_tumor("a", 3, 5, 5, 1)], cfg);
        for _ in 0..10 {
            let batch = dl.generate_train_batch().unwrap();
            let inside_data = batch.data.iter().filter(|v| **v == 1.0).count();
            let pad_data = batch.data.iter().filter(|v| **v == 0.0).count();
            assert_eq!(inside_data, 2 * 2 * 25);
            assert_eq!(inside_data + pad_data, batch.data.len());

            let pad_seg = batch.seg.iter().filter(|v| **v == -1).count();
            assert_eq!(pad_seg, 2 * (256 - 25));
            assert!(batch.seg.iter().all(|v| [-1, 0, 2].contains(v)));
        }
    }

    #[test]
    fn test_forced_samples_contain_foreground() {
        let cfg = SamplerConfig {
            batch_size: 3,
            patch_size: (8, 8),
            final_patch_size: (8, 8),
            oversample_foreground_percent: 1.0,
            annotated_key: None,
        };
        let mut dl = loader(vec![case_with_tumor("a", 10, 40, 40, 7)], cfg);
        for _ in 0..20 {
            let batch = dl.generate_train_batch().unwrap();
            for j in 0..3 {
                let fg = batch
                    .seg
                    .index_axis(Axis(0), j)
                    .iter()
                    .filter(|v| **v == 2)
                    .count();
                assert!(fg > 0, "forced sample {j} has no foreground");
            }
        }
    }

    #[test]
    fn test_select_region_drops_annotated_when_others_exist() {
        let annotated = RegionKey::annotated([0, 1, 2, 3], 4);
        let cfg = SamplerConfig {
            annotated_key: Some(annotated.clone()),
            ..Default::default()
        };
        let mut dl = loader(vec![case_with_tumor("a", 3, 8, 8, 1)], cfg);

        let mut loc = ClassLocations::new();
        loc.insert(annotated.clone(), vec![(0, 0, 0, 0)]);
        loc.insert(RegionKey::Class(2), vec![(0, 1, 1, 1)]);
        loc.insert(RegionKey::Class(3), vec![]);
        for _ in 0..50 {
            assert_eq!(dl.select_region(true, &loc), Some(RegionKey::Class(2)));
        }
        assert_eq!(dl.select_region(false, &loc), Some(annotated.clone()));

        let mut only = ClassLocations::new();
        only.insert(annotated.clone(), vec![(0, 0, 0, 0)]);
        assert_eq!(dl.select_region(true, &only), Some(annotated));

        assert_eq!(dl.select_region(true, &ClassLocations::new()), None);
    }

    /// 5 层 20x20 的病例, 第 z 层强度为 z + 1. 已标注键只记录 `annotated_at` 中的坐标.
    fn case_with_annotated(annotated: &RegionKey, annotated_at: Vec<Idx4d>) -> Case {
        let data = Array4::from_shape_fn((2, 5, 20, 20), |(_, z, _, _)| z as f32 + 1.0);
        let mut seg = Array4::<i16>::zeros((1, 5, 20, 20));
        for &(c, z, h, w) in &annotated_at {
            seg[(c, z, h, w)] = 2;
        }
        let mut class_locations = ClassLocations::new();
        class_locations.insert(annotated.clone(), annotated_at);
        Case {
            id: "annotated".to_owned(),
            data,
            seg,
            properties: CaseProperties {
                class_locations,
                ..Default::default()
            },
        }
    }

    fn annotated_cfg(annotated: &RegionKey) -> SamplerConfig {
        SamplerConfig {
            batch_size: 4,
            patch_size: (8, 8),
            final_patch_size: (8, 8),
            oversample_foreground_percent: 0.0,
            annotated_key: Some(annotated.clone()),
        }
    }

    #[test]
    fn test_annotated_key_anchors_unforced_samples() {
        let annotated = RegionKey::annotated([0, 1, 2, 3], 4);
        let case = case_with_annotated(&annotated, vec![(0, 3, 2, 17)]);
        let mut dl = loader(vec![case], annotated_cfg(&annotated));
        for _ in 0..10 {
            let batch = dl.generate_train_batch().unwrap();
            for j in 0..4 {
                let data = batch.data.index_axis(Axis(0), j);
                assert!(data.iter().all(|v| *v == 4.0 || *v == DATA_PAD_VALUE));
                assert!(data.iter().any(|v| *v == 4.0));
                let seg = batch.seg.index_axis(Axis(0), j);
                assert_eq!(seg.iter().filter(|v| **v == 2).count(), 1);
            }
        }
    }

    #[test]
    fn test_empty_annotated_key_falls_back_to_random_slice() {
        let annotated = RegionKey::annotated([0, 1, 2, 3], 4);
        let case = case_with_annotated(&annotated, vec![]);
        let mut dl = loader(vec![case], annotated_cfg(&annotated));
        let mut slices = std::collections::BTreeSet::new();
        for _ in 0..20 {
            let batch = dl.generate_train_batch().unwrap();
            assert_eq!(batch.data.dim(), (4, 2, 8, 8));
            for j in 0..4 {
                let data = batch.data.index_axis(Axis(0), j);
                // 20x20 的切片足够大, 随机包围盒不会越界.
                let first = data[(0, 0, 0)];
                assert!(data.iter().all(|v| *v == first));
                slices.insert(first as i32);
            }
            assert!(batch.seg.iter().all(|v| *v == 0));
        }
        assert!(slices.len() > 1);
    }

    #[test]
    fn test_swap_rng_replays_batches() {
        let cases = vec![
            case_with_tumor("a", 4, 20, 20, 1),
            case_with_tumor("b", 4, 20, 20, 2),
        ];
        let mut dl = loader(cases, SamplerConfig::default());
        let keys = vec!["a".to_string(), "b".to_string()];
        let saved = dl.swap_rng(StdRng::seed_from_u64(7));
        let first = dl.generate_batch_for(keys.clone()).unwrap();
        dl.swap_rng(StdRng::seed_from_u64(7));
        let again = dl.generate_batch_for(keys).unwrap();
        assert_eq!(first.seg, again.seg);
        dl.swap_rng(saved);
    }

    #[test]
    fn test_generate_batch_for_keeps_order() {
        let cases = vec![
            case_with_tumor("a", 3, 8, 8, 1),
            case_with_tumor("b", 3, 8, 8, 2),
        ];
        let mut dl = loader(cases, SamplerConfig::default());
        let keys = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let batch = dl.generate_batch_for(keys.clone()).unwrap();
        assert_eq!(batch.keys, keys);
        assert_eq!(batch.data.dim().0, 3);
        assert!(dl.generate_batch_for(vec!["zzz".into()]).is_err());
    }
}
