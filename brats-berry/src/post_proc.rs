//! 分割结果的后处理.
//!
//! 增强肿瘤 (ET) 体素很少时, 这些体素更可能是误检. BraTS 的评估对 "真值中没有 ET
//! 但预测了少量 ET" 的惩罚极大, 因此把它们改为坏死 (NCR/NET).

use std::path::Path;

use crate::consts::raw::{BRATS_ENHANCING, BRATS_NECROSIS};
use crate::data::LabelVolume;
use crate::remap::{process_folder, ConversionReport, RemapError};

/// 若 BraTS 约定的标签中增强肿瘤 (4) 体素少于 `min_enhancing`, 就把它们全部改为坏死 (1).
///
/// 返回被改写的体素数.
pub fn suppress_small_enhancing(label: &mut LabelVolume, min_enhancing: usize) -> usize {
    let count = label.count(BRATS_ENHANCING);
    if count == 0 || count >= min_enhancing {
        return 0;
    }
    label.replace(BRATS_ENHANCING, BRATS_NECROSIS)
}

/// 读取 `in_file`, 后处理后写入 `out_file`. 输出沿用输入的 header.
pub fn post_process_file<P: AsRef<Path>, Q: AsRef<Path>>(
    in_file: P,
    out_file: Q,
    min_enhancing: usize,
) -> Result<usize, RemapError> {
    let mut label = LabelVolume::open(in_file.as_ref())?;
    let changed = suppress_small_enhancing(&mut label, min_enhancing);
    label.save(out_file.as_ref())?;
    Ok(changed)
}

/// 对 `input` 下所有 `.nii.gz` 文件执行 [`post_process_file`], 写入 `output`.
///
/// 失败处理同 [`crate::remap::process_folder_seq`].
pub fn post_process_folder<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    min_enhancing: usize,
    workers: usize,
) -> Result<ConversionReport, RemapError> {
    process_folder(input, output, workers, |from, to| {
        let changed = post_process_file(from, to, min_enhancing)?;
        if changed > 0 {
            log::debug!("{}: {changed} enhancing voxel(s) relabelled", from.display());
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};
    use nifti::NiftiHeader;

    fn volume(data: Array3<u8>) -> LabelVolume {
        LabelVolume::with_header(&NiftiHeader::default(), data)
    }

    #[test]
    fn test_small_enhancing_is_relabelled() {
        let mut v = volume(array![[[0u8, 4, 4], [2, 1, 0]]]);
        assert_eq!(suppress_small_enhancing(&mut v, 200), 2);
        assert_eq!(v.into_data(), array![[[0u8, 1, 1], [2, 1, 0]]]);
    }

    #[test]
    fn test_large_enhancing_is_kept() {
        let mut v = volume(Array3::from_elem((2, 10, 10), 4));
        assert_eq!(suppress_small_enhancing(&mut v, 200), 0);
        assert_eq!(v.count(4), 200);

        let mut few = volume(Array3::zeros((2, 2, 2)));
        few[(0, 0, 0)] = 4;
        assert_eq!(suppress_small_enhancing(&mut few.clone(), 1), 0);
        assert_eq!(suppress_small_enhancing(&mut few, 2), 1);
        assert_eq!(few[(0, 0, 0)], 1);
    }
}
