//! BraTS 标签与连续标签之间的互相转换.
//!
//! BraTS 2018/2019 的标签为 0, 1, 2, 4, 而分割框架要求标签连续. 映射关系为
//! `4 -> 3, 2 -> 1, 1 -> 2, 0 -> 0`. 注意这不是简单的平移, 而是一个置换.
//!
//! 预测结果在提交前需要用 [`backward`] 或 [`convert_folder_to_raw`] 转换回 BraTS 约定.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{Array, ArrayBase, Data, Dimension};
use thiserror::Error;

use crate::consts::contiguous::{BACKGROUND, EDEMA, ENHANCING, NECROSIS};
use crate::consts::raw::{self, BRATS_BACKGROUND, BRATS_EDEMA, BRATS_ENHANCING, BRATS_NECROSIS};
use crate::consts::NII_GZ;
use crate::data::{LabelVolume, NiftiHeaderAttr, VolumeError};
use crate::dataset::subfiles;

/// 标签转换错误.
#[derive(Debug, Error)]
pub enum RemapError {
    /// 原始标签中出现了 {0, 1, 2, 4} 以外的值. 该错误不可恢复.
    #[error("unexpected label `{0}`, only 0, 1, 2 and 4 are allowed")]
    UnexpectedLabel(u8),

    /// 读写 nii 文件错误.
    #[error(transparent)]
    Volume(#[from] VolumeError),

    /// 其他底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// 无法创建工作线程池.
    #[cfg(feature = "rayon")]
    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// 将原始 BraTS 标签映射为连续标签.
///
/// 任何体素不在 {0, 1, 2, 4} 中时返回 [`RemapError::UnexpectedLabel`],
/// 此时不会产生任何输出.
pub fn forward<S, D>(raw_labels: &ArrayBase<S, D>) -> Result<Array<u8, D>, RemapError>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    if let Some(&bad) = raw_labels.iter().find(|p| !raw::is_valid(**p)) {
        return Err(RemapError::UnexpectedLabel(bad));
    }
    Ok(raw_labels.mapv(|p| match p {
        BRATS_ENHANCING => ENHANCING,
        BRATS_EDEMA => EDEMA,
        BRATS_NECROSIS => NECROSIS,
        _ => BACKGROUND,
    }))
}

/// 将连续标签映射回原始 BraTS 标签.
///
/// 与 [`forward`] 互逆. {0, 1, 2, 3} 以外的值一律视为背景.
pub fn backward<S, D>(labels: &ArrayBase<S, D>) -> Array<u8, D>
where
    S: Data<Elem = u8>,
    D: Dimension,
{
    labels.mapv(|p| match p {
        EDEMA => BRATS_EDEMA,
        ENHANCING => BRATS_ENHANCING,
        NECROSIS => BRATS_NECROSIS,
        _ => BRATS_BACKGROUND,
    })
}

/// 读取原始 BraTS 分割文件 `in_file`, 转换为连续标签后写入 `out_file`.
///
/// 仅用于分割标签! 输出文件沿用输入文件的 header.
pub fn convert_to_contiguous<P: AsRef<Path>, Q: AsRef<Path>>(
    in_file: P,
    out_file: Q,
) -> Result<(), RemapError> {
    let label = LabelVolume::open(in_file.as_ref())?;
    let data = forward(&label.data())?;
    LabelVolume::with_header(label.header(), data).save(out_file.as_ref())?;
    Ok(())
}

/// 读取连续标签文件 `in_file`, 转换回 BraTS 约定后写入 `out_file`.
pub fn convert_to_raw<P: AsRef<Path>, Q: AsRef<Path>>(
    in_file: P,
    out_file: Q,
) -> Result<(), RemapError> {
    let label = LabelVolume::open(in_file.as_ref())?;
    let data = backward(&label.data());
    LabelVolume::with_header(label.header(), data).save(out_file.as_ref())?;
    Ok(())
}

/// 批量转换的结果.
#[derive(Debug, Default)]
pub struct ConversionReport {
    /// 成功转换的文件名.
    pub converted: Vec<String>,

    /// 转换失败的文件名及原因.
    pub failed: Vec<(String, RemapError)>,
}

impl ConversionReport {
    /// 是否所有文件都转换成功?
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn push(&mut self, name: String, result: Result<(), RemapError>) {
        match result {
            Ok(()) => self.converted.push(name),
            Err(e) => {
                warn!("failed to convert `{name}`: {e}");
                self.failed.push((name, e));
            }
        }
    }
}

fn prepare_folders(input: &Path, output: &Path) -> Result<Vec<String>, RemapError> {
    fs::create_dir_all(output)?;
    Ok(subfiles(input, NII_GZ)?)
}

#[inline]
fn apply_one<F>(name: &str, input: &Path, output: &Path, op: &F) -> Result<(), RemapError>
where
    F: Fn(&Path, &Path) -> Result<(), RemapError>,
{
    let (from, to): (PathBuf, PathBuf) = (input.join(name), output.join(name));
    op(&from, &to)
}

/// 对 `input` 下每个 `.nii.gz` 文件执行 `op(输入路径, 输出路径)`, 输出为 `output` 下的同名文件.
///
/// 单个文件失败不会影响其他文件, 所有失败都记录在返回的 [`ConversionReport`] 中.
/// 仅当无法创建输出目录或无法列出输入目录时返回 `Err`.
pub fn process_folder_seq<P, Q, F>(input: P, output: Q, op: F) -> Result<ConversionReport, RemapError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    F: Fn(&Path, &Path) -> Result<(), RemapError>,
{
    let (input, output) = (input.as_ref(), output.as_ref());
    let names = prepare_folders(input, output)?;
    let mut report = ConversionReport::default();
    for name in names {
        let result = apply_one(&name, input, output, &op);
        report.push(name, result);
    }
    info!(
        "processed {} file(s) into {}, {} failed",
        report.converted.len(),
        output.display(),
        report.failed.len()
    );
    Ok(report)
}

/// 将 `input` 下所有 `.nii.gz` 预测结果转换回 BraTS 约定, 以同名文件写入 `output`.
///
/// 失败处理同 [`process_folder_seq`].
pub fn convert_folder_to_raw_seq<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
) -> Result<ConversionReport, RemapError> {
    process_folder_seq(input, output, |from, to| convert_to_raw(from, to))
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        /// 借助 `rayon`, 用 `workers` 个工作线程并行执行 [`process_folder_seq`].
        ///
        /// 每个文件独立处理, 写入目标互不相交, 因此不保证处理顺序.
        /// `workers` 为 0 时由 `rayon` 自行决定线程数.
        pub fn process_folder<P, Q, F>(
            input: P,
            output: Q,
            workers: usize,
            op: F,
        ) -> Result<ConversionReport, RemapError>
        where
            P: AsRef<Path>,
            Q: AsRef<Path>,
            F: Fn(&Path, &Path) -> Result<(), RemapError> + Sync,
        {
            let (input, output) = (input.as_ref(), output.as_ref());
            let names = prepare_folders(input, output)?;
            let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;

            let results: Vec<(String, Result<(), RemapError>)> = pool.install(|| {
                names
                    .into_par_iter()
                    .map(|name| {
                        let r = apply_one(&name, input, output, &op);
                        (name, r)
                    })
                    .collect()
            });

            let mut report = ConversionReport::default();
            for (name, r) in results {
                report.push(name, r);
            }
            info!(
                "processed {} file(s) into {} with {workers} worker(s), {} failed",
                report.converted.len(),
                output.display(),
                report.failed.len()
            );
            Ok(report)
        }
    } else {
        /// 无 `rayon` 时退化为顺序执行, `workers` 被忽略.
        pub fn process_folder<P, Q, F>(
            input: P,
            output: Q,
            _workers: usize,
            op: F,
        ) -> Result<ConversionReport, RemapError>
        where
            P: AsRef<Path>,
            Q: AsRef<Path>,
            F: Fn(&Path, &Path) -> Result<(), RemapError> + Sync,
        {
            process_folder_seq(input, output, op)
        }
    }
}

/// 用 `workers` 个工作线程执行 [`convert_folder_to_raw_seq`].
pub fn convert_folder_to_raw<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    workers: usize,
) -> Result<ConversionReport, RemapError> {
    process_folder(input, output, workers, |from, to| convert_to_raw(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_forward_is_a_permutation() {
        let raw = array![0u8, 1, 2, 4];
        assert_eq!(forward(&raw).unwrap(), array![0u8, 2, 1, 3]);
    }

    #[test]
    fn test_backward_inverts_forward() {
        let raw = array![[0u8, 1], [2, 4]];
        let back = backward(&forward(&raw).unwrap());
        assert_eq!(back, raw);
    }

    #[test]
    fn test_forward_rejects_unknown_labels() {
        for bad in [3u8, 5, 255] {
            let raw = array![0u8, 1, bad, 4];
            match forward(&raw) {
                Err(RemapError::UnexpectedLabel(v)) => assert_eq!(v, bad),
                other => panic!("expected UnexpectedLabel, got {other:?}"),
            }
        }
    }

    /// 体素数为 (100, 5, 3, 2) 的原始标签.
    fn proportioned_volume() -> Array3<u8> {
        let mut flat = Vec::with_capacity(110);
        flat.extend(std::iter::repeat(0u8).take(100));
        flat.extend(std::iter::repeat(1u8).take(5));
        flat.extend(std::iter::repeat(2u8).take(3));
        flat.extend(std::iter::repeat(4u8).take(2));
        // 打乱顺序, 但保持确定性.
        let n = flat.len();
        let shuffled: Vec<u8> = (0..n).map(|i| flat[(i * 37) % n]).collect();
        Array3::from_shape_vec((2, 5, 11), shuffled).unwrap()
    }

    #[test]
    fn test_counts_and_positions_are_kept() {
        let raw = proportioned_volume();
        let mapped = forward(&raw).unwrap();
        let count = |a: &Array3<u8>, v: u8| a.iter().filter(|p| **p == v).count();

        assert_eq!(count(&mapped, 0), 100);
        assert_eq!(count(&mapped, 2), 5);
        assert_eq!(count(&mapped, 1), 3);
        assert_eq!(count(&mapped, 3), 2);

        for (r, m) in raw.iter().zip(mapped.iter()) {
            let expected = match r {
                1 => 2,
                2 => 1,
                4 => 3,
                _ => 0,
            };
            assert_eq!(*m, expected);
        }

        // 第二次往返仍然逐位一致.
        let again = backward(&forward(&backward(&mapped)).unwrap());
        assert_eq!(again, raw);
    }

    #[test]
    fn test_backward_unknown_is_background() {
        assert_eq!(backward(&array![7u8, 3]), array![0u8, 4]);
    }
}
