use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use thiserror::Error;

use crate::Idx3d;

/// header 有三百多字节, 放在堆上以便体数据随意移动.
type Header = Box<NiftiHeader>;

/// 读写 nii 体数据时的错误.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// nifti 底层读写错误.
    #[error("nifti error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 文件不是三维体数据.
    #[error("expected a 3D volume: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// 3D MRI nii 文件 header 的共用属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// header 中的体素个数, 文件内为 `[W, H, z]`, 这里按 (z, H, W) 返回.
    #[inline]
    fn shape(&self) -> Idx3d {
        let dim = &self.header().dim;
        (dim[3] as usize, dim[2] as usize, dim[1] as usize)
    }

    /// 体素间距 (毫米), 按 (z, H, W) 排列.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let p = &self.header().pixdim;
        [f64::from(p[3]), f64::from(p[2]), f64::from(p[1])]
    }
}

/// 读取 nii 文件并转换为 (z, H, W) 标准布局的三维数组.
macro_rules! read_volume {
    ($path: expr, $elem: ty) => {{
        let obj = ReaderOptions::new().read_file($path)?;
        let header: Header = Box::new(obj.header().clone());
        let volume = obj
            .into_volume()
            .into_ndarray::<$elem>()?
            .into_dimensionality::<Ix3>()?;
        // 轴倒序后内存不连续, 复制一份标准布局.
        let data = volume.permuted_axes([2, 1, 0]).as_standard_layout().into_owned();
        (header, data)
    }};
}

/// nii 格式 3D MRI 扫描 (单个模态). 强度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct ScanVolume {
    header: Header,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for ScanVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl ScanVolume {
    /// 打开 nii (或 nii.gz) 文件格式的 3D MRI 扫描.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (header, data) = read_volume!(path.as_ref(), f32);
        Ok(Self { header, data })
    }

    /// 数据视图.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 取出底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }
}

/// nii 格式 3D 分割标签, 包括 header 和标签数据. 标签值以 `u8` 保存.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    header: Header,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for LabelVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for LabelVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for LabelVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl LabelVolume {
    /// 打开 nii (或 nii.gz) 文件格式的 3D 分割标签.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (header, data) = read_volume!(path.as_ref(), u8);
        Ok(Self { header, data })
    }

    /// 用已有的 header 和 (z, H, W) 格式的标签数据直接创建实体.
    ///
    /// header 中的几何信息 (方向, 分辨率) 会原样保留; 数据形状以 `data` 为准.
    pub fn with_header(header: &NiftiHeader, data: Array3<u8>) -> Self {
        let mut header = Box::new(header.clone());
        let (z, h, w) = data.dim();
        header.dim[0] = 3;
        header.dim[1] = w as u16;
        header.dim[2] = h as u16;
        header.dim[3] = z as u16;
        Self { header, data }
    }

    /// 将标签写入 `path`. 文件名以 `.gz` 结尾时自动压缩.
    ///
    /// 写出的 header 以 `self.header()` 为模板, 因此几何信息与来源文件一致.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        // [z, H, W] -> [W, H, z]
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&data)?;
        Ok(())
    }

    /// 数据视图.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 可变数据视图.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 取出底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<u8> {
        self.data
    }

    /// 值为 `label` 的体素数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.fold(0, |n, &v| n + usize::from(v == label))
    }

    /// 把所有 `old` 改写为 `new`, 返回改写的体素数.
    pub fn replace(&mut self, old: u8, new: u8) -> usize {
        let mut changed = 0;
        for v in self.data_mut().iter_mut().filter(|v| **v == old) {
            *v = new;
            changed += 1;
        }
        changed
    }
}
