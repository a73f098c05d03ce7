//! 通用常量.

/// 原 BraTS 数据集 (2018/2019 约定) 中的标签值.
pub mod raw {
    /// 背景.
    pub const BRATS_BACKGROUND: u8 = 0;

    /// 坏死 / 非增强肿瘤核心 (NCR/NET).
    pub const BRATS_NECROSIS: u8 = 1;

    /// 瘤周水肿 (ED).
    pub const BRATS_EDEMA: u8 = 2;

    /// 增强肿瘤 (ET). 注意 BraTS 跳过了 3.
    pub const BRATS_ENHANCING: u8 = 4;

    /// 所有合法的原始标签值.
    pub const BRATS_LABELS: [u8; 4] = [
        BRATS_BACKGROUND,
        BRATS_NECROSIS,
        BRATS_EDEMA,
        BRATS_ENHANCING,
    ];

    /// 像素是否是合法的原始 BraTS 标签?
    #[inline]
    pub const fn is_valid(p: u8) -> bool {
        matches!(
            p,
            BRATS_BACKGROUND | BRATS_NECROSIS | BRATS_EDEMA | BRATS_ENHANCING
        )
    }
}

/// 训练框架使用的连续标签值.
pub mod contiguous {
    /// 背景.
    pub const BACKGROUND: u8 = 0;

    /// 水肿 (原 2).
    pub const EDEMA: u8 = 1;

    /// 坏死 / 非增强肿瘤核心 (原 1).
    pub const NECROSIS: u8 = 2;

    /// 增强肿瘤 (原 4).
    pub const ENHANCING: u8 = 3;

    /// 全肿瘤 (whole tumor) 区域包含的连续标签.
    pub const WHOLE_TUMOR: [i16; 3] = [1, 2, 3];

    /// 肿瘤核心 (tumor core) 区域包含的连续标签.
    pub const TUMOR_CORE: [i16; 2] = [2, 3];

    /// 增强肿瘤 (enhancing tumor) 区域包含的连续标签.
    pub const ENHANCING_TUMOR: [i16; 1] = [3];
}

/// 分割 batch 中越界 (padding) 区域的哨兵值. 不与任何合法标签重合, 在损失中应被忽略.
pub const SEG_PAD_VALUE: i16 = -1;

/// 图像 batch 中越界 (padding) 区域的填充值.
pub const DATA_PAD_VALUE: f32 = 0.0;

/// 每个病例的 MRI 模态, 按通道顺序排列.
pub const MODALITIES: [&str; 4] = ["t1", "t1ce", "t2", "flair"];

/// 数据集 json 中展示的通道名称, 与 [`MODALITIES`] 顺序一致.
pub const CHANNEL_NAMES: [&str; 4] = ["T1", "T1ce", "T2", "Flair"];

/// nifti 压缩文件后缀.
pub const NII_GZ: &str = ".nii.gz";

/// 预处理时每个类别/区域最多记录的体素位置个数.
pub const MAX_LOCATIONS_PER_KEY: usize = 10_000;

/// 预处理时每个类别/区域至少记录的体素位置比例.
pub const MIN_LOCATION_COVERAGE: f64 = 0.01;

/// 后处理时, 增强肿瘤体素数低于该值则视为误报.
pub const MIN_ENHANCING_VOXELS: usize = 200;

/// 肿瘤分级.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Grade {
    /// 高级别胶质瘤, 分类标签为 1.
    Hgg,

    /// 低级别胶质瘤, 分类标签为 0.
    Lgg,
}

impl Grade {
    /// 数据集中对应的子目录名.
    #[inline]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Hgg => "HGG",
            Self::Lgg => "LGG",
        }
    }

    /// 二分类标签.
    #[inline]
    pub const fn label(&self) -> u8 {
        match self {
            Self::Hgg => 1,
            Self::Lgg => 0,
        }
    }
}
