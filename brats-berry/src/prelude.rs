//! 🧠欢迎光临🩻
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d, Idx4d};

pub use crate::data::{LabelVolume, NiftiHeaderAttr, ScanVolume};

pub use crate::consts::raw::{BRATS_BACKGROUND, BRATS_EDEMA, BRATS_ENHANCING, BRATS_NECROSIS};
pub use crate::consts::{Grade, MODALITIES};

pub use crate::remap::{backward, convert_folder_to_raw, forward, ConversionReport, RemapError};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{
    self, BratsFolder, Case, CaseProperties, CaseSource, ClassLocations, NpzCaseFolder, RegionKey,
};

pub use crate::sampler::{Batch, DataLoader2d, SamplerConfig, StratifiedBatchSampler};

#[cfg(feature = "train")]
pub use crate::train::{RunConfig, Trainer};
