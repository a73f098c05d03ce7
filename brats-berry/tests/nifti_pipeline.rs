use std::fs;
use std::path::Path;

use brats_berry::dataset::brats::{import_raw_dataset, modality_path};
use brats_berry::post_proc::post_process_folder;
use brats_berry::prelude::*;
use brats_berry::remap::{convert_folder_to_raw, convert_to_contiguous, convert_to_raw};
use ndarray::{Array3, Axis};
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;

/// (z, H, W) = (4, 6, 5), 原始标签. 第 2 层中心是肿瘤.
fn raw_labels() -> Array3<u8> {
    let mut a = Array3::<u8>::zeros((4, 6, 5));
    a[(2, 2, 2)] = BRATS_ENHANCING;
    a[(2, 3, 2)] = BRATS_NECROSIS;
    a[(2, 2, 3)] = BRATS_EDEMA;
    a[(1, 3, 3)] = BRATS_EDEMA;
    a
}

fn write_label(path: &Path, data: Array3<u8>) {
    LabelVolume::with_header(&NiftiHeader::default(), data)
        .save(path)
        .unwrap();
}

/// 以 nifti 的 [W, H, z] 顺序写入 (z, H, W) 格式的强度数据.
fn write_scan(path: &Path, data: &Array3<f32>) {
    let data = data.view().permuted_axes([2, 1, 0]);
    WriterOptions::new(path).write_nifti(&data).unwrap();
}

fn make_case(root: &Path, grade: &str, case: &str, level: f32) {
    let dir = root.join(grade).join(case);
    fs::create_dir_all(&dir).unwrap();
    for (i, m) in MODALITIES.iter().enumerate() {
        let scan = Array3::from_elem((4, 6, 5), level + i as f32);
        write_scan(&modality_path(&dir, case, m), &scan);
    }
    write_label(&modality_path(&dir, case, "seg"), raw_labels());
}

#[test]
fn label_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.nii.gz");
    let contiguous = dir.path().join("contiguous.nii.gz");
    let back = dir.path().join("back.nii.gz");
    write_label(&raw, raw_labels());

    convert_to_contiguous(&raw, &contiguous).unwrap();
    let mapped = LabelVolume::open(&contiguous).unwrap();
    assert_eq!(mapped.shape(), (4, 6, 5));
    assert_eq!(mapped[(2, 2, 2)], 3);
    assert_eq!(mapped[(2, 3, 2)], 2);
    assert_eq!(mapped[(2, 2, 3)], 1);

    convert_to_raw(&contiguous, &back).unwrap();
    assert_eq!(LabelVolume::open(&back).unwrap().into_data(), raw_labels());
}

#[test]
fn invalid_raw_label_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.nii.gz");
    let mut labels = raw_labels();
    labels[(0, 0, 0)] = 3;
    write_label(&raw, labels);
    let err = convert_to_contiguous(&raw, dir.path().join("out.nii.gz")).unwrap_err();
    assert!(matches!(err, RemapError::UnexpectedLabel(3)));
    assert!(!dir.path().join("out.nii.gz").exists());
}

#[test]
fn folder_conversion_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("fold_0").join("test");
    let output = dir.path().join("fold_0").join("test_brats_format");
    fs::create_dir_all(&input).unwrap();
    for name in ["Brats18_A.nii.gz", "Brats18_B.nii.gz"] {
        let contiguous = forward(&raw_labels()).unwrap();
        write_label(&input.join(name), contiguous);
    }
    fs::write(input.join("Brats18_C.nii.gz"), b"not a nifti file").unwrap();
    fs::write(input.join("notes.txt"), b"ignored").unwrap();

    let report = convert_folder_to_raw(&input, &output, 2).unwrap();
    assert!(!report.is_complete());
    let mut converted = report.converted.clone();
    converted.sort();
    assert_eq!(converted, vec!["Brats18_A.nii.gz", "Brats18_B.nii.gz"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "Brats18_C.nii.gz");

    let back = LabelVolume::open(output.join("Brats18_A.nii.gz")).unwrap();
    assert_eq!(back.into_data(), raw_labels());

    // 只有 1 个增强肿瘤体素, 后处理后变为坏死.
    let post = dir.path().join("fold_0").join("test_post_brats_format");
    let report = post_process_folder(&output, &post, 200, 2).unwrap();
    assert_eq!(report.converted.len(), 2);
    let p = LabelVolume::open(post.join("Brats18_B.nii.gz")).unwrap();
    assert_eq!(p.count(BRATS_ENHANCING), 0);
    assert_eq!(p.count(BRATS_NECROSIS), 2);
}

#[test]
fn raw_dataset_feeds_the_sampler() {
    let dir = tempfile::tempdir().unwrap();
    let train = dir.path().join("train");
    make_case(&train, "HGG", "Brats18_H_1", 10.0);
    make_case(&train, "LGG", "Brats18_L_1", 20.0);

    let folder = BratsFolder::scan(&train).unwrap();
    let case = folder.load_case("Brats18_L_1").unwrap();
    assert_eq!(case.data.dim(), (4, 4, 6, 5));
    assert_eq!(case.seg.dim(), (1, 4, 6, 5));
    assert_eq!(case.data[(3, 0, 0, 0)], 23.0);
    assert_eq!(case.seg[(0, 2, 2, 2)], 3);
    assert_eq!(case.properties.label, Some(0));
    let wt = RegionKey::Region(vec![1, 2, 3]);
    assert_eq!(case.properties.class_locations.get(&wt).unwrap().len(), 4);

    let cfg = SamplerConfig {
        batch_size: 4,
        patch_size: (8, 8),
        final_patch_size: (8, 8),
        oversample_foreground_percent: 1.0,
        annotated_key: None,
    };
    let mut loader = DataLoader2d::new(folder, cfg, 3);
    let batch = loader.generate_train_batch().unwrap();
    assert_eq!(batch.data.dim(), (4, 4, 8, 8));
    for seg in batch.seg.axis_iter(Axis(0)) {
        assert!(seg.iter().any(|v| *v > 0));
        assert_eq!(seg.iter().filter(|v| **v == -1).count(), 64 - 30);
    }

    // 导入为训练框架的目录布局.
    let out = dir.path().join("Dataset032_BraTS2018");
    let json = import_raw_dataset(&train, None, &out).unwrap();
    assert_eq!(json.num_training, 2);
    assert!(out.join("imagesTr").join("Brats18_H_1_0003.nii.gz").exists());
    let label = LabelVolume::open(out.join("labelsTr").join("Brats18_L_1.nii.gz")).unwrap();
    assert_eq!(label[(2, 2, 2)], 3);
    assert!(out.join("dataset.json").exists());
}
