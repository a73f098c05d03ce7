//! 结果目录打包.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 打包错误.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// zip 编码错误.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// 遍历目录错误.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// I/O 错误.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 把目录 `dir` 中的所有文件 (含子目录) 打包为 `{archive_stem}.zip`, 返回压缩包路径.
///
/// 压缩包内的路径相对于 `dir`, 以 `/` 分隔. 深度优先写入, 同一目录内按文件名排序.
pub fn zip_folder<P: AsRef<Path>, Q: AsRef<Path>>(
    dir: P,
    archive_stem: Q,
) -> Result<PathBuf, ArchiveError> {
    let dir = dir.as_ref();
    let mut archive = archive_stem.as_ref().as_os_str().to_owned();
    archive.push(".zip");
    let archive = PathBuf::from(archive);

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    let mut zip = ZipWriter::new(File::create(&archive)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in &files {
        let name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(path)?)?;
    }
    zip.finish()?;
    log::info!("archived {} file(s) into {}", files.len(), archive.display());
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_zip_folder() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("test_brats_format");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("b.nii.gz"), b"bbb").unwrap();
        fs::write(src.join("a.nii.gz"), b"a").unwrap();
        fs::write(src.join("sub").join("c.txt"), b"cc").unwrap();
        fs::create_dir_all(src.join("sub").join("deep")).unwrap();
        fs::write(src.join("sub").join("deep").join("d.txt"), b"d").unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();

        let archive = zip_folder(&src, root.path().join("test_results")).unwrap();
        assert_eq!(archive, root.path().join("test_results.zip"));

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_owned())
            .collect();
        assert_eq!(
            names,
            vec!["a.nii.gz", "b.nii.gz", "sub/c.txt", "sub/deep/d.txt"]
        );

        let mut content = String::new();
        zip.by_name("b.nii.gz")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "bbb");
    }
}
