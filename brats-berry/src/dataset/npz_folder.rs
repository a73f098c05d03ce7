use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array4, Ix4, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError};

use super::{Case, CaseProperties, CaseSource, LoadCaseError};

/// 预处理后的病例目录.
///
/// 每个病例 `{id}` 对应两个文件:
///
/// 1. `{id}.npz`, 包含 `data` (`f32`, `(C, z, H, W)`) 和 `seg`
///   (`i16` 或 `i8`, `(1, z, H, W)`) 两个数组;
/// 2. `{id}.bin`, 以 bincode 编码的 [`CaseProperties`].
#[derive(Debug)]
pub struct NpzCaseFolder {
    path: PathBuf,
    keys: Vec<String>,
}

impl NpzCaseFolder {
    /// 打开目录 `path`, 以其中所有 `*.npz` 文件作为病例.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadCaseError> {
        let path = path.as_ref().to_owned();
        let keys = super::subfiles(&path, ".npz")?
            .into_iter()
            .map(|name| name.trim_end_matches(".npz").to_owned())
            .collect();
        Ok(Self { path, keys })
    }

    /// 在 `path` 下创建空目录 (若不存在).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, LoadCaseError> {
        fs::create_dir_all(path.as_ref())?;
        Self::open(path)
    }

    /// 目录路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入病例 `case`, 已存在则覆盖.
    pub fn write_case(&mut self, case: &Case) -> Result<(), LoadCaseError> {
        let file = File::create(self.path.join(format!("{}.npz", case.id)))?;
        let mut npz = NpzWriter::new(BufWriter::new(file));
        npz.add_array("data", &case.data)?;
        npz.add_array("seg", &case.seg)?;
        npz.finish()?;

        let file = File::create(self.properties_path(&case.id))?;
        bincode::serialize_into(BufWriter::new(file), &case.properties)?;

        if !self.keys.contains(&case.id) {
            self.keys.push(case.id.clone());
            self.keys.sort_unstable();
        }
        Ok(())
    }

    /// 只读取病例属性, 不加载图像.
    pub fn load_properties(&self, key: &str) -> Result<CaseProperties, LoadCaseError> {
        let file = File::open(self.properties_path(key))?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }

    #[inline]
    fn properties_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}.bin"))
    }

    fn check_key(&self, key: &str) -> Result<(), LoadCaseError> {
        if self.keys.iter().any(|k| k == key) {
            Ok(())
        } else {
            Err(LoadCaseError::MissingCase(key.to_owned()))
        }
    }
}

/// `np.savez` 写入的条目名带有 `.npy` 后缀, 两种写法都尝试.
fn read_entry<A>(npz: &mut NpzReader<File>, name: &str) -> Result<Array4<A>, ReadNpzError>
where
    A: ndarray_npy::ReadableElement,
{
    match npz.by_name::<OwnedRepr<A>, Ix4>(&format!("{name}.npy")) {
        Ok(a) => Ok(a),
        Err(_) => npz.by_name::<OwnedRepr<A>, Ix4>(name),
    }
}

impl CaseSource for NpzCaseFolder {
    #[inline]
    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn load_case(&self, key: &str) -> Result<Case, LoadCaseError> {
        self.check_key(key)?;
        let mut npz = NpzReader::new(File::open(self.path.join(format!("{key}.npz")))?)?;
        let data = read_entry::<f32>(&mut npz, "data")?;
        let seg = match read_entry::<i16>(&mut npz, "seg") {
            Ok(seg) => seg,
            Err(_) => read_entry::<i8>(&mut npz, "seg")?.mapv(i16::from),
        };
        let (c, z, h, w) = data.dim();
        let (_, sz, sh, sw) = seg.dim();
        if c == 0 || (z, h, w) != (sz, sh, sw) {
            return Err(LoadCaseError::ShapeMismatch(key.to_owned()));
        }
        let properties = self.load_properties(key)?;
        Ok(Case {
            id: key.to_owned(),
            data,
            seg,
            properties,
        })
    }

    fn case_label(&self, key: &str) -> Result<Option<u8>, LoadCaseError> {
        self.check_key(key)?;
        Ok(self.load_properties(key)?.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ClassLocations, RegionKey};

    fn toy_case(id: &str) -> Case {
        let mut seg = Array4::<i16>::zeros((1, 2, 3, 3));
        seg[(0, 1, 1, 1)] = 3;
        let key = RegionKey::Class(3);
        let class_locations = ClassLocations::sample_from_seg(seg.view(), &[key], 0);
        Case {
            id: id.to_owned(),
            data: Array4::from_shape_fn((2, 2, 3, 3), |(c, z, h, w)| (c + z + h + w) as f32),
            seg,
            properties: CaseProperties {
                class_locations,
                spacing: [1.0, 1.0, 1.0],
                label: Some(0),
            },
        }
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut folder = NpzCaseFolder::create(dir.path()).unwrap();
        let case = toy_case("Brats18_X_1");
        folder.write_case(&case).unwrap();

        let reopened = NpzCaseFolder::open(dir.path()).unwrap();
        assert_eq!(reopened.keys(), &["Brats18_X_1".to_string()]);
        assert_eq!(reopened.case_label("Brats18_X_1").unwrap(), Some(0));

        let loaded = reopened.load_case("Brats18_X_1").unwrap();
        assert_eq!(loaded.data, case.data);
        assert_eq!(loaded.seg, case.seg);
        assert_eq!(loaded.properties, case.properties);
    }

    #[test]
    fn test_missing_case() {
        let dir = tempfile::tempdir().unwrap();
        let folder = NpzCaseFolder::create(dir.path()).unwrap();
        assert!(matches!(
            folder.load_case("nope"),
            Err(LoadCaseError::MissingCase(_))
        ));
    }
}
