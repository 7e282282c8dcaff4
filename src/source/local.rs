// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 本地目录存储桶: key = 相对路径 (以 / 分隔)

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use super::{is_image_key, ImageObject, ImageSource, SourceError};

/// 元数据旁路文件后缀
pub const META_SUFFIX: &str = ".meta.json";

pub struct LocalBucket {
    root: PathBuf,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<bucket_root>/<bucket>`
    pub fn open(bucket_root: &Path, bucket: &str) -> Result<Self> {
        let root = bucket_root.join(bucket);
        if !root.is_dir() {
            anyhow::bail!("bucket directory not found: {}", root.display());
        }
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, SourceError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SourceError::NotFound(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn read_metadata(&self, key: &str, path: &Path) -> Result<BTreeMap<String, String>, SourceError> {
        let mut meta_path = path.as_os_str().to_owned();
        meta_path.push(META_SUFFIX);
        let raw = match fs::read_to_string(PathBuf::from(meta_path)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(SourceError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };
        let values: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| SourceError::Metadata {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(values
            .into_iter()
            .filter_map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                Some((k.to_lowercase(), v))
            })
            .collect())
    }
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{prefix}{name}");
        if entry.file_type()?.is_dir() {
            walk(&entry.path(), &format!("{key}/"), out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}

impl ImageSource for LocalBucket {
    fn list_images(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        walk(&self.root, "", &mut keys)
            .with_context(|| format!("failed to list {}", self.root.display()))?;
        keys.retain(|k| k.starts_with(prefix) && is_image_key(k));
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn fetch(&self, key: &str) -> Result<ImageObject, SourceError> {
        let path = self.object_path(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound(key.to_string()))
            }
            Err(source) => {
                return Err(SourceError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };
        let metadata = self.read_metadata(key, &path)?;
        Ok(ImageObject {
            key: key.to_string(),
            bytes,
            metadata,
        })
    }

    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), SourceError> {
        let path = self.object_path(key)?;
        let io_err = |source| SourceError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, bytes).map_err(io_err)
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_images_under_prefix_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path());
        bucket.put("cam1/b.jpg", b"b", "image/jpeg").unwrap();
        bucket.put("cam1/a.PNG", b"a", "image/png").unwrap();
        bucket.put("cam1/readme.txt", b"x", "text/plain").unwrap();
        bucket.put("cam2/c.jpg", b"c", "image/jpeg").unwrap();

        assert_eq!(
            bucket.list_images("cam1/").unwrap(),
            vec!["cam1/a.PNG", "cam1/b.jpg"]
        );
        assert_eq!(bucket.list_images("").unwrap().len(), 3);
    }

    #[test]
    fn fetch_reads_sidecar_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path());
        bucket.put("img.jpg", b"jpeg", "image/jpeg").unwrap();
        fs::write(
            dir.path().join("img.jpg.meta.json"),
            r#"{"Battery-Level": 3.9, "device-timestamp": "2024-05-01T10:00:00-03:00", "x": null}"#,
        )
        .unwrap();

        let obj = bucket.fetch("img.jpg").unwrap();
        assert_eq!(obj.bytes, b"jpeg");
        assert_eq!(obj.battery_level(), Some(3.9));
        assert!(obj.device_timestamp().is_some());
        assert!(!obj.metadata.contains_key("x"));
    }

    #[test]
    fn missing_or_escaping_keys_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path());
        assert!(matches!(
            bucket.fetch("nope.jpg"),
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            bucket.fetch("../etc/passwd"),
            Err(SourceError::NotFound(_))
        ));
    }

    #[test]
    fn malformed_sidecar_is_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::new(dir.path());
        bucket.put("img.jpg", b"jpeg", "image/jpeg").unwrap();
        fs::write(dir.path().join("img.jpg.meta.json"), "{not json").unwrap();
        assert!(matches!(
            bucket.fetch("img.jpg"),
            Err(SourceError::Metadata { .. })
        ));
    }
}
