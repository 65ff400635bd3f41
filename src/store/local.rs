// src/store/local.rs

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, info};

use super::{ObjectStore, StoreError};

/// Scratch space for in-flight writes; hidden from bucket listings because bucket
/// names cannot start with a dot.
const STAGING_DIR: &str = ".staging";

/// Suffix of the sidecar file holding an object's content type.
const CONTENT_TYPE_SUFFIX: &str = ".content-type";

/// An object store on the local filesystem.
///
/// Layout: `<root>/<bucket>/<key>`, where `/` in a key becomes a directory level.
/// Every write lands in `<root>/.staging` first and is renamed into place, so a
/// reader never observes a half-written object.
pub struct LocalObjectStore {
    root: PathBuf,
    seq: AtomicU64,
}

impl LocalObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR)).map_err(|e| {
            StoreError::io(format!("creating object store root {}", root.display()), e)
        })?;
        Ok(Self {
            root,
            seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content type recorded when the object was stored, if any.
    pub fn content_type(&self, bucket: &str, key: &str) -> Result<Option<String>, StoreError> {
        let path = object_path(&self.existing_bucket_dir(bucket)?, key)?;
        match fs::read_to_string(sidecar_path(&path)) {
            Ok(ct) => Ok(Some(ct)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(
                format!("reading content type of {}/{}", bucket, key),
                e,
            )),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn existing_bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.is_dir() {
            return Err(StoreError::NoSuchBucket(bucket.to_string()));
        }
        Ok(dir)
    }

    /// Write `body` to a staging file, then rename it over `dest`.
    fn write_atomic(&self, dest: &Path, body: &[u8]) -> Result<(), StoreError> {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{}.tmp", std::process::id(), n));

        fs::write(&tmp, body)
            .map_err(|e| StoreError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, dest).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(
                format!("renaming {} to {}", tmp.display(), dest.display()),
                e,
            )
        })
    }
}

impl ObjectStore for LocalObjectStore {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = object_path(&self.existing_bucket_dir(bucket)?, key)?;
        if !path.is_file() {
            return Err(StoreError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let body = fs::read(&path)
            .map_err(|e| StoreError::io(format!("reading {}/{}", bucket, key), e))?;
        debug!(bucket, key, bytes = body.len(), "fetched object");
        Ok(body)
    }

    fn store(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let dir = self.existing_bucket_dir(bucket)?;
        let path = object_path(&dir, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("creating {}", parent.display()), e))?;
        }

        self.write_atomic(&path, body)?;
        self.write_atomic(&sidecar_path(&path), content_type.as_bytes())?;
        info!(bucket, key, bytes = body.len(), content_type, "stored object");
        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.bucket_dir(bucket)?.is_dir())
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        match fs::create_dir(&dir) {
            Ok(()) => {
                info!(bucket, "created bucket");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(e) => Err(StoreError::io(format!("creating bucket {}", bucket), e)),
        }
    }

    fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::io(format!("listing {}", self.root.display()), e))?;

        let mut buckets = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| StoreError::io(format!("listing {}", self.root.display()), e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_bucket_name(name).is_ok() {
                    buckets.push(name.to_string());
                }
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.existing_bucket_dir(bucket)?;

        let mut keys = Vec::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let entries = fs::read_dir(&current)
                .map_err(|e| StoreError::io(format!("listing {}", current.display()), e))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| StoreError::io(format!("listing {}", current.display()), e))?
                    .path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&dir) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.ends_with(CONTENT_TYPE_SUFFIX) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// S3 naming rules: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both ends, no `..`.
fn validate_bucket_name(name: &str) -> Result<(), StoreError> {
    let reason = if !(3..=63).contains(&name.len()) {
        Some("bucket names must be 3 to 63 characters long")
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        Some("bucket names may only contain lowercase letters, digits, '-' and '.'")
    } else if !name.starts_with(|c: char| c.is_ascii_alphanumeric())
        || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
        Some("bucket names must begin and end with a letter or digit")
    } else if name.contains("..") {
        Some("bucket names must not contain consecutive dots")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let reason = if key.is_empty() {
        Some("object keys must not be empty")
    } else if key.starts_with('/') || key.contains('\\') {
        Some("object keys must be relative and use '/' separators")
    } else if key
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        Some("object keys must not contain empty, '.' or '..' segments")
    } else if key.ends_with(CONTENT_TYPE_SUFFIX) {
        Some("object keys must not use the reserved `.content-type` suffix")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidName {
            name: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn object_path(bucket_dir: &Path, key: &str) -> Result<PathBuf, StoreError> {
    validate_key(key)?;
    Ok(key
        .split('/')
        .fold(bucket_dir.to_path_buf(), |path, seg| path.join(seg)))
}

fn sidecar_path(object: &Path) -> PathBuf {
    let mut name = object
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(CONTENT_TYPE_SUFFIX);
    object.with_file_name(name)
}
