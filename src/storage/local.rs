//! Disk-backed storage backend.
//!
//! Emulates presigned part uploads against this service itself: presigned
//! URLs point at the signed `PUT /parts/{key}` endpoint, part payloads land
//! as `{base_path}/{key}.part.{n}`, and finalize concatenates them into the
//! final object with a tmp-file + fsync + atomic rename.

use crate::storage::{
    BackendError, BackendResult, MAX_PART_NUMBER, PresignedPart, StorageBackend,
    sign::{UrlSigner, encode_key_path},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

const MAX_OBJECT_KEY_LEN: usize = 1024;

pub struct LocalBackend {
    base_path: PathBuf,
    public_base_url: String,
    signer: UrlSigner,
    presign_ttl: Duration,
}

impl LocalBackend {
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signer: UrlSigner,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
            signer,
            presign_ttl,
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys with an empty, `.` or `..` path segment (an empty
    /// segment covers leading `/` and `//`). The check is per-segment so
    /// file names that merely contain dots, like `report..final.pdf`,
    /// stay valid. Keys are normally generated by the session manager,
    /// but the part-PUT endpoint also receives them from the request path.
    pub fn ensure_key_safe(key: &str) -> BackendResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(BackendError::Io(invalid_key(key)));
        }
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(BackendError::Io(invalid_key(key)));
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BackendError::Io(invalid_key(key)));
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn part_path(&self, key: &str, part_number: i64) -> PathBuf {
        self.base_path.join(format!("{}.part.{}", key, part_number))
    }

    pub fn verify_part_token(
        &self,
        key: &str,
        part_number: i64,
        expires_unix: i64,
        signature: &str,
    ) -> Result<(), crate::storage::sign::SignatureError> {
        self.signer
            .verify(key, part_number, expires_unix, signature, Utc::now().timestamp())
    }

    /// Stream one part's payload to disk and return its size and md5 etag.
    ///
    /// Writes to a temp file first and renames into place, so a retried
    /// upload of the same part replaces it atomically.
    pub async fn put_part<S>(
        &self,
        key: &str,
        part_number: i64,
        stream: S,
    ) -> BackendResult<(i64, String)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_key_safe(key)?;
        if part_number < 1 || part_number > MAX_PART_NUMBER {
            return Err(BackendError::InvalidPart(part_number));
        }

        let part_path = self.part_path(key, part_number);
        let parent = part_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BackendError::Io(invalid_key(key)))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BackendError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &part_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        debug!(key, part_number, size_bytes, "stored local part");
        Ok((size_bytes, etag))
    }

    /// Open a finalized object for streaming out.
    pub async fn object_reader(&self, key: &str) -> BackendResult<(u64, File)> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        let file = File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok((len, file))
    }

    /// Recursively remove empty directories up to the storage root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn presign_part(
        &self,
        object_key: &str,
        part_number: i64,
    ) -> BackendResult<PresignedPart> {
        Self::ensure_key_safe(object_key)?;
        if part_number < 1 || part_number > MAX_PART_NUMBER {
            return Err(BackendError::InvalidPart(part_number));
        }

        let expires_at = Utc::now()
            + ChronoDuration::from_std(self.presign_ttl)
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let expires_unix = expires_at.timestamp();
        let signature = self.signer.sign(object_key, part_number, expires_unix);
        let url = format!(
            "{}/parts/{}?part={}&expires={}&sig={}",
            self.public_base_url.trim_end_matches('/'),
            encode_key_path(object_key),
            part_number,
            expires_unix,
            signature
        );

        Ok(PresignedPart { url, expires_at })
    }

    async fn finalize(&self, object_key: &str, part_count: i64) -> BackendResult<String> {
        Self::ensure_key_safe(object_key)?;
        let final_path = self.object_path(object_key);
        if fs::try_exists(&final_path).await? {
            return Err(BackendError::FinalizeConflict(object_key.to_string()));
        }

        let mut committed = 0;
        for part_number in 1..=part_count {
            if fs::try_exists(&self.part_path(object_key, part_number)).await? {
                committed += 1;
            }
        }
        if committed < part_count {
            return Err(BackendError::IncompleteParts {
                expected: part_count,
                committed,
            });
        }

        let parent = final_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BackendError::Io(invalid_key(object_key)))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        for part_number in 1..=part_count {
            let part_path = self.part_path(object_key, part_number);
            let mut part = match File::open(&part_path).await {
                Ok(part) => part,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BackendError::Io(err));
                }
            };
            if let Err(err) = tokio::io::copy(&mut part, &mut out).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        out.flush().await?;
        out.sync_all().await?;
        fs::rename(&tmp_path, &final_path).await?;

        for part_number in 1..=part_count {
            let _ = fs::remove_file(self.part_path(object_key, part_number)).await;
        }

        debug!(object_key, part_count, "assembled local object");
        Ok(format!("file://{}", final_path.display()))
    }

    async fn abort(&self, object_key: &str) {
        if Self::ensure_key_safe(object_key).is_err() {
            return;
        }

        // Part files live next to the would-be final object, named
        // `{file}.part.{n}`.
        let final_path = self.object_path(object_key);
        let Some(parent) = final_path.parent() else {
            return;
        };
        let Some(file_name) = final_path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let prefix = format!("{}.part.", file_name);

        match fs::read_dir(parent).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Some(name) = entry.file_name().to_str() {
                        if name.starts_with(&prefix) {
                            if let Err(err) = fs::remove_file(entry.path()).await {
                                warn!(object_key, "failed to remove part file: {}", err);
                            }
                        }
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(object_key, "failed to scan part directory: {}", err),
        }

        self.prune_empty_dirs(parent).await;
    }
}

fn invalid_key(key: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, format!("invalid object key `{}`", key))
}
