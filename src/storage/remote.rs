//! Remote object-gateway backend.
//!
//! Talks to an S3-style HTTP gateway that accepts per-part PUTs addressed
//! by `(bucket, key, partNumber)` with a signed query string. Finalize and
//! abort are signed control calls issued with a bounded-timeout client;
//! only presign is fully offline.

use crate::storage::{
    BackendError, BackendResult, MAX_PART_NUMBER, PresignedPart, StorageBackend,
    sign::{UrlSigner, encode_key_path},
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

pub struct RemoteBackend {
    endpoint: String,
    bucket: String,
    signer: UrlSigner,
    presign_ttl: Duration,
    client: reqwest::Client,
}

/// Body the gateway returns when finalize fails a parts precondition.
#[derive(Debug, Deserialize)]
struct IncompleteBody {
    committed: Option<i64>,
}

impl RemoteBackend {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        signer: UrlSigner,
        presign_ttl: Duration,
        request_timeout: Duration,
    ) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let endpoint = endpoint.into();
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            signer,
            presign_ttl,
            client,
        })
    }

    fn scoped_key(&self, object_key: &str) -> String {
        format!("{}/{}", self.bucket, object_key)
    }

    fn object_url(&self, object_key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            encode_key_path(object_key)
        )
    }

    /// Control calls reuse the part-token scheme with part number 0, with
    /// the action folded into the signed key so a `complete` token cannot
    /// be replayed as an `abort` or vice versa.
    fn signed_control_url(&self, object_key: &str, action: &str, query: &str) -> String {
        let expires_unix = (Utc::now() + ChronoDuration::minutes(5)).timestamp();
        let signature = self.signer.sign(
            &format!("{}:{}", action, self.scoped_key(object_key)),
            0,
            expires_unix,
        );
        format!(
            "{}?{}&expires={}&signature={}",
            self.object_url(object_key),
            query,
            expires_unix,
            signature
        )
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    async fn presign_part(
        &self,
        object_key: &str,
        part_number: i64,
    ) -> BackendResult<PresignedPart> {
        if part_number < 1 || part_number > MAX_PART_NUMBER {
            return Err(BackendError::InvalidPart(part_number));
        }

        let expires_at = Utc::now()
            + ChronoDuration::from_std(self.presign_ttl)
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let expires_unix = expires_at.timestamp();
        let signature = self
            .signer
            .sign(&self.scoped_key(object_key), part_number, expires_unix);
        let url = format!(
            "{}?partNumber={}&expires={}&signature={}",
            self.object_url(object_key),
            part_number,
            expires_unix,
            signature
        );

        Ok(PresignedPart { url, expires_at })
    }

    async fn finalize(&self, object_key: &str, part_count: i64) -> BackendResult<String> {
        let url = self.signed_control_url(
            object_key,
            "complete",
            &format!("complete&parts={}", part_count),
        );
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(self.object_url(object_key)),
            StatusCode::CONFLICT => Err(BackendError::FinalizeConflict(object_key.to_string())),
            StatusCode::PRECONDITION_FAILED => {
                let committed = response
                    .json::<IncompleteBody>()
                    .await
                    .ok()
                    .and_then(|b| b.committed)
                    .unwrap_or(0);
                Err(BackendError::IncompleteParts {
                    expected: part_count,
                    committed,
                })
            }
            status => Err(BackendError::Unavailable(format!(
                "gateway returned {} for finalize",
                status
            ))),
        }
    }

    async fn abort(&self, object_key: &str) {
        let url = self.signed_control_url(object_key, "abort", "abort");
        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    object_key,
                    status = %response.status(),
                    "remote abort rejected by gateway"
                );
            }
            Err(err) => warn!(object_key, "remote abort failed: {}", err),
        }
    }
}
