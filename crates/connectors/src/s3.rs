//! Amazon S3 backed object store.

use crate::{
    error::StoreError,
    store::{ObjectStore, validate_key},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    self as aws_s3,
    config::http::HttpResponse,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
};
use model::pagination::{
    cursor::Cursor,
    page::{ListPage, ObjectEntry},
};
use std::{path::Path, time::Duration};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

const THROTTLE_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    bucket: String,
    client: aws_s3::Client,
}

impl S3ObjectStore {
    /// Builds a client from the default AWS credential chain.
    pub async fn connect(bucket: &str, region: Option<&str>) -> Result<Self, StoreError> {
        if bucket.trim().is_empty() {
            return Err(StoreError::Config("bucket name is empty".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_s3::config::Region::new(region.to_string()));
        }
        let config = loader.load().await;

        info!(bucket, region = ?config.region(), "S3 object store initialized");

        Ok(Self {
            bucket: bucket.to_string(),
            client: aws_s3::Client::new(&config),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        let max_keys = i32::try_from(max_keys)
            .map_err(|_| StoreError::Config(format!("max_keys {max_keys} out of range")))?;

        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(max_keys);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(token) = cursor.token() {
            request = request.continuation_token(token);
        }

        let output = request.send().await.map_err(|e| classify_sdk_error("list", e))?;

        let entries: Vec<ObjectEntry> = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output
                .next_continuation_token()
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        } else {
            None
        };

        debug!(
            bucket = %self.bucket,
            prefix,
            listed = entries.len(),
            has_more = next_token.is_some(),
            "Listed S3 page"
        );

        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn get_object(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        validate_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e))?;

        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| StoreError::local(dest, e))?;
        let mut body = output.body;
        let mut written = 0u64;

        while let Some(bytes) = body
            .try_next()
            .await
            .map_err(|e| StoreError::Transient(format!("reading body of {key}: {e}")))?
        {
            file.write_all(&bytes)
                .await
                .map_err(|e| StoreError::local(dest, e))?;
            written += bytes.len() as u64;
        }
        file.sync_all()
            .await
            .map_err(|e| StoreError::local(dest, e))?;

        Ok(written)
    }

    async fn put_object(&self, src: &Path, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StoreError::local(src, std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_sdk_error(key, e))?;

        debug!(bucket = %self.bucket, key, "Uploaded object");
        Ok(())
    }
}

fn classify_sdk_error<E>(context: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{context}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) => StoreError::Timeout {
            op: context.to_string(),
            after: Duration::ZERO,
        },
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreError::Transient(message)
        }
        SdkError::ServiceError(service) => {
            let code = service.err().code().unwrap_or_default();
            let status = service.raw().status().as_u16();
            if THROTTLE_CODES.contains(&code) || status == 429 || status == 503 {
                StoreError::Throttled(message)
            } else if code == "NoSuchKey" || code == "NotFound" || status == 404 {
                StoreError::NotFound(context.to_string())
            } else if code == "NoSuchBucket" || code == "AccessDenied" {
                StoreError::Config(message)
            } else if status >= 500 {
                StoreError::Transient(message)
            } else {
                StoreError::Other(message)
            }
        }
        _ => StoreError::Other(message),
    }
}
