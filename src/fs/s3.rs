use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::types::{BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration};
use futures::TryStreamExt;
use opendal::{services::S3, ErrorKind, Operator};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::fs::backend::{
    decode_request_key, ListEntry, ListPage, ObjectHead, PutOptions, RemoteStore,
};

/// Regions accepted without an explicit endpoint.
pub const AWS_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "eu-north-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-south-1",
    "sa-east-1",
];

/// Region whose buckets are created without a location constraint.
const DEFAULT_LOCATION: &str = "us-east-1";

/// Multipart part size. Objects up to this size go out in a single put,
/// so their ETag stays the MD5 of the content.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Read buffer used while streaming a file into an upload.
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Credentials used to sign requests.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Explicit access key pair.
    Static {
        access_key: String,
        secret_key: String,
    },
    /// Standard AWS chain: environment, shared credentials file, instance profile.
    Chain,
}

/// S3 and S3-compatible object store using OpenDAL
pub struct S3Store {
    operator: Operator,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    credentials: Credentials,
}

impl S3Store {
    /// Create a store for `bucket`.
    ///
    /// `endpoint` selects an S3-compatible provider (MinIO, R2, Wasabi, ...);
    /// without it the default AWS endpoint for `region` is used.
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: &Credentials,
    ) -> Result<Self> {
        let mut builder = S3::default().bucket(bucket).region(region);

        if let Credentials::Static { access_key, secret_key } = credentials {
            builder = builder
                .access_key_id(access_key)
                .secret_access_key(secret_key);
        }
        // Otherwise let OpenDAL auto-detect from the environment.

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)
            .context("Failed to configure S3 backend")?
            .finish();

        Ok(Self {
            operator,
            bucket: bucket.to_string(),
            region: region.to_string(),
            endpoint: endpoint.map(str::to_string),
            credentials: credentials.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// SDK client for bucket administration, which OpenDAL does not cover.
    async fn admin_client(&self) -> aws_sdk_s3::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(self.region.clone()));
        if let Credentials::Static { access_key, secret_key } = &self.credentials {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "bucketsync",
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.endpoint.is_some())
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }

    /// Create the bucket as private in the configured region.
    async fn create_bucket(&self) -> Result<()> {
        let client = self.admin_client().await;
        let mut request = client
            .create_bucket()
            .bucket(&self.bucket)
            .acl(BucketCannedAcl::Private);
        if let Some(constraint) = location_constraint(&self.region) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            // Another run created it in the meantime
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(err) => Err(err).with_context(|| {
                format!(
                    "Failed to create bucket '{}' in region '{}'",
                    self.bucket, self.region
                )
            }),
        }
    }
}

/// Whether a failed access check means the bucket does not exist.
fn is_missing_bucket(err: &opendal::Error) -> bool {
    err.kind() == ErrorKind::NotFound
}

/// Feed `file` into `writer` one part at a time.
async fn stream_file(
    file: &mut tokio::fs::File,
    writer: &mut opendal::Writer,
    src: &Path,
) -> Result<u64> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut sent = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("Failed to read file: {}", src.display()))?;
        if n == 0 {
            return Ok(sent);
        }
        writer
            .write(buf[..n].to_vec())
            .await
            .context("Failed to upload to S3")?;
        sent += n as u64;
    }
}

fn location_constraint(region: &str) -> Option<BucketLocationConstraint> {
    (region != DEFAULT_LOCATION).then(|| BucketLocationConstraint::from(region))
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn list(&self, prefix: &str, marker: Option<&str>, limit: usize) -> Result<ListPage> {
        let prefix = prefix.trim_start_matches('/');
        let mut request = self.operator.lister_with(prefix).recursive(true);
        if let Some(marker) = marker {
            request = request.start_after(marker);
        }
        let mut lister = request
            .await
            .with_context(|| format!("Failed to list {}", self.display_path(prefix)))?;

        let mut page = ListPage::default();
        while let Some(entry) = lister
            .try_next()
            .await
            .with_context(|| format!("Failed to list {}", self.display_path(prefix)))?
        {
            let meta = entry.metadata();
            // Directory markers synthesized by the lister are not objects
            if meta.mode().is_dir() {
                continue;
            }
            if page.entries.len() == limit {
                page.truncated = true;
                break;
            }
            page.entries.push(ListEntry::new(
                entry.path(),
                meta.etag().map(str::to_string),
            ));
        }

        Ok(page)
    }

    async fn get(&self, request_key: &str, dest: &Path) -> Result<u64> {
        let key = decode_request_key(request_key.trim_start_matches('/'));
        let reader = self
            .operator
            .reader(&key)
            .await
            .context("Failed to download from S3")?;
        let mut stream = reader
            .into_bytes_stream(..)
            .await
            .context("Failed to download from S3")?;

        // Opened only once the object is known to exist
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create file: {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = stream
            .try_next()
            .await
            .context("Failed to download from S3")?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write file: {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn put(&self, key: &str, src: &Path, options: &PutOptions) -> Result<u64> {
        let key = key.trim_start_matches('/');
        let mut file = tokio::fs::File::open(src)
            .await
            .with_context(|| format!("Failed to open file: {}", src.display()))?;
        let mut writer = self
            .operator
            .writer_with(key)
            .content_type(&options.content_type)
            .chunk(UPLOAD_CHUNK_SIZE)
            .await
            .context("Failed to upload to S3")?;

        let sent = stream_file(&mut file, &mut writer, src).await;
        match sent {
            Ok(sent) => {
                writer.close().await.context("Failed to upload to S3")?;
                Ok(sent)
            }
            Err(err) => {
                // Drop any parts already sent
                let _ = writer.abort().await;
                Err(err)
            }
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        let key = key.trim_start_matches('/');
        let meta = self
            .operator
            .stat(key)
            .await
            .context("Failed to stat S3 object")?;
        Ok(ObjectHead {
            content_tag: meta.etag().map(str::to_string),
            content_length: meta.content_length(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.trim_start_matches('/');
        self.operator
            .delete(key)
            .await
            .context("Failed to delete S3 object")?;
        Ok(())
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.operator.check().await {
            Ok(()) => Ok(()),
            Err(err) if is_missing_bucket(&err) => {
                tracing::info!(bucket = %self.bucket, region = %self.region, "creating bucket");
                self.create_bucket().await
            }
            Err(err) => Err(err).with_context(|| {
                format!(
                    "Could not access bucket '{}' in region '{}'",
                    self.bucket, self.region
                )
            }),
        }
    }

    fn display_path(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}
