//! ArtifactStore — read-only access to generated Acta documents.
//!
//! A record's `document_ref` is a URI owned by the document pipeline:
//!
//! ```text
//! s3://projectplace-acta/acta/P1.pdf      # S3 (or MinIO with ACTA_ARTIFACT_ENDPOINT)
//! file:///var/lib/acta/P1.pdf             # under ACTA_ARTIFACT_LOCAL_ROOT only
//! ```
//!
//! One object store is built per `(scheme, bucket)` on first use and reused
//! afterwards. Credentials come from the standard `AWS_*` environment
//! variables. `file://` references are refused unless a local root is
//! configured, and must then point inside it.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use object_store::{path::Path, ObjectStore};
use url::Url;

use crate::errors::AppError;

/// Bucket key used for `file://` references.
const LOCAL_BUCKET: &str = "";

/// A fetched artifact, ready to attach.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct ArtifactStore {
    region: String,
    endpoint: Option<String>,
    local_root: Option<PathBuf>,
    /// (scheme, bucket) -> store
    buckets: Arc<DashMap<(String, String), Arc<dyn ObjectStore>>>,
}

impl ArtifactStore {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            region: region.into(),
            endpoint,
            local_root: None,
            buckets: Arc::new(DashMap::new()),
        }
    }

    /// Allow `file://` references below `root`.
    pub fn with_local_root(mut self, root: Option<PathBuf>) -> Self {
        self.local_root = root;
        self
    }

    /// Serve `scheme://bucket/...` from an already-built store.
    pub fn register(&self, scheme: &str, bucket: &str, store: Arc<dyn ObjectStore>) {
        self.buckets
            .insert((scheme.to_string(), bucket.to_string()), store);
    }

    /// Resolve and read `document_ref`.
    ///
    /// Unparseable or disallowed references and absent objects are
    /// `ArtifactMissing`; transport failures are reported as retryable
    /// store errors.
    pub async fn fetch(&self, document_ref: &str) -> Result<Artifact, AppError> {
        let location = ArtifactLocation::parse(document_ref)?;
        let path = self.object_path(&location, document_ref)?;
        let store = self.store_for(&location)?;

        let result = match store.get(&path).await {
            Ok(r) => r,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(AppError::ArtifactMissing(format!(
                    "{} does not exist",
                    document_ref
                )));
            }
            Err(e) => {
                return Err(AppError::Store(
                    anyhow::Error::new(e).context(format!("failed to read {}", document_ref)),
                ));
            }
        };

        let bytes = result.bytes().await.map_err(|e| {
            AppError::Store(anyhow::Error::new(e).context("failed to read artifact bytes"))
        })?;

        tracing::debug!(
            document_ref,
            size = bytes.len(),
            "fetched Acta artifact"
        );

        Ok(Artifact {
            content_type: content_type_for(&location.file_name),
            file_name: location.file_name,
            bytes,
        })
    }

    /// Key inside the store. Local paths are made relative to the root.
    fn object_path(&self, location: &ArtifactLocation, document_ref: &str) -> Result<Path, AppError> {
        if location.scheme != "file" {
            return Ok(location.path.clone());
        }
        let Some(root) = &self.local_root else {
            return Err(AppError::ArtifactMissing(format!(
                "{}: file:// references are disabled (ACTA_ARTIFACT_LOCAL_ROOT is not set)",
                document_ref
            )));
        };

        let absolute = PathBuf::from(format!("/{}", location.path.as_ref()));
        let relative = absolute.strip_prefix(root).map_err(|_| {
            AppError::ArtifactMissing(format!(
                "{} is outside the artifact root {}",
                document_ref,
                root.display()
            ))
        })?;
        Ok(Path::from_iter(
            relative.iter().map(|part| part.to_string_lossy().into_owned()),
        ))
    }

    fn store_for(&self, location: &ArtifactLocation) -> Result<Arc<dyn ObjectStore>, AppError> {
        let entry = self
            .buckets
            .entry((location.scheme.clone(), location.bucket.clone()))
            .or_try_insert_with(|| self.build(location))?;
        Ok(entry.value().clone())
    }

    fn build(&self, location: &ArtifactLocation) -> Result<Arc<dyn ObjectStore>, AppError> {
        match location.scheme.as_str() {
            "file" => {
                let Some(root) = &self.local_root else {
                    return Err(AppError::ArtifactMissing(
                        "file:// references are disabled (ACTA_ARTIFACT_LOCAL_ROOT is not set)".into(),
                    ));
                };
                let store = object_store::local::LocalFileSystem::new_with_prefix(root).map_err(|e| {
                    AppError::Store(anyhow::Error::new(e).context("failed to open local artifact root"))
                })?;
                tracing::info!(root = %root.display(), "ArtifactStore: opened local artifact root");
                Ok(Arc::new(store))
            }
            "s3" => {
                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(&location.bucket)
                    .with_region(&self.region);
                if let Some(ep) = &self.endpoint {
                    builder = builder.with_endpoint(ep).with_allow_http(true);
                }
                let store = builder.build().map_err(|e| {
                    AppError::Store(anyhow::Error::new(e).context("failed to build S3 object store"))
                })?;
                tracing::info!(bucket = %location.bucket, region = %self.region, "ArtifactStore: opened S3 bucket");
                Ok(Arc::new(store))
            }
            other => Err(AppError::ArtifactMissing(format!(
                "unsupported document_ref scheme '{}' (bucket '{}' not registered)",
                other, location.bucket
            ))),
        }
    }
}

/// A parsed `document_ref`.
#[derive(Debug, Clone, PartialEq)]
struct ArtifactLocation {
    scheme: String,
    bucket: String,
    path: Path,
    file_name: String,
}

impl ArtifactLocation {
    fn parse(document_ref: &str) -> Result<Self, AppError> {
        let url = Url::parse(document_ref.trim()).map_err(|e| {
            AppError::ArtifactMissing(format!("invalid document_ref '{}': {}", document_ref, e))
        })?;

        let scheme = url.scheme().to_string();
        let bucket = if scheme == "file" {
            LOCAL_BUCKET.to_string()
        } else {
            match url.host_str() {
                Some(h) if !h.is_empty() => h.to_string(),
                _ => {
                    return Err(AppError::ArtifactMissing(format!(
                        "document_ref '{}' has no bucket",
                        document_ref
                    )))
                }
            }
        };

        let key = urlencoding::decode(url.path().trim_start_matches('/'))
            .map_err(|e| {
                AppError::ArtifactMissing(format!("invalid document_ref '{}': {}", document_ref, e))
            })?
            .into_owned();
        if key.is_empty() || key.ends_with('/') {
            return Err(AppError::ArtifactMissing(format!(
                "document_ref '{}' does not name an object",
                document_ref
            )));
        }
        if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            return Err(AppError::ArtifactMissing(format!(
                "document_ref '{}' has an invalid path",
                document_ref
            )));
        }

        let file_name = key.rsplit('/').next().unwrap_or(&key).to_string();

        Ok(Self {
            scheme,
            bucket,
            path: Path::from(key.as_str()),
            file_name,
        })
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
