use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{redirect, Client};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::config::AcquisitionSection;
use crate::media::{MediaAsset, MediaRole};

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported url scheme {scheme} in {url}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Materialises a remote asset on local disk.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn fetch(&self, url: &str, role: MediaRole, dest: &Path)
        -> AcquisitionResult<MediaAsset>;
}

/// HTTP(S) downloads with bounded redirects and timeout. `file://` URLs are
/// copied locally, but only when the configuration allows it.
#[derive(Debug, Clone)]
pub struct HttpAcquirer {
    client: Client,
    allow_file_urls: bool,
}

impl HttpAcquirer {
    pub fn new(settings: &AcquisitionSection) -> AcquisitionResult<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .build()
            .map_err(|err| AcquisitionError::Client(err.to_string()))?;
        Ok(Self {
            client,
            allow_file_urls: settings.allow_file_urls,
        })
    }

    async fn download(&self, url: &Url, dest: &Path) -> AcquisitionResult<()> {
        let network = |source| AcquisitionError::Network {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let io_error = |source| AcquisitionError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = fs::File::create(dest).await.map_err(io_error)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(network)?;
            file.write_all(&data).await.map_err(io_error)?;
        }
        file.flush().await.map_err(io_error)?;
        Ok(())
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    async fn fetch(
        &self,
        url: &str,
        role: MediaRole,
        dest: &Path,
    ) -> AcquisitionResult<MediaAsset> {
        let parsed = Url::parse(url).map_err(|err| AcquisitionError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| AcquisitionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let result = match parsed.scheme() {
            "file" if self.allow_file_urls => {
                let source_path =
                    parsed
                        .to_file_path()
                        .map_err(|_| AcquisitionError::InvalidUrl {
                            url: url.to_string(),
                            reason: "not a local file path".into(),
                        })?;
                fs::copy(&source_path, dest)
                    .await
                    .map(|_| ())
                    .map_err(|source| AcquisitionError::Io {
                        path: source_path,
                        source,
                    })
            }
            "http" | "https" => self.download(&parsed, dest).await,
            other => {
                return Err(AcquisitionError::UnsupportedScheme {
                    url: url.to_string(),
                    scheme: other.to_string(),
                })
            }
        };
        if let Err(err) = result {
            if let Err(remove_err) = fs::remove_file(dest).await {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %dest.display(), error = %remove_err, "failed to remove partial download");
                }
            }
            return Err(err);
        }
        debug!(role = %role, url = %url, path = %dest.display(), "asset acquired");
        Ok(MediaAsset::new(role, dest))
    }
}
