use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use tracing::{debug, info};

use crate::pipeline::{Error, Next, PipelineRequest, PipelineResponse, Stage};

#[derive(Clone, Debug, PartialEq)]
pub struct Asset {
    pub content: Bytes,
    pub content_type: &'static str,
}

/// Static asset lookup keyed by request path.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Option<Asset>, Error>;
}

#[derive(Debug)]
pub struct FsAssetResolver {
    root: PathBuf,
}

impl FsAssetResolver {
    pub fn new(root: &Path) -> Self {
        if !root.is_dir() {
            info!("Static file root {} does not exist", root.display());
        }
        Self {
            root: root.to_path_buf(),
        }
    }

    // Rejects anything that could escape the root: `..`, hidden entries, backslashes.
    fn file_path(&self, path: &str) -> Option<PathBuf> {
        let mut file_path = self.root.clone();
        let mut segments = 0;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if segment.starts_with('.') || segment.contains('\\') || segment.contains('\0') {
                return None;
            }
            file_path.push(segment);
            segments += 1;
        }

        (segments > 0).then_some(file_path)
    }
}

#[async_trait]
impl AssetResolver for FsAssetResolver {
    async fn resolve(&self, path: &str) -> Result<Option<Asset>, Error> {
        let Some(file_path) = self.file_path(path) else {
            return Ok(None);
        };

        match std::fs::read(&file_path) {
            Ok(content) => Ok(Some(Asset {
                content: Bytes::from(content),
                content_type: content_type(&file_path),
            })),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                Ok(None)
            }
            Err(e) if file_path.is_dir() => {
                debug!("{} is a directory: {e}", file_path.display());
                Ok(None)
            }
            Err(e) => Err(Error::Internal(format!(
                "Unable to read {}: {e}",
                file_path.display()
            ))),
        }
    }
}

pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

pub struct StaticFiles {
    resolver: Arc<dyn AssetResolver>,
}

impl StaticFiles {
    pub fn new(resolver: Arc<dyn AssetResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for StaticFiles {
    fn name(&self) -> String {
        "static-files".to_string()
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        if ![Method::GET, Method::HEAD].contains(request.method()) {
            return next.run(request).await;
        }

        let Some(asset) = self.resolver.resolve(request.uri().path()).await? else {
            return next.run(request).await;
        };

        let length = asset.content.len();
        let body = if request.method() == Method::HEAD {
            Bytes::new()
        } else {
            asset.content
        };

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, asset.content_type)
            .header(CONTENT_LENGTH, length)
            .header(CACHE_CONTROL, "public, max-age=3600")
            .body(Full::new(body))?)
    }
}
