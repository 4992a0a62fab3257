//! Ordered request-handling stages.
//!
//! A [`Pipeline`] is a fixed chain of [`Stage`]s. Each stage gets the request and
//! a [`Next`] handle on the remainder of the chain: it can answer on its own,
//! delegate, or post-process what the rest of the chain produced. Requests that
//! fall off the end of the chain are answered `404`.

use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, LOCATION};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;

mod assembler;
mod diagnostics;
mod dispatch;
mod error;
mod federation;
mod guard;
mod request_ext;
mod session;
mod static_files;

pub use assembler::{Components, Environment, PipelineAssembler};
pub use error::Error;
pub use request_ext::RequestExt;
pub use session::SessionManager;
pub use static_files::{AssetResolver, FsAssetResolver};

pub type PipelineRequest = Request<Bytes>;
pub type PipelineResponse = Response<Full<Bytes>>;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> String;

    async fn invoke(&self, request: PipelineRequest, next: Next<'_>)
        -> Result<PipelineResponse, Error>;
}

/// The stages following the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl Next<'_> {
    pub async fn run(self, request: PipelineRequest) -> Result<PipelineResponse, Error> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.invoke(request, Next { stages: rest }).await,
            None => Err(Error::NotFound),
        }
    }
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn handle(&self, request: PipelineRequest) -> Result<PipelineResponse, Error> {
        Next {
            stages: &self.stages,
        }
        .run(request)
        .await
    }
}

pub fn empty(status: StatusCode) -> Result<PipelineResponse, Error> {
    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))?)
}

pub fn text(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Result<PipelineResponse, Error> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))?)
}

pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<PipelineResponse, Error> {
    let body = serde_json::to_vec(value)
        .map_err(|e| Error::Internal(format!("Unable to serialize response: {e}")))?;
    text(status, "application/json", body)
}

pub fn redirect(location: &str) -> Result<PipelineResponse, Error> {
    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .body(Full::new(Bytes::new()))?)
}
