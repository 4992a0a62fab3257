use async_trait::async_trait;
use hyper::body::Body;
use hyper::{Method, StatusCode};
use serde::Serialize;
use tracing::{error, warn};

use crate::pipeline::{
    empty, json, redirect, text, Error, Next, PipelineRequest, PipelineResponse, Stage,
};

pub const ERROR_PATH: &str = "/Home/Error";
pub const STATUS_CODE_PAGE_PATH: &str = "/Home/StatusCodePage";
pub const RUNTIME_INFO_PATH: &str = "/runtimeinfo";

/// Redirects bodiless error responses to the status code page.
pub struct StatusCodePages;

#[async_trait]
impl Stage for StatusCodePages {
    fn name(&self) -> String {
        "status-code-pages".to_string()
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        let is_status_page = request
            .uri()
            .path()
            .eq_ignore_ascii_case(STATUS_CODE_PAGE_PATH);

        let response = next.run(request).await?;
        let status = response.status();
        let bodiless = response.body().size_hint().exact() == Some(0);

        if is_status_page || !bodiless || !(status.is_client_error() || status.is_server_error())
        {
            return Ok(response);
        }

        redirect(&format!("{STATUS_CODE_PAGE_PATH}?code={}", status.as_u16()))
    }
}

/// Renders failures with their full detail. Only assembled for development.
pub struct DeveloperErrorPage;

#[async_trait]
impl Stage for DeveloperErrorPage {
    fn name(&self) -> String {
        "developer-error-page".to_string()
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        let method = request.method().clone();
        let uri = request.uri().clone();

        match next.run(request).await {
            Ok(response) => Ok(response),
            Err(error) if error.status_code().is_server_error() => {
                let status = error.status_code();
                warn!("Unhandled error on {method} {uri}: {error}");
                let page = format!("{status}\n\n{error}\n\nRequest: {method} {uri}\n{error:?}\n");
                text(status, "text/plain; charset=utf-8", page)
            }
            Err(error) => empty(error.status_code()),
        }
    }
}

/// Hides failure details behind a redirect to the generic error page.
pub struct ErrorRedirect;

#[async_trait]
impl Stage for ErrorRedirect {
    fn name(&self) -> String {
        "error-redirect".to_string()
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        let is_error_page = request.uri().path().eq_ignore_ascii_case(ERROR_PATH);

        match next.run(request).await {
            Ok(response) => Ok(response),
            Err(error) if error.status_code().is_server_error() => {
                error!("Request failed: {error}");
                if is_error_page {
                    return empty(error.status_code());
                }
                redirect(ERROR_PATH)
            }
            Err(error) => empty(error.status_code()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub challenge_path: String,
    pub callback_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuntimeReport {
    pub environment: String,
    pub version: &'static str,
    pub stages: Vec<String>,
    pub providers: Vec<ProviderInfo>,
    pub policies: Vec<String>,
}

pub struct RuntimeInfo {
    report: RuntimeReport,
}

impl RuntimeInfo {
    pub fn new(report: RuntimeReport) -> Self {
        Self { report }
    }
}

#[async_trait]
impl Stage for RuntimeInfo {
    fn name(&self) -> String {
        "runtime-info".to_string()
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        if request.method() == Method::GET
            && request.uri().path().eq_ignore_ascii_case(RUNTIME_INFO_PATH)
        {
            return json(StatusCode::OK, &self.report);
        }

        next.run(request).await
    }
}
