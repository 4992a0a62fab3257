use std::convert::Infallible;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::metrics_provider::METRICS_PROVIDER;
use crate::pipeline::{Error, PipelineResponse};
use crate::server::ServerContext;

pub async fn serve_request<S>(
    stream: TokioIo<S>,
    context: Arc<ServerContext>,
    timeouts: Arc<[Duration; 2]>,
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |request| handle_request(Arc::clone(&context), request)),
    );
    pin!(conn);

    METRICS_PROVIDER.connection_opened();

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                // Past the first deadline, let in-flight requests finish within the grace period.
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    METRICS_PROVIDER.connection_closed();
}

#[instrument(skip(context, request))]
async fn handle_request(
    context: Arc<ServerContext>,
    request: Request<Incoming>,
) -> Result<PipelineResponse, Infallible> {
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match run_pipeline(&context, request).await {
        Ok(response) => response,
        Err(error) => error_to_response(&error, trace_id.as_deref()),
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER.record_request(method.as_str(), status, elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

async fn run_pipeline(
    context: &ServerContext,
    request: Request<Incoming>,
) -> Result<PipelineResponse, Error> {
    let (parts, incoming) = request.into_parts();

    let body = Limited::new(incoming, context.max_body_size)
        .collect()
        .await
        .map_err(|error| {
            if error.downcast_ref::<LengthLimitError>().is_some() {
                Error::PayloadTooLarge
            } else {
                Error::BadRequest(format!("Unable to read request body: {error}"))
            }
        })?
        .to_bytes();

    context
        .pipeline
        .handle(Request::from_parts(parts, body))
        .await
}

/// Last-resort rendering for errors no pipeline stage turned into a response.
pub fn error_to_response(error: &Error, trace_id: Option<&str>) -> PipelineResponse {
    let status = error.status_code();
    let message = if status.is_server_error() {
        status
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_string()
    } else {
        error.to_string()
    };

    let body = json!({
        "error": message,
        "trace_id": trace_id,
    });

    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
