use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::SET_COOKIE;
use hyper::{Method, StatusCode, Uri};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use crate::entity_store::EntityStore;
use crate::identity::ClaimsPrincipal;
use crate::metrics_provider::METRICS_PROVIDER;
use crate::pipeline::session::SessionId;
use crate::pipeline::{
    empty, json, redirect, text, Error, Next, PipelineRequest, PipelineResponse, RequestExt,
    SessionManager, Stage,
};

#[derive(Debug, PartialEq)]
pub enum Route<'a> {
    Welcome,
    Healthz,
    Metrics,
    Error,
    StatusCodePage { code: Option<u16> },
    Claims,
    SignOut,
    ListEntities { collection: &'a str },
    GetEntity { collection: &'a str, id: &'a str },
    PutEntity { collection: &'a str, id: &'a str },
    DeleteEntity { collection: &'a str, id: &'a str },
    StoreManager { collection: &'a str },
    MethodNotAllowed,
    Unknown,
}

#[derive(Deserialize, Default)]
struct StatusCodeQuery {
    code: Option<u16>,
}

fn parse_query<T: serde::de::DeserializeOwned + Default>(params: Option<&str>) -> T {
    params
        .and_then(|params| serde_urlencoded::from_str(params).ok())
        .unwrap_or_default()
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &path[prefix.len()..])
}

pub fn parse<'a>(method: &Method, uri: &'a Uri) -> Route<'a> {
    let path = uri.path();

    let fixed = match path.to_ascii_lowercase().as_str() {
        "/" => Some((Method::GET, Route::Welcome)),
        "/healthz" => Some((Method::GET, Route::Healthz)),
        "/metrics" => Some((Method::GET, Route::Metrics)),
        "/home/error" => Some((Method::GET, Route::Error)),
        "/home/statuscodepage" => {
            let query: StatusCodeQuery = parse_query(uri.query());
            Some((Method::GET, Route::StatusCodePage { code: query.code }))
        }
        "/account/claims" => Some((Method::GET, Route::Claims)),
        "/account/signout" => Some((Method::POST, Route::SignOut)),
        _ => None,
    };
    if let Some((expected, route)) = fixed {
        return if *method == expected {
            route
        } else {
            Route::MethodNotAllowed
        };
    }

    if let Some(rest) = strip_prefix_ignore_case(path, "/api/") {
        return match rest.trim_end_matches('/').split_once('/') {
            None if !rest.is_empty() => match *method {
                Method::GET => Route::ListEntities {
                    collection: rest.trim_end_matches('/'),
                },
                _ => Route::MethodNotAllowed,
            },
            Some((collection, id)) if !id.contains('/') => match *method {
                Method::GET => Route::GetEntity { collection, id },
                Method::PUT => Route::PutEntity { collection, id },
                Method::DELETE => Route::DeleteEntity { collection, id },
                _ => Route::MethodNotAllowed,
            },
            _ => Route::Unknown,
        };
    }

    if let Some(rest) = strip_prefix_ignore_case(path, "/StoreManager/") {
        let collection = rest.trim_end_matches('/');
        if !collection.is_empty() && !collection.contains('/') {
            return match *method {
                Method::GET => Route::StoreManager { collection },
                _ => Route::MethodNotAllowed,
            };
        }
    }

    Route::Unknown
}

/// Application routes backed by the entity store.
pub struct RouteDispatch {
    entities: Arc<dyn EntityStore>,
    sessions: Arc<SessionManager>,
}

impl RouteDispatch {
    pub fn new(entities: Arc<dyn EntityStore>, sessions: Arc<SessionManager>) -> Self {
        Self { entities, sessions }
    }

    async fn list(&self, collection: &str) -> Result<Map<String, Value>, Error> {
        Ok(self.entities.list(collection).await?.into_iter().collect())
    }

    async fn sign_out(&self, request: &PipelineRequest) -> Result<PipelineResponse, Error> {
        let session = request.extensions().get::<SessionId>();
        let cookie = self.sessions.sign_out(session).await?;

        let mut response = redirect("/")?;
        response.headers_mut().insert(SET_COOKIE, cookie);
        Ok(response)
    }
}

#[async_trait]
impl Stage for RouteDispatch {
    fn name(&self) -> String {
        "route-dispatch".to_string()
    }

    #[instrument(skip(self, request, next))]
    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        let uri = request.uri().clone();
        let route = parse(request.method(), &uri);
        debug!("Dispatching {route:?}");

        match route {
            Route::Welcome => text(
                StatusCode::OK,
                "text/plain; charset=utf-8",
                "Welcome to the storefront.",
            ),
            Route::Healthz => text(StatusCode::OK, "text/plain; charset=utf-8", "OK"),
            Route::Metrics => {
                let (content_type, metrics) = METRICS_PROVIDER.gather()?;
                text(StatusCode::OK, &content_type, metrics)
            }
            Route::Error => text(
                StatusCode::OK,
                "text/plain; charset=utf-8",
                "An error occurred while processing your request.",
            ),
            Route::StatusCodePage { code } => {
                let code = code.map_or_else(|| "unknown".to_string(), |code| code.to_string());
                text(
                    StatusCode::OK,
                    "text/plain; charset=utf-8",
                    format!("Status code: {code}"),
                )
            }
            Route::Claims => {
                let anonymous = ClaimsPrincipal::new();
                json(StatusCode::OK, request.principal().unwrap_or(&anonymous))
            }
            Route::SignOut => self.sign_out(&request).await,
            Route::ListEntities { collection } => {
                json(StatusCode::OK, &self.list(collection).await?)
            }
            Route::GetEntity { collection, id } => match self.entities.get(collection, id).await? {
                Some(entity) => json(StatusCode::OK, &entity),
                None => Err(Error::NotFound),
            },
            Route::PutEntity { collection, id } => {
                let entity: Value = serde_json::from_slice(request.body())
                    .map_err(|e| Error::BadRequest(format!("Invalid JSON body: {e}")))?;
                self.entities.put(collection, id, entity).await?;
                empty(StatusCode::NO_CONTENT)
            }
            Route::DeleteEntity { collection, id } => {
                if self.entities.delete(collection, id).await? {
                    empty(StatusCode::NO_CONTENT)
                } else {
                    Err(Error::NotFound)
                }
            }
            Route::StoreManager { collection } => {
                let items = self.list(collection).await?;
                json(
                    StatusCode::OK,
                    &json!({
                        "collection": collection,
                        "count": items.len(),
                        "items": items,
                    }),
                )
            }
            Route::MethodNotAllowed => Err(Error::MethodNotAllowed),
            Route::Unknown => next.run(request).await,
        }
    }
}
