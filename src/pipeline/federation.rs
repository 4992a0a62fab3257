use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::{HeaderValue, SET_COOKIE};
use hyper::Method;
use serde::Deserialize;
use tracing::instrument;

use crate::federation::{CallbackPayload, FederationCoordinator, ProviderAdapter};
use crate::identity::ClaimsPrincipal;
use crate::pipeline::session::SessionId;
use crate::pipeline::{
    redirect, Error, Next, PipelineRequest, PipelineResponse, RequestExt, SessionManager, Stage,
};

const CORRELATION_COOKIE_PREFIX: &str = ".Storefront.Correlation.";

fn correlation_cookie_name(state: &str) -> String {
    format!("{CORRELATION_COOKIE_PREFIX}{state}")
}

// Scoped to the callback path: only the provider's redirect back carries it.
fn correlation_cookie(
    callback_path: &str,
    state: &str,
    nonce: &str,
    max_age: u64,
) -> Result<HeaderValue, Error> {
    let cookie = format!(
        "{}={nonce}; Path={callback_path}; Max-Age={max_age}; HttpOnly; SameSite=Lax",
        correlation_cookie_name(state)
    );
    HeaderValue::from_str(&cookie)
        .map_err(|e| Error::Internal(format!("Invalid correlation cookie: {e}")))
}

/// Completes handshakes arriving on any enabled provider's callback path and
/// signs the merged principal in.
pub struct FederationCallback {
    coordinator: Arc<FederationCoordinator>,
    sessions: Arc<SessionManager>,
}

impl FederationCallback {
    pub fn new(coordinator: Arc<FederationCoordinator>, sessions: Arc<SessionManager>) -> Self {
        Self {
            coordinator,
            sessions,
        }
    }

    fn adapter_for(&self, path: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.coordinator.providers().iter().find(|adapter| {
            FederationCoordinator::callback_path(adapter.as_ref()).eq_ignore_ascii_case(path)
        })
    }
}

#[async_trait]
impl Stage for FederationCallback {
    fn name(&self) -> String {
        "federation-callback".to_string()
    }

    #[instrument(skip(self, request, next))]
    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        if request.method() != Method::GET {
            return next.run(request).await;
        }
        let Some(adapter) = self.adapter_for(request.uri().path()) else {
            return next.run(request).await;
        };

        let payload: CallbackPayload = request.query();
        let state = payload.state.clone().unwrap_or_default();
        let nonce = request.cookie(&correlation_cookie_name(&state));
        let previous = request.extensions().get::<SessionId>().cloned();
        let mut principal = request
            .principal()
            .cloned()
            .unwrap_or_else(ClaimsPrincipal::new);

        let return_url = self
            .coordinator
            .complete(adapter.name(), &payload, nonce.as_deref(), &mut principal)
            .await?;
        let cookie = self.sessions.sign_in(&principal, previous.as_ref()).await?;
        let callback_path = FederationCoordinator::callback_path(adapter.as_ref());

        let mut response = redirect(&return_url)?;
        let headers = response.headers_mut();
        headers.insert(SET_COOKIE, cookie);
        headers.append(SET_COOKIE, correlation_cookie(&callback_path, &state, "", 0)?);
        Ok(response)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeQuery {
    return_url: Option<String>,
}

/// Starts a handshake with one provider.
pub struct ProviderChallenge {
    coordinator: Arc<FederationCoordinator>,
    adapter: Arc<dyn ProviderAdapter>,
    path: String,
    callback_path: String,
}

impl ProviderChallenge {
    pub fn new(coordinator: Arc<FederationCoordinator>, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let path = FederationCoordinator::challenge_path(adapter.as_ref());
        let callback_path = FederationCoordinator::callback_path(adapter.as_ref());
        Self {
            coordinator,
            adapter,
            path,
            callback_path,
        }
    }
}

#[async_trait]
impl Stage for ProviderChallenge {
    fn name(&self) -> String {
        format!("challenge:{}", self.adapter.name())
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        if request.method() != Method::GET || !request.uri().path().eq_ignore_ascii_case(&self.path)
        {
            return next.run(request).await;
        }

        let query: ChallengeQuery = request.query();
        let start = self
            .coordinator
            .challenge(self.adapter.name(), query.return_url.as_deref())
            .await?;
        let cookie = correlation_cookie(
            &self.callback_path,
            &start.state,
            &start.nonce,
            self.coordinator.correlation_ttl(),
        )?;

        let mut response = redirect(&start.redirect_uri)?;
        response.headers_mut().insert(SET_COOKIE, cookie);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hyper::header::{COOKIE, LOCATION};
    use hyper::StatusCode;

    use super::*;
    use crate::configuration::{FederationConfig, SessionConfig};
    use crate::federation::{Challenge, ExternalProfile, MockProviderAdapter};
    use crate::identity::Claim;
    use crate::pipeline::session::SessionRestore;
    use crate::pipeline::tests::request;
    use crate::pipeline::{Pipeline, PipelineRequest};
    use crate::session_store::{self, memory, SessionStore};

    const CLAIM_TYPES: &[&str] = &["urn:google:accesstoken"];

    fn adapter() -> MockProviderAdapter {
        let mut adapter = MockProviderAdapter::new();
        adapter.expect_name().return_const("Google");
        adapter.expect_slug().return_const("google");
        adapter.expect_declared_claim_types().return_const(CLAIM_TYPES);
        adapter.expect_challenge().returning(|_, _, state| {
            Ok(Challenge {
                redirect_uri: format!("https://accounts.example.com/auth?state={state}"),
                request_token: None,
                request_token_secret: None,
            })
        });
        adapter.expect_callback().returning(|_, _, _, _| {
            Ok(ExternalProfile {
                access_token: "token".to_string(),
                access_token_secret: None,
                fields: serde_json::Map::new(),
            })
        });
        adapter
            .expect_map_claims()
            .returning(|_| vec![Claim::new("urn:google:accesstoken", "token")]);
        adapter
    }

    fn pipeline() -> (Pipeline, Arc<SessionManager>) {
        let store: Arc<dyn SessionStore> = Arc::new(memory::Backend::new());
        let coordinator = Arc::new(FederationCoordinator::new(
            vec![Arc::new(adapter())],
            reqwest::Client::new(),
            Arc::clone(&store),
            "https://shop.example.com",
            &FederationConfig {
                exchange_timeout: Duration::from_secs(5),
                correlation_ttl: 60,
            },
        ));
        let sessions = Arc::new(SessionManager::new(
            store,
            &SessionConfig {
                store: session_store::Config::Memory,
                cookie_name: "sid".to_string(),
                idle_timeout: 60,
            },
        ));
        let challenge_stage = ProviderChallenge::new(
            Arc::clone(&coordinator),
            Arc::clone(&coordinator.providers()[0]),
        );

        let pipeline = Pipeline::new(vec![
            Arc::new(SessionRestore::new(Arc::clone(&sessions))),
            Arc::new(FederationCallback::new(coordinator, Arc::clone(&sessions))),
            Arc::new(challenge_stage),
        ]);
        (pipeline, sessions)
    }

    fn header<'a>(response: &'a PipelineResponse, name: hyper::header::HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    /// Starts a handshake and returns its state and the `name=value` cookie pair.
    async fn start_handshake(pipeline: &Pipeline, uri: &str) -> (String, String) {
        let response = pipeline.handle(request("GET", uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let (_, state) = header(&response, LOCATION).split_once("state=").unwrap();
        let cookie = header(&response, SET_COOKIE);
        assert!(cookie.contains("Path=/signin-google"));
        assert!(cookie.contains("Max-Age=60"));
        assert!(cookie.contains("HttpOnly"));
        let pair = cookie.split(';').next().unwrap().to_string();

        (state.to_string(), pair)
    }

    fn callback(state: &str, cookie: Option<&str>) -> PipelineRequest {
        let mut request = request("GET", &format!("/signin-google?state={state}&code=abc"));
        if let Some(cookie) = cookie {
            request
                .headers_mut()
                .insert(COOKIE, cookie.parse().unwrap());
        }
        request
    }

    #[tokio::test]
    async fn test_challenge_then_callback_signs_in() {
        let (pipeline, sessions) = pipeline();
        assert_eq!(
            pipeline.stage_names(),
            vec!["session-restore", "federation-callback", "challenge:Google"]
        );

        let (state, correlation) =
            start_handshake(&pipeline, "/signin/google?returnUrl=%2FStoreManager%2Falbums").await;
        assert!(correlation.starts_with(&format!(".Storefront.Correlation.{state}=")));

        let response = pipeline
            .handle(callback(&state, Some(&correlation)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(header(&response, LOCATION), "/StoreManager/albums");

        let cookies: Vec<_> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[1].starts_with(&format!(".Storefront.Correlation.{state}=;")));
        assert!(cookies[1].contains("Max-Age=0"));

        let id = cookies[0]
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix("sid="))
            .unwrap();
        let principal = sessions.load(id).await.unwrap().unwrap();
        assert_eq!(principal.claim_count(), 1);
        assert!(principal.is_authenticated());
    }

    #[tokio::test]
    async fn test_callback_needs_the_correlation_cookie_of_its_handshake() {
        let (pipeline, _) = pipeline();

        // Someone else's handshake, relayed without their cookie.
        let (foreign_state, _) = start_handshake(&pipeline, "/signin/google").await;
        let (_, own_cookie) = start_handshake(&pipeline, "/signin/google").await;

        let result = pipeline.handle(callback(&foreign_state, None)).await;
        assert!(matches!(result, Err(Error::SignInFailed(_))));

        let (foreign_state, _) = start_handshake(&pipeline, "/signin/google").await;
        let result = pipeline
            .handle(callback(&foreign_state, Some(&own_cookie)))
            .await;
        assert!(matches!(result, Err(Error::SignInFailed(_))));

        let (foreign_state, _) = start_handshake(&pipeline, "/signin/google").await;
        let forged = format!(".Storefront.Correlation.{foreign_state}=guessed");
        let result = pipeline.handle(callback(&foreign_state, Some(&forged))).await;
        assert!(matches!(result, Err(Error::SignInFailed(_))));
    }

    #[tokio::test]
    async fn test_callback_with_unknown_state_fails_sign_in() {
        let (pipeline, _) = pipeline();

        let result = pipeline
            .handle(callback("forged", Some("sid=missing")))
            .await;

        assert!(matches!(result, Err(Error::SignInFailed(_))));
    }

    #[tokio::test]
    async fn test_unrelated_paths_fall_through() {
        let (pipeline, _) = pipeline();

        let result = pipeline.handle(request("GET", "/signin-twitter")).await;
        assert_eq!(result.err(), Some(Error::NotFound));

        let result = pipeline.handle(request("POST", "/signin/google")).await;
        assert_eq!(result.err(), Some(Error::NotFound));
    }
}
