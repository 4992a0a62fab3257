use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::configuration::FederationConfig;
use crate::federation::{
    CallbackPayload, FederationError, HandshakeCorrelation, ProviderAdapter,
    ProviderExchangeError,
};
use crate::identity::ClaimsPrincipal;
use crate::metrics_provider::METRICS_PROVIDER;
use crate::session_store::{self, SessionStore};

const CORRELATION_KEY_PREFIX: &str = "handshake:";

/// Lifecycle of one sign-in attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Challenged,
    Exchanged,
    Merged,
    Failed,
}

impl HandshakeState {
    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::Challenged => "challenged",
            HandshakeState::Exchanged => "exchanged",
            HandshakeState::Merged => "merged",
            HandshakeState::Failed => "failed",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// One machine per request; nothing of it outlives the request.
struct Handshake<'a> {
    provider: &'a str,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    fn start(provider: &'a str) -> Self {
        Self {
            provider,
            state: HandshakeState::Idle,
        }
    }

    // The correlation stored at challenge time stands for the Challenged state.
    fn resume(provider: &'a str) -> Self {
        Self {
            provider,
            state: HandshakeState::Challenged,
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug!("Handshake with {}: {} -> {next}", self.provider, self.state);
        self.state = next;
        METRICS_PROVIDER.record_handshake(self.provider, next);
    }

    fn fail(&mut self, error: FederationError) -> FederationError {
        warn!("Sign-in with {} failed: {error}", self.provider);
        METRICS_PROVIDER.record_handshake_failure(self.provider, &error);
        self.advance(HandshakeState::Failed);
        error
    }
}

/// A started handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeStart {
    /// Where to send the user agent.
    pub redirect_uri: String,
    pub state: String,
    /// Must come back from the same user agent with the callback.
    pub nonce: String,
}

/// Drives the external sign-in handshake and merges the outcome into a principal.
pub struct FederationCoordinator {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    client: Client,
    sessions: Arc<dyn SessionStore>,
    public_origin: String,
    exchange_timeout: Duration,
    correlation_ttl: u64,
}

impl FederationCoordinator {
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        client: Client,
        sessions: Arc<dyn SessionStore>,
        public_origin: &str,
        config: &FederationConfig,
    ) -> Self {
        Self {
            providers,
            client,
            sessions,
            public_origin: public_origin.trim_end_matches('/').to_string(),
            exchange_timeout: config.exchange_timeout,
            correlation_ttl: config.correlation_ttl,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.providers
    }

    /// Seconds a started handshake stays valid.
    pub fn correlation_ttl(&self) -> u64 {
        self.correlation_ttl
    }

    /// Looks a provider up by scheme name or slug, ignoring case.
    pub fn provider(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.providers.iter().find(|adapter| {
            adapter.name().eq_ignore_ascii_case(name) || adapter.slug().eq_ignore_ascii_case(name)
        })
    }

    pub fn challenge_path(adapter: &dyn ProviderAdapter) -> String {
        format!("/signin/{}", adapter.slug())
    }

    pub fn callback_path(adapter: &dyn ProviderAdapter) -> String {
        format!("/signin-{}", adapter.slug())
    }

    fn callback_url(&self, adapter: &dyn ProviderAdapter) -> String {
        format!("{}{}", self.public_origin, Self::callback_path(adapter))
    }

    /// Starts a handshake with a provider.
    #[instrument(skip(self))]
    pub async fn challenge(
        &self,
        provider: &str,
        return_url: Option<&str>,
    ) -> Result<HandshakeStart, FederationError> {
        let adapter = self
            .provider(provider)
            .ok_or_else(|| FederationError::UnknownProvider(provider.to_string()))?;
        let mut handshake = Handshake::start(adapter.name());

        let state = Uuid::new_v4().simple().to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let callback_url = self.callback_url(adapter.as_ref());

        let challenge = match timeout(
            self.exchange_timeout,
            adapter.challenge(&self.client, &callback_url, &state),
        )
        .await
        {
            Ok(Ok(challenge)) => challenge,
            Ok(Err(error)) => return Err(handshake.fail(error.into())),
            Err(_) => return Err(handshake.fail(FederationError::Timeout)),
        };

        let correlation = HandshakeCorrelation {
            provider: adapter.name().to_string(),
            return_url: local_return_url(return_url),
            state: state.clone(),
            nonce: nonce.clone(),
            request_token: challenge.request_token,
            request_token_secret: challenge.request_token_secret,
        };
        session_store::store(
            self.sessions.as_ref(),
            &correlation_key(&state),
            &correlation,
            self.correlation_ttl,
        )
        .await
        .map_err(|error| handshake.fail(error.into()))?;

        handshake.advance(HandshakeState::Challenged);
        Ok(HandshakeStart {
            redirect_uri: challenge.redirect_uri,
            state,
            nonce,
        })
    }

    /// Completes a handshake from the provider callback.
    ///
    /// `nonce` is what the calling user agent holds for this handshake; a
    /// callback relayed from another user agent is treated as an unknown one.
    /// On success every mapped claim is appended to the principal's first
    /// identity and the stored return URL is returned. On failure the principal
    /// is left untouched.
    #[instrument(skip(self, payload, nonce, principal))]
    pub async fn complete(
        &self,
        provider: &str,
        payload: &CallbackPayload,
        nonce: Option<&str>,
        principal: &mut ClaimsPrincipal,
    ) -> Result<String, FederationError> {
        let adapter = self
            .provider(provider)
            .ok_or_else(|| FederationError::UnknownProvider(provider.to_string()))?;
        let mut handshake = Handshake::resume(adapter.name());

        let Some(state) = payload.state.as_deref() else {
            return Err(handshake.fail(FederationError::CorrelationMissing));
        };

        let correlation = session_store::take::<HandshakeCorrelation>(
            self.sessions.as_ref(),
            &correlation_key(state),
        )
        .await
        .map_err(|error| handshake.fail(error.into()))?
        .filter(|correlation| correlation.provider == adapter.name() && correlation.state == state);
        let Some(correlation) = correlation else {
            return Err(handshake.fail(FederationError::CorrelationMissing));
        };
        if nonce != Some(correlation.nonce.as_str()) {
            debug!("Callback for {state} came without the matching correlation nonce");
            return Err(handshake.fail(FederationError::CorrelationMissing));
        }

        if let Some(reason) = payload.rejection() {
            return Err(handshake.fail(ProviderExchangeError::Rejected(reason).into()));
        }

        let callback_url = self.callback_url(adapter.as_ref());
        let profile = match timeout(
            self.exchange_timeout,
            adapter.callback(&self.client, &callback_url, payload, &correlation),
        )
        .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(error)) => return Err(handshake.fail(error.into())),
            Err(_) => return Err(handshake.fail(FederationError::Timeout)),
        };
        handshake.advance(HandshakeState::Exchanged);

        let claims = adapter.map_claims(&profile);
        let declared = adapter.declared_claim_types();
        if let Some(claim) = claims
            .iter()
            .find(|claim| !declared.iter().any(|declared| *declared == claim.claim_type()))
        {
            warn!(
                "{} emitted undeclared claim type {}",
                adapter.name(),
                claim.claim_type()
            );
        }
        let claim_count = claims.len();

        let identity = principal.primary_identity_mut();
        identity.add_claims(claims);
        identity.set_authentication_scheme(adapter.name());
        handshake.advance(HandshakeState::Merged);

        info!(
            "Signed in with {} ({claim_count} claims merged)",
            adapter.name()
        );
        Ok(correlation.return_url)
    }
}

fn correlation_key(state: &str) -> String {
    format!("{CORRELATION_KEY_PREFIX}{state}")
}

/// Only same-origin paths are accepted as return addresses. User agents drop
/// tabs and line breaks and read `\\` as `/`, so any of those rejects the URL.
fn local_return_url(return_url: Option<&str>) -> String {
    match return_url {
        Some(url)
            if url.starts_with('/')
                && !url.starts_with("//")
                && !url
                    .chars()
                    .any(|c| c == '\\' || c.is_control() || c.is_whitespace()) =>
        {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::federation::oauth2::{Credentials, Endpoints};
    use crate::federation::provider::google;
    use crate::federation::{Challenge, ExternalProfile, MockProviderAdapter};
    use crate::identity::{Claim, ClaimsIdentity};
    use crate::session_store::memory;

    const MOCK_CLAIM_TYPES: &[&str] = &["urn:tokens:mock:access_token", "urn:profile:mock:id"];

    fn config(exchange_timeout: Duration) -> FederationConfig {
        FederationConfig {
            exchange_timeout,
            correlation_ttl: 60,
        }
    }

    fn coordinator(adapter: Arc<dyn ProviderAdapter>, exchange_timeout: Duration) -> FederationCoordinator {
        FederationCoordinator::new(
            vec![adapter],
            Client::new(),
            Arc::new(memory::Backend::new()),
            "http://localhost:5001/",
            &config(exchange_timeout),
        )
    }

    fn mock_adapter() -> MockProviderAdapter {
        let mut adapter = MockProviderAdapter::new();
        adapter.expect_name().return_const("Mock");
        adapter.expect_slug().return_const("mock");
        adapter.expect_declared_claim_types().return_const(MOCK_CLAIM_TYPES);
        adapter.expect_challenge().returning(|_, callback_url, state| {
            Ok(Challenge {
                redirect_uri: format!("https://idp.test/authorize?state={state}&cb={callback_url}"),
                request_token: None,
                request_token_secret: None,
            })
        });
        adapter
    }

    fn callback_with_state(state: &str) -> CallbackPayload {
        CallbackPayload {
            state: Some(state.to_string()),
            code: Some("code".to_string()),
            ..CallbackPayload::default()
        }
    }

    async fn complete(
        coordinator: &FederationCoordinator,
        provider: &str,
        start: &HandshakeStart,
        principal: &mut ClaimsPrincipal,
    ) -> Result<String, FederationError> {
        coordinator
            .complete(
                provider,
                &callback_with_state(&start.state),
                Some(&start.nonce),
                principal,
            )
            .await
    }

    fn signed_in_principal() -> ClaimsPrincipal {
        let mut identity = ClaimsIdentity::with_scheme("local");
        identity.add_claim(Claim::new("ManageStore", "Allowed"));
        ClaimsPrincipal::from_identity(identity)
    }

    #[test]
    fn test_local_return_url() {
        assert_eq!(local_return_url(Some("/StoreManager")), "/StoreManager");
        assert_eq!(local_return_url(Some("https://evil.example")), "/");
        assert_eq!(local_return_url(Some("//evil.example")), "/");
        assert_eq!(local_return_url(None), "/");
    }

    #[test]
    fn test_local_return_url_rejects_stripped_characters() {
        for url in [
            "/\t/evil.example",
            "/\n/evil.example",
            "/\r/evil.example",
            "/\\evil.example",
            "/albums\\..\\evil",
            "/ /evil.example",
            "/\u{0}/evil.example",
        ] {
            assert_eq!(local_return_url(Some(url)), "/", "{url:?} must be rejected");
        }
        assert_eq!(
            local_return_url(Some("/StoreManager/albums?page=2")),
            "/StoreManager/albums?page=2"
        );
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let coordinator = coordinator(Arc::new(mock_adapter()), Duration::from_secs(1));

        let result = coordinator.challenge("LinkedIn", None).await;
        assert_eq!(
            result,
            Err(FederationError::UnknownProvider("LinkedIn".to_string()))
        );
    }

    #[tokio::test]
    async fn test_successful_handshake_merges_claims() {
        let mut adapter = mock_adapter();
        adapter.expect_callback().returning(|_, callback_url, _, correlation| {
            assert_eq!(callback_url, "http://localhost:5001/signin-mock");
            assert_eq!(correlation.return_url, "/Account/Claims");
            Ok(ExternalProfile {
                access_token: "token".to_string(),
                ..ExternalProfile::default()
            })
        });
        adapter
            .expect_map_claims()
            .returning(|profile| vec![Claim::new("urn:tokens:mock:access_token", &profile.access_token)]);
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        let start = coordinator
            .challenge("mock", Some("/Account/Claims"))
            .await
            .unwrap();
        assert!(start.redirect_uri.contains(&format!("state={}", start.state)));
        assert_ne!(start.nonce, start.state);

        let mut principal = ClaimsPrincipal::new();
        let return_url = complete(&coordinator, "Mock", &start, &mut principal)
            .await
            .unwrap();

        assert_eq!(return_url, "/Account/Claims");
        assert_eq!(principal.identities().len(), 1);
        assert_eq!(principal.identities()[0].authentication_scheme(), "Mock");
        assert!(principal.has_claim("urn:tokens:mock:access_token", "token"));
    }

    #[tokio::test]
    async fn test_callback_from_other_user_agent_is_rejected() {
        let mut adapter = mock_adapter();
        adapter.expect_callback().never();
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        for nonce in [None, Some("someone-else")] {
            let start = coordinator.challenge("mock", None).await.unwrap();
            let mut principal = signed_in_principal();
            let before = principal.clone();

            let result = coordinator
                .complete("mock", &callback_with_state(&start.state), nonce, &mut principal)
                .await;

            assert_eq!(result, Err(FederationError::CorrelationMissing));
            assert_eq!(principal, before);
        }
    }

    #[tokio::test]
    async fn test_failed_exchange_leaves_principal_unchanged() {
        let mut adapter = mock_adapter();
        adapter.expect_callback().returning(|_, _, _, _| {
            Err(ProviderExchangeError::Rejected("invalid_grant".to_string()))
        });
        adapter.expect_map_claims().never();
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        let start = coordinator.challenge("mock", None).await.unwrap();
        let mut principal = signed_in_principal();
        let before = principal.clone();

        let result = complete(&coordinator, "mock", &start, &mut principal).await;

        assert!(matches!(result, Err(FederationError::Exchange(_))));
        assert_eq!(principal.claim_count(), before.claim_count());
        assert_eq!(principal, before);
    }

    #[tokio::test]
    async fn test_provider_error_in_payload_fails_without_exchange() {
        let mut adapter = mock_adapter();
        adapter.expect_callback().never();
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        let start = coordinator.challenge("mock", None).await.unwrap();
        let payload = CallbackPayload {
            state: Some(start.state.clone()),
            error: Some("access_denied".to_string()),
            ..CallbackPayload::default()
        };

        let mut principal = ClaimsPrincipal::new();
        let result = coordinator
            .complete("mock", &payload, Some(&start.nonce), &mut principal)
            .await;

        assert_eq!(
            result,
            Err(FederationError::Exchange(ProviderExchangeError::Rejected(
                "access_denied".to_string()
            )))
        );
        assert_eq!(principal.claim_count(), 0);
    }

    #[tokio::test]
    async fn test_correlation_cannot_be_replayed() {
        let mut adapter = mock_adapter();
        adapter
            .expect_callback()
            .times(1)
            .returning(|_, _, _, _| Ok(ExternalProfile::default()));
        adapter.expect_map_claims().returning(|_| Vec::new());
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        let start = coordinator.challenge("mock", None).await.unwrap();
        let mut principal = ClaimsPrincipal::new();

        complete(&coordinator, "mock", &start, &mut principal)
            .await
            .unwrap();
        let replay = complete(&coordinator, "mock", &start, &mut principal).await;

        assert_eq!(replay, Err(FederationError::CorrelationMissing));
    }

    #[tokio::test]
    async fn test_unknown_state_is_rejected() {
        let mut adapter = mock_adapter();
        adapter.expect_callback().never();
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        let mut principal = ClaimsPrincipal::new();
        let result = coordinator
            .complete("mock", &callback_with_state("forged"), Some("forged"), &mut principal)
            .await;
        assert_eq!(result, Err(FederationError::CorrelationMissing));

        let result = coordinator
            .complete("mock", &CallbackPayload::default(), None, &mut principal)
            .await;
        assert_eq!(result, Err(FederationError::CorrelationMissing));
    }

    struct SlowAdapter;

    #[async_trait]
    impl ProviderAdapter for SlowAdapter {
        fn name(&self) -> &'static str {
            "Slow"
        }

        fn slug(&self) -> &'static str {
            "slow"
        }

        fn declared_claim_types(&self) -> &'static [&'static str] {
            &["urn:profile:slow:id"]
        }

        async fn challenge(
            &self,
            _client: &Client,
            _callback_url: &str,
            state: &str,
        ) -> Result<Challenge, ProviderExchangeError> {
            Ok(Challenge {
                redirect_uri: format!("https://slow.test/?state={state}"),
                request_token: None,
                request_token_secret: None,
            })
        }

        async fn callback(
            &self,
            _client: &Client,
            _callback_url: &str,
            _payload: &CallbackPayload,
            _correlation: &HandshakeCorrelation,
        ) -> Result<ExternalProfile, ProviderExchangeError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ExternalProfile::default())
        }

        fn map_claims(&self, _profile: &ExternalProfile) -> Vec<Claim> {
            vec![Claim::new("urn:profile:slow:id", "")]
        }
    }

    #[tokio::test]
    async fn test_exchange_timeout_fails_handshake() {
        let coordinator = coordinator(Arc::new(SlowAdapter), Duration::from_millis(50));

        let start = coordinator.challenge("slow", None).await.unwrap();
        let mut principal = signed_in_principal();

        let result = complete(&coordinator, "slow", &start, &mut principal).await;

        assert_eq!(result, Err(FederationError::Timeout));
        assert_eq!(principal.claim_count(), 1);
    }

    #[tokio::test]
    async fn test_oauth2_handshake_against_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "google-token",
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "1001",
                "name": "Ann"
            })))
            .mount(&server)
            .await;

        let adapter = google::Provider::new(google::ProviderConfig {
            credentials: Credentials {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                scopes: vec!["openid".to_string()],
            },
            endpoints: Endpoints {
                authorization: format!("{}/authorize", server.uri()),
                token: format!("{}/token", server.uri()),
                user_information: format!("{}/userinfo", server.uri()),
            },
        });
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(5));

        let start = coordinator.challenge("google", Some("/")).await.unwrap();
        assert!(start
            .redirect_uri
            .starts_with(&format!("{}/authorize?", server.uri())));
        assert!(start
            .redirect_uri
            .contains("redirect_uri=http%3A%2F%2Flocalhost%3A5001%2Fsignin-google"));

        let mut principal = signed_in_principal();
        complete(&coordinator, "google", &start, &mut principal)
            .await
            .unwrap();

        let identity = &principal.identities()[0];
        assert_eq!(identity.authentication_scheme(), "Google");
        assert!(identity.has_claim("ManageStore", "Allowed"));
        assert!(identity.has_claim("urn:tokens:google:access_token", "google-token"));
        assert!(identity.has_claim("urn:profile:google:id", "1001"));
        assert!(identity.has_claim("urn:profile:google:email", ""));
        assert_eq!(principal.claim_count(), 5);
    }

    #[tokio::test]
    async fn test_repeated_handshakes_append_duplicates() {
        let mut adapter = mock_adapter();
        adapter
            .expect_callback()
            .returning(|_, _, _, _| Ok(ExternalProfile::default()));
        adapter
            .expect_map_claims()
            .returning(|_| vec![Claim::new("urn:profile:mock:id", "1")]);
        let coordinator = coordinator(Arc::new(adapter), Duration::from_secs(1));

        let mut principal = ClaimsPrincipal::new();
        for _ in 0..2 {
            let start = coordinator.challenge("mock", None).await.unwrap();
            complete(&coordinator, "mock", &start, &mut principal)
                .await
                .unwrap();
        }

        assert_eq!(principal.claim_count(), 2);
    }
}
