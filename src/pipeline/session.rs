use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::HeaderValue;
use tracing::debug;
use uuid::Uuid;

use crate::configuration::SessionConfig;
use crate::identity::ClaimsPrincipal;
use crate::pipeline::{Error, Next, PipelineRequest, PipelineResponse, RequestExt, Stage};
use crate::session_store::{self, SessionStore};

const SESSION_KEY_PREFIX: &str = "session:";

/// Identifier of the session restored for the current request.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionId(pub String);

/// Persists principals in the session store, keyed by the session cookie.
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    cookie_name: String,
    idle_timeout: u64,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self {
            sessions,
            cookie_name: config.cookie_name.clone(),
            idle_timeout: config.idle_timeout,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub async fn load(&self, id: &str) -> Result<Option<ClaimsPrincipal>, Error> {
        Ok(session_store::retrieve(self.sessions.as_ref(), &session_key(id)).await?)
    }

    async fn refresh(&self, id: &str, principal: &ClaimsPrincipal) -> Result<(), Error> {
        session_store::store(
            self.sessions.as_ref(),
            &session_key(id),
            principal,
            self.idle_timeout,
        )
        .await?;
        Ok(())
    }

    /// Stores the principal under a fresh session id, dropping the previous
    /// session, and returns the cookie to set.
    pub async fn sign_in(
        &self,
        principal: &ClaimsPrincipal,
        previous: Option<&SessionId>,
    ) -> Result<HeaderValue, Error> {
        if let Some(SessionId(previous)) = previous {
            self.sessions.remove_value(&session_key(previous)).await?;
        }

        let id = Uuid::new_v4().simple().to_string();
        self.refresh(&id, principal).await?;
        debug!("Session established with {} claims", principal.claim_count());

        self.cookie(&id, self.idle_timeout)
    }

    /// Drops the session and returns the cookie expiring it.
    pub async fn sign_out(&self, session: Option<&SessionId>) -> Result<HeaderValue, Error> {
        if let Some(SessionId(id)) = session {
            self.sessions.remove_value(&session_key(id)).await?;
        }
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: u64) -> Result<HeaderValue, Error> {
        let cookie = format!(
            "{}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax",
            self.cookie_name
        );
        HeaderValue::from_str(&cookie)
            .map_err(|e| Error::Internal(format!("Invalid session cookie: {e}")))
    }
}

fn session_key(id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{id}")
}

/// Attaches the principal of the session cookie (or an empty one) to the request.
pub struct SessionRestore {
    manager: Arc<SessionManager>,
}

impl SessionRestore {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Stage for SessionRestore {
    fn name(&self) -> String {
        "session-restore".to_string()
    }

    async fn invoke(
        &self,
        mut request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        let restored = match request.cookie(self.manager.cookie_name()) {
            Some(id) if !id.is_empty() => self
                .manager
                .load(&id)
                .await?
                .map(|principal| (SessionId(id), principal)),
            _ => None,
        };

        match restored {
            Some((id, principal)) => {
                // sliding expiration
                self.manager.refresh(&id.0, &principal).await?;
                request.extensions_mut().insert(id);
                request.extensions_mut().insert(principal);
            }
            None => {
                request.extensions_mut().insert(ClaimsPrincipal::new());
            }
        }

        next.run(request).await
    }
}
