use std::sync::Arc;

use async_trait::async_trait;
use hyper::Method;
use tracing::{debug, info};

use crate::configuration::ProtectedRouteConfig;
use crate::pipeline::{Error, Next, PipelineRequest, PipelineResponse, RequestExt, Stage};
use crate::policy::PolicyEvaluator;

/// Requires the configured policy for requests under a protected prefix,
/// optionally only for some methods. The first matching rule wins.
pub struct PolicyGuard {
    evaluator: Arc<PolicyEvaluator>,
    rules: Vec<ProtectedRouteConfig>,
}

impl PolicyGuard {
    pub fn new(evaluator: Arc<PolicyEvaluator>, rules: &[ProtectedRouteConfig]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| ProtectedRouteConfig {
                prefix: rule.prefix.trim_end_matches('/').to_ascii_lowercase(),
                policy: rule.policy.clone(),
                methods: rule.methods.clone(),
            })
            .collect();

        Self { evaluator, rules }
    }

    fn policy_for(&self, method: &Method, path: &str) -> Option<&str> {
        let path = path.to_ascii_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.methods.is_empty() || rule.methods.contains(method))
            .find(|rule| match path.strip_prefix(&rule.prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            })
            .map(|rule| rule.policy.as_str())
    }
}

#[async_trait]
impl Stage for PolicyGuard {
    fn name(&self) -> String {
        "policy-guard".to_string()
    }

    async fn invoke(
        &self,
        request: PipelineRequest,
        next: Next<'_>,
    ) -> Result<PipelineResponse, Error> {
        let Some(policy) = self.policy_for(request.method(), request.uri().path()) else {
            return next.run(request).await;
        };

        let path = request.uri().path();
        let principal = match request.principal() {
            Some(principal) if principal.is_authenticated() => principal,
            _ => {
                debug!("Anonymous request to {path} requires policy '{policy}'");
                return Err(Error::Unauthorized(format!("{path} requires sign-in")));
            }
        };

        if !self.evaluator.evaluate(policy, principal).is_allowed() {
            info!("Policy '{policy}' denied access to {path}");
            return Err(Error::Forbidden(format!("Policy '{policy}' denied access")));
        }

        next.run(request).await
    }
}
