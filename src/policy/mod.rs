//! Claims-based authorization policies.
//!
//! A policy is a named set of claim requirements. Policies are registered once
//! at startup, after which the evaluator is shared immutably by every request.
//!
//! # Evaluation
//!
//! - Policy names are matched ignoring ASCII case.
//! - An unregistered policy denies (fail-closed).
//! - A registered policy allows when at least one identity of the principal
//!   holds, for every requirement, a claim with the same type and the exact
//!   same value.
//!
//! Denial is a [`Decision`], never an error: callers turn it into an
//! access-denied response.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::configuration::PolicyConfig;
use crate::identity::{ClaimsIdentity, ClaimsPrincipal};
use crate::metrics_provider::METRICS_PROVIDER;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClaimRequirement {
    pub claim_type: String,
    pub value: String,
}

impl ClaimRequirement {
    pub fn new(claim_type: &str, value: &str) -> Self {
        Self {
            claim_type: claim_type.to_string(),
            value: value.to_string(),
        }
    }

    fn is_satisfied_by(&self, identity: &ClaimsIdentity) -> bool {
        identity.has_claim(&self.claim_type, &self.value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorizationPolicy {
    pub name: String,
    pub requirements: Vec<ClaimRequirement>,
}

impl AuthorizationPolicy {
    fn is_satisfied_by(&self, principal: &ClaimsPrincipal) -> bool {
        principal.identities().iter().any(|identity| {
            self.requirements
                .iter()
                .all(|requirement| requirement.is_satisfied_by(identity))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn policy_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[derive(Debug, Default)]
pub struct PolicyEvaluator {
    policies: BTreeMap<String, AuthorizationPolicy>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(policies: &[PolicyConfig]) -> Self {
        let mut evaluator = Self::new();
        for policy in policies {
            evaluator.register_policy(&policy.name, policy.requirements.clone());
        }
        evaluator
    }

    /// Registers (or replaces) a policy.
    pub fn register_policy(&mut self, name: &str, requirements: Vec<ClaimRequirement>) {
        debug!(
            "Registering authorization policy '{name}' with {} requirement(s)",
            requirements.len()
        );
        self.policies.insert(
            policy_key(name),
            AuthorizationPolicy {
                name: name.to_string(),
                requirements,
            },
        );
    }

    pub fn policies(&self) -> impl Iterator<Item = &AuthorizationPolicy> {
        self.policies.values()
    }

    #[instrument(skip(self, principal))]
    pub fn evaluate(&self, name: &str, principal: &ClaimsPrincipal) -> Decision {
        let policy = self.policies.get(&policy_key(name));
        let decision = match policy {
            Some(policy) if policy.is_satisfied_by(principal) => Decision::Allow,
            Some(_) => Decision::Deny,
            None => {
                debug!("Policy '{name}' is not registered, denying");
                Decision::Deny
            }
        };

        METRICS_PROVIDER
            .record_policy_decision(policy.map(|policy| policy.name.as_str()), decision);
        decision
    }
}
