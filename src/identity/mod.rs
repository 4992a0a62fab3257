//! Normalized representation of an authenticated subject.
//!
//! A [`ClaimsPrincipal`] owns one or more [`ClaimsIdentity`], each carrying the
//! [`Claim`]s asserted by the scheme that produced it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheme tag of an identity no provider has authenticated.
pub const NO_AUTHENTICATION_SCHEME: &str = "none";

/// A typed fact about a principal.
///
/// Claims have no identity beyond their `(type, value)` content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    claim_type: String,
    value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    pub fn claim_type(&self) -> &str {
        &self.claim_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.claim_type, self.value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    authentication_scheme: Option<String>,
    claims: Vec<Claim>,
}

impl ClaimsIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheme(scheme: &str) -> Self {
        Self {
            authentication_scheme: Some(scheme.to_string()),
            claims: Vec::new(),
        }
    }

    pub fn authentication_scheme(&self) -> &str {
        self.authentication_scheme
            .as_deref()
            .unwrap_or(NO_AUTHENTICATION_SCHEME)
    }

    pub fn set_authentication_scheme(&mut self, scheme: &str) {
        self.authentication_scheme = Some(scheme.to_string());
    }

    pub fn is_authenticated(&self) -> bool {
        self.authentication_scheme.is_some()
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Appends a claim. Existing claims are never replaced, duplicates are kept.
    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn add_claims<I: IntoIterator<Item = Claim>>(&mut self, claims: I) {
        self.claims.extend(claims);
    }

    pub fn has_claim(&self, claim_type: &str, value: &str) -> bool {
        self.claims
            .iter()
            .any(|claim| claim.claim_type == claim_type && claim.value == value)
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_type)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsPrincipal {
    identities: Vec<ClaimsIdentity>,
}

impl ClaimsPrincipal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_identity(identity: ClaimsIdentity) -> Self {
        Self {
            identities: vec![identity],
        }
    }

    pub fn identities(&self) -> &[ClaimsIdentity] {
        &self.identities
    }

    pub fn add_identity(&mut self, identity: ClaimsIdentity) {
        self.identities.push(identity);
    }

    /// The first identity, created empty when the principal has none.
    pub fn primary_identity_mut(&mut self) -> &mut ClaimsIdentity {
        if self.identities.is_empty() {
            self.identities.push(ClaimsIdentity::new());
        }
        &mut self.identities[0]
    }

    pub fn is_authenticated(&self) -> bool {
        self.identities.iter().any(ClaimsIdentity::is_authenticated)
    }

    pub fn has_claim(&self, claim_type: &str, value: &str) -> bool {
        self.identities
            .iter()
            .any(|identity| identity.has_claim(claim_type, value))
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.identities
            .iter()
            .find_map(|identity| identity.find_first(claim_type))
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.identities
            .iter()
            .flat_map(|identity| identity.claims.iter())
    }

    pub fn claim_count(&self) -> usize {
        self.identities
            .iter()
            .map(|identity| identity.claims.len())
            .sum()
    }
}
