use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::configuration::ProtectedRouteConfig;
use crate::entity_store::EntityStore;
use crate::federation::FederationCoordinator;
use crate::pipeline::diagnostics::{
    DeveloperErrorPage, ErrorRedirect, ProviderInfo, RuntimeInfo, RuntimeReport,
    StatusCodePages,
};
use crate::pipeline::dispatch::RouteDispatch;
use crate::pipeline::federation::{FederationCallback, ProviderChallenge};
use crate::pipeline::guard::PolicyGuard;
use crate::pipeline::session::SessionRestore;
use crate::pipeline::static_files::StaticFiles;
use crate::pipeline::{AssetResolver, Pipeline, SessionManager, Stage};
use crate::policy::PolicyEvaluator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Staging,
        Environment::Production,
    ];

    /// Case-insensitive; anything unrecognized is treated as production.
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim();
        match Self::ALL
            .into_iter()
            .find(|environment| environment.as_str().eq_ignore_ascii_case(tag))
        {
            Some(environment) => environment,
            None => {
                if !tag.is_empty() {
                    warn!("Unknown hosting environment '{tag}', using Production");
                }
                Environment::Production
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "Development",
            Environment::Staging => "Staging",
            Environment::Production => "Production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the stages are built from.
#[derive(Clone)]
pub struct Components {
    pub sessions: Arc<SessionManager>,
    pub assets: Arc<dyn AssetResolver>,
    pub coordinator: Arc<FederationCoordinator>,
    pub evaluator: Arc<PolicyEvaluator>,
    pub protected_routes: Vec<ProtectedRouteConfig>,
    pub entities: Arc<dyn EntityStore>,
}

type PrefixBuilder = fn(Environment, &Components, &[Arc<dyn Stage>]) -> Vec<Arc<dyn Stage>>;

const PREFIXES: [(Environment, PrefixBuilder); 3] = [
    (Environment::Development, development_prefix),
    (Environment::Staging, hosted_prefix),
    (Environment::Production, hosted_prefix),
];

fn development_prefix(
    environment: Environment,
    components: &Components,
    suffix: &[Arc<dyn Stage>],
) -> Vec<Arc<dyn Stage>> {
    let mut stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(StatusCodePages), Arc::new(DeveloperErrorPage)];

    let stage_names = stages
        .iter()
        .map(|stage| stage.name())
        .chain(std::iter::once("runtime-info".to_string()))
        .chain(suffix.iter().map(|stage| stage.name()))
        .collect();
    let report = runtime_report(environment, components, stage_names);
    stages.push(Arc::new(RuntimeInfo::new(report)));

    stages
}

fn hosted_prefix(
    _environment: Environment,
    _components: &Components,
    _suffix: &[Arc<dyn Stage>],
) -> Vec<Arc<dyn Stage>> {
    vec![Arc::new(StatusCodePages), Arc::new(ErrorRedirect)]
}

fn shared_suffix(components: &Components) -> Vec<Arc<dyn Stage>> {
    let mut stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(SessionRestore::new(Arc::clone(&components.sessions))),
        Arc::new(StaticFiles::new(Arc::clone(&components.assets))),
        Arc::new(FederationCallback::new(
            Arc::clone(&components.coordinator),
            Arc::clone(&components.sessions),
        )),
    ];

    for adapter in components.coordinator.providers() {
        stages.push(Arc::new(ProviderChallenge::new(
            Arc::clone(&components.coordinator),
            Arc::clone(adapter),
        )));
    }

    stages.push(Arc::new(PolicyGuard::new(
        Arc::clone(&components.evaluator),
        &components.protected_routes,
    )));
    stages.push(Arc::new(RouteDispatch::new(
        Arc::clone(&components.entities),
        Arc::clone(&components.sessions),
    )));

    stages
}

fn runtime_report(
    environment: Environment,
    components: &Components,
    stages: Vec<String>,
) -> RuntimeReport {
    let providers = components
        .coordinator
        .providers()
        .iter()
        .map(|adapter| ProviderInfo {
            name: adapter.name().to_string(),
            challenge_path: FederationCoordinator::challenge_path(adapter.as_ref()),
            callback_path: FederationCoordinator::callback_path(adapter.as_ref()),
        })
        .collect();

    RuntimeReport {
        environment: environment.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        stages,
        providers,
        policies: components
            .evaluator
            .policies()
            .map(|policy| policy.name.clone())
            .collect(),
    }
}

/// Builds the ordered stage list for a hosting environment.
pub struct PipelineAssembler {
    components: Components,
}

impl PipelineAssembler {
    pub fn new(components: Components) -> Self {
        Self { components }
    }

    pub fn assemble(&self, environment: Environment) -> Pipeline {
        let suffix = shared_suffix(&self.components);
        let prefix = PREFIXES
            .iter()
            .find(|(candidate, _)| *candidate == environment)
            .map(|(_, builder)| builder(environment, &self.components, &suffix))
            .unwrap_or_default();

        let stages: Vec<Arc<dyn Stage>> = prefix.into_iter().chain(suffix).collect();
        let pipeline = Pipeline::new(stages);
        debug!(
            "Assembled {environment} pipeline: {}",
            pipeline.stage_names().join(", ")
        );
        pipeline
    }
}
