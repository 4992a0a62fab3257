use argh::FromArgs;
use serde::Serialize;

use crate::command::{build_components, Error};
use crate::configuration::Configuration;
use crate::federation::FederationCoordinator;
use crate::pipeline::PipelineAssembler;
use crate::policy::AuthorizationPolicy;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "inspect",
    description = "Print the resolved pipeline, providers and policies as JSON"
)]
pub struct Options {}

#[derive(Debug, Serialize)]
struct ProviderReport {
    name: String,
    caption: String,
    challenge_path: String,
    callback_path: String,
    claim_types: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct Report {
    sources: Vec<String>,
    environment: String,
    stages: Vec<String>,
    providers: Vec<ProviderReport>,
    policies: Vec<AuthorizationPolicy>,
}

pub struct Command {
    report: Report,
}

impl Command {
    pub fn new(config: &Configuration) -> Result<Self, Error> {
        let components = build_components(config)?;

        let providers = config
            .providers
            .iter()
            .zip(components.coordinator.providers())
            .map(|(provider, adapter)| ProviderReport {
                name: provider.name().to_string(),
                caption: provider.caption().to_string(),
                challenge_path: FederationCoordinator::challenge_path(adapter.as_ref()),
                callback_path: FederationCoordinator::callback_path(adapter.as_ref()),
                claim_types: adapter.declared_claim_types(),
            })
            .collect();
        let policies = components.evaluator.policies().cloned().collect();
        let stages = PipelineAssembler::new(components)
            .assemble(config.environment)
            .stage_names();

        Ok(Command {
            report: Report {
                sources: config.sources.clone(),
                environment: config.environment.to_string(),
                stages,
                providers,
                policies,
            },
        })
    }

    pub fn run(&self) -> Result<(), Error> {
        println!("{}", self.render()?);
        Ok(())
    }

    fn render(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{defaults, ConfigStore, MemorySource};

    fn configuration(pairs: Vec<(&str, String)>) -> Configuration {
        let mut store = ConfigStore::new();
        store.add_source(MemorySource::new("defaults", defaults()));
        store.add_source(MemorySource::new("test", pairs));
        Configuration::from_store(&store, None).unwrap()
    }

    #[test]
    fn test_report_lists_pipeline_providers_and_policies() {
        let dir = tempfile::tempdir().unwrap();
        let config = configuration(vec![
            ("Hosting:Environment", "staging".to_string()),
            ("Data:DefaultConnection:ConnectionString", "memory://".to_string()),
            ("StaticFiles:Root", dir.path().to_string_lossy().to_string()),
            ("ExternalProviders:Google:ClientId", "client".to_string()),
            ("ExternalProviders:Google:ClientSecret", "secret".to_string()),
        ]);

        let command = Command::new(&config).unwrap();
        let report: serde_json::Value = serde_json::from_str(&command.render().unwrap()).unwrap();

        assert_eq!(report["sources"], serde_json::json!(["defaults", "test"]));
        assert_eq!(report["environment"], "Staging");
        assert_eq!(report["stages"][1], "error-redirect");
        assert_eq!(report["stages"][5], "challenge:Google");
        assert_eq!(report["providers"][0]["callback_path"], "/signin-google");
        assert_eq!(
            report["providers"][0]["claim_types"][0],
            "urn:tokens:google:access_token"
        );
        assert_eq!(report["policies"][0]["name"], "ManageStore");
    }
}
