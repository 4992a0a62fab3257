use argh::FromArgs;
use tracing::info;

use crate::command::{build_components, Error};
use crate::configuration::Configuration;
use crate::pipeline::PipelineAssembler;
use crate::server::{Listener, ServerContext};

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the storefront web server"
)]
pub struct Options {}

pub struct Command {
    listener: Listener,
}

impl Command {
    pub fn new(config: &Configuration) -> Result<Self, Error> {
        let components = build_components(config)?;
        let pipeline = PipelineAssembler::new(components).assemble(config.environment);
        info!(
            "Request pipeline ({}): {}",
            config.environment,
            pipeline.stage_names().join(" -> ")
        );

        let context = ServerContext::new(pipeline, config.server.max_body_size);
        let listener = Listener::new(&config.server, context);

        Ok(Command { listener })
    }

    pub async fn run(&self) -> Result<(), Error> {
        self.listener.serve().await?;
        Ok(())
    }
}
