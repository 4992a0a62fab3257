use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::configuration::ServerConfig;
use crate::server::{serve_request, Error, ServerContext};

async fn build_listener(binding_address: SocketAddr) -> Result<TcpListener, Error> {
    match TcpListener::bind(binding_address).await {
        Ok(listener) => Ok(listener),
        Err(err) => {
            let msg = format!("Failed to bind to {binding_address}: {err}");
            Err(Error::Initialization(msg))
        }
    }
}

async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), Error> {
    match listener.accept().await {
        Ok((stream, remote_address)) => {
            debug!("Accepted connection from {remote_address}");
            Ok((stream, remote_address))
        }
        Err(err) => {
            let msg = format!("Failed to accept incoming connection: {err}");
            Err(Error::Execution(msg))
        }
    }
}

pub struct Listener {
    binding_address: SocketAddr,
    context: Arc<ServerContext>,
    timeouts: Arc<[Duration; 2]>,
}

impl Listener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Self {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);

        let timeouts = [
            Duration::from_secs(server_config.query_timeout),
            Duration::from_secs(server_config.query_timeout_grace_period),
        ];

        Self {
            binding_address,
            context: Arc::new(context),
            timeouts: Arc::new(timeouts),
        }
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Listening on {}", self.binding_address);
        let listener = build_listener(self.binding_address).await?;

        loop {
            debug!("Waiting for incoming connection");
            let (tcp, _) = accept(&listener).await?;

            let stream = TokioIo::new(tcp);
            tokio::spawn(Box::pin(serve_request(
                stream,
                Arc::clone(&self.context),
                Arc::clone(&self.timeouts),
            )));
        }
    }
}
