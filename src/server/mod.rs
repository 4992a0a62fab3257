mod error;
pub mod http_server;
pub mod listener;
mod server_context;

pub use error::Error;
pub use http_server::serve_request;
pub use listener::Listener;
pub use server_context::ServerContext;
