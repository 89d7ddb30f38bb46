pub mod forward;
pub mod server;

pub use forward::HttpForwarder;
pub use server::{GatewayServer, ServerState};
