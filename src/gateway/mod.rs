//! HTTP surface: reserved endpoints, auth-only responder and the
//! transparent proxy

mod proxy;
mod router;
mod server;

pub use proxy::{ProxyForwarder, ProxyRejection};
pub use router::{AppState, OperatingMode, RESERVED_PREFIX, create_router};
pub use server::Gateway;
