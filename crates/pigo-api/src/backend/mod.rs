pub mod client;
pub mod error;
pub mod proxy;
pub mod types;

pub use client::BackendClient;
pub use error::BackendError;
pub use proxy::ProxyEndpoint;
