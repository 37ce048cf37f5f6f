mod forwarder;
pub mod loadbalance;

pub use forwarder::{build_http_client, Forwarder, HttpClient};
