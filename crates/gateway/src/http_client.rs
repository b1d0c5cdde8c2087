use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

pub(crate) fn default_http_client_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(Duration::from_secs(60))
        // A short pool idle timeout lets us pick up DNS changes on webhook
        // targets without a connection TTL knob.
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
}

/// Common HTTP client to re-use connections across webhook deliveries.
pub(crate) fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            default_http_client_builder()
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}
