// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reachability probe and public IP detection.
//!
//! The probe runs before every channel attempt: any HTTP answer below 500
//! counts as reachable. The public IP comes from an ordered list of
//! external lookup endpoints; the first response that parses as a dotted
//! quad wins.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::debug;

/// Stable User-Agent for external lookups.
pub const USER_AGENT: &str = "gare-station-node/0.1";

/// Ordered public-IP lookup endpoints. Each returns the caller's address as
/// plain text.
pub const IP_ENDPOINTS: &[&str] = &[
    "https://api.ipify.org",
    "https://ipv4.icanhazip.com",
    "https://checkip.amazonaws.com",
];

/// Per-endpoint timeout for IP lookups.
pub const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(4);

static CRYPTO_INIT: std::sync::Once = std::sync::Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build the HTTP client used for probes and lookups.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    ensure_crypto();
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// Probe `GET {base}/health`. Any response below 500 counts as reachable;
/// timeouts and transport errors do not.
pub async fn central_reachable(client: &reqwest::Client, base_url: &str) -> bool {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(resp) => resp.status().as_u16() < 500,
        Err(e) => {
            debug!(url, err = %e, "reachability probe failed");
            false
        }
    }
}

/// Walk the lookup endpoints in order; first valid IPv4 wins.
pub async fn detect_public_ip(client: &reqwest::Client) -> Option<String> {
    for endpoint in IP_ENDPOINTS {
        let response = match client
            .get(*endpoint)
            .timeout(IP_LOOKUP_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(endpoint, err = %e, "ip lookup failed, trying next");
                continue;
            }
        };
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                debug!(endpoint, err = %e, "ip lookup body unreadable, trying next");
                continue;
            }
        };
        if let Some(ip) = parse_ipv4(&text) {
            return Some(ip);
        }
        debug!(endpoint, "ip lookup returned no dotted quad, trying next");
    }
    None
}

/// Extract a dotted-quad IPv4 address from a lookup response body.
pub fn parse_ipv4(text: &str) -> Option<String> {
    let candidate = text.trim();
    candidate.parse::<Ipv4Addr>().ok().map(|ip| ip.to_string())
}

#[cfg(test)]
#[path = "netprobe_tests.rs"]
mod tests;
