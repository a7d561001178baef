//! A thin HTTP client used for the one external lookup the proxy needs: fetching the
//! upstream matchmaking service's current client-version string, which gets embedded
//! in every `create-ticket` request.
//!
//! This is deliberately small compared to the surface a full Slippi client would need
//! (GraphQL queries/mutations, match-status reporting, etc.) — none of that is part of
//! an authentication proxy that never actually plays a match.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use ureq::{Agent, AgentBuilder, Resolver};

/// Re-export `ureq::Error` for simplicity.
pub type Error = ureq::Error;

/// A DNS resolver that only accepts IPV4 connections.
struct Ipv4Resolver;

impl Resolver for Ipv4Resolver {
    /// Forces IPV4 addresses only.
    fn resolve(&self, netloc: &str) -> io::Result<Vec<SocketAddr>> {
        ToSocketAddrs::to_socket_addrs(netloc).map(|iter| {
            let vec = iter.filter(|s| s.is_ipv4()).collect::<Vec<SocketAddr>>();

            if vec.is_empty() {
                tracing::warn!(
                    target: "gg-api",
                    "Failed to get any IPV4 addresses. Does the DNS server support it?"
                );
            }

            vec
        })
    }
}

/// Default timeout that we use on the client.
fn default_timeout() -> Duration {
    Duration::from_millis(5000)
}

/// A wrapper type that simply dereferences to a `ureq::Agent`.
///
/// You can clone this with little cost and pass it freely to other threads, as it
/// manages itself under the hood with `Arc`.
#[derive(Clone, Debug)]
pub struct APIClient(Agent);

impl APIClient {
    /// Creates and initializes a new APIClient.
    ///
    /// `verify_tls` controls whether the underlying TLS connector validates the peer
    /// certificate chain. This defaults to `true` via `WorkerConfig`; the upstream C++
    /// client disabled verification unconditionally, which we explicitly do not carry
    /// forward as the default (see DESIGN.md).
    pub fn new(user_agent: &str, verify_tls: bool) -> Self {
        let mut builder = AgentBuilder::new()
            .resolver(Ipv4Resolver)
            .max_idle_connections(5)
            .timeout(default_timeout())
            .user_agent(user_agent);

        if !verify_tls {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .expect("failed to build permissive TLS connector");

            builder = builder.tls_connector(Arc::new(connector));
        }

        Self(builder.build())
    }

    /// Fetches the upstream matchmaking service's version-metadata endpoint
    /// (`<api_base>/<uid>`) and returns the `latestVersion` field.
    pub fn fetch_latest_version(&self, api_base: &str, uid: &str) -> Result<String, FetchVersionError> {
        let url = format!("{api_base}/{uid}");

        let response = self.0.get(&url).call().map_err(|error| match error {
            ureq::Error::Status(code, response) => FetchVersionError::Status(code, response.into_string().unwrap_or_default()),
            ureq::Error::Transport(transport) => FetchVersionError::Transport(transport),
        })?;

        let body: VersionResponse = response.into_json().map_err(FetchVersionError::Body)?;
        Ok(body.latest_version)
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(alias = "latestVersion")]
    latest_version: String,
}

/// Errors that can occur while fetching the version-metadata endpoint.
#[derive(Debug, thiserror::Error)]
pub enum FetchVersionError {
    #[error("version endpoint returned status {0}: {1}")]
    Status(u16, String),

    #[error(transparent)]
    Transport(ureq::Transport),

    #[error("failed to decode version response body: {0}")]
    Body(io::Error),
}

impl Deref for APIClient {
    type Target = Agent;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for APIClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
