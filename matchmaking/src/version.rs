//! The seam between the worker state machine and the one HTTP lookup it needs: the
//! upstream client-version string embedded in every `create-ticket` request.
//!
//! Exists so worker tests can script the version response instead of making a real
//! network call, the same way `Transport` lets them script the matchmaking peer.

use slippi_authproxy_gg_api::{APIClient, FetchVersionError};

pub trait VersionLookup: Clone + Send + 'static {
    fn fetch_latest_version(&self, api_base_url: &str, uid: &str) -> Result<String, FetchVersionError>;
}

impl VersionLookup for APIClient {
    fn fetch_latest_version(&self, api_base_url: &str, uid: &str) -> Result<String, FetchVersionError> {
        APIClient::fetch_latest_version(self, api_base_url, uid)
    }
}
