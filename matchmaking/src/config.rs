/// Per-worker configuration: where the upstream matchmaking service lives, and how to
/// reach its version-metadata endpoint.
///
/// One `WorkerConfig` is shared (cloned) across every worker in the pool — it carries no
/// per-job state.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub mm_host: String,
    pub mm_port: u16,

    pub api_base_url: String,
    pub app_version: String,

    /// Whether the HTTP client and ENet peer connections should validate TLS/remote
    /// certificates. Defaults to `true` — see DESIGN.md for why this departs from the
    /// implementation this crate is modeled on.
    pub verify_tls: bool,
}

impl WorkerConfig {
    pub fn new(mm_host: impl Into<String>, mm_port: u16, api_base_url: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            mm_host: mm_host.into(),
            mm_port,
            api_base_url: api_base_url.into(),
            app_version: app_version.into(),
            verify_tls: true,
        }
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }
}
