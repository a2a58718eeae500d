//! Media platform API constants
//!
//! Public endpoint and parameter names. The credentials themselves are
//! configured at runtime and managed by the pool.

/// Base URL of the internal API
pub const API_BASE_URL: &str = "https://api-v2.soundcloud.com";

/// Endpoint that turns a public link into its metadata tree
pub const RESOLVE_ENDPOINT: &str = "/resolve";

/// Query parameter carrying the credential on every request
pub const CREDENTIAL_PARAM: &str = "client_id";

/// Hosts accepted for submitted links
pub const VALID_HOSTS: &[&str] = &["soundcloud.com", "www.soundcloud.com", "m.soundcloud.com"];

/// Browser User-Agent sent with API and media requests; the API rejects
/// obviously scripted clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
