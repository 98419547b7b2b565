//! Batch client configuration.
//!
//! Every field has a default, so a partial serde document (JSON, TOML, ...)
//! deserializes into a usable `ClientConfig`. Loading such documents is left
//! to the embedding application.

use serde::Deserialize;

use crate::http::origin;

/// Resource of the batch processor at the root of a site.
pub const BATCH_PROCESSOR_PATH: &str = "/batch-processor";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Absolute URL the outer batch request is POSTed to.
    pub endpoint: String,
    /// Boundary candidates tried before giving up with `BoundaryCollision`.
    pub max_boundary_attempts: u32,
    /// Outer response statuses that carry a batch response.
    pub accepted_statuses: Vec<u16>,
    /// Emit a `Multipart-Request-ID` header on every request part.
    pub request_ids: bool,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_boundary_attempts: 8,
            accepted_statuses: vec![200, 207],
            request_ids: true,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    /// Target the batch processor at the root of the site named by `base`.
    ///
    /// `http://host:8000/any/path` becomes `http://host:8000/batch-processor`.
    /// A `base` that is not an absolute URL is used as the site root as is.
    pub fn for_site(base: &str) -> Self {
        let root = origin(base).unwrap_or_else(|| base.trim_end_matches('/'));
        Self::new(&format!("{root}{BATCH_PROCESSOR_PATH}"))
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_max_boundary_attempts(mut self, attempts: u32) -> Self {
        self.max_boundary_attempts = attempts;
        self
    }

    pub fn with_accepted_statuses(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.accepted_statuses = statuses.into();
        self
    }

    pub fn with_request_ids(mut self, enabled: bool) -> Self {
        self.request_ids = enabled;
        self
    }

    pub fn accepts_status(&self, status: u16) -> bool {
        self.accepted_statuses.contains(&status)
    }
}
