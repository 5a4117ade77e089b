//! Authority tuning.

/// Configuration for a [`HomeNode`](crate::HomeNode).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HomeConfig {
    /// Maximum number of lost compare-and-swap rounds per request.
    ///
    /// `None` retries until the line settles. When the limit is hit the
    /// request is dropped without a reply.
    pub cas_retry_limit: Option<u32>,
}
