//! Visitor key generation.

/// Identifies one limiter: a client hitting a resource.
///
/// The registry indexes limiters by the flattened form
/// `{client_id}_{resource_key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitorKey {
    /// Who is making the request (usually an IP address)
    pub client_id: String,
    /// What is being requested (usually a route path)
    pub resource_key: String,
}

impl VisitorKey {
    /// Create a new visitor key.
    pub fn new(client_id: &str, resource_key: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            resource_key: resource_key.to_string(),
        }
    }

    /// The registry key for this visitor.
    pub fn to_string_key(&self) -> String {
        format!("{}_{}", self.client_id, self.resource_key)
    }
}

impl std::fmt::Display for VisitorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
