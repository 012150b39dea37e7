//! Admission trait used by the request-handling layer.

/// Trait for admission control implementations.
///
/// The HTTP layer only sees this trait, so it never reaches into registry or
/// limiter state directly.
pub trait AdmissionBackend: Send + Sync {
    /// Decide whether a request from `client_id` for `resource_key` may proceed.
    ///
    /// `false` means the caller must reject the request without invoking any
    /// downstream logic.
    fn admit(&self, client_id: &str, resource_key: &str) -> bool;
}
