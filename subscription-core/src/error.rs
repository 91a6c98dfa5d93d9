/// Errors surfaced by [`crate::registry::Registry::announce`].
///
/// Everything else — stale nodes, empty pools, a reference held on a dying
/// node — is an expected runtime state handled internally, never reported
/// to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("subscription key exceeds 255 bytes")]
    KeyTooLong,

    #[error("subscription node name exceeds 255 bytes")]
    NameTooLong,

    #[error("regexp keys are disabled for this registry")]
    RegexpDisabled,

    #[error("failed to compile subscription pattern: {0}")]
    PatternCompileFailed(regex::Error),
}
