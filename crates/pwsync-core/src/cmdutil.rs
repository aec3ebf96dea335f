//! Error markers shared by the command layer.

/// Error indicating the user cancelled an operation.
#[derive(Debug, thiserror::Error)]
#[error("user cancelled")]
pub struct CancelError;

/// Silent error - triggers exit 1 without message.
///
/// Used once the failure has already been presented to the user.
#[derive(Debug, thiserror::Error)]
#[error("")]
pub struct SilentError;

/// Check if an error represents a user cancellation.
pub fn is_user_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CancelError>().is_some()
        || matches!(
            err.downcast_ref::<crate::CoreError>(),
            Some(crate::CoreError::Cancelled)
        )
}
