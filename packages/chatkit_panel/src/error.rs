use crate::client::SourceError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PanelError {
    #[error("Set CHATKIT_WORKFLOW_ID in your environment.")]
    WorkflowNotConfigured,

    /// The refresh this caller was waiting on ended without a secret.
    #[error("Session refresh failed")]
    RefreshFailed,

    #[error("Session refresh timeout")]
    RefreshTimeout,

    #[error(transparent)]
    Source(#[from] SourceError),
}
