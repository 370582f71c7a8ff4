use crate::domain::PageId;
use std::path::PathBuf;
use thiserror::Error;

/// Typed failures from the remote wiki API. The engine only ever matches on
/// these variants; the HTTP layer is responsible for mapping status codes.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("page {0} not found on the remote")]
    NotFound(PageId),

    #[error("version conflict on page {page_id}: pushed against v{expected}")]
    VersionConflict { page_id: PageId, expected: i64 },

    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected remote response: {0}")]
    Protocol(String),
}

/// Engine-level failures. Configuration, authentication and reachability
/// abort a cycle; everything else is captured per page or per operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("front-matter error in {}: {message}", .path.display())]
    Frontmatter { path: PathBuf, message: String },

    #[error("baseline store error: {0}")]
    Baseline(String),

    #[error("merge tool '{tool}' failed: {message}")]
    MergeTool { tool: String, message: String },

    #[error("{0}")]
    General(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process exit classification. The numeric values are part of the CLI
/// contract and scripts depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthError = 2,
    NetworkError = 3,
    Conflicts = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&SyncError> for ExitCode {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Remote(RemoteError::AuthFailed(_)) => ExitCode::AuthError,
            SyncError::Remote(RemoteError::Unreachable(_)) => ExitCode::NetworkError,
            _ => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_maps_auth_and_network_failures() {
        let auth = SyncError::Remote(RemoteError::AuthFailed("401".into()));
        assert_eq!(ExitCode::from(&auth), ExitCode::AuthError);

        let net = SyncError::Remote(RemoteError::Unreachable("timeout".into()));
        assert_eq!(ExitCode::from(&net), ExitCode::NetworkError);

        let cfg = SyncError::Config("missing".into());
        assert_eq!(ExitCode::from(&cfg), ExitCode::GeneralError);
    }

    #[test]
    fn exit_code_values_are_stable() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::GeneralError.code(), 1);
        assert_eq!(ExitCode::AuthError.code(), 2);
        assert_eq!(ExitCode::NetworkError.code(), 3);
        assert_eq!(ExitCode::Conflicts.code(), 4);
    }
}
