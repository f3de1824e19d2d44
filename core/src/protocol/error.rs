//! Session errors
//!
//! Caller-misuse conditions surface as [`SessionError`]; transport and
//! protocol failures are not errors at this boundary, they become terminal
//! transfer statuses instead.

/// Errors returned by outgoing share session operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Attachments were already staged for this session
    AlreadyInitiated,
    /// The session has no connection to the target
    NotConnected,
    /// Nothing is staged to send
    NoAttachments,
    /// Payloads have not been created for all staged attachments
    PayloadsNotCreated,
    /// File info list does not line up with the staged file attachments
    FileInfoMismatch,
    /// The introduction frame has not been sent yet
    IntroductionNotSent,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AlreadyInitiated => {
                write!(f, "attachments already staged for this session")
            }
            SessionError::NotConnected => write!(f, "no connection to the target"),
            SessionError::NoAttachments => write!(f, "no attachments staged"),
            SessionError::PayloadsNotCreated => {
                write!(f, "payloads have not been created for all attachments")
            }
            SessionError::FileInfoMismatch => {
                write!(f, "file info count does not match file attachments")
            }
            SessionError::IntroductionNotSent => {
                write!(f, "introduction has not been sent")
            }
        }
    }
}

impl std::error::Error for SessionError {}
