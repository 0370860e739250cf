//! Error types and the resumable-error classification used by change streams.

use std::fmt;

use bson::{Bson, Document};
use thiserror::Error;

use crate::client::{CommandOutcome, ServerId, TransportErrorKind};

/// The result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Server error codes after which a change stream may be re-established.
///
/// Kept sorted so membership is a binary search and updates to the server's
/// error taxonomy are a one-line change.
const RESUMABLE_CODES: [i32; 18] = [
    6,     // HostUnreachable
    7,     // HostNotFound
    43,    // CursorNotFound
    63,    // StaleShardVersion
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    133,   // FailedToSatisfyReadPreference
    150,   // StaleEpoch
    189,   // PrimarySteppedDown
    234,   // RetryChangeStream
    262,   // ExceededTimeLimit
    9001,  // SocketException
    10107, // NotMaster
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13388, // StaleConfig
    13435, // NotMasterNoSlaveOk
    13436, // NotMasterOrSecondary
];

/// An error produced while building or driving a change stream.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An invalid argument was provided.
    #[error("invalid argument: {message}")]
    Argument { message: String },

    /// A delivered change document had its `_id` filtered out, so the stream
    /// can no longer be resumed.
    #[error("Cannot provide resume functionality when the resume token is missing.")]
    MissingResumeToken,

    /// The server replied to a command with `ok: 0`.
    #[error("command failed: {0}")]
    Command(CommandError),

    /// The transport failed before a server reply was received.
    #[error("transport failure: {0}")]
    Transport(TransportErrorKind),

    /// The server returned a reply this crate could not make sense of.
    #[error("invalid server reply: {message}")]
    InvalidResponse { message: String },

    /// An invariant of the driver itself was violated.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Error::Argument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        Error::InvalidResponse {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

/// A server error reply, preserved verbatim.
#[derive(Clone, Debug)]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code, when the server reports one.
    pub code_name: String,

    /// A description of the error that occurred.
    pub message: String,

    /// The full reply document exactly as received.
    pub reply: Document,
}

impl CommandError {
    fn from_reply(reply: Document) -> Self {
        let code = get_int(&reply, "code").map(|c| c as i32).unwrap_or(0);
        let code_name = reply
            .get_str("codeName")
            .map(String::from)
            .unwrap_or_default();
        let message = reply.get_str("errmsg").map(String::from).unwrap_or_default();
        CommandError {
            code,
            code_name,
            message,
            reply,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// How one command outcome should be handled by the change stream machinery.
#[derive(Debug)]
pub(crate) enum Disposition {
    /// An `ok: 1` reply.
    Reply {
        server: ServerId,
        document: Document,
    },

    /// The cursor may be re-established once from the current resume point.
    Resumable(Error),

    /// Surfaced to the caller as-is.
    Fatal(Error),
}

/// Classify a command outcome per the change stream resume rules.
///
/// Transport failures are always recoverable: the cursor they strand can be
/// re-established against whatever server selection produces next. A server
/// error is recoverable only when its code is in [`RESUMABLE_CODES`].
pub(crate) fn classify(outcome: CommandOutcome) -> Disposition {
    match outcome {
        CommandOutcome::Reply { server, document } => {
            if reply_ok(&document) {
                return Disposition::Reply { server, document };
            }
            // A failure reply is always preserved verbatim, even when the
            // server omitted a numeric code (`from_reply` records it as 0,
            // which is never resumable).
            let err = CommandError::from_reply(document);
            if is_resumable_code(err.code) {
                Disposition::Resumable(Error::Command(err))
            } else {
                Disposition::Fatal(Error::Command(err))
            }
        }
        CommandOutcome::Transport(kind) => Disposition::Resumable(Error::Transport(kind)),
    }
}

fn is_resumable_code(code: i32) -> bool {
    RESUMABLE_CODES.binary_search(&code).is_ok()
}

/// Servers report `ok` as a double or an integer depending on version.
fn reply_ok(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        _ => false,
    }
}

fn get_int(document: &Document, key: &str) -> Option<i64> {
    match document.get(key) {
        Some(Bson::Int32(v)) => Some(i64::from(*v)),
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Double(v)) => Some(*v as i64),
        _ => None,
    }
}
