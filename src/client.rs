//! The RPC collaborator a change stream drives its commands through.
//!
//! The stream machinery never talks to a socket itself; it hands fully
//! materialized command documents to a [`CommandRunner`] and interprets the
//! outcomes. Server discovery, selection, pooling, and authentication are the
//! runner's concern.

use std::fmt;

use bson::Document;

use crate::common::{Namespace, ReadPreference};

/// Identifies the server that produced a reply.
///
/// Opaque to this crate: a runner mints one per reply, and gets it handed
/// back when the cursor bound to that server must be killed, so the kill is
/// never re-routed by server selection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> ServerId {
        ServerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// The ways a transport can fail before a server reply is received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The socket timed out waiting for a reply.
    Timeout,
    /// The connection was reset by the peer.
    Reset,
    /// The peer hung up mid-exchange.
    Hangup,
    /// No connection to the selected server could be established.
    ConnectFailed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let text = match *self {
            TransportErrorKind::Timeout => "socket timeout",
            TransportErrorKind::Reset => "connection reset",
            TransportErrorKind::Hangup => "connection hangup",
            TransportErrorKind::ConnectFailed => "connect failed",
        };
        fmt.write_str(text)
    }
}

/// The outcome of running one command.
#[derive(Clone, Debug)]
pub enum CommandOutcome {
    /// The server produced a reply. `ok` may still be 0.
    Reply {
        /// The server the reply came from.
        server: ServerId,
        /// The raw reply body.
        document: Document,
    },
    /// The transport failed; no reply was received.
    Transport(TransportErrorKind),
}

/// A client capable of running database commands against a deployment.
///
/// Implementations select a server honoring `read_preference`, send the
/// command, and return the raw reply without interpreting it. Runners are
/// expected to be shared (`Arc`) across any number of independent streams
/// and must therefore be thread-safe per their own contract.
pub trait CommandRunner: Send + Sync {
    /// Run `command` against `db` on a server satisfying `read_preference`.
    fn run_command(
        &self,
        db: &str,
        command: Document,
        read_preference: &ReadPreference,
    ) -> CommandOutcome;

    /// Release a server-side cursor on the server that owns it.
    ///
    /// Fire-and-forget: implementations send
    /// `{ killCursors: <coll>, cursors: [<id>] }` to `server` and discard the
    /// reply. Abandoned cursors are reaped by server-side timeout regardless,
    /// so no failure here is ever reported.
    fn kill_cursor(&self, server: &ServerId, namespace: &Namespace, cursor_id: i64);
}
