//! Driving a single server-side cursor.

use std::collections::VecDeque;
use std::sync::Arc;

use bson::Document;
use serde::Deserialize;
use tracing::debug;

use crate::change_stream::commands::{build_get_more, GetMoreOptions};
use crate::client::{CommandRunner, ServerId};
use crate::common::{Namespace, ReadPreference};
use crate::error::{classify, Disposition, Error};

/// The cursor body shared by `aggregate` and `getMore` replies.
#[derive(Debug, Deserialize)]
struct CursorReply {
    cursor: CursorBody,
}

#[derive(Debug, Deserialize)]
struct CursorBody {
    /// 0 once the server has exhausted the cursor.
    id: i64,

    /// Echoed on `aggregate` replies; `getMore` replies may omit it.
    #[serde(default)]
    ns: Option<String>,

    #[serde(alias = "firstBatch", alias = "nextBatch")]
    batch: Vec<Document>,
}

/// The outcome of attempting to open a cursor.
pub(crate) enum Open {
    Cursor(Cursor),
    Resumable(Error),
    Fatal(Error),
}

/// The outcome of asking a cursor for its next document.
pub(crate) enum Pull {
    /// The next document of the current batch.
    Event(Document),
    /// Nothing buffered and the server has nothing new right now.
    EndOfBatch,
    /// The `getMore` failed recoverably.
    Resumable(Error),
    /// The `getMore` failed; the error must be surfaced.
    Fatal(Error),
}

/// One live server-side cursor plus the batch buffered from it.
///
/// The cursor performs no resume logic itself; it is a stateless pipe over
/// one server-side handle, replaced wholesale by the stream when a
/// recoverable error forces a resume.
pub(crate) struct Cursor {
    client: Arc<dyn CommandRunner>,
    namespace: Namespace,
    server: ServerId,
    id: i64,
    buffer: VecDeque<Document>,
    get_more: GetMoreOptions,
    read_preference: ReadPreference,
}

impl Cursor {
    /// Send `command` as an opening `aggregate` and seed the buffer from the
    /// reply's `firstBatch`.
    ///
    /// A reply with `cursor.id == 0` is a valid open: the server exhausted
    /// the cursor before replying, and the first pull past the seeded batch
    /// reports end-of-batch without issuing a `getMore`.
    pub(crate) fn open(
        client: Arc<dyn CommandRunner>,
        namespace: &Namespace,
        command: Document,
        read_preference: &ReadPreference,
        get_more: GetMoreOptions,
    ) -> Open {
        debug!(namespace = %namespace, "establishing change stream cursor");
        let outcome = client.run_command(&namespace.db, command, read_preference);
        match classify(outcome) {
            Disposition::Reply { server, document } => {
                let body = match parse_cursor_reply(document) {
                    Ok(body) => body,
                    Err(err) => return Open::Fatal(err),
                };
                // Prefer the namespace the server echoed back.
                let namespace = match body.ns.as_deref() {
                    Some(ns) => match Namespace::from_reply_str(ns) {
                        Ok(ns) => ns,
                        Err(err) => return Open::Fatal(err),
                    },
                    None => namespace.clone(),
                };
                Open::Cursor(Cursor {
                    client,
                    namespace,
                    server,
                    id: body.id,
                    buffer: body.batch.into(),
                    get_more,
                    read_preference: read_preference.clone(),
                })
            }
            Disposition::Resumable(err) => Open::Resumable(err),
            Disposition::Fatal(err) => Open::Fatal(err),
        }
    }

    /// Pop the next buffered document, fetching a new batch first if the
    /// buffer is empty and the server-side cursor is still live.
    ///
    /// Issues at most one `getMore` per call; an empty batch from a live
    /// cursor means "nothing new right now", and it is the caller's decision
    /// whether to pull again.
    pub(crate) fn pull(&mut self) -> Pull {
        if let Some(document) = self.buffer.pop_front() {
            return Pull::Event(document);
        }
        if self.id == 0 {
            return Pull::EndOfBatch;
        }

        let command = build_get_more(self.id, &self.namespace, &self.get_more);
        let outcome = self
            .client
            .run_command(&self.namespace.db, command, &self.read_preference);
        match classify(outcome) {
            Disposition::Reply { document, .. } => match parse_cursor_reply(document) {
                Ok(body) => {
                    self.id = body.id;
                    self.buffer = body.batch.into();
                    match self.buffer.pop_front() {
                        Some(document) => Pull::Event(document),
                        None => Pull::EndOfBatch,
                    }
                }
                Err(err) => Pull::Fatal(err),
            },
            Disposition::Resumable(err) => Pull::Resumable(err),
            Disposition::Fatal(err) => Pull::Fatal(err),
        }
    }

    /// Release the server-side cursor, if it is still live.
    ///
    /// Best-effort: the kill is fired at the server that owns the cursor and
    /// its outcome is never observed.
    pub(crate) fn kill(&mut self) {
        if self.id != 0 {
            debug!(cursor_id = self.id, namespace = %self.namespace, "killing server-side cursor");
            self.client.kill_cursor(&self.server, &self.namespace, self.id);
            self.id = 0;
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.kill();
    }
}

fn parse_cursor_reply(document: Document) -> Result<CursorBody, Error> {
    let reply: CursorReply = bson::from_document(document)
        .map_err(|err| Error::invalid_response(format!("malformed cursor reply: {}", err)))?;
    Ok(reply.cursor)
}
