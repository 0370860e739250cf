pub(crate) mod commands;

use std::sync::Arc;

use bson::Document;
use serde::Deserialize;
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::client::CommandRunner;
use crate::common::{Namespace, ReadPreference};
use crate::cursor::{Cursor, Open, Pull};
use crate::error::{Error, Result};

use self::commands::{GetMoreOptions, PipelineBuilder};

//////////////////////////////////////////////////////////////////////////////////////////////////
// ChangeStream //////////////////////////////////////////////////////////////////////////////////

/// Observe real-time data changes in your MongoDB deployment without having to tail the oplog.
///
/// A change stream presents a logically infinite sequence of change events.
/// Recoverable failures of the underlying cursor (transient network errors,
/// elections, stepdowns) are hidden from the consumer: the dead cursor is
/// released best-effort and a replacement is established from the last
/// resume point the caller has seen. Only one automatic re-establishment is
/// attempted per failure; if the replacement fails too, the error surfaces.
///
/// A single stream is not internally synchronized and is meant to be driven
/// from one place at a time. Independent streams sharing one
/// [`CommandRunner`](crate::client::CommandRunner) may run in parallel.
pub struct ChangeStream {
    /// The client every command this stream issues is run through.
    client: Arc<dyn CommandRunner>,

    /// The watched collection.
    namespace: Namespace,

    /// The pipeline of stages appended after the initial `$changeStream` stage.
    ///
    /// Never modified after construction; a resume must replay it verbatim.
    pipeline: Vec<Document>,

    /// The options provided to the initial `$changeStream` stage.
    options: ChangeStreamOptions,

    /// The read preference captured when the stream was opened, used for
    /// server selection on the initial aggregation and again on every resume.
    read_preference: ReadPreference,

    /// The underlying cursor of this change stream.
    ///
    /// Absent until the first `next` call opens the stream; replaced
    /// wholesale when a recoverable error forces a resume.
    cursor: Option<Cursor>,

    /// The resume point to re-establish from, per the last delivered event.
    resume_token: TokenTracker,

    /// Where the stream is in its lifecycle.
    state: StreamState,

    /// The terminal error, once one has been surfaced.
    latched_error: Option<Error>,
}

/// Lifecycle states of a change stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    /// Constructed; no cursor has been established yet.
    Opening,
    /// A batch was exhausted with nothing new; waiting on the next `next`.
    Idle,
    /// Actively pulling from the cursor.
    Iterating,
    /// Re-establishing the cursor after a recoverable failure.
    Resuming,
    /// Explicitly closed; no further server requests are issued.
    Closed,
    /// A fatal error was surfaced and is replayed on every further `next`.
    Errored,
}

/// Tracks the most recent resume point observed by the caller.
///
/// The token is overwritten only when a document is delivered, never on mere
/// receipt into the batch buffer, so a resume can never skip past an event
/// the caller has not seen.
#[derive(Debug, Default)]
struct TokenTracker {
    current: Option<Document>,
}

impl TokenTracker {
    fn starting_at(token: Option<Document>) -> TokenTracker {
        TokenTracker { current: token }
    }

    /// Record the token of a document that is about to reach the caller.
    fn delivered(&mut self, token: &Document) {
        self.current = Some(token.clone());
    }

    fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }
}

impl ChangeStream {
    /// Get the token that should be used to resume after the most recently
    /// returned change.
    ///
    /// Before any event has been delivered this is the `resume_after` point
    /// the stream was opened with, if any. Persisting the token is the
    /// caller's responsibility if resumption across processes is desired.
    pub fn resume_token(&self) -> Option<Document> {
        self.resume_token.current().cloned()
    }

    /// The verbatim server reply behind the latched error, if the stream
    /// failed on a server error.
    pub fn error_document(&self) -> Option<&Document> {
        match self.latched_error {
            Some(Error::Command(ref err)) => Some(&err.reply),
            _ => None,
        }
    }

    /// Whether this stream can still produce events.
    pub fn is_alive(&self) -> bool {
        !matches!(self.state, StreamState::Closed | StreamState::Errored)
    }

    /// Close the stream, releasing the server-side cursor best-effort.
    ///
    /// Subsequent `next` calls return no events and issue no server
    /// requests. Dropping the stream releases the cursor the same way.
    pub fn close(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.kill();
        }
        self.cursor = None;
        self.state = StreamState::Closed;
    }

    //////////////////////////////////////////////////////////////////////////
    // Public to Crate ///////////////////////////////////////////////////////

    /// Create a change stream instance watching the target collection.
    ///
    /// Validation happens here, synchronously; the first cursor is only
    /// established on the first `next` call.
    pub(crate) fn new(
        client: Arc<dyn CommandRunner>,
        namespace: Namespace,
        pipeline: Option<Vec<Document>>,
        options: Option<ChangeStreamOptions>,
        read_preference: ReadPreference,
    ) -> Result<Self> {
        let options = options.unwrap_or_else(|| ChangeStreamOptions::builder().build());
        let pipeline = pipeline.unwrap_or_else(|| Vec::with_capacity(0)); // Will never be mutated, so avoid allocation.
        options.validate()?;
        validate_pipeline(&pipeline)?;

        Ok(ChangeStream {
            resume_token: TokenTracker::starting_at(options.resume_after.clone()),
            state: StreamState::Opening,
            cursor: None,
            latched_error: None,
            client,
            namespace,
            pipeline,
            options,
            read_preference,
        })
    }

    //////////////////////////////////////////////////////////////////////////
    // Private ///////////////////////////////////////////////////////////////

    /// Drive the cursor until a document, an empty batch, or an
    /// unrecoverable error, running the resume protocol at most once.
    fn advance(&mut self) -> Result<Option<ChangeStreamDocument>> {
        let mut resume_spent = false;

        self.state = StreamState::Iterating;
        if self.cursor.is_none() {
            match self.open_cursor() {
                Open::Cursor(cursor) => self.cursor = Some(cursor),
                Open::Resumable(_) => {
                    self.resume()?;
                    resume_spent = true;
                }
                Open::Fatal(err) => return Err(err),
            }
        }

        loop {
            let pulled = match self.cursor.as_mut() {
                Some(cursor) => cursor.pull(),
                None => return Err(Error::internal("change stream has no live cursor")),
            };
            match pulled {
                Pull::Event(document) => return self.deliver(document).map(Some),
                Pull::EndOfBatch => {
                    self.state = StreamState::Idle;
                    return Ok(None);
                }
                Pull::Resumable(err) => {
                    // Only one automatic attempt per incident; the retry's
                    // own failure is surfaced.
                    if resume_spent {
                        return Err(err);
                    }
                    self.resume()?;
                    resume_spent = true;
                }
                Pull::Fatal(err) => return Err(err),
            }
        }
    }

    /// Re-establish the cursor from the current resume point.
    ///
    /// The dead cursor is killed best-effort first. The replacement
    /// `aggregate` replays the original pipeline and options verbatim, with
    /// only the `$changeStream` stage's `resumeAfter` updated.
    fn resume(&mut self) -> Result<()> {
        self.state = StreamState::Resuming;
        debug!(namespace = %self.namespace, "resuming change stream after recoverable error");

        if let Some(cursor) = self.cursor.as_mut() {
            cursor.kill();
        }
        self.cursor = None;

        match self.open_cursor() {
            Open::Cursor(cursor) => {
                self.cursor = Some(cursor);
                self.state = StreamState::Iterating;
                Ok(())
            }
            // The resume attempt gets no second chance; either way its
            // failure is surfaced.
            Open::Resumable(err) | Open::Fatal(err) => Err(err),
        }
    }

    fn open_cursor(&self) -> Open {
        let command = PipelineBuilder::new(&self.namespace, &self.pipeline, &self.options)
            .resume_after(self.resume_token.current())
            .build();
        Cursor::open(
            Arc::clone(&self.client),
            &self.namespace,
            command,
            &self.read_preference,
            self.options.get_more_options(),
        )
    }

    /// Hand a raw change document to the caller, capturing its resume token.
    fn deliver(&mut self, document: Document) -> Result<ChangeStreamDocument> {
        // `_id` is the only field the shape requires, so a decode failure
        // means the caller's pipeline filtered the token out and resumption
        // is impossible.
        let event: ChangeStreamDocument =
            bson::from_document(document).map_err(|_| Error::MissingResumeToken)?;
        self.resume_token.delivered(&event.id);
        Ok(event)
    }
}

impl Iterator for ChangeStream {
    type Item = Result<ChangeStreamDocument>;

    /// Attempt to get the next document of the change stream.
    ///
    /// As with all iterators, `None` will be returned when the iterator is
    /// empty. However, this simply indicates that the server has no more
    /// changes at this point in time. You can keep the change stream object
    /// around and attempt to iterate on it again. More elements may become
    /// available in the future.
    ///
    /// An error variant will be present only if a non-recoverable error was
    /// encountered; it is then repeated on every subsequent call without
    /// further server contact. Recoverable errors are not visible to the
    /// consumer of the iterator.
    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            StreamState::Closed => return None,
            StreamState::Errored => return self.latched_error.clone().map(Err),
            _ => {}
        }
        match self.advance() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(err) => {
                self.state = StreamState::Errored;
                self.latched_error = Some(err.clone());
                Some(Err(err))
            }
        }
    }
}

/// The caller's pipeline must not provide its own change stream stage; the
/// stream prepends one.
fn validate_pipeline(pipeline: &[Document]) -> Result<()> {
    for stage in pipeline {
        if stage.contains_key("$changeStream") {
            return Err(Error::argument(
                "the $changeStream stage is prepended automatically and must not appear in the pipeline",
            ));
        }
    }
    Ok(())
}

//////////////////////////////////////////////////////////////////////////////////////////////////
// ChangeStreamDocument //////////////////////////////////////////////////////////////////////////

/// A single change notification.
#[derive(Clone, Debug, Deserialize)]
pub struct ChangeStreamDocument {
    /// The id functions as an opaque token for use when resuming an
    /// interrupted change stream.
    ///
    /// NB: if a caller-supplied pipeline filters this field out, the stream
    /// refuses to continue, since resuming it would be impossible.
    #[serde(rename = "_id")]
    pub id: Document,

    /// Describes the type of operation represented in this change notification.
    #[serde(rename = "operationType")]
    pub operation_type: Option<OperationType>,

    /// The database and collection name in which the change happened.
    pub ns: Option<Namespace>,

    /// Only present for ops of type `Insert`, `Update`, `Replace`, and `Delete`.
    ///
    /// For unsharded collections this contains a single field, `_id`, with the
    /// value of the `_id` of the document updated. For sharded collections,
    /// this will contain all the components of the shard key in order,
    /// followed by the `_id` if the `_id` isn't part of the shard key.
    #[serde(rename = "documentKey")]
    pub document_key: Option<Document>,

    /// Contains a description of updated and removed fields in this operation.
    ///
    /// Only present for ops of type `Update`.
    #[serde(rename = "updateDescription")]
    pub update_description: Option<UpdateDescription>,

    /// Always present for operations of type `Insert` and `Replace`. Also
    /// present for operations of type `Update` if the stream was opened with
    /// `fullDocument: updateLookup`.
    #[serde(rename = "fullDocument")]
    pub full_document: Option<Document>,
}

/// Change stream operation types which can appear in a change stream document.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Invalidate,
    Drop,
    DropDatabase,
    Rename,

    /// Used to make this enum future-proof. All variants are accounted for as of 4.0.
    #[serde(other)]
    Other,
}

/// Contains a description of updated and removed fields for a change stream event.
///
/// Only present for ops of type `Update`.
#[derive(Clone, Debug, Deserialize)]
pub struct UpdateDescription {
    /// A document containing key:value pairs of names of the fields that were
    /// changed, and the new value for those fields.
    #[serde(rename = "updatedFields")]
    pub updated_fields: Document,

    /// An array of field names that were removed from the document.
    #[serde(rename = "removedFields")]
    pub removed_fields: Vec<String>,
}

//////////////////////////////////////////////////////////////////////////////////////////////////
// ChangeStreamOptions ///////////////////////////////////////////////////////////////////////////

/// The set of options available when creating a change stream.
///
/// Immutable once a stream opens: a resumed aggregation replays these values
/// bit-for-bit, updating only the resume point.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(deny_unknown_fields)]
pub struct ChangeStreamOptions {
    /// How this change stream should handle partial updates.
    ///
    /// Defaults to `Default`. When set to `UpdateLookup`, the change
    /// notification for partial updates will include both a delta describing
    /// the changes to the document, as well as a copy of the entire document
    /// that was changed from some time after the change occurred.
    #[serde(rename = "fullDocument", default)]
    pub full_document: FullDocumentType,

    /// Specifies the logical starting point for the new change stream.
    #[serde(rename = "resumeAfter")]
    pub resume_after: Option<Document>,

    /// The maximum amount of time for the server to wait on new documents to
    /// satisfy a change stream query. Forwarded on `getMore` only.
    #[serde(rename = "maxAwaitTimeMS")]
    pub max_await_time_ms: Option<i64>,

    /// The number of documents to return per batch, applied to the opening
    /// aggregation and to every `getMore`.
    #[serde(rename = "batchSize")]
    pub batch_size: Option<i32>,

    /// Specifies a collation. Forwarded on the opening aggregation only.
    pub collation: Option<Document>,
}

impl ChangeStreamOptions {
    /// Parse options from a raw document, rejecting unknown keys.
    pub fn from_document(document: Document) -> Result<Self> {
        let options: ChangeStreamOptions = bson::from_document(document)
            .map_err(|err| Error::argument(format!("invalid change stream options: {}", err)))?;
        options.validate()?;
        Ok(options)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if matches!(self.batch_size, Some(batch_size) if batch_size < 0) {
            return Err(Error::argument("batchSize must be non-negative"));
        }
        if matches!(self.max_await_time_ms, Some(max) if max < 0) {
            return Err(Error::argument("maxAwaitTimeMS must be non-negative"));
        }
        Ok(())
    }

    pub(crate) fn get_more_options(&self) -> GetMoreOptions {
        GetMoreOptions {
            batch_size: self.batch_size,
            max_time_ms: self.max_await_time_ms,
        }
    }
}

/// The allowed variants for how to handle partial updates.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FullDocumentType {
    /// Include only the delta of changes to a document.
    #[default]
    Default,

    /// Include the delta of changes to a document as well as a full copy of the document.
    UpdateLookup,
}

impl FullDocumentType {
    pub(crate) fn as_str(&self) -> &'static str {
        match *self {
            FullDocumentType::Default => "default",
            FullDocumentType::UpdateLookup => "updateLookup",
        }
    }
}
