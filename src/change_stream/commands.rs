//! Construction of the wire commands a change stream issues.

use bson::{doc, Bson, Document};

use crate::common::Namespace;

use super::ChangeStreamOptions;

/// The option bag forwarded on every `getMore`, split out of the full option
/// set at stream construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct GetMoreOptions {
    pub(crate) batch_size: Option<i32>,
    pub(crate) max_time_ms: Option<i64>,
}

/// Builds the `aggregate` command that opens (or re-opens) a change stream.
///
/// The `$changeStream` stage is always the first pipeline stage. The
/// `pipeline` and `options` must be the unmodified values captured when the
/// stream was first built, so that an automatic resume differs from the
/// initial command only in the stage's `resumeAfter` field.
pub(crate) struct PipelineBuilder<'a> {
    namespace: &'a Namespace,
    pipeline: &'a [Document],
    options: &'a ChangeStreamOptions,
    resume_after: Option<&'a Document>,
}

impl<'a> PipelineBuilder<'a> {
    pub(crate) fn new(
        namespace: &'a Namespace,
        pipeline: &'a [Document],
        options: &'a ChangeStreamOptions,
    ) -> Self {
        PipelineBuilder {
            namespace,
            pipeline,
            options,
            resume_after: None,
        }
    }

    /// Set the token to resume from, overriding any `resumeAfter` the caller
    /// supplied in the original options.
    pub(crate) fn resume_after(mut self, token: Option<&'a Document>) -> Self {
        self.resume_after = token;
        self
    }

    pub(crate) fn build(self) -> Document {
        let mut stage = doc! { "fullDocument": self.options.full_document.as_str() };
        if let Some(token) = self.resume_after.or(self.options.resume_after.as_ref()) {
            stage.insert("resumeAfter", token.clone());
        }

        let mut pipeline = vec![Bson::from(doc! { "$changeStream": stage })];
        pipeline.extend(self.pipeline.iter().cloned().map(Bson::from));

        // `maxAwaitTimeMS` is deliberately absent here; the server only
        // honors it on `getMore`.
        let mut cursor = Document::new();
        if let Some(batch_size) = self.options.batch_size {
            cursor.insert("batchSize", batch_size);
        }

        let mut command = doc! {
            "aggregate": self.namespace.coll.clone(),
            "pipeline": pipeline,
            "cursor": cursor,
        };
        if let Some(collation) = self.options.collation.as_ref() {
            command.insert("collation", collation.clone());
        }
        command
    }
}

/// Builds the `getMore` command that pulls the next batch from a live cursor.
pub(crate) fn build_get_more(
    cursor_id: i64,
    namespace: &Namespace,
    options: &GetMoreOptions,
) -> Document {
    let mut command = doc! {
        "getMore": cursor_id,
        "collection": namespace.coll.clone(),
    };
    if let Some(batch_size) = options.batch_size {
        command.insert("batchSize", batch_size);
    }
    if let Some(max_time_ms) = options.max_time_ms {
        command.insert("maxTimeMS", max_time_ms);
    }
    command
}
