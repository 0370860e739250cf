//! A client-side handle to a collection.

use std::sync::Arc;

use bson::Document;

use crate::change_stream::{ChangeStream, ChangeStreamOptions};
use crate::client::CommandRunner;
use crate::common::{Namespace, ReadMode, ReadPreference};
use crate::error::Result;

/// Interfaces with a collection on a deployment reached through a
/// [`CommandRunner`].
pub struct Collection {
    client: Arc<dyn CommandRunner>,
    namespace: Namespace,

    /// Server-selection preference for reads issued through this handle.
    ///
    /// Mutable, but streams snapshot the value when they are opened: changing
    /// it later does not affect an already-open change stream.
    pub read_preference: ReadPreference,
}

impl Collection {
    /// Creates a collection representation with the default (primary) read
    /// preference.
    pub fn new(client: Arc<dyn CommandRunner>, namespace: Namespace) -> Collection {
        Collection::with_prefs(client, namespace, ReadPreference::new(ReadMode::Primary, None))
    }

    /// `new` with a custom read preference.
    pub fn with_prefs(
        client: Arc<dyn CommandRunner>,
        namespace: Namespace,
        read_preference: ReadPreference,
    ) -> Collection {
        Collection {
            client,
            namespace,
            read_preference,
        }
    }

    /// The namespace this handle is bound to.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Observe real-time changes on this collection.
    ///
    /// `pipeline` holds stages appended after the `$changeStream` stage the
    /// stream prepends. Options are validated here, without contacting the
    /// server; the cursor itself is established lazily on the first call to
    /// `next`.
    pub fn watch(
        &self,
        pipeline: Option<Vec<Document>>,
        options: Option<ChangeStreamOptions>,
    ) -> Result<ChangeStream> {
        ChangeStream::new(
            Arc::clone(&self.client),
            self.namespace.clone(),
            pipeline,
            options,
            self.read_preference.clone(),
        )
    }
}
