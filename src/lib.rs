//! A resumable change stream engine for MongoDB deployments.
//!
//! This crate implements the client half of MongoDB change streams: it turns
//! a collection binding and an aggregation pipeline into a pull iterator of
//! change notifications, tracking resume tokens across batches and
//! transparently re-establishing the server-side cursor after recoverable
//! failures.
//!
//! The wire transport is not part of this crate. Commands are issued through
//! the [`client::CommandRunner`] trait; any client able to run a command
//! against a deployment and fire a best-effort `killCursors` can host a
//! change stream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongodb_change_stream::{Collection, CommandRunner, Namespace};
//!
//! fn watch(client: Arc<dyn CommandRunner>) -> mongodb_change_stream::Result<()> {
//!     let coll = Collection::new(client, Namespace::new("db", "coll"));
//!     let mut stream = coll.watch(None, None)?;
//!     while let Some(event) = stream.next().transpose()? {
//!         println!("{:?}: {:?}", event.operation_type, event.full_document);
//!     }
//!     Ok(())
//! }
//! ```

pub mod change_stream;
pub mod client;
pub mod coll;
pub mod common;
mod cursor;
pub mod error;

pub use crate::change_stream::{
    ChangeStream, ChangeStreamDocument, ChangeStreamOptions, FullDocumentType, OperationType,
    UpdateDescription,
};
pub use crate::client::{CommandOutcome, CommandRunner, ServerId, TransportErrorKind};
pub use crate::coll::Collection;
pub use crate::common::{Namespace, ReadMode, ReadPreference};
pub use crate::error::{CommandError, Error, Result};
