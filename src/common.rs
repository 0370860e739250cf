//! Library-wide utilities.

use std::collections::BTreeMap;
use std::fmt;

use bson::{doc, Bson, Document};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Indicates how a server should be selected during read operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadMode {
    fn as_str(&self) -> &'static str {
        match *self {
            ReadMode::Primary => "primary",
            ReadMode::PrimaryPreferred => "primaryPreferred",
            ReadMode::Secondary => "secondary",
            ReadMode::SecondaryPreferred => "secondaryPreferred",
            ReadMode::Nearest => "nearest",
        }
    }
}

/// Indicates how to select the server for an operation.
///
/// A change stream captures the preference it was opened with and reuses it
/// verbatim when it re-establishes its cursor, so a stream started against a
/// secondary stays on secondaries across resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPreference {
    /// Indicates how a server should be selected during read operations.
    pub mode: ReadMode,
    /// Filters servers based on the first tag set that matches at least one server.
    pub tag_sets: Vec<BTreeMap<String, String>>,
}

impl ReadPreference {
    pub fn new(mode: ReadMode, tag_sets: Option<Vec<BTreeMap<String, String>>>) -> ReadPreference {
        ReadPreference {
            mode,
            tag_sets: tag_sets.unwrap_or_else(Vec::new),
        }
    }

    /// The `$readPreference` body a client attaches when forwarding a command.
    pub fn to_document(&self) -> Document {
        let mut document = doc! { "mode": self.mode.as_str() };
        if !self.tag_sets.is_empty() {
            let tag_sets: Vec<_> = self
                .tag_sets
                .iter()
                .map(|map| {
                    let tags: Document = map
                        .iter()
                        .map(|(key, val)| (key.clone(), Bson::String(val.clone())))
                        .collect();
                    Bson::Document(tags)
                })
                .collect();
            document.insert("tags", tag_sets);
        }
        document
    }
}

/// The database and collection a cursor lives on.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    /// The database name.
    pub db: String,
    /// The collection name.
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Namespace {
        Namespace {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parse the `cursor.ns` field of a server reply.
    pub(crate) fn from_reply_str(ns: &str) -> Result<Namespace> {
        match ns.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => {
                Ok(Namespace::new(db, coll))
            }
            _ => Err(Error::invalid_response(format!(
                "malformed cursor namespace '{}'",
                ns
            ))),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}
