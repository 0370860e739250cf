//! Option validation happens at construction, before any server contact.

use std::sync::Arc;

use bson::doc;
use mongodb_change_stream::{ChangeStreamOptions, Error, FullDocumentType};

use super::mock::MockRunner;
use super::{collection, cursor_reply};

#[test]
fn invalid_options_fail_watch_without_touching_the_server() {
    let runner = Arc::new(MockRunner::new(vec![]));
    let coll = collection(&runner);

    let negative_batch = ChangeStreamOptions::builder().batch_size(-1).build();
    assert!(matches!(
        coll.watch(None, Some(negative_batch)),
        Err(Error::Argument { .. })
    ));

    let negative_wait = ChangeStreamOptions::builder()
        .max_await_time_ms(-5i64)
        .build();
    assert!(matches!(
        coll.watch(None, Some(negative_wait)),
        Err(Error::Argument { .. })
    ));

    assert!(matches!(
        coll.watch(Some(vec![doc! { "$changeStream": {} }]), None),
        Err(Error::Argument { .. })
    ));

    assert_eq!(runner.take_observed(), vec![]);
}

#[test]
fn options_parsed_from_a_raw_document_drive_the_wire_shape() {
    let runner = Arc::new(MockRunner::new(vec![cursor_reply(
        123,
        "firstBatch",
        vec![],
    )]));
    let coll = collection(&runner);

    let options = ChangeStreamOptions::from_document(doc! {
        "fullDocument": "updateLookup",
        "batchSize": 2,
    })
    .unwrap();
    assert_eq!(options.full_document, FullDocumentType::UpdateLookup);

    let mut stream = coll.watch(None, Some(options)).unwrap();
    runner.extend(vec![cursor_reply(123, "nextBatch", vec![])]);
    assert!(stream.next().is_none());

    assert_eq!(
        runner.command_bodies(),
        vec![
            doc! {
                "aggregate": "coll",
                "pipeline": [ { "$changeStream": { "fullDocument": "updateLookup" } } ],
                "cursor": { "batchSize": 2 },
            },
            doc! { "getMore": 123i64, "collection": "coll", "batchSize": 2 },
        ],
    );
}

#[test]
fn unknown_keys_in_a_raw_options_document_are_an_argument_error() {
    let err = ChangeStreamOptions::from_document(doc! {
        "fullDocument": "default",
        "allChangesForCluster": true,
    })
    .unwrap_err();
    assert!(matches!(err, Error::Argument { .. }));
}
