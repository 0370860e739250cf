//! Resume-token bookkeeping: the `_id` of the last delivered event.

use std::sync::Arc;

use bson::doc;
use mongodb_change_stream::{ChangeStreamOptions, Error};

use super::mock::{MockRunner, Observed, Script, PRIMARY};
use super::{
    aggregate_command_resuming_at, collection, cursor_reply, event, get_more_command, token,
};

#[test]
fn the_tracker_follows_every_delivered_event() {
    let runner = Arc::new(MockRunner::new(vec![cursor_reply(
        123,
        "firstBatch",
        vec![event(0), event(1)],
    )]));
    let coll = collection(&runner);
    let mut stream = coll.watch(None, None).unwrap();

    assert_eq!(stream.resume_token(), None);
    assert_eq!(stream.next().unwrap().unwrap().id, token(0));
    assert_eq!(stream.resume_token(), Some(token(0)));
    assert_eq!(stream.next().unwrap().unwrap().id, token(1));
    assert_eq!(stream.resume_token(), Some(token(1)));
    runner.take_observed();

    // The cursor dies externally; the stream must resume from the last
    // delivered token, then keep tracking on the replacement cursor.
    runner.extend(vec![
        Script::Reply(doc! { "code": 43, "errmsg": "cursor not found", "ok": 0 }),
        cursor_reply(124, "firstBatch", vec![event(2)]),
    ]);
    assert_eq!(stream.next().unwrap().unwrap().id, token(2));
    assert_eq!(stream.resume_token(), Some(token(2)));

    let observed = runner.take_observed();
    assert_eq!(
        observed,
        vec![
            Observed::Command {
                db: "db".to_owned(),
                body: get_more_command(123),
                mode: mongodb_change_stream::ReadMode::Primary,
                server: PRIMARY.to_owned(),
            },
            Observed::KillCursor {
                server: PRIMARY.to_owned(),
                coll: "coll".to_owned(),
                cursor_id: 123,
            },
            Observed::Command {
                db: "db".to_owned(),
                body: aggregate_command_resuming_at(token(1)),
                mode: mongodb_change_stream::ReadMode::Primary,
                server: PRIMARY.to_owned(),
            },
        ],
    );

    // Uneventful polls leave the token untouched.
    runner.extend(vec![cursor_reply(124, "nextBatch", vec![])]);
    assert!(stream.next().is_none());
    assert_eq!(stream.resume_token(), Some(token(2)));
}

#[test]
fn a_caller_supplied_resume_point_seeds_both_the_command_and_the_tracker() {
    let runner = Arc::new(MockRunner::new(vec![cursor_reply(
        123,
        "firstBatch",
        vec![event(10)],
    )]));
    let coll = collection(&runner);
    let options = ChangeStreamOptions::builder()
        .resume_after(token(9))
        .build();
    let mut stream = coll.watch(None, Some(options)).unwrap();

    assert_eq!(stream.resume_token(), Some(token(9)));
    assert_eq!(stream.next().unwrap().unwrap().id, token(10));
    assert_eq!(stream.resume_token(), Some(token(10)));

    assert_eq!(
        runner.command_bodies(),
        vec![aggregate_command_resuming_at(token(9))],
    );
}

#[test]
fn an_event_without_an_id_poisons_the_stream() {
    let runner = Arc::new(MockRunner::new(vec![cursor_reply(
        123,
        "firstBatch",
        vec![doc! { "operationType": "insert", "fullDocument": { "_id": 0 } }],
    )]));
    let coll = collection(&runner);
    let mut stream = coll
        .watch(Some(vec![doc! { "$project": { "_id": 0 } }]), None)
        .unwrap();

    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(err, Error::MissingResumeToken));
    assert!(err.to_string().contains("Cannot provide resume functionality"));
    assert!(stream.error_document().is_none());
    assert!(!stream.is_alive());
    runner.take_observed();

    // Latched: replayed without I/O.
    assert!(matches!(
        stream.next().unwrap().unwrap_err(),
        Error::MissingResumeToken
    ));
    assert_eq!(runner.take_observed(), vec![]);

    // The cursor itself was healthy and still gets released.
    drop(stream);
    assert_eq!(
        runner.take_observed(),
        vec![Observed::KillCursor {
            server: PRIMARY.to_owned(),
            coll: "coll".to_owned(),
            cursor_id: 123,
        }],
    );
}

#[test]
fn a_bad_event_does_not_clobber_the_token_of_a_delivered_one() {
    let runner = Arc::new(MockRunner::new(vec![cursor_reply(
        123,
        "firstBatch",
        vec![event(0), doc! { "operationType": "insert" }],
    )]));
    let coll = collection(&runner);
    let mut stream = coll.watch(None, None).unwrap();

    assert_eq!(stream.next().unwrap().unwrap().id, token(0));
    assert!(matches!(
        stream.next().unwrap().unwrap_err(),
        Error::MissingResumeToken
    ));
    // The token still marks the last event the caller actually saw.
    assert_eq!(stream.resume_token(), Some(token(0)));
}
