//! A scripted `CommandRunner` standing in for a live deployment.

use std::collections::VecDeque;
use std::sync::Mutex;

use bson::Document;
use mongodb_change_stream::{
    CommandOutcome, CommandRunner, Namespace, ReadMode, ReadPreference, ServerId,
    TransportErrorKind,
};

pub const PRIMARY: &str = "primary.example.com:27017";
pub const SECONDARY: &str = "secondary.example.com:27017";

/// One scripted response, consumed in order.
pub enum Script {
    /// Reply from whichever server the command's read preference selects.
    Reply(Document),
    /// Fail at the transport layer instead of replying.
    Transport(TransportErrorKind),
}

/// Everything the mock observed, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Observed {
    Command {
        db: String,
        body: Document,
        mode: ReadMode,
        server: String,
    },
    KillCursor {
        server: String,
        coll: String,
        cursor_id: i64,
    },
}

pub struct MockRunner {
    script: Mutex<VecDeque<Script>>,
    observed: Mutex<Vec<Observed>>,
}

impl MockRunner {
    pub fn new(script: Vec<Script>) -> MockRunner {
        MockRunner {
            script: Mutex::new(script.into()),
            observed: Mutex::new(Vec::new()),
        }
    }

    /// Append further scripted responses mid-test.
    pub fn extend(&self, script: Vec<Script>) {
        self.script.lock().unwrap().extend(script);
    }

    /// Everything observed since the last call, oldest first.
    pub fn take_observed(&self) -> Vec<Observed> {
        std::mem::take(&mut *self.observed.lock().unwrap())
    }

    /// The bodies of all observed commands since the last `take_observed`,
    /// ignoring kills.
    pub fn command_bodies(&self) -> Vec<Document> {
        self.observed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|observed| match observed {
                Observed::Command { body, .. } => Some(body.clone()),
                Observed::KillCursor { .. } => None,
            })
            .collect()
    }
}

/// The mock's stand-in for server selection.
fn select_server(read_preference: &ReadPreference) -> &'static str {
    match read_preference.mode {
        ReadMode::Secondary | ReadMode::SecondaryPreferred => SECONDARY,
        _ => PRIMARY,
    }
}

impl CommandRunner for MockRunner {
    fn run_command(
        &self,
        db: &str,
        command: Document,
        read_preference: &ReadPreference,
    ) -> CommandOutcome {
        let server = select_server(read_preference);
        self.observed.lock().unwrap().push(Observed::Command {
            db: db.to_owned(),
            body: command.clone(),
            mode: read_preference.mode,
            server: server.to_owned(),
        });
        match self.script.lock().unwrap().pop_front() {
            Some(Script::Reply(document)) => CommandOutcome::Reply {
                server: ServerId::new(server),
                document,
            },
            Some(Script::Transport(kind)) => CommandOutcome::Transport(kind),
            None => panic!("unscripted command issued: {}", command),
        }
    }

    fn kill_cursor(&self, server: &ServerId, namespace: &Namespace, cursor_id: i64) {
        self.observed.lock().unwrap().push(Observed::KillCursor {
            server: server.as_str().to_owned(),
            coll: namespace.coll.clone(),
            cursor_id,
        });
    }
}
