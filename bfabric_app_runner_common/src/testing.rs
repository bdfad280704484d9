//! In-memory doubles for the LIMS, the SCP port and the command ports.
//!
//! All doubles can share one [`EventLog`], so tests can assert on the order
//! in which uploads, saves and commands happened.

use serde_json::Value;
use std::{cell::RefCell, rc::Rc};

use crate::client::{record_id, value_as_i64, EngineResponse, LimsEngine, QUERY_LIMIT};
use crate::commands::CommandPort;
use crate::prelude::*;
use crate::process::{CommandLine, ProcessOutput, ProcessRunner};
use crate::scp::ScpPort;
use crate::specs::commands::Command;

/// A shared, ordered log of everything our doubles saw.
pub type EventLog = Rc<RefCell<Vec<String>>>;

/// Create a new, empty event log.
pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(vec![]))
}

/// A request received by [`FakeLims`].
#[derive(Clone, Debug, PartialEq)]
pub enum LimsCall {
    Read {
        endpoint: String,
        query: Query,
        page: u32,
    },
    Save {
        endpoint: String,
        records: Vec<Record>,
    },
    Delete {
        endpoint: String,
        ids: Vec<i64>,
    },
}

#[derive(Debug, Default)]
struct FakeLimsState {
    tables: BTreeMap<String, Vec<Record>>,
    failing: BTreeMap<String, String>,
    calls: Vec<LimsCall>,
}

/// An in-memory LIMS with paging, list queries and id assignment.
#[derive(Clone)]
pub struct FakeLims {
    state: Rc<RefCell<FakeLimsState>>,
    events: EventLog,
}

impl FakeLims {
    pub fn new() -> FakeLims {
        FakeLims::with_events(event_log())
    }

    pub fn with_events(events: EventLog) -> FakeLims {
        FakeLims {
            state: Rc::new(RefCell::new(FakeLimsState::default())),
            events,
        }
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// Store a record. Its `classname` is filled in from `endpoint`.
    pub fn insert(&self, endpoint: &str, record: Value) {
        let mut record = match record {
            Value::Object(record) => record,
            other => panic!("not a record: {}", other),
        };
        record
            .entry("classname")
            .or_insert_with(|| Value::from(endpoint));
        self.state
            .borrow_mut()
            .tables
            .entry(endpoint.to_owned())
            .or_default()
            .push(record);
    }

    /// All records stored for `endpoint`.
    pub fn records(&self, endpoint: &str) -> Vec<Record> {
        self.state
            .borrow()
            .tables
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every request to `endpoint` return an error report.
    pub fn fail_endpoint(&self, endpoint: &str, message: &str) {
        self.state
            .borrow_mut()
            .failing
            .insert(endpoint.to_owned(), message.to_owned());
    }

    pub fn calls(&self) -> Vec<LimsCall> {
        self.state.borrow().calls.clone()
    }

    /// The records passed to every save on `endpoint`, in order.
    pub fn saved(&self, endpoint: &str) -> Vec<Record> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LimsCall::Save {
                    endpoint: e,
                    records,
                } if e == endpoint => Some(records),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn client(&self) -> Client {
        Client::new(Box::new(self.clone()))
    }

    pub fn lims(&self) -> Lims {
        Lims::new(self.client())
    }

    fn failure(&self, endpoint: &str) -> Option<EngineResponse> {
        let state = self.state.borrow();
        state.failing.get(endpoint).map(|message| EngineResponse {
            records: vec![],
            number_of_pages: 0,
            errors: vec![message.clone()],
        })
    }
}

impl LimsEngine for FakeLims {
    fn read(&self, endpoint: &str, query: &Query, page: u32, id_only: bool) -> Result<EngineResponse> {
        self.events.borrow_mut().push(format!("lims.read {}", endpoint));
        self.state.borrow_mut().calls.push(LimsCall::Read {
            endpoint: endpoint.to_owned(),
            query: query.clone(),
            page,
        });
        if let Some(failure) = self.failure(endpoint) {
            return Ok(failure);
        }

        let matching = self
            .records(endpoint)
            .into_iter()
            .filter(|record| record_matches(record, query))
            .collect::<Vec<_>>();
        let number_of_pages = ((matching.len() + QUERY_LIMIT - 1) / QUERY_LIMIT) as u32;
        let records = matching
            .into_iter()
            .skip((page.max(1) as usize - 1) * QUERY_LIMIT)
            .take(QUERY_LIMIT)
            .map(|record| {
                if id_only {
                    let mut only = Record::new();
                    only.insert("id".to_owned(), record["id"].clone());
                    only
                } else {
                    record
                }
            })
            .collect();
        Ok(EngineResponse {
            records,
            number_of_pages,
            errors: vec![],
        })
    }

    fn save(&self, endpoint: &str, records: &[Record]) -> Result<EngineResponse> {
        let ids = records
            .iter()
            .map(|r| record_id(r).map(|id| id.to_string()).unwrap_or_else(|| "new".to_owned()))
            .collect::<Vec<_>>();
        self.events
            .borrow_mut()
            .push(format!("lims.save {} {}", endpoint, ids.join(",")));
        self.state.borrow_mut().calls.push(LimsCall::Save {
            endpoint: endpoint.to_owned(),
            records: records.to_vec(),
        });
        if let Some(failure) = self.failure(endpoint) {
            return Ok(failure);
        }

        let mut state = self.state.borrow_mut();
        let table = state.tables.entry(endpoint.to_owned()).or_default();
        let mut saved = vec![];
        for record in records {
            let existing = record_id(record)
                .and_then(|id| table.iter().position(|r| record_id(r) == Some(id)));
            match existing {
                Some(idx) => {
                    for (key, value) in record {
                        table[idx].insert(key.clone(), value.clone());
                    }
                    saved.push(table[idx].clone());
                }
                None => {
                    let mut record = record.clone();
                    if record_id(&record).is_none() {
                        let next = table.iter().filter_map(record_id).max().unwrap_or(0) + 1;
                        record.insert("id".to_owned(), Value::from(next));
                    }
                    record
                        .entry("classname")
                        .or_insert_with(|| Value::from(endpoint));
                    table.push(record.clone());
                    saved.push(record);
                }
            }
        }
        Ok(EngineResponse {
            number_of_pages: 1,
            records: saved,
            errors: vec![],
        })
    }

    fn delete(&self, endpoint: &str, ids: &[i64]) -> Result<EngineResponse> {
        self.events.borrow_mut().push(format!("lims.delete {}", endpoint));
        self.state.borrow_mut().calls.push(LimsCall::Delete {
            endpoint: endpoint.to_owned(),
            ids: ids.to_vec(),
        });
        if let Some(failure) = self.failure(endpoint) {
            return Ok(failure);
        }
        let mut state = self.state.borrow_mut();
        let table = state.tables.entry(endpoint.to_owned()).or_default();
        table.retain(|r| !record_id(r).map_or(false, |id| ids.contains(&id)));
        Ok(EngineResponse::default())
    }
}

/// Does `record` match every field of `query`? A query key `fooid` also
/// matches the `id` of a `foo` relationship.
fn record_matches(record: &Record, query: &Query) -> bool {
    query.iter().all(|(key, wanted)| {
        let actual = record.get(key).cloned().or_else(|| {
            key.strip_suffix("id")
                .and_then(|rel| record.get(rel))
                .and_then(|rel| rel.get("id").cloned())
        });
        let actual = match actual {
            Some(actual) => actual,
            None => return false,
        };
        match wanted {
            Value::Array(options) => options.iter().any(|option| values_equal(&actual, option)),
            other => values_equal(&actual, other),
        }
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (value_as_i64(a), value_as_i64(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Records every SCP call. Downloads of registered remote files write their
/// content to the local target.
#[derive(Clone)]
pub struct RecordingScp {
    events: EventLog,
    calls: Rc<RefCell<Vec<(String, String)>>>,
    remote_files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
}

impl RecordingScp {
    pub fn new(events: EventLog) -> RecordingScp {
        RecordingScp {
            events,
            calls: Rc::new(RefCell::new(vec![])),
            remote_files: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Make `host:path` downloadable with the given content.
    pub fn add_remote_file(&self, remote: &str, content: &[u8]) {
        self.remote_files
            .borrow_mut()
            .insert(remote.to_owned(), content.to_vec());
    }

    /// All `(source, target)` pairs copied so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl ScpPort for RecordingScp {
    fn scp(&self, source: &str, target: &str, user: Option<&str>, mkdir: bool) -> Result<()> {
        let _ = (user, mkdir);
        self.events
            .borrow_mut()
            .push(format!("scp {} {}", source, target));
        self.calls
            .borrow_mut()
            .push((source.to_owned(), target.to_owned()));
        if let Some(content) = self.remote_files.borrow().get(source) {
            let target = Path::new(target);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, content)?;
        } else if crate::scp::is_remote(source) {
            return Err(RunnerError::Command {
                command: vec!["scp".to_owned(), source.to_owned(), target.to_owned()],
                status: "exit status 1: No such file or directory".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// Records every program run, exiting with configurable codes.
#[derive(Clone)]
pub struct RecordingRunner {
    events: EventLog,
    calls: Rc<RefCell<Vec<CommandLine>>>,
    exit_codes: Rc<RefCell<BTreeMap<String, i32>>>,
}

impl RecordingRunner {
    pub fn new(events: EventLog) -> RecordingRunner {
        RecordingRunner {
            events,
            calls: Rc::new(RefCell::new(vec![])),
            exit_codes: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Make every run of `program` exit with `code`.
    pub fn exit_with(&self, program: &str, code: i32) {
        self.exit_codes
            .borrow_mut()
            .insert(program.to_owned(), code);
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.borrow().clone()
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, cmd: &CommandLine) -> Result<ProcessOutput> {
        self.events.borrow_mut().push(format!("run {}", cmd.display()));
        self.calls.borrow_mut().push(cmd.clone());
        let code = self
            .exit_codes
            .borrow()
            .get(&cmd.program)
            .copied()
            .unwrap_or(0);
        Ok(ProcessOutput {
            code: Some(code),
            ..ProcessOutput::default()
        })
    }
}

/// A hook simulating what an application command does to the disk.
pub type CommandHook = Box<dyn Fn(&Command, &[String]) -> Result<()>>;

/// Records every application command, optionally running a hook.
#[derive(Clone)]
pub struct RecordingCommands {
    events: EventLog,
    calls: Rc<RefCell<Vec<Vec<String>>>>,
    hook: Rc<RefCell<Option<CommandHook>>>,
}

impl RecordingCommands {
    pub fn new(events: EventLog) -> RecordingCommands {
        RecordingCommands {
            events,
            calls: Rc::new(RefCell::new(vec![])),
            hook: Rc::new(RefCell::new(None)),
        }
    }

    pub fn on_run(&self, hook: CommandHook) {
        *self.hook.borrow_mut() = Some(hook);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl CommandPort for RecordingCommands {
    fn run(&self, command: &Command, args: &[String]) -> Result<()> {
        let mut argv = command.argv_for_display();
        argv.extend(args.iter().cloned());
        self.events
            .borrow_mut()
            .push(format!("command {}", argv.join(" ")));
        self.calls.borrow_mut().push(argv);
        if let Some(hook) = self.hook.borrow().as_ref() {
            hook(command, args)?;
        }
        Ok(())
    }
}
