//! Asynchronous search sub-protocol.
//!
//! Slow providers answer a `Search` request immediately with a handle
//! object and run the actual search on a background worker; the client
//! polls with the handle until the worker flips the entry to done. Handles
//! live for the process lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use super::ObjectSource;
use crate::model::{ObjectClass, ProviderObject};
use crate::protocol::{SearchParams, objects_payload};

/// Stored results are deduplicated by title and bounded to this many.
pub const MAX_RESULTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Running,
    Done,
}

struct SearchEntry {
    status: Status,
    search_string: String,
    recursive: bool,
    results: Vec<ProviderObject>,
}

/// Handle registry shared between connection handlers and search workers.
#[derive(Clone, Default)]
pub struct SearchStore {
    entries: Arc<Mutex<HashMap<Uuid, SearchEntry>>>,
}

impl SearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve one `Search` request: issue a handle on the initial call, or
    /// report progress/results on a polling call.
    pub fn handle(&self, source: Arc<dyn ObjectSource>, params: &SearchParams) -> Value {
        if !source.supports_search() {
            return objects_payload(&[]);
        }
        match &params.search_handle {
            None => self.begin(source, params),
            Some(handle) => self.poll(handle),
        }
    }

    fn begin(&self, source: Arc<dyn ObjectSource>, params: &SearchParams) -> Value {
        let id = Uuid::new_v4();
        {
            let mut entries = self.lock();
            entries.insert(
                id,
                SearchEntry {
                    status: Status::Running,
                    search_string: params.search.clone(),
                    recursive: params.recursive,
                    results: Vec::new(),
                },
            );
        }

        let entries = Arc::clone(&self.entries);
        let term = params.search.clone();
        let recursive = params.recursive;
        // The worker may outlive the originating connection.
        std::thread::spawn(move || {
            let results = dedupe_and_cap(source.run_search(&term, recursive));
            tracing::debug!("search {id} finished with {} results", results.len());
            let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get_mut(&id) {
                entry.results = results;
                entry.status = Status::Done;
            }
        });

        let handle = ProviderObject::new(ObjectClass::LmodSearchHandle, id.to_string(), &params.search)
            .extra("search_string", params.search.clone())
            .extra("recursive", params.recursive);
        objects_payload(&[handle])
    }

    fn poll(&self, handle: &Value) -> Value {
        let id = handle
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        let Some(id) = id else {
            return objects_payload(&[]);
        };

        let entries = self.lock();
        let Some(entry) = entries.get(&id) else {
            return objects_payload(&[]);
        };
        match entry.status {
            Status::Running => objects_payload(&[progress(id, &entry.search_string, "ongoing", 0)]),
            Status::Done => {
                let mut objects =
                    vec![progress(id, &entry.search_string, "done", entry.results.len() as u64)];
                objects.extend(entry.results.iter().cloned());
                objects_payload(&objects)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SearchEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Progress marker sharing the handle id.
fn progress(id: Uuid, search_string: &str, state: &str, objects: u64) -> ProviderObject {
    ProviderObject::new(ObjectClass::LmodSearchProgress, id.to_string(), search_string)
        .count(objects)
        .extra("state", state)
}

fn dedupe_and_cap(results: Vec<ProviderObject>) -> Vec<ProviderObject> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|o| seen.insert(o.title.clone()))
        .take(MAX_RESULTS)
        .collect()
}
