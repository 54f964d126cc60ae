// SPDX-License-Identifier: PMPL-1.0-or-later
//
// DocVault Write-Ahead Log - Actions and the decoder registry
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// An action is a persistable side effect. The log never stores live action
// objects: it stores an `ActionRecord` (name, version, payload) and rebuilds
// the action through an explicit dispatch table when it is time to run it,
// whether that is seconds later in the same process or after a restart.
//
// Actions MUST be idempotent. The log runs them at least once: recovery
// re-applies the COMMIT actions of every completed transaction still in the
// log, and the distributed sweeper retries rollbacks that partially failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entry::ActionRecord;
use crate::error::{ActionError, WalError, WalResult};

/// A compensating or finalizing side effect.
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    /// Registry name used to find the decoder, e.g. `"fs.restore"`.
    fn name(&self) -> &'static str;

    /// Payload format version.
    fn version(&self) -> u16 {
        1
    }

    /// Encode the state needed to rebuild this action.
    fn payload(&self) -> WalResult<Vec<u8>>;

    /// Perform the side effect. Must be safe to repeat.
    async fn run(&self) -> Result<(), ActionError>;

    /// The record written to the log for this action.
    fn to_record(&self) -> WalResult<ActionRecord> {
        Ok(ActionRecord {
            name: self.name().to_string(),
            version: self.version(),
            payload: self.payload()?,
        })
    }
}

/// Rebuilds an action from a payload of a given version.
pub type ActionDecoder =
    Arc<dyn Fn(u16, &[u8]) -> WalResult<Arc<dyn Action>> + Send + Sync + 'static>;

/// Dispatch table from action name to decoder.
///
/// Storage backends register their actions before the log is opened, since
/// opening a file-backed log runs recovery and needs every decoder.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    decoders: HashMap<String, ActionDecoder>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the decoder for `name`.
    pub fn register<F>(&mut self, name: &str, decoder: F)
    where
        F: Fn(u16, &[u8]) -> WalResult<Arc<dyn Action>> + Send + Sync + 'static,
    {
        self.decoders.insert(name.to_string(), Arc::new(decoder));
    }

    /// Register a JSON-payload action whose only supported version is 1.
    ///
    /// `build` turns the decoded payload into the live action; it is where
    /// a backend injects handles that are not part of the payload.
    pub fn register_json<P, F>(&mut self, name: &'static str, build: F)
    where
        P: DeserializeOwned,
        F: Fn(P) -> Arc<dyn Action> + Send + Sync + 'static,
    {
        self.register(name, move |version, payload| {
            if version != 1 {
                return Err(WalError::UnsupportedActionVersion {
                    name: name.to_string(),
                    version,
                });
            }
            let decoded: P = serde_json::from_slice(payload)?;
            Ok(build(decoded))
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Rebuild the live action described by `record`.
    pub fn decode(&self, record: &ActionRecord) -> WalResult<Arc<dyn Action>> {
        let decoder = self
            .decoders
            .get(&record.name)
            .ok_or_else(|| WalError::UnknownAction(record.name.clone()))?;
        decoder(record.version, &record.payload)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}

/// Encode a serde payload the way [`ActionRegistry::register_json`] decodes it.
pub fn json_payload<P: Serialize>(payload: &P) -> WalResult<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording actions shared by the log tests.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;

    /// Shared journal of which recorded actions ran, in order.
    #[derive(Debug, Default)]
    pub struct Journal {
        pub ran: Mutex<Vec<String>>,
        /// Label -> number of failures still to inject.
        pub failures: Mutex<HashMap<String, u32>>,
        pub invocations: AtomicU32,
    }

    impl Journal {
        pub fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }

        pub fn fail_next(&self, label: &str, times: u32) {
            self.failures.lock().unwrap().insert(label.to_string(), times);
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RecordPayload {
        pub label: String,
    }

    /// Appends its label to the journal when run.
    #[derive(Debug)]
    pub struct RecordAction {
        pub label: String,
        pub journal: Arc<Journal>,
    }

    #[async_trait]
    impl Action for RecordAction {
        fn name(&self) -> &'static str {
            "test.record"
        }

        fn payload(&self) -> WalResult<Vec<u8>> {
            json_payload(&RecordPayload {
                label: self.label.clone(),
            })
        }

        async fn run(&self) -> Result<(), ActionError> {
            self.journal.invocations.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.journal.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(&self.label) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(ActionError::Backend(format!(
                            "injected failure for {}",
                            self.label
                        )));
                    }
                }
            }
            self.journal.ran.lock().unwrap().push(self.label.clone());
            Ok(())
        }
    }

    pub fn registry(journal: &Arc<Journal>) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        let journal = Arc::clone(journal);
        registry.register_json("test.record", move |p: RecordPayload| {
            Arc::new(RecordAction {
                label: p.label,
                journal: Arc::clone(&journal),
            }) as Arc<dyn Action>
        });
        registry
    }

    pub fn record(label: &str, journal: &Arc<Journal>) -> RecordAction {
        RecordAction {
            label: label.to_string(),
            journal: Arc::clone(journal),
        }
    }
}
