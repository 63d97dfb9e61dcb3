//! An in-memory [`AudioControl`] double for testing the Executor in `orchestrator-core` without
//! a real PulseAudio-class server.
use crate::{AudioControl, AudioError, ModuleId, ModuleInfo, SinkInfo, SinkState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct FakeState {
    next_id: u32,
    modules: HashMap<ModuleId, ModuleInfo>,
    sinks: HashMap<String, SinkState>,
    volumes: HashMap<String, u8>,
    /// Argument strings that always fail to load, to simulate scenario 5's audio-degraded path.
    never_loads: HashSet<String>,
    ping_ok: bool,
}

/// A fake audio server: a table of loaded modules and known sinks that the fake verbs mutate the
/// way the real server would, plus hooks to simulate a down or unresponsive server.
pub struct FakeAudioControl {
    state: Mutex<FakeState>,
}

impl FakeAudioControl {
    pub fn new() -> Self {
        FakeAudioControl {
            state: Mutex::new(FakeState {
                next_id: 1,
                modules: HashMap::new(),
                sinks: HashMap::new(),
                volumes: HashMap::new(),
                never_loads: HashSet::new(),
                ping_ok: true,
            }),
        }
    }

    /// Seed a sink as already known to the server, as if a speaker were already connected.
    pub fn with_sink(self, name: &str, state: SinkState) -> Self {
        self.state.lock().unwrap().sinks.insert(name.to_owned(), state);
        self
    }

    /// Mark a module load argument string as one that will never succeed, to simulate a server
    /// that rejects loading a given loopback or null sink.
    pub fn never_loads(self, argument_substring: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .never_loads
            .insert(argument_substring.to_owned());
        self
    }

    /// Make [`AudioControl::ping`] report the server as unresponsive.
    pub fn set_unresponsive(&self) {
        self.state.lock().unwrap().ping_ok = false;
    }
}

impl Default for FakeAudioControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioControl for FakeAudioControl {
    async fn load_null_sink(&self, name: &str) -> Result<ModuleId, AudioError> {
        let argument = format!("sink_name={name}");
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .modules
            .values()
            .find(|m| m.name == "module-null-sink" && m.argument == argument)
        {
            return Ok(existing.id);
        }
        let id = ModuleId(state.next_id);
        state.next_id += 1;
        state.modules.insert(
            id,
            ModuleInfo {
                id,
                name: "module-null-sink".to_owned(),
                argument: argument.clone(),
            },
        );
        state.sinks.insert(name.to_owned(), SinkState::Running);
        Ok(id)
    }

    async fn load_loopback(
        &self,
        source_monitor: &str,
        sink_name: &str,
        latency_ms: u32,
    ) -> Result<ModuleId, AudioError> {
        let argument = format!("source={source_monitor} sink={sink_name} latency_msec={latency_ms}");
        {
            let state = self.state.lock().unwrap();
            if state.never_loads.iter().any(|bad| argument.contains(bad)) {
                return Err(AudioError::LoopbackLoadFailed {
                    attempts: crate::LOOPBACK_RETRY_ATTEMPTS,
                });
            }
        }
        let mut state = self.state.lock().unwrap();
        let id = ModuleId(state.next_id);
        state.next_id += 1;
        state.modules.insert(
            id,
            ModuleInfo {
                id,
                name: "module-loopback".to_owned(),
                argument,
            },
        );
        Ok(id)
    }

    async fn unload_module(&self, module_id: ModuleId) -> Result<(), AudioError> {
        let mut state = self.state.lock().unwrap();
        state
            .modules
            .remove(&module_id)
            .map(|_| ())
            .ok_or(AudioError::NoSuchModule(module_id))
    }

    async fn list_sinks(&self) -> Result<Vec<SinkInfo>, AudioError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sinks
            .iter()
            .map(|(name, state)| SinkInfo {
                name: name.clone(),
                state: *state,
            })
            .collect())
    }

    async fn list_modules(&self) -> Result<Vec<ModuleInfo>, AudioError> {
        Ok(self.state.lock().unwrap().modules.values().cloned().collect())
    }

    async fn unsuspend_sink(&self, name: &str) -> Result<(), AudioError> {
        let mut state = self.state.lock().unwrap();
        state.sinks.insert(name.to_owned(), SinkState::Idle);
        Ok(())
    }

    async fn unload_all_matching(&self, name: &str) -> Result<usize, AudioError> {
        let mut state = self.state.lock().unwrap();
        let matching: Vec<ModuleId> = state
            .modules
            .values()
            .filter(|m| m.name == name)
            .map(|m| m.id)
            .collect();
        for id in &matching {
            state.modules.remove(id);
        }
        Ok(matching.len())
    }

    async fn ping(&self) -> Result<bool, AudioError> {
        Ok(self.state.lock().unwrap().ping_ok)
    }

    async fn set_sink_volume(&self, sink_name: &str, volume_percent: u8) -> Result<(), AudioError> {
        let mut state = self.state.lock().unwrap();
        if !state.sinks.contains_key(sink_name) {
            return Err(AudioError::OperationFailed(format!(
                "no such sink: {sink_name}"
            )));
        }
        state.volumes.insert(sink_name.to_owned(), volume_percent);
        Ok(())
    }
}
