use std::fmt;

/// A loaded module's index, as assigned by the audio server at load time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse playback state of a sink, as returned by [`crate::AudioControl::list_sinks`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SinkState {
    Running,
    Idle,
    Suspended,
    Unknown,
}

/// A sink known to the audio server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SinkInfo {
    pub name: String,
    pub state: SinkState,
}

/// A loaded module known to the audio server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub argument: String,
}
