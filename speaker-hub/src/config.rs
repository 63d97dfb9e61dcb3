use orchestrator_core::ExecutorConfig;
use serde::Deserialize;
use std::fs::read_to_string;
use std::time::Duration;
use stable_eyre::eyre::{Report, WrapErr};

const CONFIG_FILENAME: &str = "speaker_hub.toml";
const RESERVED_CONTROLLER_ENV_VAR: &str = "SPEAKER_HUB_RESERVED_CONTROLLER";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothConfig,
    pub audio: AudioConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Config, Report> {
        let contents = read_to_string(path).wrap_err_with(|| format!("reading {path}"))?;
        let mut config: Config = toml::from_str(&contents).wrap_err_with(|| format!("parsing {path}"))?;
        if let Ok(reserved) = std::env::var(RESERVED_CONTROLLER_ENV_VAR) {
            config.bluetooth.reserved_controller = reserved;
        }
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        CONFIG_FILENAME
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            wait_timeout: Duration::from_secs(self.bluetooth.wait_timeout_secs),
            scan_settle: Duration::from_secs(self.bluetooth.scan_settle_secs),
            pair_settle: Duration::from_secs(self.bluetooth.pair_settle_secs),
            post_connect_settle: Duration::from_secs(self.bluetooth.post_connect_settle_secs),
            disconnect_settle: Duration::from_millis(self.bluetooth.disconnect_settle_millis),
            audio_ready_timeout: Duration::from_secs(self.audio.ready_timeout_secs),
            virtual_sink_name: self.audio.virtual_sink_name.clone(),
            default_latency_ms: self.audio.default_latency_ms,
            suspend_module_name: self.audio.suspend_module_name.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// MAC or `hciN` name of the controller reserved for the BLE control channel. Overridable by
    /// `SPEAKER_HUB_RESERVED_CONTROLLER`, matching the source's "supplied via environment"
    /// contract (§6).
    pub reserved_controller: String,
    pub wait_timeout_secs: u64,
    pub scan_settle_secs: u64,
    pub pair_settle_secs: u64,
    pub post_connect_settle_secs: u64,
    pub disconnect_settle_millis: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        BluetoothConfig {
            reserved_controller: String::new(),
            wait_timeout_secs: 30,
            scan_settle_secs: 2,
            pair_settle_secs: 5,
            post_connect_settle_secs: 3,
            disconnect_settle_millis: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub virtual_sink_name: String,
    pub default_latency_ms: u32,
    pub suspend_module_name: String,
    pub ready_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            virtual_sink_name: "virtual_out".to_owned(),
            default_latency_ms: 100,
            suspend_module_name: "module-suspend-on-idle".to_owned(),
            ready_timeout_secs: 20,
        }
    }
}
