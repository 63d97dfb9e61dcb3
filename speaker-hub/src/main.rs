mod config;

use crate::config::Config;
use audio_control::pulse::PulseAudioControl;
use bluez_control::{BlueZSession, MacAddress};
use orchestrator_core::{Configuration, Orchestrator, Target, TargetRole};
use serde::Deserialize;
use stable_eyre::eyre::{self, WrapErr};
use std::collections::HashMap;
use std::io::Read;
use std::process::ExitCode;
use tokio::try_join;

/// The configuration the BLE layer hands us on each apply/teardown call (§6). MACs arrive as
/// strings, keyed by a human-readable name, with optional per-speaker settings.
#[derive(Debug, Deserialize)]
struct ConfigurationInput {
    config_id: String,
    config_name: String,
    speakers: HashMap<String, String>,
    #[serde(default)]
    settings: HashMap<String, SpeakerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct SpeakerSettings {
    volume: Option<u8>,
    latency_ms: Option<u32>,
    #[serde(default)]
    role: SpeakerRole,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SpeakerRole {
    #[default]
    Sink,
    Source,
}

fn parse_configuration(input: ConfigurationInput) -> Result<Configuration, eyre::Report> {
    let mut targets = Vec::with_capacity(input.speakers.len());
    for (name, mac) in input.speakers {
        let parsed: MacAddress = mac
            .parse()
            .wrap_err_with(|| format!("speaker \"{name}\" has an invalid MAC address: {mac}"))?;
        let mut target = Target::new(parsed, name.clone());
        if let Some(settings) = input.settings.get(&name) {
            target.volume = settings.volume;
            target.latency_ms = settings.latency_ms;
            target.role = match settings.role {
                SpeakerRole::Sink => TargetRole::Sink,
                SpeakerRole::Source => TargetRole::Source,
            };
        }
        targets.push(target);
    }
    Ok(Configuration {
        config_id: input.config_id,
        config_name: input.config_name,
        targets,
    })
}

fn read_configuration_input(path: Option<&str>) -> Result<ConfigurationInput, eyre::Report> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path).wrap_err_with(|| format!("reading {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .wrap_err("reading configuration from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).wrap_err("parsing configuration JSON")
}

/// Exit codes per §6: 0 success, 2 usage/config error, 3 no usable controllers, 4 audio
/// unavailable (reachable, but degraded for at least one speaker), 1 any other failure.
const EXIT_USAGE: u8 = 2;
const EXIT_NO_CONTROLLERS: u8 = 3;
const EXIT_AUDIO_DEGRADED: u8 = 4;

async fn run() -> Result<ExitCode, eyre::Report> {
    let mut args = std::env::args().skip(1);
    let mut teardown = false;
    let mut config_path = Config::default_path().to_owned();
    let mut input_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--teardown" => teardown = true,
            "--config" => {
                config_path = args.next().ok_or_else(|| eyre::eyre!("--config needs a path"))?
            }
            other => input_path = Some(other.to_owned()),
        }
    }

    let config = Config::from_file(&config_path)?;
    let input = read_configuration_input(input_path.as_deref())?;
    let configuration = match parse_configuration(input) {
        Ok(configuration) => configuration,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            return Ok(ExitCode::from(EXIT_USAGE));
        }
    };

    let (dbus_handle, bluetooth) = BlueZSession::new().await?;
    let audio = PulseAudioControl::connect("speaker-hub")?;
    let orchestrator = Orchestrator::new(
        bluetooth,
        audio,
        config.bluetooth.reserved_controller.clone(),
        config.executor_config(),
    );

    let work = async {
        if teardown {
            let result = orchestrator.disconnect_configuration(configuration).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        } else {
            match orchestrator.apply_configuration(configuration).await {
                Ok(result) => {
                    let degraded = result.any_audio_degraded();
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(if degraded {
                        ExitCode::from(EXIT_AUDIO_DEGRADED)
                    } else {
                        ExitCode::SUCCESS
                    })
                }
                Err(orchestrator_core::OrchestratorError::NoControllers) => {
                    eprintln!("no usable Bluetooth controllers");
                    Ok(ExitCode::from(EXIT_NO_CONTROLLERS))
                }
                Err(orchestrator_core::OrchestratorError::ConfigError(msg)) => {
                    eprintln!("invalid configuration: {msg}");
                    Ok(ExitCode::from(EXIT_USAGE))
                }
                Err(err) => Err(eyre::Report::new(err)),
            }
        }
    };

    // If `dbus_handle` ever completes, the D-Bus connection was lost and the process should exit.
    let (_dbus_result, exit_code): ((), ExitCode) =
        try_join!(async { dbus_handle.await.map_err(eyre::Report::new) }, work)?;
    Ok(exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    stable_eyre::install().expect("failed to install eyre hooks");
    pretty_env_logger::init();
    color_backtrace::install();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
