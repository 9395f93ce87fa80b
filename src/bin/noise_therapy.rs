//! Headless noise therapy player
//!
//! Plays through the configured output and takes commands on stdin, one per
//! line. Replies go to stdout:
//! - "ok" or "error:message" after each command
//! - "running:true|false", "preset:<id>", "output:<kind>" when state changes
//!
//! Commands: start, stop, status, presets, quit,
//! ear <both|left|right>, noise <white|pink|brown>, volume <0..1>,
//! center <hz>, bandwidth <octaves>, reset <noise|volume|center|bandwidth|all>,
//! select <name>, save <name>, rename <name>, delete <name>
//!
//! Exits on "quit" or when stdin closes.

use std::env;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use noise_therapy::audio::device::list_output_devices;
use noise_therapy::audio::route::RouteEventQueue;
use noise_therapy::logging::init_logging;
use noise_therapy::params::{clamp_to_ui_center, Ear, ParamField};
use noise_therapy::{
    EarSelector, EngineConfig, EngineEvent, NoiseEngine, NoiseType, OutputKind, PresetId,
    RouteChangeReason,
};

const USAGE: &str = "Usage: noise-therapy [--config <path>] [--device <name>] [--preset <name>] \
[--noise <white|pink|brown>] [--ear <both|left|right>] [--volume <0..1>] [--list-devices]";

/// How often the main loop drains route events while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the default output device is checked for changes
const ROUTE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    device: Option<String>,
    preset: Option<String>,
    noise: Option<NoiseType>,
    ear: Option<EarSelector>,
    volume: Option<f32>,
    list_devices: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| format!("Missing value for {}", flag))
            };
            match arg.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
                "--device" => parsed.device = Some(value("--device")?),
                "--preset" => parsed.preset = Some(value("--preset")?),
                "--noise" => parsed.noise = Some(value("--noise")?.parse()?),
                "--ear" => parsed.ear = Some(value("--ear")?.parse()?),
                "--volume" => {
                    let v = value("--volume")?;
                    parsed.volume = Some(v.parse().map_err(|_| format!("Invalid volume '{}'", v))?);
                }
                "--list-devices" => parsed.list_devices = true,
                "-h" | "--help" => return Err(String::new()),
                other => return Err(format!("Unknown argument '{}'", other)),
            }
        }
        Ok(parsed)
    }
}

fn main() {
    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            if !e.is_empty() {
                eprintln!("{}", e);
            }
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let config_path = args.config.clone().unwrap_or_else(EngineConfig::default_path);
    let mut config = match EngineConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);
    log::info!("noise-therapy starting");

    if args.list_devices {
        match list_output_devices() {
            Ok(devices) => {
                for d in devices {
                    let marker = if d.is_default { "*" } else { " " };
                    println!("{} {} ({:?})", marker, d.name, d.kind);
                }
                return;
            }
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(device) = &args.device {
        config.device_name = Some(device.clone());
    }

    if let Err(e) = run(&config, &args) {
        log::error!("noise-therapy error: {}", e);
        println!("error:{}", e);
        std::process::exit(1);
    }
    log::info!("noise-therapy exiting");
}

fn run(config: &EngineConfig, args: &Args) -> noise_therapy::Result<()> {
    let mut engine = NoiseEngine::with_default_output(config)?;

    engine.subscribe(|event| {
        match event {
            EngineEvent::RunningChanged(running) => println!("running:{}", running),
            EngineEvent::CurrentPresetChanged(Some(id)) => println!("preset:{}", id),
            EngineEvent::CurrentPresetChanged(None) => println!("preset:"),
            EngineEvent::OutputChanged(kind) => println!("output:{:?}", kind),
            EngineEvent::PersistenceFailed(e) => println!("error:{}", e),
            _ => return,
        }
        let _ = std::io::stdout().flush();
    });

    if let Some(name) = &args.preset {
        match preset_by_name(&engine, name) {
            Ok(id) => engine.set_current_preset_id(id)?,
            Err(e) => log::warn!("{}, keeping the current preset", e),
        }
    }
    if let Some(ear) = args.ear {
        engine.set_selected_ear(ear);
    }
    if let Some(noise) = args.noise {
        engine.set_active_noise_type(noise);
    }
    if let Some(volume) = args.volume {
        engine.set_active_volume(volume);
    }

    start_playback(&mut engine);

    let should_quit = Arc::new(AtomicBool::new(false));
    spawn_route_monitor(engine.route_events(), Arc::clone(&should_quit));

    // Commands arrive on their own thread; the engine stays on this one
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let reader = BufReader::new(std::io::stdin());
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
        log::info!("stdin closed");
    });

    println!("ready");
    let _ = std::io::stdout().flush();

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" {
                    break;
                }
                match handle_command(&mut engine, line) {
                    Ok(()) => println!("ok"),
                    Err(e) => println!("error:{}", e),
                }
                let _ = std::io::stdout().flush();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        engine.process_route_events();
    }

    should_quit.store(true, Ordering::SeqCst);
    engine.stop();
    Ok(())
}

/// Start playback. A failure is reported and the command loop still runs,
/// so "start" can retry.
fn start_playback(engine: &mut NoiseEngine) -> bool {
    match engine.start() {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to start playback: {}", e);
            println!("error:{}", e);
            false
        }
    }
}

fn handle_command(engine: &mut NoiseEngine, line: &str) -> Result<(), String> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    let number = |what: &str| -> Result<f32, String> {
        rest.parse::<f32>()
            .map_err(|_| format!("Invalid {} '{}'", what, rest))
    };
    let ok_or_rejected = |accepted: bool| {
        if accepted {
            Ok(())
        } else {
            Err(format!("Rejected value '{}'", rest))
        }
    };

    match cmd {
        "start" => engine.start().map_err(|e| e.to_string()),
        "stop" => {
            engine.stop();
            Ok(())
        }
        "status" => {
            let active = engine.active();
            println!(
                "status:running={} ear={:?} noise={} volume={} center={} bandwidth={} output={:?}",
                engine.is_running(),
                engine.selected_ear(),
                active.noise_type,
                active.volume,
                active.center_frequency,
                active.bandwidth,
                engine.output_kind()
            );
            Ok(())
        }
        "presets" => {
            let current = engine.current_preset_id();
            for p in engine.presets() {
                let marker = if Some(p.id) == current { "*" } else { " " };
                println!("{} {} {}", marker, p.id, p.name);
            }
            Ok(())
        }
        "ear" => {
            engine.set_selected_ear(rest.parse()?);
            Ok(())
        }
        "noise" => ok_or_rejected(engine.set_active_noise_type(rest.parse()?)),
        "volume" => ok_or_rejected(engine.set_active_volume(number("volume")?)),
        "center" => {
            let hz = clamp_to_ui_center(number("frequency")?);
            ok_or_rejected(engine.set_active_center_frequency(hz))
        }
        "bandwidth" => ok_or_rejected(engine.set_active_bandwidth(number("bandwidth")?)),
        "reset" if rest == "all" => {
            let ear = selected_single_ear(engine)?;
            engine.clear_ear_overrides(ear);
            Ok(())
        }
        "reset" => {
            let field = match rest {
                "noise" => ParamField::NoiseType,
                "volume" => ParamField::Volume,
                "center" => ParamField::CenterFrequency,
                "bandwidth" => ParamField::Bandwidth,
                other => return Err(format!("Unknown field '{}'", other)),
            };
            let ear = selected_single_ear(engine)?;
            ok_or_rejected(engine.clear_override(ear, field))
        }
        "select" => {
            let id = preset_by_name(engine, rest)?;
            engine.set_current_preset_id(id).map_err(|e| e.to_string())
        }
        "save" => engine
            .save_as_new_preset(rest)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        "rename" => {
            let id = engine
                .current_preset_id()
                .ok_or_else(|| "No preset selected".to_string())?;
            engine.rename_preset(id, rest).map_err(|e| e.to_string())
        }
        "delete" => {
            let id = preset_by_name(engine, rest)?;
            engine.delete_preset(id).map_err(|e| e.to_string())
        }
        other => Err(format!("Unknown command '{}'", other)),
    }
}

fn preset_by_name(engine: &NoiseEngine, name: &str) -> Result<PresetId, String> {
    engine
        .presets()
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .ok_or_else(|| format!("No preset named '{}'", name))
}

fn selected_single_ear(engine: &NoiseEngine) -> Result<Ear, String> {
    engine
        .selected_ear()
        .ear()
        .ok_or_else(|| "Select an ear first".to_string())
}

/// Watch the default output device and report changes as route events
fn spawn_route_monitor(events: RouteEventQueue, should_quit: Arc<AtomicBool>) {
    thread::spawn(move || {
        let mut last = default_output();

        while !should_quit.load(Ordering::SeqCst) {
            thread::sleep(ROUTE_POLL_INTERVAL);

            let current = default_output();
            if current.as_ref().map(|c| &c.0) == last.as_ref().map(|l| &l.0) {
                continue;
            }

            let previous_still_present = last
                .as_ref()
                .map(|(name, _)| device_present(name))
                .unwrap_or(false);
            let reason = if last.is_some() && !previous_still_present {
                RouteChangeReason::OldDeviceUnavailable
            } else {
                RouteChangeReason::NewDeviceAvailable
            };
            let output = current
                .as_ref()
                .map(|(_, kind)| *kind)
                .unwrap_or(OutputKind::Unknown);

            log::debug!("Default output changed: {:?} -> {:?}", last, current);
            events.route_changed(reason, output);
            last = current;
        }
    });
}

fn default_output() -> Option<(String, OutputKind)> {
    list_output_devices()
        .ok()?
        .into_iter()
        .find(|d| d.is_default)
        .map(|d| (d.name, d.kind))
}

fn device_present(name: &str) -> bool {
    list_output_devices()
        .map(|devices| devices.iter().any(|d| d.name == name))
        .unwrap_or(true)
}
