//! Live event stream: print derived state changes until Ctrl-C.

use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;

use catflap_core::{FlapUpdate, PolicyResult};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    gateway: &catflap_core::Gateway,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut updates = gateway.updates();
    let color = output::should_color(&global.color);

    if !global.quiet {
        eprintln!(
            "watching {} device(s), {} pet(s) -- Ctrl-C to stop",
            gateway.store().device_count(),
            gateway.store().pet_count(),
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            result = updates.recv() => match result {
                Ok(update) => {
                    if let Some(line) = format_update(&update, &args, color) {
                        println!("{} {line}", chrono::Utc::now().format("%H:%M:%S"));
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("warning: fell behind, {missed} updates dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}

fn format_update(update: &FlapUpdate, args: &WatchArgs, color: bool) -> Option<String> {
    let device_of = |id: &str| args.device.as_deref().is_none_or(|want| want == id);

    match update {
        FlapUpdate::DeviceChanged { device } => {
            device_of(&device.device_id).then(|| {
                let connected = device
                    .connectivity
                    .as_ref()
                    .map_or("?", |c| if c.connected { "online" } else { "offline" });
                format!("{}  device changed ({connected})", device.device_id)
            })
        }

        FlapUpdate::EventFragment {
            device_id,
            event,
            verdict,
        } => (args.fragments && device_of(device_id)).then(|| {
            format!(
                "{device_id}  event #{} fragment  source={} verdict={}",
                event.event_id.unwrap_or(-1),
                event
                    .event_trigger_source
                    .map_or_else(|| "?".into(), |s| s.to_string()),
                paint_verdict(*verdict, color),
            )
        }),

        FlapUpdate::EventConcluded {
            device_id,
            event,
            verdict,
        } => device_of(device_id).then(|| {
            format!(
                "{device_id}  event #{} concluded  source={} rfid={} verdict={}",
                event.event_id.unwrap_or(-1),
                event
                    .event_trigger_source
                    .map_or_else(|| "?".into(), |s| s.to_string()),
                event
                    .rfid_codes
                    .as_ref()
                    .map_or_else(|| "-".into(), |codes| codes.join(",")),
                paint_verdict(*verdict, color),
            )
        }),

        FlapUpdate::LockChanged { device_id, unlocked } => device_of(device_id).then(|| {
            let state = if *unlocked {
                paint("UNLOCKED", color, |s| s.green().to_string())
            } else {
                paint("LOCKED", color, |s| s.red().to_string())
            };
            format!("{device_id}  flap {state}")
        }),

        FlapUpdate::PresenceChanged {
            device_id,
            name,
            present,
            ..
        } => device_of(device_id).then(|| {
            let location = if *present {
                paint("home", color, |s| s.green().to_string())
            } else {
                paint("away", color, |s| s.yellow().to_string())
            };
            format!("{device_id}  {name} is now {location}")
        }),

        FlapUpdate::ContrabandDetected {
            device_id,
            event_id,
        } => device_of(device_id).then(|| {
            format!(
                "{device_id}  {} in event #{}",
                paint("CONTRABAND", color, |s| s.red().bold().to_string()),
                event_id.unwrap_or(-1),
            )
        }),
    }
}

fn paint(text: &str, color: bool, style: impl Fn(&str) -> String) -> String {
    if color { style(text) } else { text.to_owned() }
}

fn paint_verdict(verdict: PolicyResult, color: bool) -> String {
    match verdict {
        PolicyResult::Unlocked => paint("UNLOCKED", color, |s| s.green().to_string()),
        PolicyResult::Locked => paint("LOCKED", color, |s| s.red().to_string()),
        PolicyResult::Unknown => paint("UNKNOWN", color, |s| s.dimmed().to_string()),
    }
}
