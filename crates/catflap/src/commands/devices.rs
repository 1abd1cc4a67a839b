//! Device command handlers.

use tabled::Tabled;

use catflap_core::{Device, Gateway};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "CONNECTED")]
    connected: String,
    #[tabled(rename = "TIME ZONE")]
    time_zone: String,
    #[tabled(rename = "ACTIVE POLICY")]
    policy: String,
    #[tabled(rename = "IDLE")]
    idle: String,
}

fn to_row(device: &Device) -> DeviceRow {
    DeviceRow {
        id: device.device_id.clone(),
        description: device.description.clone().unwrap_or_else(|| "-".into()),
        connected: device
            .connectivity
            .as_ref()
            .map_or_else(|| "?".into(), |c| if c.connected { "yes".into() } else { "no".into() }),
        time_zone: device
            .time_zone
            .map_or_else(|| "-".into(), |tz| tz.to_string()),
        policy: device
            .device_transit_policy
            .as_ref()
            .and_then(|p| p.name.clone())
            .or_else(|| device.device_transit_policy_id.map(|id| format!("#{id}")))
            .unwrap_or_else(|| "-".into()),
        idle: match device.is_unlocked_in_idle_state() {
            Some(true) => "unlocked".into(),
            Some(false) => "locked".into(),
            None => "?".into(),
        },
    }
}

fn detail(device: &Device) -> String {
    let mut lines = vec![format!("Device {}", device.device_id)];
    if let Some(ref description) = device.description {
        lines.push(format!("  description:   {description}"));
    }
    if let Some(ref connectivity) = device.connectivity {
        lines.push(format!(
            "  connectivity:  {} (since {})",
            if connectivity.connected { "connected" } else { "disconnected" },
            util::fmt_timestamp(connectivity.timestamp),
        ));
        if let Some(ref reason) = connectivity.disconnect_reason {
            lines.push(format!("  last drop:     {reason}"));
        }
    }
    lines.push(format!("  time zone:     {}", device.tz()));
    match device.device_transit_policy.as_ref() {
        Some(policy) => lines.push(format!(
            "  active policy: {} (#{})",
            policy.name.as_deref().unwrap_or("<unnamed>"),
            policy.device_transit_policy_id,
        )),
        None => lines.push(format!(
            "  active policy: {}",
            device
                .device_transit_policy_id
                .map_or_else(|| "none".into(), |id| format!("#{id} (unresolved)")),
        )),
    }
    lines.push(format!(
        "  idle state:    {}",
        match device.is_unlocked_in_idle_state() {
            Some(true) => "unlocked",
            Some(false) => "locked",
            None => "unknown",
        }
    ));
    lines.join("\n")
}

pub fn handle(gateway: &Gateway, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::List => {
            let snapshot = gateway.devices_snapshot();
            let mut devices: Vec<Device> = snapshot.iter().map(|d| (**d).clone()).collect();
            devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

            let rendered =
                output::render_list(&global.output, &devices, to_row, |d| d.device_id.clone());
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
        DevicesCommand::Get { device } => {
            let device = util::resolve_device(gateway, &device)?;
            let rendered =
                output::render_single(&global.output, &*device, detail, |d| d.device_id.clone());
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}
