//! Transit policy command handlers.

use tabled::Tabled;

use catflap_core::{DeviceTransitPolicy, Gateway, Rule};

use crate::cli::{GlobalOpts, PoliciesArgs, PoliciesCommand};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ACTIVE")]
    active: String,
    #[tabled(rename = "RULES")]
    rules: usize,
    #[tabled(rename = "IDLE LOCK")]
    idle_lock: String,
}

fn describe_rule(index: usize, rule: &Rule) -> String {
    let mut parts = Vec::new();
    if let Some(ref criteria) = rule.criteria {
        if let Some(ref sources) = criteria.event_trigger_sources {
            let names: Vec<String> = sources.iter().map(ToString::to_string).collect();
            parts.push(format!("source in [{}]", names.join(", ")));
        }
        if let Some(ref classifications) = criteria.event_classifications {
            let names: Vec<String> = classifications.iter().map(ToString::to_string).collect();
            parts.push(format!("class in [{}]", names.join(", ")));
        }
        if let Some(ref codes) = criteria.rfid_codes {
            parts.push(format!("rfid in [{}]", codes.join(", ")));
        }
        if let Some(ref ranges) = criteria.time_ranges {
            let windows: Vec<String> = ranges
                .iter()
                .map(|r| {
                    format!(
                        "{:02}:{:02}-{:02}:{:02}",
                        r.start_hour, r.start_minute, r.end_hour, r.end_minute
                    )
                })
                .collect();
            parts.push(format!("time in [{}]", windows.join(", ")));
        }
    } else {
        parts.push("(no criteria: never matches)".into());
    }

    let action = rule.action.as_ref().map_or_else(
        || "-".to_owned(),
        |action| {
            let mut s = if action.lock { "lock" } else { "unlock" }.to_owned();
            if let Some(sound) = action.sound {
                s.push_str(&format!(" +{sound}"));
            }
            s
        },
    );

    format!(
        "  {index}. [{}] {} => {}{}",
        if rule.enabled { "on " } else { "off" },
        if parts.is_empty() { "always".into() } else { parts.join(" AND ") },
        action,
        rule.description
            .as_deref()
            .map(|d| format!("  ({d})"))
            .unwrap_or_default(),
    )
}

fn detail(policy: &DeviceTransitPolicy) -> String {
    let mut lines = vec![format!(
        "Policy #{} {} (device {})",
        policy.device_transit_policy_id,
        policy.name.as_deref().unwrap_or("<unnamed>"),
        policy.device_id,
    )];

    match policy.transit_policy.as_ref() {
        Some(transit) => {
            lines.push(format!(
                "  idle: {}  battery idle: {}",
                if transit.idle_lock { "locked" } else { "unlocked" },
                if transit.idle_lock_battery { "locked" } else { "unlocked" },
            ));
            if transit.rules.is_empty() {
                lines.push("  no rules (idle state always applies)".into());
            } else {
                lines.push("  rules (first match wins):".into());
                for (index, rule) in transit.rules.iter().enumerate() {
                    lines.push(describe_rule(index + 1, rule));
                }
            }
        }
        None => lines.push("  rule set not resolved".into()),
    }

    lines.join("\n")
}

pub async fn handle(
    gateway: &Gateway,
    args: PoliciesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        PoliciesCommand::List { device } => {
            let device = util::resolve_device(gateway, &device)?;
            let mut policies: Vec<DeviceTransitPolicy> = gateway
                .store()
                .policies_for_device(&device.device_id)
                .iter()
                .map(|p| (**p).clone())
                .collect();
            policies.sort_by_key(|p| p.device_transit_policy_id);

            let active_id = device.device_transit_policy_id;
            let rendered = output::render_list(
                &global.output,
                &policies,
                |policy| PolicyRow {
                    id: policy.device_transit_policy_id,
                    name: policy.name.clone().unwrap_or_else(|| "<unnamed>".into()),
                    active: if Some(policy.device_transit_policy_id) == active_id {
                        "*".into()
                    } else {
                        String::new()
                    },
                    rules: policy
                        .transit_policy
                        .as_ref()
                        .map_or(0, |t| t.rules.len()),
                    idle_lock: policy.transit_policy.as_ref().map_or_else(
                        || "?".into(),
                        |t| if t.idle_lock { "locked".into() } else { "unlocked".to_owned() },
                    ),
                },
                |policy| policy.device_transit_policy_id.to_string(),
            );
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        PoliciesCommand::Show { policy } => {
            let policy = gateway.store().policy_by_id(policy).ok_or_else(|| {
                CliError::NotFound {
                    resource_type: "policy".into(),
                    identifier: policy.to_string(),
                    list_command: "policies list <device>".into(),
                }
            })?;
            let rendered = output::render_single(&global.output, &*policy, detail, |p| {
                p.device_transit_policy_id.to_string()
            });
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        PoliciesCommand::Set { device, policy } => {
            gateway.activate_policy(&device, policy).await?;
            if !global.quiet {
                println!("activated policy #{policy} on {device}");
            }
            Ok(())
        }
    }
}
