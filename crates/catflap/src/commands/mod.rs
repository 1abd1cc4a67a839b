//! Command handlers: connect, run, disconnect.

pub mod config_cmd;
mod control;
mod devices;
mod pets;
mod policies;
mod util;
mod watch;

use catflap_core::{Gateway, GatewayConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Connect to the gateway, run the command, and disconnect.
pub async fn dispatch(
    cmd: Command,
    config: GatewayConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let gateway = Gateway::new(config);
    gateway.connect().await?;

    let result = route(cmd, &gateway, global).await;

    gateway.disconnect().await;
    result
}

async fn route(cmd: Command, gateway: &Gateway, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(gateway, args, global),
        Command::Pets(args) => pets::handle(gateway, args, global),
        Command::Policies(args) => policies::handle(gateway, args, global).await,
        Command::Watch(args) => watch::handle(gateway, args, global).await,
        Command::Unlock { device } => control::unlock(gateway, &device, global).await,
        Command::Reboot { device } => control::reboot(gateway, &device, global).await,

        // Handled before connecting; unreachable here.
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
