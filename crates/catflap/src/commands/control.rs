//! Remote device commands: unlock, reboot.

use catflap_core::Gateway;

use crate::cli::GlobalOpts;
use crate::error::CliError;

use super::util;

pub async fn unlock(gateway: &Gateway, device: &str, global: &GlobalOpts) -> Result<(), CliError> {
    util::resolve_device(gateway, device)?;
    gateway.unlock(device).await?;
    if !global.quiet {
        println!("unlock sent to {device}");
    }
    Ok(())
}

pub async fn reboot(gateway: &Gateway, device: &str, global: &GlobalOpts) -> Result<(), CliError> {
    util::resolve_device(gateway, device)?;
    if !util::confirm(&format!("Reboot {device}?"), global.yes)? {
        if !global.quiet {
            println!("aborted");
        }
        return Ok(());
    }
    gateway.reboot(device).await?;
    if !global.quiet {
        println!("reboot sent to {device}");
    }
    Ok(())
}
