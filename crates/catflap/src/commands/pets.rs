//! Pet command handlers.

use tabled::Tabled;

use catflap_core::{Gateway, Pet};

use crate::cli::{GlobalOpts, PetsArgs, PetsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct PetRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "RFID")]
    rfid: String,
    #[tabled(rename = "DEVICE")]
    device: String,
    #[tabled(rename = "LAST SEEN")]
    last_seen: String,
    #[tabled(rename = "LOCATION")]
    location: String,
}

/// Infer a display location from the pet's most recent event.
fn location(gateway: &Gateway, pet: &Pet) -> String {
    let Some(device) = gateway.store().device_by_id(&pet.device_id) else {
        return "?".into();
    };
    let Some(ref event) = pet.last_seen_event else {
        return "?".into();
    };
    match pet.is_present(event, &device) {
        Some(true) => "home".into(),
        Some(false) => "away".into(),
        None => "?".into(),
    }
}

pub fn handle(gateway: &Gateway, args: PetsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        PetsCommand::List { device } => {
            let snapshot = gateway.pets_snapshot();
            let mut pets: Vec<Pet> = snapshot
                .iter()
                .filter(|p| device.as_deref().is_none_or(|d| p.device_id == d))
                .map(|p| (**p).clone())
                .collect();
            pets.sort_by(|a, b| a.display_name().cmp(b.display_name()));

            let rendered = output::render_list(
                &global.output,
                &pets,
                |pet| PetRow {
                    name: pet.display_name().to_owned(),
                    rfid: pet.rfid_code.clone(),
                    device: pet.device_id.clone(),
                    last_seen: util::fmt_timestamp(Some(pet.last_seen)),
                    location: location(gateway, pet),
                },
                |pet| pet.display_name().to_owned(),
            );
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}
