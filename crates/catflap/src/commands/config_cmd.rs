//! Config command handlers (no gateway connection required).

use dialoguer::{Confirm, Input, Password};

use catflap_config::Profile;
use catflap_core::config::DEFAULT_GATEWAY_URL;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{active_profile_name, describe_profile};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),
        ConfigCommand::Show => show(global),
        ConfigCommand::Profiles => profiles(),
        ConfigCommand::Use { name } => use_profile(&name),
        ConfigCommand::SetToken { profile } => set_token(profile, global),
    }
}

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = catflap_config::load_config_or_default();

    let name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(dialoguer_err)?;

    let gateway: String = Input::new()
        .with_prompt("Gateway URL")
        .default(DEFAULT_GATEWAY_URL.into())
        .interact_text()
        .map_err(dialoguer_err)?;

    let token: String = Password::new()
        .with_prompt("Account token")
        .interact()
        .map_err(dialoguer_err)?;

    let use_keyring = Confirm::new()
        .with_prompt("Store the token in the system keyring?")
        .default(true)
        .interact()
        .map_err(dialoguer_err)?;

    let mut profile = Profile {
        gateway: Some(gateway),
        ..Profile::default()
    };

    if use_keyring {
        catflap_config::store_token(&name, &token)?;
    } else {
        profile.token = Some(token);
    }

    if cfg.default_profile.is_none() || cfg.profiles.is_empty() {
        cfg.default_profile = Some(name.clone());
    }
    cfg.profiles.insert(name.clone(), profile);
    catflap_config::save_config(&cfg)?;

    if !global.quiet {
        println!(
            "profile '{name}' written to {}",
            catflap_config::config_path().display()
        );
    }
    Ok(())
}

fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = catflap_config::load_config_or_default();
    println!("config file: {}", catflap_config::config_path().display());
    println!("active profile: {}", active_profile_name(global, &cfg));
    println!(
        "defaults: output={} color={} timeout={}s",
        cfg.defaults.output, cfg.defaults.color, cfg.defaults.timeout
    );
    for (name, profile) in &cfg.profiles {
        println!("{}", describe_profile(name, profile));
    }
    Ok(())
}

fn profiles() -> Result<(), CliError> {
    let cfg = catflap_config::load_config_or_default();
    let default = cfg.default_profile.as_deref().unwrap_or("");
    let mut names: Vec<&String> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let marker = if name == default { " (default)" } else { "" };
        println!("{name}{marker}");
    }
    Ok(())
}

fn use_profile(name: &str) -> Result<(), CliError> {
    let mut cfg = catflap_config::load_config_or_default();
    if !cfg.profiles.contains_key(name) {
        let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(CliError::ProfileNotFound {
            name: name.to_owned(),
            available: available.join(", "),
        });
    }
    cfg.default_profile = Some(name.to_owned());
    catflap_config::save_config(&cfg)?;
    println!("default profile set to '{name}'");
    Ok(())
}

fn set_token(profile: Option<String>, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = catflap_config::load_config_or_default();
    let name = profile.unwrap_or_else(|| active_profile_name(global, &cfg));

    let token: String = Password::new()
        .with_prompt(format!("Account token for '{name}'"))
        .interact()
        .map_err(dialoguer_err)?;

    catflap_config::store_token(&name, &token)?;
    println!("token for '{name}' stored in the system keyring");
    Ok(())
}

fn dialoguer_err(e: dialoguer::Error) -> CliError {
    CliError::Io(std::io::Error::other(e))
}
