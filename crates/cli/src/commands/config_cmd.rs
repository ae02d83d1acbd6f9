//! `banter config` — show the effective configuration.

use std::process::ExitCode;

use banter_config::AppConfig;

const REDACTED: &str = "***";

pub fn run(config: &AppConfig, template: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if template {
        print!("{}", AppConfig::default_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some(REDACTED.into());
    }
    for provider in shown.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(ExitCode::SUCCESS)
}
