//! `banter doctor` — diagnose configuration, storage, and backend health.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use banter_agent::ResponseGenerator;
use banter_config::AppConfig;
use banter_core::call::CallContext;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(config: &AppConfig, path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    println!("banter doctor");
    println!("=============\n");

    let mut issues = 0;

    if path.exists() {
        println!("  ✅ Config file valid ({})", path.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults", path.display());
    }

    let provider = config.default_provider.as_str();
    let needs_key = banter_providers::router::requires_api_key(provider);
    if needs_key && !config.has_api_key() && !has_provider_key(config, provider) {
        println!("  ❌ No API key for '{provider}' (set BANTER_API_KEY or api_key in config)");
        issues += 1;
    } else {
        println!("  ✅ Provider '{provider}', model '{}'", config.effective_model());
    }

    match banter_history::open(&config.history).await {
        Ok(store) => println!("  ✅ History store '{}' opened", store.name()),
        Err(e) => {
            println!("  ❌ History store: {e}");
            issues += 1;
        }
    }

    let backend = banter_providers::build_from_config(config);
    match backend.health_check().await {
        Ok(true) => println!("  ✅ Backend '{}' reachable", backend.name()),
        Ok(false) => {
            println!("  ❌ Backend '{}' reported unhealthy", backend.name());
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Backend '{}': {e}", backend.name());
            issues += 1;
        }
    }

    if issues == 0 {
        let generator = Arc::new(ResponseGenerator::from_config(config, backend)?);
        let ctx = CallContext::new().with_timeout(PROBE_TIMEOUT);
        match generator
            .generate(0, "ping", &[], &config.system_prompt, config.context.budget, &ctx)
            .await
        {
            Ok(reply) => println!("  ✅ Probe reply: {}", first_line(&reply)),
            Err(e) => {
                println!("  ❌ Probe failed ({}): {e}", e.kind());
                issues += 1;
            }
        }
        let snapshot = generator.invoker().breaker().snapshot();
        println!(
            "     circuit: {}, consecutive failures: {}",
            snapshot.state, snapshot.consecutive_failures
        );
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("  {issues} issue(s) found. See above for details.");
        Ok(ExitCode::FAILURE)
    }
}

fn has_provider_key(config: &AppConfig, provider: &str) -> bool {
    config
        .providers
        .get(provider)
        .is_some_and(|p| p.api_key.is_some())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
