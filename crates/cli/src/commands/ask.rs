//! `banter ask` — one message in, one reply out.

use std::process::ExitCode;
use std::time::Duration;

use banter_config::AppConfig;
use banter_core::call::CallContext;

use super::{build_session, report_failure};

pub async fn run(
    config: &AppConfig,
    message: &str,
    chat: i64,
    user: i64,
    timeout: Option<u64>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let session = build_session(config).await?;

    let mut ctx = CallContext::new();
    if let Some(secs) = timeout {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }
    let watcher = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctx.cancel();
            }
        })
    };

    let result = session.respond(chat, user, message, &ctx).await;
    watcher.abort();

    match result {
        Ok(reply) => {
            println!("{reply}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            report_failure(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}
