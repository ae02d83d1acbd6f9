//! `banter chat` — interactive chat in the terminal.
//!
//! Ctrl+C cancels the reply being generated; `exit` or end of input quits.

use std::io::Write;
use std::process::ExitCode;

use banter_config::AppConfig;
use banter_core::call::CallContext;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{build_session, report_failure};

pub async fn run(
    config: &AppConfig,
    chat: i64,
    user: i64,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let session = build_session(config).await?;

    println!();
    println!("  banter — chat {chat} as user {user}");
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.effective_model());
    println!("  Budget:    {} tokens", config.context.budget);
    println!();
    println!("  Type a message and press Enter. Ctrl+C cancels a reply, 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let ctx = CallContext::new();
        let watcher = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctx.cancel();
                }
            })
        };

        let result = session.respond(chat, user, line, &ctx).await;
        watcher.abort();

        match result {
            Ok(reply) => {
                println!();
                for text in reply.lines() {
                    println!("  banter > {text}");
                }
                println!();
            }
            Err(e) => {
                report_failure(&e);
                println!();
            }
        }
    }

    println!();
    Ok(ExitCode::SUCCESS)
}
