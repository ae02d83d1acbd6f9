//! `banter normalize` — print the canonical form of some text.

use std::process::ExitCode;

use tokio::io::AsyncReadExt;

pub async fn run(text: Option<String>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let input = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    match banter_agent::normalize(&input) {
        Ok(out) => {
            println!("{out}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
