use std::env;

use anyhow::{bail, Context};

use ledgerlens::config::AppPaths;
use ledgerlens::logging;
use ledgerlens::state::AppState;

const DEFAULT_SCOPE: &str = "default";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init(&paths);

    let args: Vec<String> = env::args().skip(1).collect();
    let scope = env::var("LEDGERLENS_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string());

    match args.first().map(String::as_str) {
        Some("index") => {
            let state = AppState::initialize(paths).await?;
            let report = state
                .indexer
                .run(&scope)
                .await
                .context("index run failed")?;
            for (table, rows) in &report.tables {
                println!("{table}: {rows} rows");
            }
            println!("indexed {} documents", report.documents);
        }
        Some("ask") => {
            let question = args[1..].join(" ");
            answer(paths, &scope, &question).await?;
        }
        Some(_) => {
            // Bare invocation: the whole argument list is the question.
            let question = args.join(" ");
            answer(paths, &scope, &question).await?;
        }
        None => {
            eprintln!("usage: ledgerlens index | ledgerlens [ask] <question>");
            bail!("missing question");
        }
    }

    Ok(())
}

async fn answer(paths: AppPaths, scope: &str, question: &str) -> anyhow::Result<()> {
    if question.trim().is_empty() {
        eprintln!("usage: ledgerlens index | ledgerlens [ask] <question>");
        bail!("missing question");
    }

    let state = AppState::initialize(paths).await?;
    let outcome = state.qa.ask(scope, question).await?;

    println!("{}", outcome.answer);
    if let Some(warning) = outcome.history_warning {
        eprintln!("warning: {warning}");
    }

    Ok(())
}
