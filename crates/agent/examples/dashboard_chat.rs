//! Minimal embedding example: config, catalog, provider, chat loop.
//!
//! Reads operator questions from stdin and prints the agent's answers,
//! collecting approval decisions inline when an operation needs one.
//!
//! Expects `~/.opsmate/config.json` to carry a provider api key and the
//! platform endpoint.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use opsmate_agent::{AgentOptions, ChatAgent};
use opsmate_config::Config;
use opsmate_conversation::Message;
use opsmate_executor::Decision;
use opsmate_platform::{build_catalog, PlatformClient};
use opsmate_provider::{AnthropicProvider, OpenAiProvider, Provider};
use opsmate_registry::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::load().await?;
    if !config.has_api_key() {
        anyhow::bail!("no api key configured for provider '{}'", config.providers.default);
    }

    let client = Arc::new(PlatformClient::from_config(&config.platform));
    let registry = Arc::new(build_catalog(client)?);
    let options = AgentOptions::from(&config.agent);

    match config.providers.default.as_str() {
        "openai" => {
            let p = &config.providers.openai;
            let provider =
                OpenAiProvider::new(&p.api_key, p.api_base.clone(), p.model.clone());
            run(provider, registry, options).await
        }
        _ => {
            let p = &config.providers.anthropic;
            let provider =
                AnthropicProvider::new(&p.api_key, p.api_base.clone(), p.model.clone());
            run(provider, registry, options).await
        }
    }
}

async fn run<P: Provider>(
    provider: P,
    registry: Arc<Registry>,
    options: AgentOptions,
) -> anyhow::Result<()> {
    let agent = ChatAgent::with_options(provider, registry, options);
    let mut history: Vec<Message> = Vec::new();
    let stdin = io::stdin();

    println!("opsmate dashboard chat. Ask about batches, datasets, flows... (ctrl-d to exit)");
    print!("> ");
    io::stdout().flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let question = line.trim();
        if question.is_empty() {
            print!("> ");
            io::stdout().flush()?;
            continue;
        }

        let mut outcome = agent.converse(&history, question).await?;

        while let Some(pending) = outcome.pending_approval.take() {
            println!("{}", outcome.final_text);
            print!(
                "approve {} with arguments {}? [y/N] ",
                pending.operation, pending.arguments
            );
            io::stdout().flush()?;

            let mut answer = String::new();
            stdin.lock().read_line(&mut answer)?;
            let decision = if answer.trim().eq_ignore_ascii_case("y") {
                Decision::Approve
            } else {
                Decision::Cancel
            };

            history.append(&mut outcome.new_messages);
            outcome = agent.resolve(&pending.request_id, decision).await?;
        }

        println!("{}", outcome.final_text);
        if !outcome.operations_used.is_empty() {
            println!("  [operations: {}]", outcome.operations_used.join(", "));
        }
        history.append(&mut outcome.new_messages);

        print!("> ");
        io::stdout().flush()?;
    }

    Ok(())
}
