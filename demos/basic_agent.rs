//! Minimal single-turn agent against a local OpenAI-compatible server.
//!
//! Run with `OPENAI_BASE_URL`/`OPENAI_MODEL` set for your server, or accept
//! the LM Studio defaults:
//!
//! ```sh
//! cargo run --example basic_agent
//! ```

use std::sync::Arc;

use agent_core::provider::openai_compatible::OpenAiCompatibleProvider;
use agent_core::{get_base_url, get_model, Agent, CreateResponseOptions, Provider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let base_url = get_base_url(Provider::LmStudio, std::env::var("OPENAI_BASE_URL").ok().as_deref());
    let model_name = get_model(Provider::LmStudio, std::env::var("OPENAI_MODEL").ok().as_deref());

    let model = Arc::new(OpenAiCompatibleProvider::new(base_url, model_name));
    let agent = Agent::builder()
        .model(model)
        .system_prompt("You are a terse, helpful assistant.")
        .build()?;

    let response = agent
        .create_response(CreateResponseOptions::input("In one sentence, what is a Rust trait object?"))
        .await?;

    for message in &response.output_messages {
        println!("{:?}: {}", message.role, message.text());
    }
    println!(
        "usage: {} input / {} output tokens",
        response.usage.input_tokens, response.usage.output_tokens
    );

    Ok(())
}
