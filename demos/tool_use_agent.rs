//! A single-tool agent with a permission rule and a `PreToolUse` hook that
//! logs every call, exercising the loop described in `SPEC_FULL.md` §4.1.
//!
//! ```sh
//! cargo run --example tool_use_agent
//! ```

use std::sync::Arc;

use agent_core::provider::openai_compatible::OpenAiCompatibleProvider;
use agent_core::{
    get_base_url, get_model, hook_fn, Agent, CreateResponseOptions, HookPhase, Mode, PermissionManager,
    PermissionRule, Provider, Specifier, ToolAnnotations, ToolResult,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct CalculateInput {
    expression: String,
}

/// Evaluates `a <op> b` for one of `+ - * /`; anything more ambitious is out
/// of scope for a demo tool.
fn evaluate(expression: &str) -> Result<f64, String> {
    let ops = ['+', '-', '*', '/'];
    let op_index = expression
        .char_indices()
        .skip(1)
        .find(|(_, c)| ops.contains(c))
        .map(|(i, _)| i)
        .ok_or_else(|| format!("no operator found in '{expression}'"))?;
    let (lhs, rest) = expression.split_at(op_index);
    let op = rest.chars().next().unwrap();
    let rhs = &rest[1..];
    let lhs: f64 = lhs.trim().parse().map_err(|_| format!("bad operand '{lhs}'"))?;
    let rhs: f64 = rhs.trim().parse().map_err(|_| format!("bad operand '{rhs}'"))?;
    match op {
        '+' => Ok(lhs + rhs),
        '-' => Ok(lhs - rhs),
        '*' => Ok(lhs * rhs),
        '/' if rhs != 0.0 => Ok(lhs / rhs),
        '/' => Err("division by zero".to_string()),
        _ => unreachable!("op was checked against `ops` above"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let base_url = get_base_url(Provider::LmStudio, std::env::var("OPENAI_BASE_URL").ok().as_deref());
    let model_name = get_model(Provider::LmStudio, std::env::var("OPENAI_MODEL").ok().as_deref());
    let model = Arc::new(OpenAiCompatibleProvider::new(base_url, model_name));

    let calculate = agent_core::TypedTool::new(
        "calculate",
        "Evaluates a simple two-operand arithmetic expression like '3 * 4'",
        serde_json::json!({
            "type": "object",
            "properties": {"expression": {"type": "string"}},
            "required": ["expression"],
        }),
        ToolAnnotations {
            read_only_hint: true,
            ..Default::default()
        },
        |_ctx, input: CalculateInput| async move {
            match evaluate(&input.expression) {
                Ok(value) => Ok(ToolResult::text(value.to_string())),
                Err(message) => Ok(ToolResult::error(message)),
            }
        },
    )?;

    let permissions = Arc::new(PermissionManager::new(
        Mode::Default,
        vec![PermissionRule::allow(Specifier::NameGlob("calculate".into()))],
    ));

    let log_tool_call = hook_fn(|ctx: &mut agent_core::HookContext| {
        let tool_name = ctx.tool_name.clone();
        let tool_input = ctx.tool_input.clone();
        async move {
            if let Some(name) = tool_name {
                log::info!("invoking tool '{name}' with input {:?}", tool_input);
            }
            Ok(())
        }
    });

    let agent = Agent::builder()
        .model(model)
        .tool(Arc::new(calculate))
        .permissions(permissions)
        .register_hook(HookPhase::PreToolUse, log_tool_call)
        .system_prompt("Use the calculate tool for arithmetic instead of doing it yourself.")
        .build()?;

    let response = agent
        .create_response(CreateResponseOptions::input("What's 17 * 6?"))
        .await?;

    for message in &response.output_messages {
        println!("{:?}: {}", message.role, message.text());
    }

    Ok(())
}
