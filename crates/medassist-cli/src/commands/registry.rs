use anyhow::{Context, Result};
use colored::Colorize;
use medassist_client::{RegistryClient, SubAgent, Tool};
use medassist_config::AssistantConfig;

use crate::cli::{AgentsCommand, ToolsCommand};

fn client(config: &AssistantConfig) -> RegistryClient {
    RegistryClient::new(config.backend.clone())
}

fn enabled_marker(enabled: bool) -> colored::ColoredString {
    if enabled {
        "on ".green()
    } else {
        "off".red()
    }
}

fn tool_row(tool: &Tool) -> String {
    format!(
        "{:>5}  {}  {:<24} {}",
        tool.id.map(|id| id.to_string()).unwrap_or_default(),
        enabled_marker(tool.enabled),
        tool.name,
        tool.description
    )
}

fn agent_row(agent: &SubAgent) -> String {
    format!(
        "{:>5}  {}  {:<24} {}",
        agent.id.map(|id| id.to_string()).unwrap_or_default(),
        enabled_marker(agent.enabled),
        agent.name,
        agent.description
    )
}

pub async fn tools(config: AssistantConfig, command: ToolsCommand) -> Result<()> {
    let registry = client(&config);
    match command {
        ToolsCommand::List => {
            let tools = registry.list_tools().await.context("Failed to list tools")?;
            if tools.is_empty() {
                println!("No tools registered");
            }
            for tool in &tools {
                println!("{}", tool_row(tool));
            }
        }
    }
    Ok(())
}

pub async fn agents(config: AssistantConfig, command: AgentsCommand) -> Result<()> {
    let registry = client(&config);
    match command {
        AgentsCommand::List => {
            let agents = registry.list_agents().await.context("Failed to list agents")?;
            if agents.is_empty() {
                println!("No agents configured");
            }
            for agent in &agents {
                println!("{}", agent_row(agent));
            }
        }
        AgentsCommand::Toggle { id } => {
            let agent = registry
                .toggle_agent(id)
                .await
                .with_context(|| format!("Failed to toggle agent {}", id))?;
            println!("{}", agent_row(&agent));
        }
        AgentsCommand::Clone { id } => {
            let agent = registry
                .clone_agent(id)
                .await
                .with_context(|| format!("Failed to clone agent {}", id))?;
            println!("{}", agent_row(&agent));
        }
    }
    Ok(())
}
