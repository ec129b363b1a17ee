use anyhow::{Context, Result};
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use modguard::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use modguard::prelude::*;
use modguard::types::now_millis;

/// Demo runner: each stdin line is `<author> <channel> <message...>`, or a
/// `!command` issued by the moderator `console`.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting modguard v{}", modguard::VERSION);

    let config_path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = EngineConfig::load_or_create(&config_path)
        .await
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    config.apply_env_overrides();

    let store = match &config.store.data_dir {
        Some(dir) => {
            let store = MemoryStore::with_persistence(dir);
            let loaded = store.load().await.context("failed to load persisted collections")?;
            info!("Loaded {} collections from {}", loaded, dir.display());
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };
    let platform = Arc::new(InMemoryPlatform::new());

    let engine = ModerationEngine::new(config, store, platform.clone(), platform.clone())?;
    engine.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut counter = 0usize;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(command) = line.strip_prefix('!') {
                    match handle_command(&engine, command).await {
                        Ok(response) => println!("{}", response),
                        Err(e) => println!("error: {}", e),
                    }
                } else {
                    counter += 1;
                    if let Err(e) = handle_line(&engine, &platform, line, counter).await {
                        error!("Failed to process message: {}", e);
                    }
                }

                for call in platform.calls().await {
                    println!("  -> {:?}", call);
                }
                platform.clear_calls().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn handle_line(engine: &ModerationEngine, platform: &InMemoryPlatform, line: &str, counter: usize) -> Result<()> {
    let mut parts = line.splitn(3, ' ');
    let (Some(author), Some(channel), Some(content)) = (parts.next(), parts.next(), parts.next()) else {
        warn!("Expected `<author> <channel> <message>`, got: {}", line);
        return Ok(());
    };

    if !platform.member_exists(author).await? {
        platform.add_member(author, &["member"]).await;
    }

    let message = InboundMessage {
        id: format!("stdin-{}", counter),
        author_id: author.to_string(),
        channel_id: channel.to_string(),
        content: content.to_string(),
        timestamp: now_millis(),
        author_is_bot: false,
        is_system: false,
    };

    let verdict = engine.handle_message(&message).await?;
    println!("{:?}", verdict);
    Ok(())
}

async fn handle_command(engine: &ModerationEngine, command: &str) -> Result<String> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    let restriction = engine.restriction();

    let response = match parts.as_slice() {
        ["warn", target, reason @ ..] => {
            let outcome = restriction.warn(target, "console", &reason.join(" ")).await?;
            format!("{} now has {} warnings ({:?})", target, outcome.warning_count, outcome.escalation)
        }
        ["unwarn", warning_id] => {
            let outcome = restriction.unwarn(warning_id, "console").await?;
            format!("{} now has {} warnings", outcome.target, outcome.warning_count)
        }
        ["warnings", target] => {
            let warnings = restriction.warnings_for(target).await?;
            warnings
                .iter()
                .map(|w| format!("{}: {}", w.id, w.doc.reason))
                .collect::<Vec<_>>()
                .join("\n")
        }
        ["mute", target, minutes, reason @ ..] => {
            let minutes: i64 = minutes.parse().context("minutes must be a number")?;
            let outcome = restriction.mute(target, "console", minutes, &reason.join(" ")).await?;
            format!("Muted {} ({} roles stored)", target, outcome.snapshot_roles.len())
        }
        ["unmute", target] => {
            let outcome = restriction.unmute(target).await?;
            format!("Unmuted {} ({} roles restored)", target, outcome.restored_roles.len())
        }
        ["preset", channels @ ..] => {
            let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
            let report = restriction.apply_muted_preset(&channels).await;
            format!("Preset applied to {} channels", report.applied.len())
        }
        ["stats"] => {
            let stats = engine.activity().stats(now_millis()).await?;
            serde_json::to_string_pretty(&stats)?
        }
        ["jobs"] => {
            let mut out = Vec::new();
            for name in engine.registry().job_names().await {
                if let Some(stats) = engine.registry().stats(&name).await {
                    out.push(format!("{}: {:?}", name, stats));
                }
            }
            out.join("\n")
        }
        _ => "commands: warn, unwarn, warnings, mute, unmute, preset, stats, jobs".to_string(),
    };
    Ok(response)
}
