//! hotkey-replay: run the hotkey engine over a recorded key script.
//!
//! Usage: `hotkey-replay [CONFIG.ini] [SCRIPT]`
//!
//! Settings and bindings come from CONFIG (default:
//! `<config_dir>/hotkeyboard/hotkeyboard.ini`). SCRIPT holds one event per
//! line, `down|up <key> [timestamp]`; blank lines and `#` comments are
//! skipped. Without SCRIPT, events are read from stdin. Every fired binding is
//! logged, and the final stats and binding list are printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use hotkeyboard::listener::Decisions;
use hotkeyboard::{init_tracing, Action, BindingFile, ChannelSource, HotKeyboard, RawKeyEvent};

const USAGE: &str = "usage: hotkey-replay [CONFIG.ini] [SCRIPT]";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let script_path = args.next().map(PathBuf::from);
    if config_path
        .as_deref()
        .is_some_and(|p| p.as_os_str() == "-h" || p.as_os_str() == "--help")
    {
        println!("{}", USAGE);
        return Ok(());
    }

    info!("hotkey-replay v{}", env!("CARGO_PKG_VERSION"));

    let file = match &config_path {
        Some(path) => BindingFile::load(path)?,
        None => BindingFile::load_default()?,
    };
    let keyboard = Arc::new(HotKeyboard::from_binding_file(&file, |binding| {
        let name = binding.name.clone();
        Action::new(move || info!("[Replay] fired {}", name))
    }));
    keyboard.toggle_logger(true);
    info!("[Replay] {} bindings active", keyboard.hotkeys().len());

    let (source, sender, decisions) = ChannelSource::channel();
    keyboard
        .start_listening(Box::new(source))
        .context("Failed to start key source")?;
    let report = tokio::spawn(report_decisions(decisions));

    let lines: Vec<String> = match &script_path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script {}", path.display()))?
            .lines()
            .map(str::to_string)
            .collect(),
        None => read_stdin().await?,
    };

    for (number, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<RawKeyEvent>() {
            Ok(event) => sender.send(event)?,
            Err(e) => warn!("[Replay] line {}: {:#}", number + 1, e),
        }
    }
    drop(sender);

    let waiting = keyboard.clone();
    tokio::task::spawn_blocking(move || waiting.wait())
        .await
        .context("Key delivery thread failed")?;
    let suppressed = report.await.context("Decision reporter failed")?;

    let bindings: Vec<_> = keyboard.hotkeys().iter().map(|b| b.info()).collect();
    let summary = serde_json::json!({
        "stats": keyboard.stats(),
        "suppressed_events": suppressed,
        "bindings": bindings,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn read_stdin() -> Result<Vec<String>> {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut lines = Vec::new();
    while let Some(line) = reader.next_line().await.context("Failed to read stdin")? {
        lines.push(line);
    }
    Ok(lines)
}

/// Log every decision; returns the events that were suppressed.
async fn report_decisions(mut decisions: Decisions) -> Vec<String> {
    let mut suppressed = Vec::new();
    while let Some((event, swallowed)) = decisions.recv().await {
        if swallowed {
            info!("[Replay] suppressed {}", event);
            suppressed.push(event.to_string());
        }
    }
    suppressed
}
