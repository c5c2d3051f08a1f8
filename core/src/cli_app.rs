use crate::backend::{Backend, HttpBackend};
use crate::client::ChatClient;
use crate::config::Config;
use crate::error::ChatError;
use crate::protocol::Sensitivity;
use crate::session::SendOutcome;
use crate::view::{ConversationEntry, Origin};
use colored::*;
use std::time::Duration;

/// How long `send` keeps listening for echoes and bot replies
const LISTEN_WINDOW: Duration = Duration::from_secs(3);
/// How long `send` waits for evidence uploads before exiting
const DRAIN_WINDOW: Duration = Duration::from_secs(10);

/// Shared CLI implementation for the `cyberbull` binary.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("cyberbull")
        .to_string();

    let (config, positional) = Config::from_args(args.get(1..).unwrap_or_default())?;

    let Some(command) = positional.first() else {
        print_usage(&bin);
        return Ok(());
    };

    match command.as_str() {
        "send" => {
            if positional.len() < 4 {
                eprintln!(
                    "{}",
                    format!("Usage: {} send <username> <peer> <message>", bin).yellow()
                );
                return Ok(());
            }
            let message = positional[3..].join(" ");
            send_message(config, &positional[1], &positional[2], &message).await?;
        }
        "block" | "unblock" => {
            if positional.len() < 3 {
                eprintln!(
                    "{}",
                    format!("Usage: {} {} <victim> <offender>", bin, command).yellow()
                );
                return Ok(());
            }
            moderate(config, command == "block", &positional[1], &positional[2]).await?;
        }
        "settings" => {
            if positional.len() < 3 {
                eprintln!(
                    "{}",
                    format!("Usage: {} settings <username> <low|medium|high>", bin).yellow()
                );
                return Ok(());
            }
            let sensitivity: Sensitivity = positional[2].parse()?;
            save_settings(config, &positional[1], sensitivity).await?;
        }
        "presence" => {
            show_presence(config).await?;
        }
        "blocked" => {
            if positional.len() < 2 {
                eprintln!("{}", format!("Usage: {} blocked <victim>", bin).yellow());
                return Ok(());
            }
            list_blocked(config, &positional[1]).await?;
        }
        "incidents" => {
            list_incidents(config).await?;
        }
        "report" => {
            let (rest, out) = take_flag(&positional[1..], "--out");
            if rest.len() < 2 {
                eprintln!(
                    "{}",
                    format!("Usage: {} report <victim> <offender> [--out <file.zip>]", bin).yellow()
                );
                return Ok(());
            }
            download_report(config, &rest[0], &rest[1], out).await?;
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "🛡  CyberBull CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <command> [args] [--server <url>] [--sensitivity <level>]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!(
        "  {} <username> <peer> <message>  Connect, send one message, print replies",
        "send".cyan()
    );
    println!("  {} <victim> <offender>         Block a user", "block".cyan());
    println!("  {} <victim> <offender>       Unblock a user", "unblock".cyan());
    println!(
        "  {} <username> <level>       Set sensitivity (low|medium|high)",
        "settings".cyan()
    );
    println!("  {}                          List connected users", "presence".cyan());
    println!("  {} <victim>                  List users blocked by victim", "blocked".cyan());
    println!("  {}                         Show recent incidents", "incidents".cyan());
    println!(
        "  {} <victim> <offender> [--out <file>]  Download the evidence bundle (zip)",
        "report".cyan()
    );
}

/// Split `flag <value>` out of a positional list
fn take_flag(args: &[String], flag: &str) -> (Vec<String>, Option<String>) {
    let mut rest = Vec::new();
    let mut value = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            value = iter.next().cloned();
        } else {
            rest.push(arg.clone());
        }
    }
    (rest, value)
}

fn print_entry(entry: &ConversationEntry) {
    let line = match entry.origin {
        Origin::Local => entry.text.cyan(),
        Origin::Peer => entry.text.normal(),
        Origin::Bot => entry.text.yellow().bold(),
        Origin::System => entry.text.dimmed(),
    };
    println!(
        "{} {}",
        entry.received_at.format("%H:%M:%S").to_string().dimmed(),
        line
    );
}

async fn send_message(
    config: Config,
    username: &str,
    peer: &str,
    message: &str,
) -> anyhow::Result<()> {
    let sensitivity = config.sensitivity;
    let mut client = ChatClient::new(config)?;

    if let Err(e) = client.connect(username, peer, sensitivity).await {
        eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
        std::process::exit(1);
    }

    match client.send(message) {
        SendOutcome::Sent => {}
        other => {
            eprintln!("{} Message not sent: {:?}", "✗".red().bold(), other);
            std::process::exit(1);
        }
    }

    let deadline = tokio::time::Instant::now() + LISTEN_WINDOW;
    let mut printed = 0;
    while tokio::time::timeout_at(deadline, client.step()).await.is_ok() {
        for entry in &client.view().entries()[printed..] {
            print_entry(entry);
        }
        printed = client.view().len();
        if !client.session().is_connected() {
            break;
        }
    }

    // Let evidence uploads requested during the window finish
    let unfinished = client.drain_side_channels(DRAIN_WINDOW).await;
    for entry in &client.view().entries()[printed..] {
        print_entry(entry);
    }
    if unfinished > 0 {
        eprintln!(
            "{} {} evidence upload(s) did not finish",
            "⚠".yellow().bold(),
            unfinished
        );
    }

    client.disconnect().await;
    Ok(())
}

async fn moderate(config: Config, block: bool, victim: &str, offender: &str) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config)?;
    let result = if block {
        backend.block(victim, offender).await
    } else {
        backend.unblock(victim, offender).await
    };

    match result {
        Ok(()) => {
            let verb = if block { "blocked" } else { "unblocked" };
            println!(
                "{} {} {} {}",
                "✓".green().bold(),
                victim.cyan(),
                verb,
                offender.cyan()
            );
        }
        Err(e) => {
            eprintln!("{} Error: {}", "✗".red().bold(), e.to_string().red());
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn save_settings(config: Config, username: &str, sensitivity: Sensitivity) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config)?;
    match backend.submit_settings(username, sensitivity).await {
        Ok(()) => println!(
            "{} Sensitivity for {} set to {}",
            "✓".green().bold(),
            username.cyan(),
            sensitivity.to_string().yellow()
        ),
        Err(e) => {
            eprintln!("{} Error: {}", "✗".red().bold(), e.to_string().red());
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn show_presence(config: Config) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config)?;
    let active = backend.presence().await?;
    if active.is_empty() {
        println!("{}", "Nobody is connected".yellow());
        return Ok(());
    }
    println!(
        "{}",
        format!("Connected Users ({})", active.len()).bright_cyan().bold()
    );
    println!("{}", "─".repeat(40).dimmed());
    for user in active {
        println!("  {} {}", "●".green(), user.cyan());
    }
    Ok(())
}

async fn list_blocked(config: Config, victim: &str) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config)?;
    let rows = backend.blocked(victim).await?;
    if rows.is_empty() {
        println!("{}", format!("{} has not blocked anyone", victim).yellow());
        return Ok(());
    }
    println!(
        "{}",
        format!("Blocked by {} ({})", victim, rows.len()).bright_cyan().bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for row in rows {
        println!(
            "  {} [{}] since {}",
            row.offender.cyan(),
            row.status.red(),
            row.created_at.dimmed()
        );
    }
    Ok(())
}

async fn list_incidents(config: Config) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config)?;
    let incidents = backend.incidents().await?;
    if incidents.is_empty() {
        println!("{}", "No incidents recorded".yellow());
        return Ok(());
    }
    println!(
        "{}",
        format!("Incidents ({})", incidents.len()).bright_cyan().bold()
    );
    println!("{}", "─".repeat(72).dimmed());
    for inc in incidents {
        let severity = match inc.severity.as_str() {
            "blocked" => inc.severity.red().bold(),
            "final_warning" => inc.severity.red(),
            _ => inc.severity.yellow(),
        };
        let evidence = if inc.screenshot_path.is_some() {
            "📸".normal()
        } else {
            "-".dimmed()
        };
        println!(
            "  #{} {} → {} [{}] {} {}",
            inc.id,
            inc.sender.cyan(),
            inc.victim.cyan(),
            severity,
            inc.detected_words,
            evidence
        );
    }
    Ok(())
}

async fn download_report(
    config: Config,
    victim: &str,
    offender: &str,
    out: Option<String>,
) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config)?;
    let out = out.unwrap_or_else(|| format!("report_{}_vs_{}.zip", victim, offender));

    match backend.report(offender, victim).await {
        Ok(bundle) => {
            tokio::fs::write(&out, &bundle).await?;
            println!(
                "{} Evidence for {} vs {} saved to {} ({} bytes)",
                "✓".green().bold(),
                victim.cyan(),
                offender.cyan(),
                out.bright_white(),
                bundle.len()
            );
        }
        Err(ChatError::Http(e)) if e.status() == Some(reqwest::StatusCode::NOT_FOUND) => {
            eprintln!(
                "{} No incidents recorded for {} vs {}",
                "✗".red().bold(),
                victim.cyan(),
                offender.cyan()
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{} Error: {}", "✗".red().bold(), e.to_string().red());
            std::process::exit(1);
        }
    }
    Ok(())
}
