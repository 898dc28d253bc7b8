//! Interactive console for driving an offer draft against a live backend.
//!
//! This is an operator and debugging surface; the desktop client embeds
//! [`offerkern::OfferCore`] directly.

use std::io::Write as _;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use offerkern::config::CoreConfig;
use offerkern::ledger::PositionPatch;
use offerkern::wizard::{numeric, QuantityOutcome, WizardView};
use offerkern::{CoreError, OfferCore};

#[derive(Parser)]
#[command(
    name = "offerkern",
    about = "Werkbank offer assembly console",
    version
)]
struct Args {
    /// Path to offerkern.toml (default: ./offerkern.toml)
    #[arg(long, env = "OFFERKERN_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Base URL of the offer backend
    #[arg(long, env = "OFFERKERN_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the offer backend
    #[arg(long, env = "OFFERKERN_API_TOKEN")]
    api_token: Option<String>,

    /// VAT rate applied to the net total (0.19 = 19%)
    #[arg(long, env = "OFFERKERN_VAT_RATE")]
    vat_rate: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "OFFERKERN_LOG")]
    log: Option<String>,

    /// Log output format: pretty or json
    #[arg(long, env = "OFFERKERN_LOG_FORMAT")]
    log_format: Option<String>,
}

fn setup_logging(log_level: &str, log_format: &str) {
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CoreConfig::new(
        args.config,
        args.api_url,
        args.api_token,
        args.vat_rate,
        args.log,
        args.log_format,
    );
    setup_logging(&config.log, &config.log_format);

    let core = OfferCore::connect(config).context("failed to build backend client")?;

    // Echo every core event so state changes from background tasks (guard
    // rechecks in particular) are visible between prompts.
    let mut events = core.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => println!("event> {json}"),
                Err(err) => debug!(error = %err, "unserializable event"),
            }
        }
    });

    println!("offerkern console — type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, rest) = match line.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };
        if matches!(cmd, "quit" | "exit") {
            break;
        }
        if let Err(err) = run_command(&core, cmd, rest).await {
            println!("error: {err}");
        }
    }
    Ok(())
}

async fn run_command(core: &OfferCore, cmd: &str, rest: &str) -> Result<(), CoreError> {
    match cmd {
        "help" => print_help(),
        // Wizard
        "start" => print_view(&core.wizard.start().await?),
        "a" | "answer" => print_view(&core.wizard.answer(rest.into()).await?),
        "num" => match core.wizard.confirm_quantity(rest).await? {
            QuantityOutcome::Submitted(view) => print_view(&view),
            QuantityOutcome::Dropped => println!("(dropped — submission already in flight)"),
        },
        "multi" => {
            let items: Vec<String> = rest
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            print_view(&core.wizard.answer(items.into()).await?);
        }
        "back" => print_view(&core.wizard.back().await?),
        "finalize" => {
            let offer = core.finalize_wizard().await?;
            println!("{}", offer.summary);
            print_positions(core);
        }
        "reset" => {
            core.wizard.reset().await?;
            println!("wizard reset");
        }
        // Chat
        "chat" => {
            let outcome = core.chat.on_reply(rest, "", false).await;
            println!("{outcome:?}");
        }
        "reply" => {
            let outcome = core.chat.on_reply("", rest, false).await;
            println!("{outcome:?}");
        }
        // Ledger
        "pos" | "positions" => print_positions(core),
        "totals" => print_totals(core),
        "rm" => match rest.parse::<u32>() {
            Ok(nr) => match core.ledger.remove(nr) {
                Some(_) => print_positions(core),
                None => println!("no position {nr}"),
            },
            Err(_) => println!("usage: rm <nr>"),
        },
        "set" => set_field(core, rest),
        "new" => {
            core.new_offer().await?;
            println!("new draft started");
        }
        // Guard
        "guard" => print_guard(core),
        "recheck" => {
            core.guard.recheck_now().await;
            print_guard(core);
        }
        "accept" => {
            let status = core.guard.status();
            let suggestion = status
                .result
                .as_ref()
                .and_then(|r| r.missing.iter().find(|s| s.id == rest))
                .cloned();
            match suggestion {
                Some(s) => {
                    core.guard.accept(&s).await?;
                    print_positions(core);
                }
                None => println!("no open suggestion with id '{rest}'"),
            }
        }
        other => println!("unknown command '{other}' — try 'help'"),
    }
    Ok(())
}

fn set_field(core: &OfferCore, rest: &str) {
    let mut parts = rest.splitn(3, ' ');
    let (nr, field, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(nr), Some(field), Some(value)) => (nr, field, value.trim()),
        _ => {
            println!("usage: set <nr> <name|menge|einheit|epreis> <value>");
            return;
        }
    };
    let nr = match nr.parse::<u32>() {
        Ok(nr) => nr,
        Err(_) => {
            println!("usage: set <nr> <field> <value>");
            return;
        }
    };
    let patch = match field {
        "name" => PositionPatch::Name(value.to_string()),
        "menge" => PositionPatch::Menge(numeric::coerce_quantity(value)),
        "einheit" => PositionPatch::Einheit(value.to_string()),
        "epreis" => PositionPatch::Epreis(numeric::coerce_quantity(value)),
        other => {
            println!("unknown field '{other}'");
            return;
        }
    };
    match core.ledger.update(nr, patch) {
        Some(_) => print_positions(core),
        None => println!("no position {nr}"),
    }
}

fn print_view(view: &WizardView) {
    match (&view.question, view.done) {
        (_, true) => println!("all questions answered — 'finalize' to build the offer"),
        (Some(question), _) => {
            println!("[{}] {question}", view.step.as_deref().unwrap_or("?"));
            if let Some(ui) = &view.ui {
                println!("    input: {ui:?}");
            }
        }
        (None, _) => println!("state: {:?}", view.state),
    }
    for line in &view.preview {
        println!("    ~ {} ({})", line.name, line.text);
    }
}

fn print_positions(core: &OfferCore) {
    let snapshot = core.ledger.snapshot();
    if snapshot.positions.is_empty() {
        println!("(no positions)");
        return;
    }
    for p in &snapshot.positions {
        println!(
            "{:>3}  {:<36} {:>8.2} {:<6} {:>9.2} {:>11.2}",
            p.nr, p.name, p.menge, p.einheit, p.epreis, p.gesamtpreis
        );
    }
    print_totals(core);
}

fn print_totals(core: &OfferCore) {
    let t = core.ledger.totals();
    println!(
        "netto {:>10.2}   steuer {:>8.2}   brutto {:>10.2}",
        t.netto, t.steuer, t.brutto
    );
}

fn print_guard(core: &OfferCore) {
    let status = core.guard.status();
    match &status.result {
        None => println!("guard: unknown (no successful check yet)"),
        Some(result) if result.passed => println!("guard: passed"),
        Some(result) => {
            println!("guard: {} open suggestion(s)", result.missing.len());
            for s in &result.missing {
                println!("  [{}] {:?} {} — {}", s.id, s.severity, s.name, s.reason);
            }
        }
    }
}

fn print_help() {
    println!(
        "wizard:  start | a <text> | num <quantity> | multi <a,b,c> | back | finalize | reset\n\
         chat:    chat <outgoing> | reply <assistant reply>\n\
         ledger:  pos | totals | rm <nr> | set <nr> <field> <value> | new\n\
         guard:   guard | recheck | accept <suggestion-id>\n\
         other:   help | quit"
    );
}
