//! Spring inventory keeper
//!
//! # Usage
//!
//! ```bash
//! # Try it out without a spreadsheet
//! cargo run -p keeper-cli -- repl --memory
//!
//! # Against Google Sheets
//! export KEEPER_SPREADSHEET_ID="..."
//! export KEEPER_SHEETS_TOKEN="..."
//! cargo run -p keeper-cli -- repl --user 1001
//!
//! # Serve Telegram
//! export TELEGRAM_BOT_TOKEN="..."
//! cargo run -p keeper-cli -- telegram
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use keeper_inventory::audit::Actor;
use keeper_inventory::bot::{BotConfig, ConversationController, InboundEvent, Reply};
use keeper_inventory::platforms::{TelegramBot, TelegramConfig};
use keeper_inventory::{SheetsClient, SheetsConfig};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::info;

const DEFAULT_FILTER: &str = "warn,keeper_inventory=info,keeper_cli=info";

#[derive(Parser, Debug)]
#[command(name = "keeper")]
#[command(about = "Chat-driven spring inventory", long_about = None)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Talk to the bot from the terminal. Lines starting with `!` press a button.
    Repl {
        /// Sender id recorded in the audit log
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Sender name recorded in the audit log
        #[arg(short, long)]
        name: Option<String>,

        /// Use throwaway in-memory tables instead of Google Sheets
        #[arg(long)]
        memory: bool,
    },
    /// Serve the bot over Telegram long polling
    Telegram {
        /// Use throwaway in-memory tables instead of Google Sheets
        #[arg(long)]
        memory: bool,
    },
}

fn build_controller(memory: bool) -> anyhow::Result<ConversationController> {
    let config = BotConfig::from_env().context("invalid bot configuration")?;

    if memory {
        info!("Using in-memory tables");
        return Ok(ConversationController::in_memory(config));
    }

    let sheets = SheetsConfig::from_env().context("invalid Google Sheets configuration")?;
    let client = SheetsClient::new(&sheets)?;
    info!(
        spreadsheet = %sheets.spreadsheet_id,
        inventory = %sheets.inventory_sheet,
        audit = %sheets.audit_sheet,
        "Using Google Sheets"
    );

    // The audit tab is append-only, so its gid is never used
    Ok(ConversationController::from_tables(
        Arc::new(client.table(&sheets.inventory_sheet, sheets.inventory_sheet_gid)),
        Arc::new(client.table(&sheets.audit_sheet, 0)),
        config,
    ))
}

fn print_reply(reply: &Reply) {
    println!("{}", reply.text);
    for row in reply.buttons() {
        let row: Vec<String> = row
            .iter()
            .map(|b| format!("[{}  !{}]", b.label, b.token))
            .collect();
        println!("  {}", row.join(" "));
    }
    println!();
}

async fn run_repl(controller: ConversationController, actor: Actor) -> anyhow::Result<()> {
    println!("Spring keeper. Type /help for commands, Ctrl-D to quit.");
    println!("Press a button with !<label> or !<token>.\n");
    let mut last = controller.handle(InboundEvent::text(actor.clone(), "/start")).await;
    print_reply(&last);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {e}");
                continue;
            }
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // `!Move` presses the button labelled Move, anything else is a raw token
        let event = match input.strip_prefix('!').map(str::trim) {
            Some(pressed) => {
                let token = last.token_for(pressed).unwrap_or_else(|| pressed.to_string());
                InboundEvent::button(actor.clone(), token)
            }
            None => InboundEvent::text(actor.clone(), input),
        };
        last = controller.handle(event).await;
        print_reply(&last);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.json_logs {
        keeper_utils::init_json_tracing(DEFAULT_FILTER);
    } else {
        keeper_utils::init_tracing(DEFAULT_FILTER);
    }

    match args.mode {
        Mode::Repl { user, name, memory } => {
            let controller = build_controller(memory)?;
            run_repl(controller, Actor::new(user, name)).await
        }
        Mode::Telegram { memory } => {
            let controller = build_controller(memory)?;
            let telegram = TelegramConfig::from_env()?;
            info!("Starting Telegram bot");
            TelegramBot::new(telegram, controller)?.run().await?;
            Ok(())
        }
    }
}
