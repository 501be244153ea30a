//! session command - Inspect, resume and clear interrupted sessions

use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;

use dm_core::session::{SessionHeader, SessionStore};

use crate::commands::Context;
use crate::commands::cp::{SessionOutcome, report_completed, run_session};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List saved sessions
    List,

    /// Resume an interrupted session
    Resume(ResumeArgs),

    /// Delete a saved session, or all of them
    Clear(ClearArgs),
}

/// Arguments for the `session resume` command
#[derive(clap::Args, Debug)]
pub struct ResumeArgs {
    /// Session id, as shown by `session list`
    pub id: String,
}

/// Arguments for the `session clear` command
#[derive(clap::Args, Debug)]
pub struct ClearArgs {
    /// Session id, or `all`
    pub id: String,
}

#[derive(Serialize)]
struct SessionListOutput {
    sessions: Vec<SessionHeader>,
}

#[derive(Serialize)]
struct SessionClearOutput {
    cleared: Vec<String>,
}

/// Execute a session subcommand
pub async fn execute(cmd: SessionCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let ctx = match Context::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return ExitCode::GeneralError;
        }
    };
    let store = SessionStore::new(ctx.store.session_dir());

    match cmd {
        SessionCommands::List => execute_list(&store, &formatter),
        SessionCommands::Resume(args) => execute_resume(args, &store, &ctx, &formatter).await,
        SessionCommands::Clear(args) => execute_clear(args, &store, &formatter),
    }
}

fn execute_list(store: &SessionStore, formatter: &Formatter) -> ExitCode {
    let headers = match store.list() {
        Ok(headers) => headers,
        Err(e) => {
            formatter.error(&format!("Failed to list sessions: {e}"));
            return ExitCode::GeneralError;
        }
    };

    if formatter.is_json() {
        formatter.json(&SessionListOutput { sessions: headers });
        return ExitCode::Success;
    }

    if headers.is_empty() {
        formatter.println("No saved sessions.");
        return ExitCode::Success;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        ["ID", "COMMAND", "CREATED", "PROGRESS", "SIZE"]
            .map(|h| Cell::new(h).fg(Color::Cyan)),
    );

    for header in &headers {
        let done = header.cursor.map(|c| c + 1).unwrap_or(0);
        table.add_row(vec![
            header.id.clone(),
            format!("{} {}", header.command_type, header.command_args.join(" ")),
            header.created_at.strftime("%Y-%m-%d %H:%M").to_string(),
            format!("{done}/{}", header.total_objects),
            humansize::format_size(header.total_bytes, humansize::BINARY),
        ]);
    }
    formatter.println(&table.to_string());
    ExitCode::Success
}

async fn execute_resume(
    args: ResumeArgs,
    store: &SessionStore,
    ctx: &Context,
    formatter: &Formatter,
) -> ExitCode {
    let session = match store.load(&args.id) {
        Ok(s) => s,
        Err(e) => {
            formatter.error(&format!("Cannot resume '{}': {e}", args.id));
            return ExitCode::from_error(&e);
        }
    };

    if !formatter.is_json() {
        let header = session.header();
        let styled_id = formatter.style_name(&header.id);
        formatter.println(&format!(
            "Resuming session {styled_id}: {} {}",
            header.command_type,
            header.command_args.join(" ")
        ));
    }

    let id = session.id();
    match run_session(&session, ctx.factory.clone(), formatter).await {
        SessionOutcome::Completed { copied, bytes } => {
            report_completed(formatter, &id, copied, bytes);
            ExitCode::Success
        }
        SessionOutcome::Failed(code) => code,
    }
}

fn execute_clear(args: ClearArgs, store: &SessionStore, formatter: &Formatter) -> ExitCode {
    let ids: Vec<String> = if args.id == "all" {
        match store.list() {
            Ok(headers) => headers.into_iter().map(|h| h.id).collect(),
            Err(e) => {
                formatter.error(&format!("Failed to list sessions: {e}"));
                return ExitCode::GeneralError;
            }
        }
    } else {
        vec![args.id.clone()]
    };

    let mut cleared = Vec::new();
    for id in &ids {
        match store.clear(id) {
            Ok(()) => cleared.push(id.clone()),
            Err(e) => {
                formatter.error(&format!("Failed to clear '{id}': {e}"));
                return ExitCode::from_error(&e);
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&SessionClearOutput { cleared });
    } else if cleared.is_empty() {
        formatter.println("Nothing to clear.");
    } else {
        formatter.success(&format!("Cleared {} session(s).", cleared.len()));
    }
    ExitCode::Success
}
