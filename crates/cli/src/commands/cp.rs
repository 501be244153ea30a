//! cp command - Copy one source to one or more targets
//!
//! Every cp invocation runs inside a session: the source is enumerated once
//! into the session's data stream, then items are transferred in order with
//! the cursor persisted after each one. Ctrl-C flushes the cursor so the
//! interrupted run can be picked up with `dm session resume`.

use std::sync::Arc;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use dm_core::session::{CommandType, Session, SessionStore};
use dm_core::transfer::{TransferExecutor, TransferItem};
use dm_core::url::join_url;
use dm_core::{ClientFactory, RetryConfig};

use crate::commands::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy a file or subtree to one or more targets
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source URL; suffix with `...` to copy a whole subtree
    pub source: String,

    /// One or more target URLs
    #[arg(required = true)]
    pub targets: Vec<String>,
}

#[derive(Serialize)]
struct CpOutput {
    session: String,
    copied: u64,
    bytes: u64,
    completed: bool,
}

/// Execute the cp command
pub async fn execute(args: CpArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let ctx = match Context::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return ExitCode::GeneralError;
        }
    };

    // First resolution failure aborts the whole invocation, before any
    // session exists.
    let source = match dm_core::url::resolve(&args.source, &ctx.config.aliases) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid source: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let mut targets = Vec::with_capacity(args.targets.len());
    for target in &args.targets {
        match dm_core::url::resolve(target, &ctx.config.aliases) {
            Ok(r) => targets.push(r),
            Err(e) => {
                formatter.error(&format!("Invalid target '{target}': {e}"));
                return ExitCode::from_error(&e);
            }
        }
    }

    let session_store = SessionStore::new(ctx.store.session_dir());
    let mut command_args = vec![args.source.clone()];
    command_args.extend(args.targets.iter().cloned());
    let session = match session_store.create(CommandType::Cp, command_args) {
        Ok(s) => s,
        Err(e) => {
            formatter.error(&format!("Failed to create session: {e}"));
            return ExitCode::GeneralError;
        }
    };

    if let Err(e) = populate(&session, &ctx, &source, &targets).await {
        formatter.error(&format!("Failed to enumerate source: {e}"));
        let _ = session.delete();
        return ExitCode::from_error(&e);
    }
    if let Err(e) = session.finish_populating() {
        formatter.error(&format!("Failed to persist session: {e}"));
        let _ = session.delete();
        return ExitCode::GeneralError;
    }

    match run_session(&session, ctx.factory.clone(), &formatter).await {
        SessionOutcome::Completed { copied, bytes } => {
            report_completed(&formatter, &session.id(), copied, bytes);
            ExitCode::Success
        }
        SessionOutcome::Failed(code) => code,
    }
}

/// Enumerate the source into the session's data stream.
async fn populate(
    session: &Session,
    ctx: &Context,
    source: &dm_core::url::ResolvedUrl,
    targets: &[dm_core::url::ResolvedUrl],
) -> dm_core::Result<()> {
    let source_base = source.to_url_string();
    let client = ctx.factory.new_client(source).await?;

    if source.recursive {
        let mut rx = client.list(true, false).await?;
        while let Some(entry) = rx.recv().await {
            let entry = entry?;
            if entry.is_dir {
                continue;
            }
            let content_hash = entry.etag.clone().filter(|etag| !etag.contains('-'));
            for target in targets {
                session.add_item(&TransferItem {
                    source_url: join_url(&source_base, &entry.key),
                    target_url: join_url(&target.to_url_string(), &entry.key),
                    length: entry.size,
                    content_hash: content_hash.clone(),
                })?;
            }
        }
    } else {
        let entry = client.stat("").await?;
        for target in targets {
            session.add_item(&TransferItem {
                source_url: source_base.clone(),
                target_url: target.to_url_string(),
                length: entry.size,
                content_hash: entry.etag.clone().filter(|etag| !etag.contains('-')),
            })?;
        }
    }
    Ok(())
}

/// Result of driving a session's remaining items.
pub(crate) enum SessionOutcome {
    /// Every item transferred and the session files removed.
    Completed { copied: u64, bytes: u64 },
    /// Transfer stopped early; an active session stays on disk.
    Failed(ExitCode),
}

/// Transfer a session's remaining items in order. Shared with
/// `session resume` and `mirror`.
pub(crate) async fn run_session(
    session: &Session,
    factory: Arc<dyn ClientFactory>,
    formatter: &Formatter,
) -> SessionOutcome {
    let executor = TransferExecutor::new(factory, RetryConfig::default());

    let items = match session.items() {
        Ok(items) => items,
        Err(e) => {
            formatter.error(&format!("Failed to read session items: {e}"));
            return SessionOutcome::Failed(ExitCode::GeneralError);
        }
    };
    let start = session.resume_index();
    let id = session.id();

    let progress = if formatter.colors_enabled() && !formatter.is_quiet() {
        let pb = ProgressBar::new(items.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("valid template")
                .progress_chars("#>-"),
        );
        pb.set_position(start as u64);
        pb.set_message("Copying...");
        Some(pb)
    } else {
        None
    };

    let mut copied: u64 = 0;
    let mut bytes: u64 = 0;
    let mut interrupted = false;

    for (index, item) in items.iter().enumerate().skip(start) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
            result = executor.copy_item(item) => match result {
                Ok(()) => {
                    if let Err(e) = session.mark_copied(index, item) {
                        formatter.error(&format!("Failed to record progress: {e}"));
                        return SessionOutcome::Failed(ExitCode::GeneralError);
                    }
                    copied += 1;
                    bytes += item.length;
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                }
                Err(e) => {
                    if let Some(pb) = &progress {
                        pb.abandon();
                    }
                    formatter.error(&format!(
                        "{} -> {}: {e}",
                        item.source_url, item.target_url
                    ));
                    // Cursor still points at the last completed item.
                    let _ = session.flush();
                    formatter.println(&format!("Resume with: dm session resume {id}"));
                    return SessionOutcome::Failed(ExitCode::from_error(&e));
                }
            }
        }
    }

    if interrupted {
        if let Some(pb) = &progress {
            pb.abandon();
        }
        if let Err(e) = session.flush() {
            formatter.error(&format!("Failed to flush session: {e}"));
        }
        formatter.warning("Interrupted.");
        formatter.println(&format!("Resume with: dm session resume {id}"));
        return SessionOutcome::Failed(ExitCode::GeneralError);
    }

    if let Some(pb) = &progress {
        pb.finish_with_message("Done");
    }
    if let Err(e) = session.complete() {
        formatter.error(&format!("Failed to complete session: {e}"));
        return SessionOutcome::Failed(ExitCode::GeneralError);
    }

    SessionOutcome::Completed { copied, bytes }
}

/// Report a completed session the way `cp` and `session resume` print it.
pub(crate) fn report_completed(formatter: &Formatter, session: &str, copied: u64, bytes: u64) {
    if formatter.is_json() {
        formatter.json(&CpOutput {
            session: session.to_string(),
            copied,
            bytes,
            completed: true,
        });
    } else {
        let size = humansize::format_size(bytes, humansize::BINARY);
        let styled_size = formatter.style_size(&size);
        formatter.success(&format!("Copied {copied} object(s), {styled_size}."));
    }
}
