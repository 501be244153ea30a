//! mirror command - Synchronize a source tree onto a target
//!
//! The work list comes from the streaming diff engine: keys only in the
//! source are copied, differing keys are copied when --overwrite is set, and
//! keys only on the target are deleted when --remove is set. Copies run
//! inside a session, so an interrupted mirror is picked up with
//! `dm session resume` like an interrupted cp. With --watch the command
//! keeps running after the initial pass and applies create/remove events
//! from the watcher fan-in.

use clap::Args;
use serde::Serialize;

use dm_core::diff::{DiffEntry, DiffKind, DiffOptions, diff_trees};
use dm_core::session::{CommandType, SessionStore};
use dm_core::transfer::{TransferExecutor, TransferItem};
use dm_core::url::join_url;
use dm_core::watcher::Watcher;
use dm_core::{EventKind, RetryConfig};

use crate::commands::Context;
use crate::commands::cp::{SessionOutcome, run_session};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Synchronize a source tree onto a target
#[derive(Args, Debug)]
pub struct MirrorArgs {
    /// Source tree
    pub source: String,

    /// Target tree
    pub target: String,

    /// Remove target objects that have no source counterpart
    #[arg(long)]
    pub remove: bool,

    /// Overwrite target objects that differ from the source
    #[arg(long)]
    pub overwrite: bool,

    /// Show what would be done without doing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Keep watching the source and mirror changes as they happen
    #[arg(long)]
    pub watch: bool,
}

#[derive(Debug, Serialize)]
struct MirrorOutput {
    source: String,
    target: String,
    copied: usize,
    removed: usize,
    skipped: usize,
    errors: usize,
    dry_run: bool,
}

/// Work list derived from one diff pass.
#[derive(Debug, Default)]
struct Plan {
    to_copy: Vec<String>,
    to_remove: Vec<String>,
    skipped: usize,
    errors: usize,
}

fn plan_actions(
    entries: impl IntoIterator<Item = dm_core::Result<DiffEntry>>,
    overwrite: bool,
    remove: bool,
) -> Plan {
    let mut plan = Plan::default();
    for result in entries {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "diff entry failed");
                plan.errors += 1;
                continue;
            }
        };
        match entry.kind {
            DiffKind::OnlyInFirst => {
                if let Some(key) = entry.first {
                    plan.to_copy.push(key);
                }
            }
            DiffKind::Size | DiffKind::Metadata | DiffKind::Type => {
                if overwrite {
                    if let Some(key) = entry.first {
                        plan.to_copy.push(key);
                    }
                } else {
                    plan.skipped += 1;
                }
            }
            DiffKind::OnlyInSecond => {
                if remove {
                    if let Some(key) = entry.second {
                        plan.to_remove.push(key);
                    }
                } else {
                    plan.skipped += 1;
                }
            }
            DiffKind::None => plan.skipped += 1,
        }
    }
    plan
}

/// Session items for the plan's copy list.
fn plan_items(to_copy: &[String], source_base: &str, target_base: &str) -> Vec<TransferItem> {
    to_copy
        .iter()
        .map(|key| TransferItem {
            source_url: join_url(source_base, key),
            target_url: join_url(target_base, key),
            length: 0,
            content_hash: None,
        })
        .collect()
}

/// Execute the mirror command
pub async fn execute(args: MirrorArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let ctx = match Context::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return ExitCode::GeneralError;
        }
    };

    let source = match dm_core::url::resolve(&args.source, &ctx.config.aliases) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid source: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let target = match dm_core::url::resolve(&args.target, &ctx.config.aliases) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid target: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let source_base = source.to_url_string();
    let target_base = target.to_url_string();

    let source_client = match ctx.factory.new_client(&source).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {source_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let target_client = match ctx.factory.new_client(&target).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {target_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    // Diff pass builds the work list.
    let first_rx = match source_client.list(true, false).await {
        Ok(rx) => rx,
        Err(e) => {
            formatter.error(&format!("Failed to list {source_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let second_rx = match target_client.list(true, false).await {
        Ok(rx) => rx,
        Err(e) => {
            formatter.error(&format!("Failed to list {target_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let mut diffs = diff_trees(first_rx, second_rx, DiffOptions::default());
    let mut entries = Vec::new();
    while let Some(result) = diffs.recv().await {
        entries.push(result);
    }
    let plan = plan_actions(entries, args.overwrite, args.remove);

    if args.dry_run {
        output_dry_run(&args, &plan, &formatter);
        return ExitCode::Success;
    }

    // Copies run inside a session, so a failed or interrupted mirror keeps
    // its resume cursor.
    let mut copied: u64 = 0;
    let mut errors = plan.errors;

    if !plan.to_copy.is_empty() {
        let session_store = SessionStore::new(ctx.store.session_dir());
        let session = match session_store.create(
            CommandType::Mirror,
            vec![args.source.clone(), args.target.clone()],
        ) {
            Ok(s) => s,
            Err(e) => {
                formatter.error(&format!("Failed to create session: {e}"));
                return ExitCode::GeneralError;
            }
        };

        let mut persisted = Ok(());
        for item in plan_items(&plan.to_copy, &source_base, &target_base) {
            persisted = session.add_item(&item);
            if persisted.is_err() {
                break;
            }
        }
        let persisted = persisted.and_then(|()| session.finish_populating());
        if let Err(e) = persisted {
            formatter.error(&format!("Failed to persist session: {e}"));
            let _ = session.delete();
            return ExitCode::GeneralError;
        }

        match run_session(&session, ctx.factory.clone(), &formatter).await {
            SessionOutcome::Completed { copied: done, .. } => copied = done,
            SessionOutcome::Failed(code) => return code,
        }
    }

    let mut removed = 0;
    for key in &plan.to_remove {
        match target_client.delete(key).await {
            Ok(()) => {
                removed += 1;
                if !formatter.is_json() {
                    formatter.println(&format!("- {key}"));
                }
            }
            Err(e) => {
                errors += 1;
                formatter.error(&format!("Failed to remove {key}: {e}"));
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&MirrorOutput {
            source: args.source.clone(),
            target: args.target.clone(),
            copied: copied as usize,
            removed,
            skipped: plan.skipped,
            errors,
            dry_run: false,
        });
    } else {
        formatter.println(&format!(
            "Mirror complete: {copied} copied, {removed} removed, {} skipped, {errors} errors",
            plan.skipped
        ));
    }

    if args.watch {
        let executor = TransferExecutor::new(ctx.factory.clone(), RetryConfig::default());
        return watch_and_mirror(&args, &ctx, &source, &target, &executor, &formatter).await;
    }

    if errors > 0 {
        ExitCode::GeneralError
    } else {
        ExitCode::Success
    }
}

fn output_dry_run(args: &MirrorArgs, plan: &Plan, formatter: &Formatter) {
    if formatter.is_json() {
        formatter.json(&MirrorOutput {
            source: args.source.clone(),
            target: args.target.clone(),
            copied: plan.to_copy.len(),
            removed: plan.to_remove.len(),
            skipped: plan.skipped,
            errors: plan.errors,
            dry_run: true,
        });
        return;
    }

    if !plan.to_copy.is_empty() {
        formatter.println(&format!("Would copy {} object(s):", plan.to_copy.len()));
        for key in &plan.to_copy {
            formatter.println(&format!("  + {key}"));
        }
    }
    if !plan.to_remove.is_empty() {
        formatter.println(&format!("Would remove {} object(s):", plan.to_remove.len()));
        for key in &plan.to_remove {
            formatter.println(&format!("  - {key}"));
        }
    }
    formatter.println(&format!(
        "Summary: {} to copy, {} to remove, {} skipped",
        plan.to_copy.len(),
        plan.to_remove.len(),
        plan.skipped
    ));
}

/// Continuous mode: apply watcher events to the target until interrupted.
async fn watch_and_mirror(
    args: &MirrorArgs,
    ctx: &Context,
    source: &dm_core::url::ResolvedUrl,
    target: &dm_core::url::ResolvedUrl,
    executor: &TransferExecutor,
    formatter: &Formatter,
) -> ExitCode {
    let source_base = source.to_url_string();
    let target_base = target.to_url_string();

    let source_client = match ctx.factory.new_client(source).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {source_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let target_client = match ctx.factory.new_client(target).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {target_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let (mut watcher, mut events, mut errors) = Watcher::new();
    if let Err(e) = watcher.join(source_client.as_ref(), true).await {
        formatter.error(&format!("Watch is not available for {source_base}: {e}"));
        return ExitCode::from_error(&e);
    }
    formatter.println("Watching for changes. Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let Some(key) = relative_key(&source_base, &event.path) else {
                    continue;
                };
                match event.kind {
                    EventKind::Created => {
                        let item = TransferItem {
                            source_url: event.path.clone(),
                            target_url: join_url(&target_base, &key),
                            length: 0,
                            content_hash: None,
                        };
                        match executor.copy_item(&item).await {
                            Ok(()) => {
                                if !formatter.is_json() {
                                    formatter.println(&format!("+ {key}"));
                                }
                            }
                            Err(e) => formatter.error(&format!("Failed to copy {key}: {e}")),
                        }
                    }
                    EventKind::Removed => {
                        if !args.remove {
                            continue;
                        }
                        match target_client.delete(&key).await {
                            Ok(()) => {
                                if !formatter.is_json() {
                                    formatter.println(&format!("- {key}"));
                                }
                            }
                            Err(e) => formatter.error(&format!("Failed to remove {key}: {e}")),
                        }
                    }
                }
            }
            error = errors.recv() => {
                if let Some(e) = error {
                    formatter.warning(&format!("Watch error: {e}"));
                }
            }
        }
    }

    watcher.stop().await;
    ExitCode::Success
}

/// Key of `path` relative to `base`, if it lies under it.
fn relative_key(base: &str, path: &str) -> Option<String> {
    path.strip_prefix(base)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(first: Option<&str>, second: Option<&str>, kind: DiffKind) -> dm_core::Result<DiffEntry> {
        Ok(DiffEntry {
            first: first.map(str::to_string),
            second: second.map(str::to_string),
            kind,
        })
    }

    #[test]
    fn test_plan_copies_new_and_skips_different() {
        let plan = plan_actions(
            vec![
                entry(Some("a"), None, DiffKind::OnlyInFirst),
                entry(Some("b"), Some("b"), DiffKind::Size),
                entry(None, Some("c"), DiffKind::OnlyInSecond),
            ],
            false,
            false,
        );
        assert_eq!(plan.to_copy, vec!["a"]);
        assert!(plan.to_remove.is_empty());
        assert_eq!(plan.skipped, 2);
    }

    #[test]
    fn test_plan_overwrite_and_remove() {
        let plan = plan_actions(
            vec![
                entry(Some("b"), Some("b"), DiffKind::Metadata),
                entry(None, Some("c"), DiffKind::OnlyInSecond),
            ],
            true,
            true,
        );
        assert_eq!(plan.to_copy, vec!["b"]);
        assert_eq!(plan.to_remove, vec!["c"]);
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn test_plan_items_join_full_urls() {
        let items = plan_items(
            &["a.txt".to_string(), "sub/b.txt".to_string()],
            "/var/www",
            "http://h:9000/bucket/site",
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_url, "/var/www/a.txt");
        assert_eq!(items[0].target_url, "http://h:9000/bucket/site/a.txt");
        assert_eq!(items[1].source_url, "/var/www/sub/b.txt");
        assert_eq!(items[1].target_url, "http://h:9000/bucket/site/sub/b.txt");
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(
            relative_key("/data", "/data/a/b.txt"),
            Some("a/b.txt".to_string())
        );
        assert_eq!(relative_key("/data", "/elsewhere/x"), None);
        assert_eq!(relative_key("/data", "/data"), None);
    }
}
