//! diff command - Compare two trees
//!
//! Streams the classified differences between two recursively listed trees.
//! Legend: `<` only in the first tree, `>` only in the second, `!` present in
//! both but different, `=` identical (only with --include-same).

use clap::Args;
use serde::Serialize;

use dm_core::diff::{DiffKind, DiffOptions, diff_trees};
use dm_core::url::join_url;

use crate::commands::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Compare two trees by size, type and modification time
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// First tree
    pub first: String,

    /// Second tree
    pub second: String,

    /// Also list keys that do not differ
    #[arg(long)]
    pub include_same: bool,
}

/// One streamed JSON record. `kind` is the wire-stable numeric code.
#[derive(Serialize)]
struct DiffRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    first: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    second: Option<String>,
    kind: DiffKind,
}

/// Execute the diff command
pub async fn execute(args: DiffArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let ctx = match Context::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return ExitCode::GeneralError;
        }
    };

    let first = match dm_core::url::resolve(&args.first, &ctx.config.aliases) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid first URL: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let second = match dm_core::url::resolve(&args.second, &ctx.config.aliases) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid second URL: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let first_base = first.to_url_string();
    let second_base = second.to_url_string();

    let first_client = match ctx.factory.new_client(&first).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {first_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let second_client = match ctx.factory.new_client(&second).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {second_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let first_rx = match first_client.list(true, false).await {
        Ok(rx) => rx,
        Err(e) => {
            formatter.error(&format!("Failed to list {first_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };
    let second_rx = match second_client.list(true, false).await {
        Ok(rx) => rx,
        Err(e) => {
            formatter.error(&format!("Failed to list {second_base}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let options = DiffOptions {
        include_same: args.include_same,
    };
    let mut diffs = diff_trees(first_rx, second_rx, options);

    let mut differences: u64 = 0;
    let mut had_error = false;

    while let Some(result) = diffs.recv().await {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                formatter.error(&e.to_string());
                had_error = true;
                continue;
            }
        };

        if entry.kind != DiffKind::None {
            differences += 1;
        }

        if formatter.is_json() {
            formatter.json_line(&DiffRecord {
                first: entry.first.as_deref().map(|k| join_url(&first_base, k)),
                second: entry.second.as_deref().map(|k| join_url(&second_base, k)),
                kind: entry.kind,
            });
            continue;
        }

        // Point the legend line at the tree that has the key; `!` and `=`
        // name the first tree's copy.
        let url = match entry.kind {
            DiffKind::OnlyInSecond => entry
                .second
                .as_deref()
                .map(|k| join_url(&second_base, k)),
            _ => entry.first.as_deref().map(|k| join_url(&first_base, k)),
        };
        if let Some(url) = url {
            formatter.println(&format!("{} {}", entry.kind.legend(), url));
        }
    }

    if had_error {
        ExitCode::GeneralError
    } else if differences > 0 {
        ExitCode::Differences
    } else {
        ExitCode::Success
    }
}
