//! watch command - Print create/remove events for a location

use clap::Args;
use serde::Serialize;

use dm_core::watcher::Watcher;

use crate::commands::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Watch a location and print change events until interrupted
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// URL to watch
    pub url: String,
}

#[derive(Serialize)]
struct WatchRecord {
    time: String,
    kind: String,
    path: String,
}

/// Execute the watch command
pub async fn execute(args: WatchArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let ctx = match Context::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return ExitCode::GeneralError;
        }
    };

    let url = match dm_core::url::resolve(&args.url, &ctx.config.aliases) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid URL: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let client = match ctx.factory.new_client(&url).await {
        Ok(c) => c,
        Err(e) => {
            formatter.error(&format!("Failed to open {url}: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let (mut watcher, mut events, mut errors) = Watcher::new();
    if let Err(e) = watcher.join(client.as_ref(), true).await {
        formatter.error(&format!("Watch is not available for {url}: {e}"));
        return ExitCode::from_error(&e);
    }
    formatter.println(&format!("Watching {url}. Ctrl-C to stop."));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let time = jiff::Timestamp::now();
                if formatter.is_json() {
                    formatter.json_line(&WatchRecord {
                        time: time.to_string(),
                        kind: event.kind.to_string(),
                        path: event.path.clone(),
                    });
                } else {
                    let styled_time =
                        formatter.style_date(&time.strftime("%H:%M:%S").to_string());
                    formatter.println(&format!("{styled_time} {:<8} {}", event.kind, event.path));
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
