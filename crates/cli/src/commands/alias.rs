//! Alias management commands
//!
//! Aliases map a short name to a base URL. Object-store aliases additionally
//! carry per-host credentials, keyed by `host[:port]` so several aliases can
//! share one endpoint's credentials.

use clap::Subcommand;
use serde::Serialize;

use dm_core::config::HostConfig;
use dm_core::url::{UrlScheme, resolve};

use crate::commands::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Alias subcommands for managing storage locations
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List all configured aliases
    List,

    /// Remove an alias
    Remove(RemoveArgs),
}

/// Arguments for the `alias set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Alias name (e.g., "play", "backup")
    pub name: String,

    /// Base URL: an endpoint like `https://play.example.io:9000/bucket` or a
    /// local path
    pub url: String,

    /// Access key ID (object-store aliases)
    pub access_key: Option<String>,

    /// Secret access key (object-store aliases)
    pub secret_key: Option<String>,

    /// Region for the host
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Use virtual-host bucket addressing instead of path-style
    #[arg(long)]
    pub virtual_host_style: bool,
}

/// Arguments for the `alias remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the alias to remove
    pub name: String,
}

#[derive(Serialize)]
struct AliasListOutput {
    aliases: Vec<AliasInfo>,
}

/// Alias information for JSON output (without secrets)
#[derive(Serialize)]
struct AliasInfo {
    name: String,
    url: String,
    has_credentials: bool,
}

#[derive(Serialize)]
struct AliasOperationOutput {
    success: bool,
    alias: String,
    message: String,
}

/// Execute an alias subcommand
pub async fn execute(cmd: AliasCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let mut ctx = match Context::load() {
        Ok(ctx) => ctx,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return ExitCode::GeneralError;
        }
    };

    match cmd {
        AliasCommands::Set(args) => execute_set(args, &mut ctx, &formatter),
        AliasCommands::List => execute_list(&ctx, &formatter),
        AliasCommands::Remove(args) => execute_remove(args, &mut ctx, &formatter),
    }
}

fn execute_set(args: SetArgs, ctx: &mut Context, formatter: &Formatter) -> ExitCode {
    if args.name.is_empty() || args.name.contains('/') {
        formatter.error("Alias name must be non-empty and contain no '/'");
        return ExitCode::UsageError;
    }

    // The URL must resolve on its own, without other aliases applying.
    let resolved = match resolve(&args.url, &Default::default()) {
        Ok(r) => r,
        Err(e) => {
            formatter.error(&format!("Invalid URL: {e}"));
            return ExitCode::UsageError;
        }
    };

    match resolved.scheme {
        UrlScheme::ObjectStore => {
            let (Some(access_key), Some(secret_key)) = (&args.access_key, &args.secret_key) else {
                formatter.error("Object-store aliases require an access key and a secret key");
                return ExitCode::UsageError;
            };
            ctx.config.hosts.insert(
                resolved.host.clone(),
                HostConfig {
                    access_key: access_key.clone(),
                    secret_key: secret_key.clone(),
                    region: args.region,
                    path_style: !args.virtual_host_style,
                },
            );
        }
        UrlScheme::Filesystem => {
            if args.access_key.is_some() || args.secret_key.is_some() {
                formatter.warning("Credentials are ignored for filesystem aliases");
            }
        }
    }

    ctx.config
        .aliases
        .insert(args.name.clone(), resolved.to_url_string());

    match ctx.store.save(&ctx.config) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' configured", args.name),
                });
            } else {
                let styled_name = formatter.style_name(&args.name);
                formatter.success(&format!("Alias '{styled_name}' configured."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::GeneralError
        }
    }
}

fn execute_list(ctx: &Context, formatter: &Formatter) -> ExitCode {
    if formatter.is_json() {
        let aliases = ctx
            .config
            .aliases
            .iter()
            .map(|(name, url)| AliasInfo {
                name: name.clone(),
                url: url.clone(),
                has_credentials: host_of(url)
                    .map(|h| ctx.config.hosts.contains_key(&h))
                    .unwrap_or(false),
            })
            .collect();
        formatter.json(&AliasListOutput { aliases });
        return ExitCode::Success;
    }

    if ctx.config.aliases.is_empty() {
        formatter.println("No aliases configured.");
        return ExitCode::Success;
    }

    for (name, url) in &ctx.config.aliases {
        let styled_name = formatter.style_name(&format!("{name:<12}"));
        let styled_url = formatter.style_url(url);
        formatter.println(&format!("{styled_name} {styled_url}"));
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, ctx: &mut Context, formatter: &Formatter) -> ExitCode {
    if ctx.config.aliases.remove(&args.name).is_none() {
        formatter.error(&format!("Alias '{}' not found", args.name));
        return ExitCode::NotFound;
    }

    match ctx.store.save(&ctx.config) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' removed", args.name),
                });
            } else {
                let styled_name = formatter.style_name(&args.name);
                formatter.success(&format!("Alias '{styled_name}' removed."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::GeneralError
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    resolve(url, &Default::default())
        .ok()
        .filter(|r| r.scheme == UrlScheme::ObjectStore)
        .map(|r| r.host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of_object_store_url() {
        assert_eq!(
            host_of("https://play.example.io:9000/bucket"),
            Some("play.example.io:9000".to_string())
        );
        assert_eq!(host_of("/var/data"), None);
    }
}
