//! completions command - Generate shell completion scripts

use clap::Args;
use clap_complete::Shell;

use crate::exit_code::ExitCode;

/// Generate a completion script for the given shell
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Execute the completions command, writing the script to stdout.
pub fn execute(args: CompletionsArgs, command: &mut clap::Command) -> ExitCode {
    let name = command.get_name().to_string();
    clap_complete::generate(args.shell, command, name, &mut std::io::stdout());
    ExitCode::Success
}
