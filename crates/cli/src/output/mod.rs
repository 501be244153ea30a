//! Output configuration and formatting

pub mod formatter;

pub use formatter::Formatter;

/// Global output flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Emit strict JSON records instead of human-readable text.
    pub json: bool,
    /// Suppress informational output; errors still print.
    pub quiet: bool,
    /// Disable ANSI colors.
    pub no_color: bool,
}
