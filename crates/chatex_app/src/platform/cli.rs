use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use super::logging::LogDestination;

/// Export AI chat conversations from saved pages.
#[derive(Debug, Parser)]
#[command(name = "chatex", author, version, about)]
pub struct Cli {
    /// Directory for exported files and stored settings.
    #[arg(long, short, global = true, default_value = "output")]
    pub out: PathBuf,

    #[arg(long, value_enum, global = true, default_value_t = LogTarget::File)]
    pub log: LogTarget,

    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export the conversation in a saved page.
    Export(ExportArgs),
    /// List the turns found in a saved page.
    List(PageArgs),
    /// Show or change stored settings.
    Settings(SettingsArgs),
    /// Handle one JSON control message and print the acknowledgement.
    Control(ControlArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PageArgs {
    /// Saved HTML of the conversation page.
    pub page: PathBuf,

    /// Address the page was saved from; picks the site and resolves relative links.
    #[arg(long)]
    pub url: String,

    /// Overrides the site detected from `--url`.
    #[arg(long)]
    pub site: Option<String>,

    /// Charset hint, as sent in a Content-Type header.
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub page: PageArgs,

    /// Output format. Defaults to the stored format.
    #[arg(long, short, value_enum)]
    pub format: Option<FormatArg>,

    /// Base name for the exported file. Defaults to the stored name or the title.
    #[arg(long)]
    pub name: Option<String>,

    /// 1-based turn numbers to export, as shown by `list`. Defaults to every turn.
    #[arg(long = "only", value_delimiter = ',')]
    pub only: Vec<usize>,

    /// Cookie header sent with credentialed image requests.
    #[arg(long)]
    pub cookie: Option<String>,

    /// PNG capture of the rendered page used for screenshot and PDF output.
    #[arg(long)]
    pub capture: Option<PathBuf>,

    /// Route the artifact through the chunked download relay.
    #[arg(long)]
    pub chunked: bool,
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    /// `key=value` pairs using the stored keys, e.g. `ced-format=pdf`.
    #[arg(long = "set", value_parser = parse_key_value)]
    pub set: Vec<(String, serde_json::Value)>,

    /// Normalise the panel tab as on a site with a workspace tab.
    #[arg(long)]
    pub workspace: bool,
}

#[derive(Debug, Args)]
pub struct ControlArgs {
    /// Raw JSON message, e.g. `{"type":"CED_TOGGLE_PANEL"}`.
    pub message: String,

    /// Saved page used when the message asks for an export.
    #[arg(long, requires = "url")]
    pub page: Option<PathBuf>,

    #[arg(long)]
    pub url: Option<String>,
}

impl ControlArgs {
    pub fn page_args(&self) -> Option<PageArgs> {
        Some(PageArgs {
            page: self.page.clone()?,
            url: self.url.clone()?,
            site: None,
            content_type: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
    Off,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
            LogTarget::Off => LogDestination::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Text,
    Markdown,
    Screenshot,
    Pdf,
    Word,
    Html,
    Json,
    Excel,
    Csv,
}

impl From<FormatArg> for chatex_core::ExportFormat {
    fn from(format: FormatArg) -> Self {
        use chatex_core::ExportFormat;
        match format {
            FormatArg::Text => ExportFormat::Text,
            FormatArg::Markdown => ExportFormat::Markdown,
            FormatArg::Screenshot => ExportFormat::Screenshot,
            FormatArg::Pdf => ExportFormat::Pdf,
            FormatArg::Word => ExportFormat::Word,
            FormatArg::Html => ExportFormat::Html,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Excel => ExportFormat::Excel,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

/// Values that parse as JSON keep their type; anything else is a string.
fn parse_key_value(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn export_flags_parse() {
        let cli = Cli::parse_from([
            "chatex",
            "export",
            "saved.html",
            "--url",
            "https://claude.ai/chat/1",
            "--format",
            "pdf",
            "--only",
            "1,3",
            "--out",
            "exports",
        ]);

        assert_eq!(cli.out, PathBuf::from("exports"));
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.format, Some(FormatArg::Pdf));
        assert_eq!(args.only, vec![1, 3]);
        assert_eq!(args.page.url, "https://claude.ai/chat/1");
        assert!(!args.chunked);
    }

    #[test]
    fn settings_values_keep_json_types() {
        let cli = Cli::parse_from([
            "chatex",
            "settings",
            "--set",
            "ced-timeline-enabled=false",
            "--set",
            "ced-filename=weekly sync",
            "--set",
            "ced-folder-spacing=4",
        ]);

        let Command::Settings(args) = cli.command else {
            panic!("expected settings");
        };
        assert_eq!(
            args.set,
            vec![
                ("ced-timeline-enabled".to_string(), json!(false)),
                ("ced-filename".to_string(), json!("weekly sync")),
                ("ced-folder-spacing".to_string(), json!(4)),
            ]
        );
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(parse_key_value("no-separator").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
