//! CLI argument definitions using clap derive macros.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use mediafetch_core::{DownloadKind, FileConfig, MediaFilter, RetryPolicy, RunConfig};

/// Default connect timeout for the remote in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-chunk request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Download the media attached to exported chat messages.
///
/// Walks the export page by page, fetches each message's media object from
/// the remote in resumable chunks, and records progress so an interrupted
/// run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "mediafetch")]
#[command(author, version, about)]
pub struct Args {
    /// JSON export with one descriptor per message
    #[arg(short = 'm', long, value_name = "EXPORT.json")]
    pub messages: PathBuf,

    /// Base URL of the media remote
    #[arg(long, value_name = "URL")]
    pub remote: String,

    /// Directory downloaded files are written to [default: ./media]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Directory holding resume cursors [default: ./.mediafetch]
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Cursor scope key [default: export file name]
    #[arg(long)]
    pub scope: Option<String>,

    /// Maximum concurrent transfers (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Maximum attempts per object, including the first (1-20)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,

    /// Chunk size in KiB (4-1024, multiple of 4)
    #[arg(long, value_parser = clap::value_parser!(u64).range(4..=1024))]
    pub chunk_size_kib: Option<u64>,

    /// Messages requested per page (1-1000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=1000))]
    pub page_size: Option<u64>,

    /// Pause between pages in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub page_delay_ms: Option<u64>,

    /// Media kinds to download, comma separated (photo, document, sticker)
    #[arg(short = 'k', long, value_delimiter = ',')]
    pub kinds: Option<Vec<DownloadKind>>,

    /// Bearer token for objects whose descriptor carries none
    #[arg(long, env = "MEDIAFETCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Config file [default: $XDG_CONFIG_HOME/mediafetch/config.toml]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Builds the run configuration: flags override the file, the file
    /// overrides defaults.
    pub fn run_config(&self, file: Option<&FileConfig>) -> RunConfig {
        let file = file.cloned().unwrap_or_default();

        let output_dir = self
            .output_dir
            .clone()
            .or(file.output_dir)
            .unwrap_or_else(|| PathBuf::from("media"));
        let state_dir = self
            .state_dir
            .clone()
            .or(file.state_dir)
            .unwrap_or_else(|| PathBuf::from(".mediafetch"));
        let scope = self
            .scope
            .clone()
            .or(file.scope)
            .unwrap_or_else(|| default_scope(&self.messages));

        let mut config = RunConfig::new(output_dir, state_dir, scope);

        if let Some(concurrency) = self.concurrency.map(usize::from).or(file.concurrency) {
            config.max_concurrency = concurrency;
        }
        if let Some(kib) = self.chunk_size_kib.or(file.chunk_size_kib) {
            config.chunk_size = kib * 1024;
        }
        if let Some(page_size) = self
            .page_size
            .and_then(|size| usize::try_from(size).ok())
            .or(file.page_size)
        {
            config.page_size = page_size;
        }
        if let Some(delay) = self.page_delay_ms.or(file.page_delay_ms) {
            config.page_delay = Duration::from_millis(delay);
        }
        if let Some(attempts) = self.max_retries.or(file.max_retries) {
            config.retry = RetryPolicy::with_max_attempts(attempts);
        }

        config.filter = MediaFilter {
            kinds: self
                .kinds
                .clone()
                .or(file.kinds)
                .unwrap_or_else(|| MediaFilter::default().kinds),
            min_date: file.min_date,
            max_date: file.max_date,
            extensions: file
                .extensions
                .unwrap_or_default()
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        };

        config.show_progress = !self.quiet
            && !self.no_progress
            && file.progress.unwrap_or(true)
            && std::io::stderr().is_terminal();

        config
    }

    /// Connect and request timeouts in seconds.
    pub fn timeouts(file: Option<&FileConfig>) -> (u64, u64) {
        (
            file.and_then(|f| f.connect_timeout_secs)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            file.and_then(|f| f.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }
}

fn default_scope(messages: &Path) -> String {
    messages
        .file_stem()
        .map_or_else(|| "default".to_string(), |stem| stem.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const BASE: [&str; 5] = [
        "mediafetch",
        "--messages",
        "chats/team.json",
        "--remote",
        "http://localhost:9000",
    ];

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(BASE.iter().chain(extra.iter()))
    }

    #[test]
    fn test_cli_required_args_parse_successfully() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.messages, PathBuf::from("chats/team.json"));
        assert!(args.concurrency.is_none());
    }

    #[test]
    fn test_cli_missing_messages_is_rejected() {
        let err = Args::try_parse_from(["mediafetch", "--remote", "http://x"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        assert_eq!(parse(&["-v"]).unwrap().verbose, 1);
        assert_eq!(parse(&["-vv"]).unwrap().verbose, 2);
        assert_eq!(parse(&["--verbose", "--verbose"]).unwrap().verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["mediafetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = parse(&["--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Range Tests ====================

    #[test]
    fn test_cli_concurrency_range() {
        assert_eq!(parse(&["-c", "32"]).unwrap().concurrency, Some(32));
        for value in ["0", "33"] {
            let err = parse(&["-c", value]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_chunk_size_range() {
        assert_eq!(parse(&["--chunk-size-kib", "512"]).unwrap().chunk_size_kib, Some(512));
        let err = parse(&["--chunk-size-kib", "2048"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_kinds_are_comma_separated() {
        let args = parse(&["--kinds", "photo,sticker"]).unwrap();
        assert_eq!(
            args.kinds,
            Some(vec![DownloadKind::Photo, DownloadKind::Sticker])
        );
        assert!(parse(&["--kinds", "video"]).is_err());
    }

    // ==================== Config Merge Tests ====================

    #[test]
    fn test_run_config_defaults() {
        let config = parse(&["-q"]).unwrap().run_config(None);
        assert_eq!(config.scope, "team");
        assert_eq!(config.output_dir, PathBuf::from("media"));
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.retry.max_attempts(), 5);
        assert!(!config.show_progress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_config_flags_override_file() {
        let file = FileConfig {
            concurrency: Some(8),
            page_size: Some(10),
            chunk_size_kib: Some(64),
            extensions: Some(vec![".PDF".to_string()]),
            ..FileConfig::default()
        };
        let config = parse(&["-c", "2"]).unwrap().run_config(Some(&file));
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.page_size, 10);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.filter.extensions, vec!["pdf".to_string()]);
    }

    #[test]
    fn test_timeouts_default_and_file() {
        assert_eq!(Args::timeouts(None), (30, 120));
        let file = FileConfig {
            request_timeout_secs: Some(15),
            ..FileConfig::default()
        };
        assert_eq!(Args::timeouts(Some(&file)), (30, 15));
    }
}
