//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Resumable HTTP downloads with a live progress list.
///
/// Downloads every URL into the output directory, resuming partial files
/// left by an earlier run. Ctrl-C pauses all transfers so the next run can
/// pick them up where they stopped.
#[derive(Parser, Debug)]
#[command(name = "browser-downloads")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    pub urls: Vec<String>,

    /// Directory to save files into (default: ./downloads)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Interval between progress refreshes in milliseconds (100-60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(100..=60000))]
    pub poll_interval_ms: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the final download list as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["browser-downloads"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.json);
        assert!(args.output_dir.is_none());
        assert!(args.poll_interval_ms.is_none());
    }

    #[test]
    fn test_cli_positional_urls() {
        let args =
            Args::try_parse_from(["browser-downloads", "https://x/a.zip", "https://x/b.zip"])
                .unwrap();
        assert_eq!(args.urls, vec!["https://x/a.zip", "https://x/b.zip"]);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["browser-downloads", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["browser-downloads", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["browser-downloads", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_output_dir_short_and_long() {
        let args = Args::try_parse_from(["browser-downloads", "-o", "/tmp/a"]).unwrap();
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/a")));
        let args = Args::try_parse_from(["browser-downloads", "--output-dir", "/tmp/b"]).unwrap();
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/b")));
    }

    #[test]
    fn test_cli_poll_interval_bounds() {
        let args =
            Args::try_parse_from(["browser-downloads", "--poll-interval-ms", "100"]).unwrap();
        assert_eq!(args.poll_interval_ms, Some(100));

        let err = Args::try_parse_from(["browser-downloads", "--poll-interval-ms", "99"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let err = Args::try_parse_from(["browser-downloads", "--poll-interval-ms", "60001"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_json_flag() {
        let args = Args::try_parse_from(["browser-downloads", "--json"]).unwrap();
        assert!(args.json);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["browser-downloads", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["browser-downloads", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
