use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use s3flatten_copy::conf::{C_DELIMITER_DEFAULT, N_WORKERS_DEFAULT};
use s3flatten_copy::{
    EnumCopyPatternMode, ReportCopy, S3ObjectStore, SpecCopyOptions, SpecStoreOptions,
    copy_flatten, parse_s3_path, validate_copy_paths,
};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Copy objects under an S3 prefix into a destination prefix, replacing
/// every `/` below the source prefix with a delimiter.
#[derive(Debug, Parser)]
#[command(name = "s3flatten", version)]
struct Cli {
    /// Source path, e.g. s3://src-bucket/path/to/src/
    #[arg(value_name = "SOURCE")]
    path_src: String,

    /// Destination path, e.g. s3://dest-bucket/path/to/dest/
    #[arg(value_name = "DESTINATION")]
    path_dst: String,

    /// Delimiter to replace '/' with to flatten path.
    #[arg(short, long, default_value = C_DELIMITER_DEFAULT)]
    delimiter: String,

    /// Copy only objects which have this suffix in key.
    #[arg(short, long, default_value = "")]
    suffix: String,

    /// Number of concurrent COPY operations.
    #[arg(short, long, env = "S3FLATTEN_CONCURRENCY", default_value_t = N_WORKERS_DEFAULT)]
    concurrency: usize,

    /// Copy only keys (relative to the source prefix) matching a pattern. Repeatable.
    #[arg(long = "include", value_name = "PATTERN")]
    patterns_include: Vec<String>,

    /// Skip keys (relative to the source prefix) matching a pattern. Repeatable.
    #[arg(long = "exclude", value_name = "PATTERN")]
    patterns_exclude: Vec<String>,

    /// How include/exclude patterns are interpreted: glob, regex or literal.
    #[arg(long = "pattern-mode", default_value = "glob", value_parser = parse_rule_pattern)]
    rule_pattern: EnumCopyPatternMode,

    /// Print planned copies without copying anything.
    #[arg(long)]
    dry_run: bool,

    /// Region of the buckets. Detected from the source bucket when omitted.
    #[arg(long)]
    region: Option<String>,

    /// Custom endpoint for S3-compatible services.
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn to_copy_options(&self) -> SpecCopyOptions {
        SpecCopyOptions {
            delimiter: self.delimiter.clone(),
            suffix: self.suffix.clone(),
            patterns_include_keys: non_empty(&self.patterns_include),
            patterns_exclude_keys: non_empty(&self.patterns_exclude),
            rule_pattern: self.rule_pattern,
            num_workers_max: Some(self.concurrency),
            if_dry_run: self.dry_run,
            ..SpecCopyOptions::default()
        }
    }

    fn to_store_options(&self) -> SpecStoreOptions {
        SpecStoreOptions {
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
        }
    }
}

fn non_empty(patterns: &[String]) -> Option<Vec<String>> {
    (!patterns.is_empty()).then(|| patterns.to_vec())
}

fn parse_rule_pattern(value: &str) -> Result<EnumCopyPatternMode, String> {
    match value {
        "glob" => Ok(EnumCopyPatternMode::Glob),
        "regex" => Ok(EnumCopyPatternMode::Regex),
        "literal" => Ok(EnumCopyPatternMode::Literal),
        _ => Err(format!(
            "Invalid pattern mode: `{value}`. Expected one of: ['glob', 'regex', 'literal']"
        )),
    }
}

fn build_env_filter(if_verbose: bool) -> EnvFilter {
    let level = if if_verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,s3flatten={level},s3flatten_copy={level}"))
    })
}

fn init_tracing(if_verbose: bool) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(if_verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

async fn run(cli: Cli) -> anyhow::Result<ReportCopy> {
    let path_src = parse_s3_path(&cli.path_src)?;
    let path_dst = parse_s3_path(&cli.path_dst)?;
    validate_copy_paths(&path_src, &path_dst)?;

    let spec_cp_options = cli.to_copy_options();
    debug!(
        delimiter = %spec_cp_options.delimiter,
        path_src = %path_src,
        path_dst = %path_dst,
        concurrency = cli.concurrency,
        "Resolved arguments"
    );

    let store = S3ObjectStore::connect(&cli.to_store_options(), path_src.bucket())
        .await
        .context("Failed to create S3 client")?;
    let report_copy = copy_flatten(Arc::new(store), path_src, path_dst, spec_cp_options).await?;
    Ok(report_copy)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Error: {e}");
    }

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use s3flatten_copy::EnumCopyPatternMode;

    use super::{Cli, init_tracing, parse_rule_pattern};

    #[test]
    fn cli_defaults_match_original_tool() {
        let cli = Cli::try_parse_from(["s3flatten", "s3://b1/a/", "s3://b2/x/"]).expect("parse");
        assert_eq!(cli.delimiter, "-");
        assert_eq!(cli.suffix, "");
        assert!(!cli.verbose);

        let spec_cp_options = cli.to_copy_options();
        assert_eq!(spec_cp_options.delimiter, "-");
        assert_eq!(spec_cp_options.patterns_include_keys, None);
        assert_eq!(spec_cp_options.rule_pattern, EnumCopyPatternMode::Glob);
        assert!(!spec_cp_options.if_dry_run);
    }

    #[test]
    fn cli_short_flags_and_patterns() {
        let cli = Cli::try_parse_from([
            "s3flatten",
            "-d",
            "_",
            "-s",
            ".log",
            "-c",
            "16",
            "-v",
            "--include",
            "2024-*",
            "--include",
            "2025-*",
            "--pattern-mode",
            "glob",
            "--dry-run",
            "s3://b1/a/",
            "s3://b2/x/",
        ])
        .expect("parse");

        let spec_cp_options = cli.to_copy_options();
        assert_eq!(spec_cp_options.delimiter, "_");
        assert_eq!(spec_cp_options.suffix, ".log");
        assert_eq!(spec_cp_options.num_workers_max, Some(16));
        assert_eq!(
            spec_cp_options.patterns_include_keys,
            Some(vec!["2024-*".to_string(), "2025-*".to_string()])
        );
        assert!(spec_cp_options.if_dry_run);
        assert!(cli.verbose);
    }

    #[test]
    fn cli_requires_two_paths() {
        assert!(Cli::try_parse_from(["s3flatten", "s3://b1/a/"]).is_err());
        assert!(Cli::try_parse_from(["s3flatten", "a", "b", "c"]).is_err());
    }

    #[test]
    fn parse_rule_pattern_rejects_unknown_mode() {
        assert_eq!(
            parse_rule_pattern("regex").expect("regex"),
            EnumCopyPatternMode::Regex
        );
        assert!(parse_rule_pattern("fuzzy").is_err());
    }

    #[test]
    fn init_tracing_reports_second_install() {
        let _ = init_tracing(false);
        let err = init_tracing(true).expect_err("global subscriber already set");
        assert!(err.to_string().contains("failed to initialize logging"));
    }
}
