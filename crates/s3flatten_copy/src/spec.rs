//! Copy specification models and top-level error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::conf::{C_DELIMITER_DEFAULT, C_SCHEME_S3, DUR_REPORT_INTERVAL_DEFAULT};
use crate::util::normalize_prefix;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Pattern matching mode for include/exclude key lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCopyPatternMode {
    /// Shell-like wildcards (`*`, `?`, character classes).
    Glob,
    /// Regular expression pattern.
    Regex,
    /// Substring match.
    Literal,
}

/// What a worker did with one key that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCopyStatus {
    /// Object was copied to its flattened destination key.
    Copied,
    /// Dry-run: destination key was derived but nothing was copied.
    Skipped,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Bucket plus normalized key prefix.
///
/// The prefix never starts with `/` and, unless it is the bucket root (empty
/// prefix), always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecS3Path {
    bucket: String,
    prefix: String,
}

impl SpecS3Path {
    /// Build a path, normalizing `prefix`.
    pub fn new(bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: normalize_prefix(prefix),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for SpecS3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{C_SCHEME_S3}://{}/{}", self.bucket, self.prefix)
    }
}

/// Input options for `copy_flatten`.
#[derive(Debug, Clone)]
pub struct SpecCopyOptions {
    /// Replacement for `/` in the part of the key below the source prefix.
    pub delimiter: String,
    /// Only keys ending with this string are copied. Empty matches all.
    pub suffix: String,
    /// Include patterns applied to the key relative to the source prefix.
    pub patterns_include_keys: Option<Vec<String>>,
    /// Exclude patterns applied to the key relative to the source prefix.
    pub patterns_exclude_keys: Option<Vec<String>>,
    /// Pattern interpretation mode.
    pub rule_pattern: EnumCopyPatternMode,
    /// Number of concurrent copy workers (`None` uses the default).
    pub num_workers_max: Option<usize>,
    /// Interval between throughput statistic lines.
    pub interval_report: Duration,
    /// Derive destination keys without calling the store's copy operation.
    pub if_dry_run: bool,
}

impl Default for SpecCopyOptions {
    fn default() -> Self {
        Self {
            delimiter: C_DELIMITER_DEFAULT.to_string(),
            suffix: String::new(),
            patterns_include_keys: None,
            patterns_exclude_keys: None,
            rule_pattern: EnumCopyPatternMode::Glob,
            num_workers_max: None,
            interval_report: DUR_REPORT_INTERVAL_DEFAULT,
            if_dry_run: false,
        }
    }
}

/// Connection options for the S3 store.
#[derive(Debug, Clone, Default)]
pub struct SpecStoreOptions {
    /// Fixed region. When unset the source bucket's region is detected.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint_url: Option<String>,
}

/// Result of one key reaching a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCopyOutcome {
    /// Source key, as listed.
    pub key_src: String,
    /// What happened to the key.
    pub res_copy: Result<EnumCopyStatus, CopyRunError>,
}

/// Errors that stop a run, before it starts or while it is running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CopyRunError {
    /// Path is not a well-formed `s3://bucket/prefix` URI.
    #[error("Failed to parse as S3 path: {input} ({reason})")]
    PathParse {
        /// Raw user input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Destination lies under the source in the same bucket.
    #[error("Destination path must not be located under source path: {path_src} <-> {path_dst}")]
    PrefixOverlap {
        /// Source location.
        path_src: String,
        /// Destination location.
        path_dst: String,
    },
    /// Invalid include/exclude pattern.
    #[error("Invalid pattern in include/exclude: {0}")]
    InvalidPattern(String),
    /// Invalid option value.
    #[error("{0}")]
    InvalidOptions(String),
    /// A listing page could not be fetched.
    #[error("Failed to list s3://{bucket}/{prefix}: {message}")]
    List {
        bucket: String,
        prefix: String,
        message: String,
    },
    /// A listed key does not start with the source prefix.
    #[error("Source key does not match source prefix. key: {key}, prefix: {prefix}")]
    KeyMapping { key: String, prefix: String },
    /// The store failed to copy one key.
    #[error("Failed to copy {key}: {message}")]
    Copy { key: String, message: String },
    /// A pipeline task stopped unexpectedly.
    #[error("Copy pipeline failed: {0}")]
    Pipeline(String),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
