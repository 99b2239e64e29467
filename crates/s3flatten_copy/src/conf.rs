//! Pipeline constants and defaults.

use std::time::Duration;

/// Object-store URI scheme accepted by path parsing.
pub const C_SCHEME_S3: &str = "s3";
/// Key path separator inside a bucket.
pub const C_KEY_SEPARATOR: char = '/';
/// Default replacement for [`C_KEY_SEPARATOR`] when flattening keys.
pub const C_DELIMITER_DEFAULT: &str = "-";
/// Default number of concurrent copy workers.
pub const N_WORKERS_DEFAULT: usize = 128;
/// Listing lookahead: roughly one `ListObjectsV2` page of keys.
pub const N_LIST_BUFFER: usize = 1000;
/// Default interval between throughput statistic lines.
pub const DUR_REPORT_INTERVAL_DEFAULT: Duration = Duration::from_secs(10);
/// Region used for the first client when nothing else is configured.
pub const C_REGION_FALLBACK: &str = "us-east-1";
