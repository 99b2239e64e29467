use globset::{Glob, GlobMatcher};
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

use crate::conf::{C_KEY_SEPARATOR, C_SCHEME_S3, N_WORKERS_DEFAULT};
use crate::spec::{CopyRunError, EnumCopyPatternMode, SpecCopyOptions, SpecS3Path};

////////////////////////////////////////////////////////////////////////////////
// #region KeyFilters

#[derive(Debug, Clone)]
pub(crate) enum TypeKeyPatternSeq {
    Literal(Vec<String>),
    Glob(Vec<GlobMatcher>),
    Regex(Vec<Regex>),
}

impl TypeKeyPatternSeq {
    fn is_any_match(&self, value: &str) -> bool {
        match self {
            Self::Literal(v) => v.iter().any(|p| value.contains(p.as_str())),
            Self::Glob(v) => v.iter().any(|p| p.is_match(value)),
            Self::Regex(v) => v.iter().any(|p| p.is_match(value)),
        }
    }
}

/// Listing-side key predicate: suffix filter plus optional include/exclude
/// patterns evaluated on the key below the source prefix.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpecKeyFilter {
    pub(crate) suffix: String,
    pub(crate) patterns_include_keys: Option<TypeKeyPatternSeq>,
    pub(crate) patterns_exclude_keys: Option<TypeKeyPatternSeq>,
}

impl SpecKeyFilter {
    pub(crate) fn from_options(spec_cp_options: &SpecCopyOptions) -> Result<Self, CopyRunError> {
        Ok(Self {
            suffix: spec_cp_options.suffix.clone(),
            patterns_include_keys: _compile(
                spec_cp_options.patterns_include_keys.as_deref(),
                spec_cp_options.rule_pattern,
            )?,
            patterns_exclude_keys: _compile(
                spec_cp_options.patterns_exclude_keys.as_deref(),
                spec_cp_options.rule_pattern,
            )?,
        })
    }

    /// `true` when `key` should be handed to the copy pipeline.
    pub(crate) fn is_match(&self, key: &str, prefix_src: &str) -> bool {
        if !key.ends_with(self.suffix.as_str()) {
            return false;
        }
        let key_rel = key.strip_prefix(prefix_src).unwrap_or(key);
        let b_included = self
            .patterns_include_keys
            .as_ref()
            .is_none_or(|p| p.is_any_match(key_rel));
        let b_excluded = self
            .patterns_exclude_keys
            .as_ref()
            .is_some_and(|p| p.is_any_match(key_rel));
        b_included && !b_excluded
    }
}

fn _compile(
    patterns: Option<&[String]>,
    rule_pattern: EnumCopyPatternMode,
) -> Result<Option<TypeKeyPatternSeq>, CopyRunError> {
    let Some(patterns) = patterns else {
        return Ok(None);
    };
    if patterns.is_empty() {
        return Ok(None);
    }

    match rule_pattern {
        EnumCopyPatternMode::Literal => Ok(Some(TypeKeyPatternSeq::Literal(patterns.to_vec()))),
        EnumCopyPatternMode::Glob => {
            let l_glob = patterns
                .iter()
                .map(|pattern| {
                    Glob::new(pattern)
                        .map(|g| g.compile_matcher())
                        .map_err(|e| CopyRunError::InvalidPattern(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(TypeKeyPatternSeq::Glob(l_glob)))
        }
        EnumCopyPatternMode::Regex => {
            let l_regex = patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| CopyRunError::InvalidPattern(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(TypeKeyPatternSeq::Regex(l_regex)))
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

/// Strip leading separators and append a trailing one unless the prefix is
/// the bucket root. Idempotent.
pub fn normalize_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_start_matches(C_KEY_SEPARATOR);
    if prefix.is_empty() || prefix.ends_with(C_KEY_SEPARATOR) {
        return prefix.to_string();
    }
    format!("{prefix}{C_KEY_SEPARATOR}")
}

/// Parse `s3://bucket/prefix...` into a [`SpecS3Path`].
pub fn parse_s3_path(value: &str) -> Result<SpecS3Path, CopyRunError> {
    let err_parse = |reason: &str| CopyRunError::PathParse {
        input: value.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(value).map_err(|e| err_parse(&e.to_string()))?;
    if url.scheme() != C_SCHEME_S3 {
        return Err(err_parse("S3 path should start with `s3://`"));
    }
    let bucket = match url.host_str() {
        Some(v) if !v.is_empty() => v,
        _ => return Err(err_parse("missing bucket name")),
    };
    let prefix = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|e| err_parse(&e.to_string()))?;
    Ok(SpecS3Path::new(bucket, &prefix))
}

/// Destination is nested under source (same bucket, destination prefix
/// starts with the source prefix).
pub fn is_prefix_overlap(path_src: &SpecS3Path, path_dst: &SpecS3Path) -> bool {
    path_src.bucket() == path_dst.bucket() && path_dst.prefix().starts_with(path_src.prefix())
}

/// Reject source/destination pairs where the destination lies under the source.
pub fn validate_copy_paths(
    path_src: &SpecS3Path,
    path_dst: &SpecS3Path,
) -> Result<(), CopyRunError> {
    if is_prefix_overlap(path_src, path_dst) {
        return Err(CopyRunError::PrefixOverlap {
            path_src: path_src.to_string(),
            path_dst: path_dst.to_string(),
        });
    }
    Ok(())
}

/// Derive the flattened destination key for `key_src`.
///
/// The part of `key_src` below `prefix_src` has every `/` replaced by
/// `delimiter` and is appended to `prefix_dst`.
///
/// # Examples
/// ```
/// use s3flatten_copy::derive_destination_key;
///
/// let key_dst = derive_destination_key("a/b/2.txt", "a/", "x/", "-").unwrap();
/// assert_eq!(key_dst, "x/b-2.txt");
/// ```
pub fn derive_destination_key(
    key_src: &str,
    prefix_src: &str,
    prefix_dst: &str,
    delimiter: &str,
) -> Result<String, CopyRunError> {
    let Some(key_rel) = key_src.strip_prefix(prefix_src) else {
        return Err(CopyRunError::KeyMapping {
            key: key_src.to_string(),
            prefix: prefix_src.to_string(),
        });
    };
    Ok(format!(
        "{prefix_dst}{}",
        key_rel.replace(C_KEY_SEPARATOR, delimiter)
    ))
}

pub(crate) fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    num_workers_max.unwrap_or(N_WORKERS_DEFAULT)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
