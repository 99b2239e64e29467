//! `s3flatten_copy` v1:
//! Concurrent S3 prefix copy engine that flattens keys.
//!
//! Modules:
//! - `copy`    : listing, fan-out, copy workers and run orchestration
//! - `tracker` : completion tracking for one run
//! - `store`   : object-store capability and its S3 implementation
//! - `spec`    : enums/options/errors
//! - `report`  : run-time report model
//! - `conf`    : constants and defaults
//! - `util`    : shared helper functions

pub mod conf;
pub mod copy;
pub mod report;
pub mod spec;
pub mod store;
mod tracker;
mod util;

pub use copy::copy_flatten;
pub use report::ReportCopy;
pub use spec::{
    CopyRunError, EnumCopyPatternMode, EnumCopyStatus, SpecCopyOptions, SpecCopyOutcome,
    SpecS3Path, SpecStoreOptions,
};
pub use store::{ObjectStore, S3ObjectStore, SpecListPage, StoreError};
pub use util::{
    derive_destination_key, is_prefix_overlap, normalize_prefix, parse_s3_path,
    validate_copy_paths,
};
