//! Listing, fan-out, copy workers and run orchestration.
//!
//! ```text
//! list_keys --tx_listed--> fan_out --+--rx_tracked--------------------> tracker
//!     |                              |                                   ^ ^
//!     |                              +--rx_work--> copy_worker x N ------+ |
//!     +--tx_list_failure---------------------------------------------------+
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_channel::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::conf::N_LIST_BUFFER;
use crate::report::ReportCopy;
use crate::spec::{CopyRunError, EnumCopyStatus, SpecCopyOptions, SpecCopyOutcome, SpecS3Path};
use crate::store::ObjectStore;
use crate::tracker::CompletionTracker;
use crate::util::{
    SpecKeyFilter, calculate_worker_limit, derive_destination_key, validate_copy_paths,
};

#[derive(Debug)]
struct SpecCopyContext<S: ?Sized> {
    store: Arc<S>,
    path_src: SpecS3Path,
    path_dst: SpecS3Path,
    delimiter: String,
    if_dry_run: bool,
}

/// Copy every object under `path_src` into `path_dst`, flattening keys.
///
/// Behavior is controlled by [`SpecCopyOptions`]:
/// - `delimiter` replaces `/` below the source prefix,
/// - `suffix` and include/exclude patterns select keys,
/// - `num_workers_max` bounds in-flight copy calls,
/// - `if_dry_run` derives destination keys without copying.
///
/// The run stops at the first failed key (or listing failure) and returns
/// that error; remaining work is cancelled. Returns [`ReportCopy`] when every
/// listed key was handled.
pub async fn copy_flatten<S>(
    store: Arc<S>,
    path_src: SpecS3Path,
    path_dst: SpecS3Path,
    spec_cp_options: SpecCopyOptions,
) -> Result<ReportCopy, CopyRunError>
where
    S: ObjectStore + ?Sized + 'static,
{
    validate_copy_paths(&path_src, &path_dst)?;
    if spec_cp_options.num_workers_max == Some(0) {
        return Err(CopyRunError::InvalidOptions(
            "Arg `num_workers_max` must be >= 1 or None.".to_string(),
        ));
    }
    if spec_cp_options.interval_report.is_zero() {
        return Err(CopyRunError::InvalidOptions(
            "Arg `interval_report` must be greater than zero.".to_string(),
        ));
    }
    let spec_key_filter = SpecKeyFilter::from_options(&spec_cp_options)?;
    let n_workers = calculate_worker_limit(spec_cp_options.num_workers_max);

    debug!(
        path_src = %path_src,
        path_dst = %path_dst,
        delimiter = %spec_cp_options.delimiter,
        suffix = %spec_cp_options.suffix,
        n_workers,
        if_dry_run = spec_cp_options.if_dry_run,
        "Starting flatten copy"
    );

    let spec_cp_ctx = Arc::new(SpecCopyContext {
        store,
        path_src,
        path_dst,
        delimiter: spec_cp_options.delimiter,
        if_dry_run: spec_cp_options.if_dry_run,
    });
    let token_cancel = CancellationToken::new();
    let mut set_tasks = JoinSet::new();

    let (tx_list_failure, rx_list_failure) = async_channel::bounded::<CopyRunError>(1);
    let (tx_listed, rx_listed) = async_channel::bounded::<String>(N_LIST_BUFFER);
    let (tx_outcome, rx_outcome) = async_channel::bounded::<SpecCopyOutcome>(n_workers);

    set_tasks.spawn(list_keys(
        Arc::clone(&spec_cp_ctx),
        spec_key_filter,
        tx_listed,
        tx_list_failure,
        token_cancel.clone(),
    ));
    let (rx_tracked, rx_work) = fan_out(rx_listed, &mut set_tasks, token_cancel.clone());
    for n_worker in 0..n_workers {
        set_tasks.spawn(copy_worker(
            n_worker,
            Arc::clone(&spec_cp_ctx),
            rx_work.clone(),
            tx_outcome.clone(),
            token_cancel.clone(),
        ));
    }
    drop(rx_work);
    drop(tx_outcome);

    let res_run = CompletionTracker::new()
        .watch(
            rx_list_failure,
            rx_tracked,
            rx_outcome,
            spec_cp_options.interval_report,
        )
        .await;

    token_cancel.cancel();
    let mut l_task_failures = Vec::new();
    while let Some(res_task) = set_tasks.join_next().await {
        if let Err(e) = res_task {
            error!("Copy pipeline task failed: {e}");
            l_task_failures.push(e.to_string());
        }
    }

    let report_copy = res_run?;
    if let Some(msg) = l_task_failures.into_iter().next() {
        return Err(CopyRunError::Pipeline(msg));
    }
    Ok(report_copy)
}

/// Page through the source prefix and publish every key the filter accepts.
///
/// A page failure goes to `tx_list_failure` and cancels the run, so keys
/// already queued are not copied.
async fn list_keys<S>(
    spec_cp_ctx: Arc<SpecCopyContext<S>>,
    spec_key_filter: SpecKeyFilter,
    tx_listed: Sender<String>,
    tx_list_failure: Sender<CopyRunError>,
    token_cancel: CancellationToken,
) where
    S: ObjectStore + ?Sized,
{
    let bucket = spec_cp_ctx.path_src.bucket();
    let prefix = spec_cp_ctx.path_src.prefix();
    let mut token_continuation = None;
    let mut n_page = 0usize;

    loop {
        let res_page = tokio::select! {
            biased;
            _ = token_cancel.cancelled() => return,
            res = spec_cp_ctx.store.list_objects_page(bucket, prefix, token_continuation.take()) => res,
        };
        let spec_page = match res_page {
            Ok(v) => v,
            Err(e) => {
                // failure must be queued before the cancel closes the other branches
                let _ = tx_list_failure.try_send(CopyRunError::List {
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                    message: e.to_string(),
                });
                token_cancel.cancel();
                return;
            }
        };
        trace!(n_page, n_keys = spec_page.keys.len(), "Fetched listing page");
        n_page += 1;

        for key in spec_page.keys {
            if !spec_key_filter.is_match(&key, prefix) {
                continue;
            }
            let res_send = tokio::select! {
                biased;
                _ = token_cancel.cancelled() => return,
                res = tx_listed.send(key) => res,
            };
            if res_send.is_err() {
                return;
            }
        }

        match spec_page.token_next {
            Some(token) => token_continuation = Some(token),
            None => break,
        }
    }
    debug!(n_page, "Listing finished");
}

/// Republish every input item to two outputs, first output first.
///
/// An item is delivered to both outputs before the next input item is
/// taken. Both outputs close once the input is exhausted.
pub(crate) fn fan_out<T>(
    rx_input: Receiver<T>,
    set_tasks: &mut JoinSet<()>,
    token_cancel: CancellationToken,
) -> (Receiver<T>, Receiver<T>)
where
    T: Clone + Send + 'static,
{
    let (tx_first, rx_first) = async_channel::bounded(1);
    let (tx_second, rx_second) = async_channel::bounded(1);

    set_tasks.spawn(async move {
        while let Ok(item) = rx_input.recv().await {
            let b_delivered = tokio::select! {
                biased;
                _ = token_cancel.cancelled() => false,
                b = async {
                    if tx_first.send(item.clone()).await.is_err() {
                        return false;
                    }
                    tx_second.send(item).await.is_ok()
                } => b,
            };
            if !b_delivered {
                break;
            }
        }
        // first output closes before second
        drop(tx_first);
        drop(tx_second);
    });

    (rx_first, rx_second)
}

async fn copy_worker<S>(
    n_worker: usize,
    spec_cp_ctx: Arc<SpecCopyContext<S>>,
    rx_work: Receiver<String>,
    tx_outcome: Sender<SpecCopyOutcome>,
    token_cancel: CancellationToken,
) where
    S: ObjectStore + ?Sized,
{
    loop {
        let res_recv = tokio::select! {
            biased;
            _ = token_cancel.cancelled() => break,
            res = rx_work.recv() => res,
        };
        let Ok(key_src) = res_recv else {
            break;
        };

        let res_copy = tokio::select! {
            biased;
            _ = token_cancel.cancelled() => break,
            res = copy_one_key(&spec_cp_ctx, &key_src) => res,
        };
        let spec_outcome = SpecCopyOutcome { key_src, res_copy };
        if tx_outcome.send(spec_outcome).await.is_err() {
            break;
        }
    }
    trace!(n_worker, "Copy worker finished");
}

async fn copy_one_key<S>(
    spec_cp_ctx: &SpecCopyContext<S>,
    key_src: &str,
) -> Result<EnumCopyStatus, CopyRunError>
where
    S: ObjectStore + ?Sized,
{
    let key_dst = derive_destination_key(
        key_src,
        spec_cp_ctx.path_src.prefix(),
        spec_cp_ctx.path_dst.prefix(),
        &spec_cp_ctx.delimiter,
    )?;

    if spec_cp_ctx.if_dry_run {
        info!(
            "[DRY-RUN] s3://{}/{key_src} -> s3://{}/{key_dst}",
            spec_cp_ctx.path_src.bucket(),
            spec_cp_ctx.path_dst.bucket()
        );
        return Ok(EnumCopyStatus::Skipped);
    }

    debug!(key = key_src, "Starting copy");
    let time_start = Instant::now();
    spec_cp_ctx
        .store
        .copy_object(
            spec_cp_ctx.path_src.bucket(),
            key_src,
            spec_cp_ctx.path_dst.bucket(),
            &key_dst,
        )
        .await
        .map_err(|e| CopyRunError::Copy {
            key: key_src.to_string(),
            message: e.to_string(),
        })?;
    debug!(key = key_src, elapsed = ?time_start.elapsed(), "Finished copy");
    Ok(EnumCopyStatus::Copied)
}
