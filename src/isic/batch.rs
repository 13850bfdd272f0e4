use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::archive;
use crate::error::SlaError;
use crate::isic::api::IsicApi;
use crate::isic::catalog::IsicRecord;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub ids: Vec<String>,
}

pub fn make_batches(ids: &[String], batch_size: usize) -> Vec<Batch> {
    ids.chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            ids: chunk.to_vec(),
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassResult {
    pub batches: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub requested: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub retry_passes: usize,
}

/// Downloads image bundles with a bounded worker pool. Workers only talk to the network;
/// the calling thread is the single consumer that writes and extracts each bundle.
pub struct BatchFetcher<'a> {
    transport: &'a dyn Transport,
    api: &'a IsicApi,
    batch_size: usize,
    max_workers: usize,
    max_retries: usize,
    cancel: CancellationToken,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        api: &'a IsicApi,
        batch_size: usize,
        max_workers: usize,
        max_retries: usize,
    ) -> Self {
        Self {
            transport,
            api,
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
            max_retries,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn download(
        &self,
        dataset: &str,
        records: &[IsicRecord],
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<BatchSummary, SlaError> {
        fs::create_dir_all(destination).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        let ids: Vec<String> = records.iter().map(|record| record.isic_id.clone()).collect();
        let mut summary = BatchSummary {
            requested: ids.len(),
            ..BatchSummary::default()
        };

        let pass = self.run_pass(&ids, destination, sink)?;
        summary.batches += pass.batches;
        summary.failed_batches += pass.failed;

        loop {
            let missing = missing_ids(records, &archive::image_stems(destination)?);
            if missing.is_empty() {
                for extra in unexpected_images(records, destination)? {
                    warn!(dataset, file = %extra.display(), "removing image not listed in the catalog");
                    fs::remove_file(&extra).map_err(|err| SlaError::Filesystem(err.to_string()))?;
                }
                info!(
                    dataset,
                    images = records.len(),
                    retries = summary.retry_passes,
                    "all images retrieved"
                );
                return Ok(summary);
            }
            if summary.retry_passes >= self.max_retries {
                return Err(SlaError::IncompleteDownload {
                    dataset: dataset.to_string(),
                    missing: missing.len(),
                    attempts: summary.retry_passes,
                });
            }
            summary.retry_passes += 1;
            warn!(
                dataset,
                missing = missing.len(),
                "images missing after download, retry pass {}/{}",
                summary.retry_passes,
                self.max_retries
            );
            let pass = self.run_pass(&missing, destination, sink)?;
            summary.batches += pass.batches;
            summary.failed_batches += pass.failed;
        }
    }

    pub fn run_pass(
        &self,
        ids: &[String],
        destination: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<PassResult, SlaError> {
        let batches = make_batches(ids, self.batch_size);
        let mut result = PassResult {
            batches: batches.len(),
            ..PassResult::default()
        };
        if batches.is_empty() {
            return Ok(result);
        }

        let workers = self.max_workers.min(batches.len());
        let (job_tx, job_rx) = mpsc::channel::<Batch>();
        for batch in batches {
            // The receiver is alive until the end of this function.
            let _ = job_tx.send(batch);
        }
        drop(job_tx);
        let jobs = Mutex::new(job_rx);
        let (result_tx, result_rx) = mpsc::channel::<(Batch, Result<Vec<u8>, SlaError>)>();
        let start = Instant::now();

        let outcome = thread::scope(|scope| {
            for _ in 0..workers {
                let result_tx = result_tx.clone();
                let jobs = &jobs;
                scope.spawn(move || {
                    loop {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let next = match jobs.lock() {
                            Ok(queue) => queue.recv(),
                            Err(_) => break,
                        };
                        let Ok(batch) = next else {
                            break;
                        };
                        debug!(batch = batch.index, size = batch.ids.len(), "requesting batch");
                        let response = self.api.download_batch(self.transport, &batch.ids);
                        if result_tx.send((batch, response)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (batch, response) in result_rx.iter() {
                match response {
                    Ok(bytes) if bytes.is_empty() => {
                        warn!(batch = batch.index, "empty response for batch, skipping");
                        result.failed += 1;
                    }
                    Ok(bytes) => match self.store_batch(&batch, &bytes, destination) {
                        Ok(true) => result.completed += 1,
                        Ok(false) => result.failed += 1,
                        Err(err) => {
                            self.cancel.cancel();
                            return Err(err);
                        }
                    },
                    Err(err) => {
                        warn!(batch = batch.index, error = %err, "batch request failed, skipping");
                        result.failed += 1;
                    }
                }
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Batch; {}/{} batches",
                        result.completed + result.failed,
                        result.batches
                    ),
                    elapsed: Some(start.elapsed()),
                });
            }
            Ok(())
        });
        outcome?;

        if self.cancel.is_cancelled() {
            return Err(SlaError::Cancelled);
        }
        Ok(result)
    }

    fn store_batch(&self, batch: &Batch, bytes: &[u8], destination: &Path) -> Result<bool, SlaError> {
        let bundle = destination.join(format!("batch_{}.zip", batch.index));
        fs::write(&bundle, bytes).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        let extracted = archive::extract_zip(&bundle, destination);
        fs::remove_file(&bundle).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        match extracted {
            Ok(()) => Ok(true),
            Err(SlaError::Extraction(message)) => {
                warn!(batch = batch.index, %message, "unreadable bundle for batch, skipping");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

pub fn missing_ids(records: &[IsicRecord], present: &BTreeSet<String>) -> Vec<String> {
    records
        .iter()
        .filter(|record| !present.contains(&record.image_name))
        .map(|record| record.isic_id.clone())
        .collect()
}

pub fn unexpected_images(records: &[IsicRecord], root: &Path) -> Result<Vec<PathBuf>, SlaError> {
    let expected: BTreeSet<&str> = records.iter().map(|record| record.image_name.as_str()).collect();
    Ok(archive::find_files(root, archive::is_image)?
        .into_iter()
        .filter(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(|stem| !expected.contains(stem))
                .unwrap_or(true)
        })
        .collect())
}
