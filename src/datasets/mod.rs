//! Concrete dataset workflows.

pub mod isic;
pub mod mednode;
pub mod pad_ufes_20;
pub mod ph2;

use camino::Utf8Path;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::catalog::DatasetEntry;
use crate::error::SlaError;
use crate::isic::IsicCatalogCache;
use crate::transport::Transport;
use crate::workflow::{DatasetWorkflow, DownloadOptions};

pub use isic::IsicWorkflow;
pub use mednode::MednodeWorkflow;
pub use pad_ufes_20::PadUfes20Workflow;
pub use ph2::Ph2Workflow;

pub fn workflow_for<'a>(
    entry: &DatasetEntry,
    options: DownloadOptions,
    transport: &'a dyn Transport,
    isic_cache: &'a IsicCatalogCache,
) -> Result<Box<dyn DatasetWorkflow + 'a>, SlaError> {
    let dataset = options.dataset.clone();
    let workflow: Box<dyn DatasetWorkflow + 'a> = match dataset.as_str() {
        mednode::DATASET => Box::new(MednodeWorkflow::new(options, transport)),
        ph2::DATASET => Box::new(Ph2Workflow::new(options, transport)),
        pad_ufes_20::DATASET => Box::new(PadUfes20Workflow::new(options, transport)),
        other => match entry.info.isic_name.as_deref() {
            Some(isic_name) => Box::new(IsicWorkflow::new(options, isic_name, transport, isic_cache)),
            None => return Err(SlaError::UnsupportedDataset(other.to_string())),
        },
    };
    Ok(workflow)
}

pub(crate) fn fetch_archive(
    transport: &dyn Transport,
    url: &str,
    archive_path: &Utf8Path,
    size_mb: f64,
    sink: &dyn ProgressSink,
) -> Result<(), SlaError> {
    let parent = archive_path
        .parent()
        .ok_or_else(|| SlaError::Filesystem(format!("no parent directory for {archive_path}")))?;
    let temp = tempfile::Builder::new()
        .prefix(".sla-download")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SlaError::Filesystem(err.to_string()))?;

    if size_mb > 0.0 {
        info!("downloading {url} (~{size_mb} MB)");
    } else {
        info!("downloading {url}");
    }
    let start = std::time::Instant::now();
    let bytes = transport.download(url, temp.path())?;
    temp.persist(archive_path.as_std_path())
        .map_err(|err| SlaError::Filesystem(err.to_string()))?;
    sink.event(ProgressEvent {
        message: format!("phase=Fetching; {bytes} bytes written to {archive_path}"),
        elapsed: Some(start.elapsed()),
    });
    Ok(())
}
