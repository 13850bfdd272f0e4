use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::datasets;
use crate::domain::DatasetId;
use crate::error::SlaError;
use crate::isic::catalog::{fetch_all, write_records};
use crate::isic::{DEFAULT_API_URL, IsicApi, IsicCatalogCache};
use crate::store::{ISIC_METADATA_FILE, Store};
use crate::transport::Transport;
use crate::workflow::{DownloadOptions, WorkflowOutcome, run_workflow};

#[derive(Debug, Clone, Default)]
pub struct DownloadFlags {
    pub destination: Option<Utf8PathBuf>,
    pub force: bool,
    pub clean: bool,
    pub skip: bool,
    pub metadata_as_name: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItemResult>,
}

impl DownloadResult {
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    Fetched,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItemResult {
    pub dataset: String,
    pub status: ItemStatus,
    pub path: Option<String>,
    pub images: usize,
    pub metadata: Option<String>,
    pub error: Option<String>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IsicMetadataResult {
    pub path: String,
    pub records: usize,
    pub cache_path: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: Transport> {
    catalog: Catalog,
    store: Store,
    transport: T,
    settings: Settings,
    isic_cache: IsicCatalogCache,
}

impl<T: Transport> App<T> {
    pub fn new(catalog: Catalog, settings: Settings, transport: T) -> Self {
        let store = Store::new(&settings);
        let isic_cache = IsicCatalogCache::new(store.isic_metadata_cache());
        Self {
            catalog,
            store,
            transport,
            settings,
            isic_cache,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn resolve_datasets(&self, inputs: &[String]) -> Result<Vec<DatasetId>, SlaError> {
        if inputs.is_empty() {
            return Err(SlaError::NoDatasets);
        }
        let mut ids = Vec::with_capacity(inputs.len());
        for input in inputs {
            let matched = self.catalog.resolve(input)?;
            if !matched.is_exact() {
                warn!(
                    "'{}' is not a known dataset, using '{}' ({}% match)",
                    matched.requested, matched.id, matched.confidence
                );
            }
            if !ids.contains(&matched.id) {
                ids.push(matched.id);
            }
        }
        Ok(ids)
    }

    /// Downloads each dataset in turn. A failing dataset is recorded and the next one
    /// proceeds.
    pub fn download(
        &self,
        ids: &[DatasetId],
        flags: &DownloadFlags,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, SlaError> {
        let store = match &flags.destination {
            Some(dir) => self.store.with_data_root(dir.clone()),
            None => self.store.clone(),
        };
        store.ensure_data_root()?;
        store.ensure_cache_root()?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; dataset {id}"),
                elapsed: None,
            });
            let item = match self.download_one(id, &store, flags, sink) {
                Ok(item) => item,
                Err(err) => {
                    error!("{id}: {err}");
                    DownloadItemResult {
                        dataset: id.to_string(),
                        status: ItemStatus::Failed,
                        path: None,
                        images: 0,
                        metadata: None,
                        error: Some(err.to_string()),
                        finished_at: now_rfc3339(),
                    }
                }
            };
            items.push(item);
        }
        Ok(DownloadResult { items })
    }

    fn download_one(
        &self,
        id: &DatasetId,
        store: &Store,
        flags: &DownloadFlags,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadItemResult, SlaError> {
        let entry = self.catalog.entry(id)?;
        let url = entry
            .download_url()
            .ok_or_else(|| SlaError::UnsupportedDataset(id.to_string()))?;
        let options = DownloadOptions {
            dataset: id.clone(),
            url: url.to_string(),
            size_mb: entry.info.size,
            destination: store.data_root().to_path_buf(),
            force: flags.force,
            clean: flags.clean,
            skip: flags.skip,
            metadata_as_name: flags.metadata_as_name,
            unzip: self.settings.unzip,
            convert: self.settings.convert.clone(),
            isic: self.settings.isic.clone(),
        };

        let mut workflow = datasets::workflow_for(entry, options, &self.transport, &self.isic_cache)?;
        let report = run_workflow(workflow.as_mut(), sink)?;
        let status = match report.outcome {
            WorkflowOutcome::Completed => ItemStatus::Completed,
            WorkflowOutcome::Fetched => ItemStatus::Fetched,
            WorkflowOutcome::Skipped => ItemStatus::Skipped,
        };
        Ok(DownloadItemResult {
            dataset: report.dataset,
            status,
            path: Some(report.path),
            images: report.images,
            metadata: report.metadata,
            error: None,
            finished_at: now_rfc3339(),
        })
    }

    pub fn download_isic_metadata(
        &self,
        destination: Option<&Utf8PathBuf>,
        sink: &dyn ProgressSink,
    ) -> Result<IsicMetadataResult, SlaError> {
        let store = match destination {
            Some(dir) => self.store.with_data_root(dir.clone()),
            None => self.store.clone(),
        };
        store.ensure_data_root()?;
        store.ensure_cache_root()?;

        let api = IsicApi::new(self.isic_api_url());
        let records = fetch_all(&self.transport, &api, self.settings.isic.page_size, sink)?;
        let path = store.data_root().join(ISIC_METADATA_FILE);
        write_records(&path, &records)?;
        self.isic_cache.prime_with(&records)?;
        info!("saved {} image record(s) to '{path}'", records.len());

        Ok(IsicMetadataResult {
            path: path.to_string(),
            records: records.len(),
            cache_path: self.isic_cache.path().to_string(),
        })
    }

    fn isic_api_url(&self) -> String {
        self.catalog
            .names()
            .into_iter()
            .filter_map(|name| self.catalog.lookup(name).ok())
            .filter(|entry| entry.info.isic_name.is_some())
            .find_map(|entry| entry.download_url().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
