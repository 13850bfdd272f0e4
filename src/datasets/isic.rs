use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use tracing::{debug, info};

use crate::app::ProgressSink;
use crate::archive;
use crate::error::SlaError;
use crate::isic::catalog::write_records;
use crate::isic::{BatchFetcher, IsicApi, IsicCatalogCache, IsicRecord};
use crate::store::DatasetLayout;
use crate::transport::Transport;
use crate::workflow::{DatasetWorkflow, DownloadOptions};

pub struct IsicWorkflow<'a> {
    options: DownloadOptions,
    layout: DatasetLayout,
    isic_name: String,
    api: IsicApi,
    transport: &'a dyn Transport,
    cache: &'a IsicCatalogCache,
    records: Vec<IsicRecord>,
}

impl<'a> IsicWorkflow<'a> {
    pub fn new(
        options: DownloadOptions,
        isic_name: &str,
        transport: &'a dyn Transport,
        cache: &'a IsicCatalogCache,
    ) -> Self {
        let archive_name = format!("{}.zip", options.dataset);
        let layout = DatasetLayout::new(&options.destination, &options.dataset, &archive_name);
        let api = IsicApi::new(options.url.clone());
        Self {
            options,
            layout,
            isic_name: isic_name.to_string(),
            api,
            transport,
            cache,
            records: Vec::new(),
        }
    }
}

impl DatasetWorkflow for IsicWorkflow<'_> {
    fn options(&self) -> &DownloadOptions {
        &self.options
    }

    fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    fn uses_archive(&self) -> bool {
        false
    }

    fn fetch(&mut self, sink: &dyn ProgressSink) -> Result<(), SlaError> {
        let catalog =
            self.cache
                .records(self.transport, &self.api, self.options.isic.page_size, sink)?;
        self.records = catalog
            .iter()
            .filter(|record| record.belongs_to(&self.isic_name))
            .cloned()
            .collect();
        if self.records.is_empty() {
            return Err(SlaError::NoInstances(self.isic_name.clone()));
        }
        info!(
            dataset = %self.options.dataset,
            images = self.records.len(),
            "found {} image(s) for '{}'",
            self.records.len(),
            self.isic_name
        );
        Ok(())
    }

    fn extract(&mut self, sink: &dyn ProgressSink) -> Result<(), SlaError> {
        let settings = &self.options.isic;
        let fetcher = BatchFetcher::new(
            self.transport,
            &self.api,
            settings.batch_size,
            settings.max_workers,
            settings.max_retries,
        );
        let summary = fetcher.download(
            self.options.dataset.as_str(),
            &self.records,
            self.layout.extracted_path.as_std_path(),
            sink,
        )?;
        debug!(?summary, "batch download finished");
        Ok(())
    }

    fn save_metadata(&mut self) -> Result<Utf8PathBuf, SlaError> {
        let present = archive::image_stems(self.layout.extracted_path.as_std_path())?;
        let rows: Vec<IsicRecord> = self
            .records
            .iter()
            .filter(|record| present.contains(&record.image_name))
            .cloned()
            .collect();
        let path = self
            .layout
            .metadata_path("csv", self.options.metadata_as_name);
        write_records(&path, &rows)?;
        Ok(path)
    }

    fn collect_images(&mut self) -> Result<Vec<PathBuf>, SlaError> {
        let images_dir = self.layout.images_path.clone().into_std_path_buf();
        archive::find_files(self.layout.extracted_path.as_std_path(), |path| {
            archive::is_image(path) && !path.starts_with(&images_dir)
        })
    }

    fn clean_up(&mut self) -> Result<(), SlaError> {
        let images_dir = self.layout.images_path.as_std_path();
        let entries = fs::read_dir(self.layout.extracted_path.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path != images_dir {
                fs::remove_dir_all(&path).map_err(|err| SlaError::Filesystem(err.to_string()))?;
            }
        }
        for removed in archive::strip_sidecars(images_dir)? {
            debug!(file = %removed.display(), "removed sidecar file");
        }
        Ok(())
    }
}
