use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use tracing::debug;

use crate::app::ProgressSink;
use crate::archive;
use crate::error::SlaError;
use crate::store::DatasetLayout;
use crate::transport::Transport;
use crate::workflow::{DatasetWorkflow, DownloadOptions};

pub const DATASET: &str = "pad_ufes_20";
const ARCHIVE_NAME: &str = "pad_ufes_20.zip";
const METADATA_FILE: &str = "metadata.csv";
const IMAGE_PARTS: [&str; 3] = ["imgs_part_1", "imgs_part_2", "imgs_part_3"];

pub struct PadUfes20Workflow<'a> {
    options: DownloadOptions,
    layout: DatasetLayout,
    transport: &'a dyn Transport,
}

impl<'a> PadUfes20Workflow<'a> {
    pub fn new(options: DownloadOptions, transport: &'a dyn Transport) -> Self {
        let layout = DatasetLayout::new(&options.destination, &options.dataset, ARCHIVE_NAME);
        Self {
            options,
            layout,
            transport,
        }
    }
}

impl DatasetWorkflow for PadUfes20Workflow<'_> {
    fn options(&self) -> &DownloadOptions {
        &self.options
    }

    fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    fn fetch(&mut self, sink: &dyn ProgressSink) -> Result<(), SlaError> {
        super::fetch_archive(
            self.transport,
            &self.options.url,
            &self.layout.archive_path,
            self.options.size_mb,
            sink,
        )
    }

    fn extract(&mut self, _sink: &dyn ProgressSink) -> Result<(), SlaError> {
        let images_dir = self.layout.images_path.as_std_path();
        archive::extract_zip(
            self.layout.archive_path.as_std_path(),
            self.layout.extracted_path.as_std_path(),
        )?;

        let inner = archive::find_files(images_dir, |path| archive::has_extension(path, "zip"))?;
        for nested in inner {
            debug!(archive = %nested.display(), "extracting nested image archive");
            archive::extract_zip(&nested, images_dir)?;
            fs::remove_file(&nested).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    fn save_metadata(&mut self) -> Result<Utf8PathBuf, SlaError> {
        let bundled = self.layout.extracted_path.join(METADATA_FILE);
        if !bundled.as_std_path().is_file() {
            return Err(SlaError::MissingMetadata(bundled.into_std_path_buf()));
        }
        let target = self
            .layout
            .metadata_path("csv", self.options.metadata_as_name);
        if target != bundled {
            fs::rename(bundled.as_std_path(), target.as_std_path())
                .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        Ok(target)
    }

    fn collect_images(&mut self) -> Result<Vec<PathBuf>, SlaError> {
        archive::find_files(self.layout.images_path.as_std_path(), |path| {
            archive::has_extension(path, "png")
        })
    }

    fn clean_up(&mut self) -> Result<(), SlaError> {
        for part in IMAGE_PARTS {
            let dir = self.layout.images_path.join(part);
            if dir.as_std_path().exists() {
                fs::remove_dir_all(dir.as_std_path())
                    .map_err(|err| SlaError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }
}
