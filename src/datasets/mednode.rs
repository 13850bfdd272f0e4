use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::app::ProgressSink;
use crate::archive;
use crate::error::SlaError;
use crate::store::{DatasetLayout, Store};
use crate::transport::Transport;
use crate::workflow::{DatasetWorkflow, DownloadOptions};

pub const DATASET: &str = "mednode";
const ARCHIVE_NAME: &str = "mednode.zip";
const DATA_DIR: &str = "complete_mednode_dataset";
const CLASSES: [&str; 2] = ["melanoma", "naevus"];

#[derive(Debug, Serialize)]
struct MednodeRow {
    image_name: String,
    dx: &'static str,
}

/// MED-NODE ships as a zip with one directory per diagnosis and no metadata file, so the
/// metadata is derived from the directory layout.
pub struct MednodeWorkflow<'a> {
    options: DownloadOptions,
    layout: DatasetLayout,
    transport: &'a dyn Transport,
}

impl<'a> MednodeWorkflow<'a> {
    pub fn new(options: DownloadOptions, transport: &'a dyn Transport) -> Self {
        let layout = DatasetLayout::new(&options.destination, &options.dataset, ARCHIVE_NAME);
        Self {
            options,
            layout,
            transport,
        }
    }

    fn data_path(&self) -> Utf8PathBuf {
        self.layout.extracted_path.join(DATA_DIR)
    }

    fn images_for(&self, class: &str) -> Result<Vec<PathBuf>, SlaError> {
        archive::find_files(self.data_path().join(class).as_std_path(), archive::is_image)
    }
}

fn label_for(class: &str) -> &'static str {
    match class {
        "melanoma" => "melanoma",
        _ => "nevus",
    }
}

impl DatasetWorkflow for MednodeWorkflow<'_> {
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
        archive::extract_zip(
            self.layout.archive_path.as_std_path(),
            self.layout.extracted_path.as_std_path(),
        )
    }

    fn save_metadata(&mut self) -> Result<Utf8PathBuf, SlaError> {
        if !self.data_path().as_std_path().is_dir() {
            return Err(SlaError::MissingMetadata(self.data_path().into_std_path_buf()));
        }
        let mut writer = csv::Writer::from_writer(Vec::new());
        for class in CLASSES {
            for image in self.images_for(class)? {
                let Some(stem) = image.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                writer.serialize(MednodeRow {
                    image_name: stem.to_string(),
                    dx: label_for(class),
                })?;
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| SlaError::Csv(err.to_string()))?;
        let path = self
            .layout
            .metadata_path("csv", self.options.metadata_as_name);
        Store::write_bytes_atomic(&path, &bytes)?;
        Ok(path)
    }

    fn collect_images(&mut self) -> Result<Vec<PathBuf>, SlaError> {
        let mut images = Vec::new();
        for class in CLASSES {
            images.extend(self.images_for(class)?);
        }
        Ok(images)
    }

    fn clean_up(&mut self) -> Result<(), SlaError> {
        let data_path = self.data_path();
        if data_path.as_std_path().exists() {
            fs::remove_dir_all(data_path.as_std_path())
                .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}
