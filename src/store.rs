use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Settings;
use crate::domain::DatasetId;
use crate::error::SlaError;

pub const ISIC_METADATA_FILE: &str = "isic_metadata.csv";

#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(settings: &Settings) -> Self {
        Self::new_with_paths(
            settings.data_directory.clone(),
            settings.cache_directory.clone(),
        )
    }

    pub fn new_with_paths(data_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            cache_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn with_data_root(&self, data_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            cache_root: self.cache_root.clone(),
        }
    }

    pub fn layout(&self, id: &DatasetId, archive_name: &str) -> DatasetLayout {
        DatasetLayout::new(&self.data_root, id, archive_name)
    }

    pub fn isic_metadata_cache(&self) -> Utf8PathBuf {
        self.cache_root.join(ISIC_METADATA_FILE)
    }

    pub fn ensure_data_root(&self) -> Result<(), SlaError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), SlaError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SlaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        let temp = tempfile::Builder::new()
            .prefix(".sla-write")
            .tempfile_in(
                path.parent()
                    .map(Utf8Path::as_std_path)
                    .unwrap_or(Path::new(".")),
            )
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub dataset: DatasetId,
    pub archive_path: Utf8PathBuf,
    pub extracted_path: Utf8PathBuf,
    pub images_path: Utf8PathBuf,
}

impl DatasetLayout {
    pub fn new(destination: &Utf8Path, id: &DatasetId, archive_name: &str) -> Self {
        let extracted_path = destination.join(id.as_str());
        Self {
            dataset: id.clone(),
            archive_path: destination.join(archive_name),
            images_path: extracted_path.join("images"),
            extracted_path,
        }
    }

    /// `metadata.<ext>`, or `<dataset>.<ext>` when the metadata is named after the dataset.
    pub fn metadata_path(&self, extension: &str, as_name: bool) -> Utf8PathBuf {
        let stem = if as_name {
            self.dataset.as_str()
        } else {
            "metadata"
        };
        self.extracted_path.join(format!("{stem}.{extension}"))
    }
}
