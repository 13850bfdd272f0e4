use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use tracing::error;

use crate::app::ProgressSink;
use crate::archive;
use crate::error::SlaError;
use crate::store::DatasetLayout;
use crate::transport::Transport;
use crate::workflow::{DatasetWorkflow, DownloadOptions};

pub const DATASET: &str = "ph2";
const ARCHIVE_NAME: &str = "ph2.rar";
const DATA_DIR: &str = "PH2Dataset";
const METADATA_FILE: &str = "PH2_dataset.xlsx";
const IMAGES_DIR: &str = "PH2 Dataset images";
const DERMOSCOPIC_SUFFIX: &str = "_Dermoscopic_Image";

pub struct Ph2Workflow<'a> {
    options: DownloadOptions,
    layout: DatasetLayout,
    transport: &'a dyn Transport,
    find_tool: fn(&str) -> Option<PathBuf>,
}

impl<'a> Ph2Workflow<'a> {
    pub fn new(options: DownloadOptions, transport: &'a dyn Transport) -> Self {
        let layout = DatasetLayout::new(&options.destination, &options.dataset, ARCHIVE_NAME);
        Self {
            options,
            layout,
            transport,
            find_tool: archive::find_in_path,
        }
    }

    pub fn with_tool_lookup(mut self, find_tool: fn(&str) -> Option<PathBuf>) -> Self {
        self.find_tool = find_tool;
        self
    }

    fn data_path(&self) -> Utf8PathBuf {
        self.layout.extracted_path.join(DATA_DIR)
    }
}

fn is_dermoscopic_image(path: &Path) -> bool {
    let in_dermoscopic_dir = path
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(DERMOSCOPIC_SUFFIX))
        .unwrap_or(false);
    in_dermoscopic_dir && archive::has_extension(path, "bmp")
}

impl DatasetWorkflow for Ph2Workflow<'_> {
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
        let result = archive::extract_rar(
            self.layout.archive_path.as_std_path(),
            self.layout.extracted_path.as_std_path(),
            self.find_tool,
        );
        if let Err(err @ SlaError::MissingTool(_)) = &result {
            error!("{err}");
            error!("you may have to install a 3rd-party application to unpack '.rar' files");
        }
        result
    }

    fn save_metadata(&mut self) -> Result<Utf8PathBuf, SlaError> {
        let source = self.data_path().join(METADATA_FILE);
        if !source.as_std_path().is_file() {
            return Err(SlaError::MissingMetadata(source.into_std_path_buf()));
        }
        let target = self
            .layout
            .metadata_path("xlsx", self.options.metadata_as_name);
        fs::rename(source.as_std_path(), target.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        Ok(target)
    }

    fn collect_images(&mut self) -> Result<Vec<PathBuf>, SlaError> {
        archive::find_files(
            self.data_path().join(IMAGES_DIR).as_std_path(),
            is_dermoscopic_image,
        )
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
