use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SlaError {
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("no downloader is available for dataset: {0}")]
    #[diagnostic(help("run `sla-cli ls -v info` to see where this dataset can be obtained"))]
    UnsupportedDataset(String),

    #[error("no dataset given")]
    NoDatasets,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("failed to parse dataset catalog: {0}")]
    CatalogParse(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("required tool not found: {0}")]
    #[diagnostic(help(
        "install a RAR capable extractor such as `unrar` or `7z` (7-zip worked as expected on Windows 10); see https://www.rarlab.com/ or https://www.7-zip.org/"
    ))]
    MissingTool(String),

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("metadata file not found at {0}")]
    #[diagnostic(help("the archive may be partially extracted; re-run with `--force`"))]
    MissingMetadata(PathBuf),

    #[error("{dataset}: {missing} image(s) still missing after {attempts} retry pass(es)")]
    IncompleteDownload {
        dataset: String,
        missing: usize,
        attempts: usize,
    },

    #[error("no image-archive instances found for dataset '{0}'")]
    NoInstances(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("{0} dataset(s) failed to download")]
    DatasetsFailed(usize),
}

impl From<csv::Error> for SlaError {
    fn from(err: csv::Error) -> Self {
        SlaError::Csv(err.to_string())
    }
}
