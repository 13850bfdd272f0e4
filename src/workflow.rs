use std::fmt;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::archive;
use crate::config::IsicSettings;
use crate::domain::DatasetId;
use crate::error::SlaError;
use crate::store::DatasetLayout;

pub const ORIGINAL_FORMAT: &str = "original";

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub dataset: DatasetId,
    pub url: String,
    pub size_mb: f64,
    pub destination: Utf8PathBuf,
    pub force: bool,
    pub clean: bool,
    pub skip: bool,
    pub metadata_as_name: bool,
    pub unzip: bool,
    pub convert: String,
    pub isic: IsicSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Fetching,
    Extracting,
    MetadataSaving,
    ImageCollecting,
    ImageMoving,
    CleaningUp,
    Done,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            WorkflowState::Idle => "Idle",
            WorkflowState::Fetching => "Fetching",
            WorkflowState::Extracting => "Extracting",
            WorkflowState::MetadataSaving => "MetadataSaving",
            WorkflowState::ImageCollecting => "ImageCollecting",
            WorkflowState::ImageMoving => "ImageMoving",
            WorkflowState::CleaningUp => "CleaningUp",
            WorkflowState::Done => "Done",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Skipped,
    Fetched,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub dataset: String,
    pub outcome: WorkflowOutcome,
    pub state: WorkflowState,
    pub path: String,
    pub images: usize,
    pub metadata: Option<String>,
}

/// One dataset source. The driver owns sequencing and the exists/force gate; an
/// implementation only fills in the steps that differ between sources.
pub trait DatasetWorkflow {
    fn options(&self) -> &DownloadOptions;

    fn layout(&self) -> &DatasetLayout;

    fn uses_archive(&self) -> bool {
        true
    }

    fn fetch(&mut self, sink: &dyn ProgressSink) -> Result<(), SlaError>;

    fn extract(&mut self, sink: &dyn ProgressSink) -> Result<(), SlaError>;

    fn save_metadata(&mut self) -> Result<Utf8PathBuf, SlaError>;

    fn collect_images(&mut self) -> Result<Vec<PathBuf>, SlaError>;

    fn convert_images(&mut self, images: Vec<PathBuf>) -> Result<Vec<PathBuf>, SlaError> {
        let convert = &self.options().convert;
        if convert != ORIGINAL_FORMAT {
            warn!(
                dataset = %self.options().dataset,
                format = %convert,
                "image conversion is not supported, keeping original format"
            );
        }
        Ok(images)
    }

    fn move_images(&mut self, images: &[PathBuf]) -> Result<usize, SlaError> {
        archive::move_files(images, self.layout().images_path.as_std_path())
    }

    fn clean_up(&mut self) -> Result<(), SlaError>;
}

pub fn run_workflow<W: DatasetWorkflow + ?Sized>(
    workflow: &mut W,
    sink: &dyn ProgressSink,
) -> Result<WorkflowReport, SlaError> {
    let options = workflow.options().clone();
    let layout = workflow.layout().clone();
    let dataset = options.dataset.as_str().to_string();
    let start = std::time::Instant::now();
    let mut state = WorkflowState::Idle;

    let report = |outcome, state, images, metadata: Option<&Utf8PathBuf>| WorkflowReport {
        dataset: dataset.clone(),
        outcome,
        state,
        path: layout.extracted_path.to_string(),
        images,
        metadata: metadata.map(ToString::to_string),
    };

    if layout.extracted_path.as_std_path().exists() {
        if !options.force {
            warn!(
                "{dataset} already exists at the destination directory '{}'",
                layout.extracted_path
            );
            warn!("If you wish to re-download the dataset, try 'sla-cli download -f/--force <DATASET>'");
            warn!("Skipping...");
            sink.event(ProgressEvent {
                message: format!("phase=Skip; {dataset} exists at {}", layout.extracted_path),
                elapsed: None,
            });
            return Ok(report(WorkflowOutcome::Skipped, state, 0, None));
        }
        info!("'-f/--force' flag set, deleting directory '{}'", layout.extracted_path);
        fs::remove_dir_all(layout.extracted_path.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
    }

    fs::create_dir_all(options.destination.as_std_path())
        .map_err(|err| SlaError::Filesystem(err.to_string()))?;

    let archive_present = layout.archive_path.as_std_path().exists();
    if workflow.uses_archive() && options.skip && archive_present {
        info!("'-s/--skip' flag set, reusing archive '{}'", layout.archive_path);
    } else {
        advance(&mut state, WorkflowState::Fetching, &dataset, sink);
        info!(size_mb = options.size_mb, "acquiring {dataset}");
        workflow.fetch(sink)?;
    }

    if workflow.uses_archive() && !options.unzip {
        info!("unzip disabled, leaving archive at '{}'", layout.archive_path);
        return Ok(report(WorkflowOutcome::Fetched, state, 0, None));
    }

    advance(&mut state, WorkflowState::Extracting, &dataset, sink);
    workflow.extract(sink)?;
    if workflow.uses_archive() && options.clean && layout.archive_path.as_std_path().exists() {
        fs::remove_file(layout.archive_path.as_std_path())
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
    }

    advance(&mut state, WorkflowState::MetadataSaving, &dataset, sink);
    let metadata = workflow.save_metadata()?;

    advance(&mut state, WorkflowState::ImageCollecting, &dataset, sink);
    let images = workflow.collect_images()?;
    let images = workflow.convert_images(images)?;

    advance(&mut state, WorkflowState::ImageMoving, &dataset, sink);
    fs::create_dir_all(layout.images_path.as_std_path())
        .map_err(|err| SlaError::Filesystem(err.to_string()))?;
    workflow.move_images(&images)?;

    advance(&mut state, WorkflowState::CleaningUp, &dataset, sink);
    workflow.clean_up()?;
    archive::remove_empty_dirs(layout.extracted_path.as_std_path())?;

    let count = archive::count_images(layout.images_path.as_std_path())?;
    state = WorkflowState::Done;
    sink.event(ProgressEvent {
        message: format!("phase=Done; {dataset} images={count}"),
        elapsed: Some(start.elapsed()),
    });
    info!("{dataset} ready at '{}' ({count} images)", layout.extracted_path);
    Ok(report(WorkflowOutcome::Completed, state, count, Some(&metadata)))
}

fn advance(state: &mut WorkflowState, next: WorkflowState, dataset: &str, sink: &dyn ProgressSink) {
    *state = next;
    sink.event(ProgressEvent {
        message: format!("phase={next}; {dataset}"),
        elapsed: None,
    });
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Mutex;

    use super::*;
    use crate::store::Store;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn event(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event.message);
        }
    }

    struct FakeWorkflow {
        options: DownloadOptions,
        layout: DatasetLayout,
        calls: RefCell<Vec<&'static str>>,
    }

    impl FakeWorkflow {
        fn new(destination: Utf8PathBuf, force: bool) -> Self {
            let dataset = DatasetId::new("fake");
            let store = Store::new_with_paths(destination.clone(), destination.join(".cache"));
            Self {
                layout: store.layout(&dataset, "fake.zip"),
                options: DownloadOptions {
                    dataset,
                    url: "http://localhost/fake.zip".to_string(),
                    size_mb: 1.0,
                    destination,
                    force,
                    clean: true,
                    skip: false,
                    metadata_as_name: false,
                    unzip: true,
                    convert: ORIGINAL_FORMAT.to_string(),
                    isic: IsicSettings::default(),
                },
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl DatasetWorkflow for FakeWorkflow {
        fn options(&self) -> &DownloadOptions {
            &self.options
        }

        fn layout(&self) -> &DatasetLayout {
            &self.layout
        }

        fn fetch(&mut self, _sink: &dyn ProgressSink) -> Result<(), SlaError> {
            self.calls.borrow_mut().push("fetch");
            fs::write(self.layout.archive_path.as_std_path(), b"zip").unwrap();
            Ok(())
        }

        fn extract(&mut self, _sink: &dyn ProgressSink) -> Result<(), SlaError> {
            self.calls.borrow_mut().push("extract");
            let raw = self.layout.extracted_path.join("raw");
            fs::create_dir_all(raw.as_std_path()).unwrap();
            fs::write(raw.join("a.jpg").as_std_path(), b"a").unwrap();
            Ok(())
        }

        fn save_metadata(&mut self) -> Result<Utf8PathBuf, SlaError> {
            self.calls.borrow_mut().push("metadata");
            let path = self.layout.metadata_path("csv", false);
            fs::write(path.as_std_path(), "image_name\na\n").unwrap();
            Ok(path)
        }

        fn collect_images(&mut self) -> Result<Vec<PathBuf>, SlaError> {
            self.calls.borrow_mut().push("collect");
            archive::find_files(
                self.layout.extracted_path.join("raw").as_std_path(),
                archive::is_image,
            )
        }

        fn clean_up(&mut self) -> Result<(), SlaError> {
            self.calls.borrow_mut().push("clean_up");
            Ok(())
        }
    }

    #[test]
    fn runs_every_step_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let mut workflow = FakeWorkflow::new(dest.clone(), false);
        let sink = RecordingSink::default();

        let report = run_workflow(&mut workflow, &sink).unwrap();
        assert_eq!(report.outcome, WorkflowOutcome::Completed);
        assert_eq!(report.state, WorkflowState::Done);
        assert_eq!(report.images, 1);
        assert_eq!(
            *workflow.calls.borrow(),
            vec!["fetch", "extract", "metadata", "collect", "clean_up"]
        );
        assert!(dest.join("fake/images/a.jpg").exists());
        assert!(!dest.join("fake/raw").exists());
        assert!(!dest.join("fake.zip").exists());
    }

    #[test]
    fn existing_directory_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(dest.join("fake").as_std_path()).unwrap();
        let mut workflow = FakeWorkflow::new(dest, false);
        let sink = RecordingSink::default();

        let report = run_workflow(&mut workflow, &sink).unwrap();
        assert_eq!(report.outcome, WorkflowOutcome::Skipped);
        assert!(workflow.calls.borrow().is_empty());
        let events = sink.events.lock().unwrap();
        assert!(events[0].starts_with("phase=Skip"));
    }

    #[test]
    fn unzip_disabled_stops_after_fetch() {
        let temp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let mut workflow = FakeWorkflow::new(dest.clone(), false);
        workflow.options.unzip = false;

        let report = run_workflow(&mut workflow, &RecordingSink::default()).unwrap();
        assert_eq!(report.outcome, WorkflowOutcome::Fetched);
        assert_eq!(*workflow.calls.borrow(), vec!["fetch"]);
        assert!(dest.join("fake.zip").exists());
    }

    #[test]
    fn skip_reuses_existing_archive() {
        let temp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::write(dest.join("fake.zip").as_std_path(), b"zip").unwrap();
        let mut workflow = FakeWorkflow::new(dest, false);
        workflow.options.skip = true;

        run_workflow(&mut workflow, &RecordingSink::default()).unwrap();
        assert_eq!(workflow.calls.borrow()[0], "extract");
    }
}
