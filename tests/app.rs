use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};
use zip::write::SimpleFileOptions;

use skin_lesion_archive::app::{App, DownloadFlags, ItemStatus};
use skin_lesion_archive::catalog::Catalog;
use skin_lesion_archive::config::{IsicSettings, Settings};
use skin_lesion_archive::error::SlaError;
use skin_lesion_archive::isic::api::parse_id_list;
use skin_lesion_archive::output::JsonOutput;
use skin_lesion_archive::transport::Transport;

const MEDNODE_URL: &str =
    "http://www.cs.rug.nl/~imaging/databases/melanoma_naevi/complete_mednode_dataset.zip";
const PAD_UFES_URL: &str =
    "https://md-datasets-cache-zipfiles-prod.s3.eu-west-1.amazonaws.com/zr7vgbcyr2-1.zip";

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn api_record(index: usize, dataset: &str) -> Value {
    json!({
        "_id": format!("id{index:03}"),
        "name": format!("ISIC_{index:07}"),
        "created": "2018-06-01T10:00:00.000000+00:00",
        "dataset": {"name": dataset, "description": "test images"},
        "notes": {"reviewed": {"accepted": true}, "tags": ["ISIC 2018: Task 3"]},
        "meta": {
            "acquisition": {"pixelsX": 600, "pixelsY": 450},
            "clinical": {"age_approx": 40, "sex": "male", "diagnosis": "nevus", "benign_malignant": "benign"}
        }
    })
}

/// 25 UDA-1 records followed by 7 UDA-2 records.
fn archive_records() -> Vec<Value> {
    (0..32)
        .map(|i| api_record(i, if i < 25 { "UDA-1" } else { "UDA-2" }))
        .collect()
}

#[derive(Default)]
struct MockTransport {
    records: Vec<Value>,
    files: BTreeMap<String, Vec<u8>>,
    fail_once: Mutex<BTreeSet<String>>,
    never_delivered: BTreeSet<String>,
    stray_image: bool,
    page_requests: Mutex<Vec<(usize, usize)>>,
    batch_requests: Mutex<Vec<Vec<String>>>,
    downloads: Mutex<Vec<String>>,
}

impl MockTransport {
    fn with_records(records: Vec<Value>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    fn name_of(&self, id: &str) -> Option<(String, String)> {
        self.records
            .iter()
            .find(|record| record["_id"] == id)
            .map(|record| {
                (
                    record["name"].as_str().unwrap().to_string(),
                    record["dataset"]["name"].as_str().unwrap().to_string(),
                )
            })
    }
}

fn query_value<'a>(query: &'a [(&str, String)], key: &str) -> &'a str {
    query
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.as_str())
        .unwrap()
}

impl Transport for MockTransport {
    fn get_bytes(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, SlaError> {
        if url.ends_with("/image") {
            let limit: usize = query_value(query, "limit").parse().unwrap();
            let offset: usize = query_value(query, "offset").parse().unwrap();
            self.page_requests.lock().unwrap().push((limit, offset));
            let page: Vec<&Value> = self.records.iter().skip(offset).take(limit).collect();
            return Ok(serde_json::to_vec(&page).unwrap());
        }

        if url.ends_with("/image/download") {
            assert_eq!(query_value(query, "include"), "images");
            let ids = parse_id_list(query_value(query, "imageIds"));
            self.batch_requests.lock().unwrap().push(ids.clone());

            let mut fail_once = self.fail_once.lock().unwrap();
            if ids.iter().any(|id| fail_once.contains(id)) {
                fail_once.retain(|id| !ids.contains(id));
                return Ok(Vec::new());
            }

            let (_, dataset) = self.name_of(&ids[0]).unwrap();
            let folder = format!("ISIC-images/{dataset}");
            let mut entries = Vec::new();
            for id in ids.iter().filter(|id| !self.never_delivered.contains(*id)) {
                let (name, _) = self.name_of(id).unwrap();
                entries.push((format!("{folder}/{name}.jpg"), b"jpeg".to_vec()));
            }
            if self.stray_image {
                entries.push((format!("{folder}/ISIC_9{}.jpg", ids[0]), b"jpeg".to_vec()));
            }
            entries.push((format!("{folder}/LICENSE.txt"), b"CC-0".to_vec()));
            let refs: Vec<(&str, &[u8])> = entries
                .iter()
                .map(|(name, content)| (name.as_str(), content.as_slice()))
                .collect();
            return Ok(zip_bytes(&refs));
        }

        Err(SlaError::HttpStatus {
            url: url.to_string(),
            status: 404,
            message: "not found".to_string(),
        })
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, SlaError> {
        self.downloads.lock().unwrap().push(url.to_string());
        let bytes = self
            .files
            .get(url)
            .ok_or_else(|| SlaError::Http(format!("no fixture for {url}")))?;
        std::fs::write(destination, bytes).unwrap();
        Ok(bytes.len() as u64)
    }
}

fn settings(root: &Path, batch_size: usize) -> Settings {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap();
    Settings {
        isic: IsicSettings {
            batch_size,
            max_workers: 3,
            max_retries: 3,
            page_size: 10,
        },
        data_directory: root.join("data"),
        cache_directory: root.join("cache"),
        unzip: true,
        convert: "original".to_string(),
        request_timeout: Duration::from_secs(5),
    }
}

fn app(root: &Path, transport: MockTransport) -> App<MockTransport> {
    App::new(Catalog::bundled().unwrap(), settings(root, 10), transport)
}

fn download(
    app: &App<MockTransport>,
    datasets: &[&str],
    flags: &DownloadFlags,
) -> skin_lesion_archive::app::DownloadResult {
    let inputs: Vec<String> = datasets.iter().map(|name| name.to_string()).collect();
    let ids = app.resolve_datasets(&inputs).unwrap();
    app.download(&ids, flags, &JsonOutput).unwrap()
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

fn csv_rows(path: &Path) -> usize {
    csv::Reader::from_path(path).unwrap().records().count()
}

#[test]
fn failed_batch_is_retried_once_with_its_ids() {
    let temp = tempfile::tempdir().unwrap();
    let transport = MockTransport::with_records(archive_records());
    transport.fail_once.lock().unwrap().insert("id010".to_string());
    let app = app(temp.path(), transport);

    let result = download(&app, &["uda_1"], &DownloadFlags::default());
    let item = &result.items[0];
    assert_eq!(item.status, ItemStatus::Completed, "{:?}", item.error);
    assert_eq!(item.images, 25);

    let batches = app.transport().batch_requests.lock().unwrap();
    assert_eq!(batches.len(), 4);
    let expected_retry: Vec<String> = (10..20).map(|i| format!("id{i:03}")).collect();
    assert_eq!(batches[3], expected_retry);

    let dataset_dir = temp.path().join("data/uda_1");
    let images = list_dir(&dataset_dir.join("images"));
    assert_eq!(images.len(), 25);
    assert!(images.iter().all(|name| name.ends_with(".jpg")));
    assert_eq!(list_dir(&dataset_dir), vec!["images", "metadata.csv"]);
    assert_eq!(csv_rows(&dataset_dir.join("metadata.csv")), 25);
}

#[test]
fn catalog_pagination_stops_on_short_page() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::with_records(archive_records()));

    download(&app, &["uda_1"], &DownloadFlags::default());

    let pages = app.transport().page_requests.lock().unwrap();
    assert_eq!(*pages, vec![(10, 0), (10, 10), (10, 20), (10, 30)]);
    assert_eq!(csv_rows(&temp.path().join("cache/isic_metadata.csv")), 32);
}

#[test]
fn catalog_pagination_requests_trailing_empty_page() {
    let temp = tempfile::tempdir().unwrap();
    let records: Vec<Value> = (0..30).map(|i| api_record(i, "UDA-1")).collect();
    let app = app(temp.path(), MockTransport::with_records(records));

    let result = download(&app, &["uda_1"], &DownloadFlags::default());
    assert_eq!(result.items[0].images, 30);

    let pages = app.transport().page_requests.lock().unwrap();
    assert_eq!(*pages, vec![(10, 0), (10, 10), (10, 20), (10, 30)]);
    assert_eq!(csv_rows(&temp.path().join("cache/isic_metadata.csv")), 30);
}

#[test]
fn images_missing_from_catalog_are_dropped() {
    let temp = tempfile::tempdir().unwrap();
    let mut transport = MockTransport::with_records(archive_records());
    transport.stray_image = true;
    let app = app(temp.path(), transport);

    let result = download(&app, &["uda_1"], &DownloadFlags::default());
    let item = &result.items[0];
    assert_eq!(item.status, ItemStatus::Completed, "{:?}", item.error);
    assert_eq!(item.images, 25);

    let dataset_dir = temp.path().join("data/uda_1");
    let images = list_dir(&dataset_dir.join("images"));
    assert!(images.iter().all(|name| name.starts_with("ISIC_00")));
    assert_eq!(images.len(), csv_rows(&dataset_dir.join("metadata.csv")));
}

#[test]
fn catalog_cache_is_read_through() {
    let temp = tempfile::tempdir().unwrap();
    let first = app(temp.path(), MockTransport::with_records(archive_records()));
    let result = download(&first, &["uda_1", "uda_2"], &DownloadFlags::default());
    assert!(result.items.iter().all(|item| item.status == ItemStatus::Completed));
    assert_eq!(result.items[1].images, 7);
    assert_eq!(first.transport().page_requests.lock().unwrap().len(), 4);

    let second = app(temp.path(), MockTransport::with_records(archive_records()));
    let flags = DownloadFlags {
        force: true,
        ..DownloadFlags::default()
    };
    download(&second, &["uda_2"], &flags);
    assert!(second.transport().page_requests.lock().unwrap().is_empty());
}

#[test]
fn second_download_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::with_records(archive_records()));

    download(&app, &["uda_1"], &DownloadFlags::default());
    let metadata = temp.path().join("data/uda_1/metadata.csv");
    let before = std::fs::read(&metadata).unwrap();
    let batches_before = app.transport().batch_requests.lock().unwrap().len();

    let result = download(&app, &["uda_1"], &DownloadFlags::default());
    assert_eq!(result.items[0].status, ItemStatus::Skipped);
    assert_eq!(
        app.transport().batch_requests.lock().unwrap().len(),
        batches_before
    );
    assert_eq!(std::fs::read(&metadata).unwrap(), before);
}

#[test]
fn force_redoes_from_scratch() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::with_records(archive_records()));

    download(&app, &["uda_1"], &DownloadFlags::default());
    let dataset_dir = temp.path().join("data/uda_1");
    std::fs::write(dataset_dir.join("stray.txt"), b"left over").unwrap();

    let flags = DownloadFlags {
        force: true,
        ..DownloadFlags::default()
    };
    let result = download(&app, &["uda_1"], &flags);
    assert_eq!(result.items[0].status, ItemStatus::Completed);
    assert!(!dataset_dir.join("stray.txt").exists());
    assert_eq!(list_dir(&dataset_dir.join("images")).len(), 25);
    assert_eq!(csv_rows(&dataset_dir.join("metadata.csv")), 25);
}

#[test]
fn metadata_can_be_named_after_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::with_records(archive_records()));
    let flags = DownloadFlags {
        metadata_as_name: true,
        ..DownloadFlags::default()
    };

    let result = download(&app, &["uda_2"], &flags);
    assert!(result.items[0].metadata.as_deref().unwrap().ends_with("uda_2/uda_2.csv"));
    assert_eq!(csv_rows(&temp.path().join("data/uda_2/uda_2.csv")), 7);
}

#[test]
fn unavailable_images_fail_only_that_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let mut transport = MockTransport::with_records(archive_records());
    transport.never_delivered.insert("id003".to_string());
    let app = app(temp.path(), transport);

    let result = download(&app, &["uda_1", "uda_2"], &DownloadFlags::default());
    assert_eq!(result.items[0].status, ItemStatus::Failed);
    let error = result.items[0].error.as_deref().unwrap();
    assert!(error.contains("1 image(s) still missing after 3"), "{error}");
    assert_eq!(result.items[1].status, ItemStatus::Completed);
    assert_eq!(result.failed(), 1);

    // first pass of 3 batches, then one single-id batch per retry
    assert_eq!(app.transport().batch_requests.lock().unwrap().len(), 3 + 3 + 1);
}

#[test]
fn datasets_without_downloader_are_reported() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::with_records(archive_records()));

    let result = download(&app, &["dermofit", "mclass_d", "msk_5"], &DownloadFlags::default());
    assert!(result.items.iter().all(|item| item.status == ItemStatus::Failed));
    assert!(result.items[0].error.as_deref().unwrap().contains("no downloader"));
    assert!(result.items[1].error.as_deref().unwrap().contains("no downloader"));
    assert!(result.items[2].error.as_deref().unwrap().contains("MSK-5"));
}

#[test]
fn near_miss_names_are_coerced() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::default());

    let ids = app
        .resolve_datasets(&["UDA-1".to_string(), "mednod".to_string()])
        .unwrap();
    let names: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
    assert_eq!(names, vec!["uda_1", "mednode"]);
    assert_matches!(app.resolve_datasets(&[]), Err(SlaError::NoDatasets));
}

fn mednode_transport() -> MockTransport {
    let archive = zip_bytes(&[
        ("complete_mednode_dataset/melanoma/mel_01.jpg", b"a"),
        ("complete_mednode_dataset/melanoma/mel_02.jpg", b"b"),
        ("complete_mednode_dataset/naevus/nev_01.jpg", b"c"),
    ]);
    let mut transport = MockTransport::default();
    transport.files.insert(MEDNODE_URL.to_string(), archive);
    transport
}

#[test]
fn mednode_metadata_comes_from_directories() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), mednode_transport());
    let flags = DownloadFlags {
        clean: true,
        ..DownloadFlags::default()
    };

    let result = download(&app, &["mednode"], &flags);
    assert_eq!(result.items[0].status, ItemStatus::Completed, "{:?}", result.items[0].error);
    assert_eq!(result.items[0].images, 3);

    let dataset_dir = temp.path().join("data/mednode");
    assert_eq!(list_dir(&dataset_dir), vec!["images", "metadata.csv"]);
    let metadata = std::fs::read_to_string(dataset_dir.join("metadata.csv")).unwrap();
    assert_eq!(
        metadata,
        "image_name,dx\nmel_01,melanoma\nmel_02,melanoma\nnev_01,nevus\n"
    );
    assert!(!temp.path().join("data/mednode.zip").exists());
}

#[test]
fn skip_reuses_local_archive() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), mednode_transport());
    download(&app, &["mednode"], &DownloadFlags::default());
    assert!(temp.path().join("data/mednode.zip").exists());

    let flags = DownloadFlags {
        force: true,
        skip: true,
        ..DownloadFlags::default()
    };
    let result = download(&app, &["mednode"], &flags);
    assert_eq!(result.items[0].status, ItemStatus::Completed);
    assert_eq!(app.transport().downloads.lock().unwrap().len(), 1);
}

#[test]
fn unzip_disabled_keeps_only_archive() {
    let temp = tempfile::tempdir().unwrap();
    let mut settings = settings(temp.path(), 10);
    settings.unzip = false;
    let app = App::new(Catalog::bundled().unwrap(), settings, mednode_transport());

    let result = download(&app, &["mednode"], &DownloadFlags::default());
    assert_eq!(result.items[0].status, ItemStatus::Fetched);
    assert!(temp.path().join("data/mednode.zip").exists());
    assert!(!temp.path().join("data/mednode").exists());
}

#[test]
fn pad_ufes_nested_archives_are_flattened() {
    let temp = tempfile::tempdir().unwrap();
    let part_1 = zip_bytes(&[("imgs_part_1/PAT_1_1_1.png", b"p1")]);
    let part_2 = zip_bytes(&[("imgs_part_2/PAT_2_2_2.png", b"p2")]);
    let archive = zip_bytes(&[
        ("metadata.csv", b"patient_id,img_id\nPAT_1,PAT_1_1_1.png\nPAT_2,PAT_2_2_2.png\n"),
        ("images/imgs_part_1.zip", &part_1),
        ("images/imgs_part_2.zip", &part_2),
    ]);
    let mut transport = MockTransport::default();
    transport.files.insert(PAD_UFES_URL.to_string(), archive);
    let app = app(temp.path(), transport);
    let flags = DownloadFlags {
        metadata_as_name: true,
        ..DownloadFlags::default()
    };

    let result = download(&app, &["pad_ufes_20"], &flags);
    assert_eq!(result.items[0].status, ItemStatus::Completed, "{:?}", result.items[0].error);

    let dataset_dir = temp.path().join("data/pad_ufes_20");
    assert_eq!(list_dir(&dataset_dir), vec!["images", "pad_ufes_20.csv"]);
    assert_eq!(
        list_dir(&dataset_dir.join("images")),
        vec!["PAT_1_1_1.png", "PAT_2_2_2.png"]
    );
}

#[test]
fn missing_metadata_fails_the_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let archive = zip_bytes(&[("images/readme.txt", b"no metadata here")]);
    let mut transport = MockTransport::default();
    transport.files.insert(PAD_UFES_URL.to_string(), archive);
    let app = app(temp.path(), transport);

    let result = download(&app, &["pad_ufes_20"], &DownloadFlags::default());
    assert_eq!(result.items[0].status, ItemStatus::Failed);
    assert!(result.items[0].error.as_deref().unwrap().contains("metadata file not found"));
}

#[test]
fn isic_metadata_is_saved_and_seeds_cache() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(temp.path(), MockTransport::with_records(archive_records()));
    let destination = Utf8PathBuf::from_path_buf(temp.path().join("export")).unwrap();

    let result = app
        .download_isic_metadata(Some(&destination), &JsonOutput)
        .unwrap();
    assert_eq!(result.records, 32);
    assert_eq!(csv_rows(&temp.path().join("export/isic_metadata.csv")), 32);
    assert!(temp.path().join("cache/isic_metadata.csv").exists());
}
