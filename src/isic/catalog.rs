use std::fs;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::SlaError;
use crate::isic::api::IsicApi;
use crate::store::Store;
use crate::transport::Transport;

pub const TAG_YEARS: [u16; 5] = [2016, 2017, 2018, 2019, 2020];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsicRecord {
    pub isic_id: String,
    pub image_name: String,
    pub dataset: String,
    pub description: Option<String>,
    pub accepted: Option<bool>,
    pub created: Option<String>,
    pub tags: String,
    pub pixels_x: Option<u64>,
    pub pixels_y: Option<u64>,
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub localization: Option<String>,
    pub benign_malignant: Option<String>,
    pub dx: Option<String>,
    pub dx_type: Option<String>,
    pub melanocytic: Option<bool>,
    #[serde(rename = "2016", default)]
    pub tag_2016: bool,
    #[serde(rename = "2017", default)]
    pub tag_2017: bool,
    #[serde(rename = "2018", default)]
    pub tag_2018: bool,
    #[serde(rename = "2019", default)]
    pub tag_2019: bool,
    #[serde(rename = "2020", default)]
    pub tag_2020: bool,
}

impl IsicRecord {
    pub fn from_api(raw: &Value) -> Result<Self, SlaError> {
        let required = |pointer: &str| {
            raw.pointer(pointer)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| SlaError::Http(format!("image record is missing `{pointer}`")))
        };
        let text = |pointer: &str| {
            raw.pointer(pointer).and_then(|v| match v {
                Value::String(value) => Some(value.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
        };

        let tags = raw
            .pointer("/notes/tags")
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.as_str())
                    .collect::<Vec<_>>()
                    .join("|")
            })
            .unwrap_or_default();

        let mut record = Self {
            isic_id: required("/_id")?,
            image_name: required("/name")?,
            dataset: required("/dataset/name")?,
            description: text("/dataset/description"),
            accepted: raw
                .pointer("/notes/reviewed/accepted")
                .and_then(|v| v.as_bool()),
            created: raw
                .get("created")
                .and_then(|v| v.as_str())
                .and_then(|v| v.split('T').next())
                .map(str::to_string),
            tags,
            pixels_x: raw
                .pointer("/meta/acquisition/pixelsX")
                .and_then(|v| v.as_u64()),
            pixels_y: raw
                .pointer("/meta/acquisition/pixelsY")
                .and_then(|v| v.as_u64()),
            age: raw
                .pointer("/meta/clinical/age_approx")
                .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|age| age as u64)))
                .and_then(|age| u32::try_from(age).ok()),
            sex: text("/meta/clinical/sex"),
            localization: text("/meta/clinical/anatom_site_general"),
            benign_malignant: text("/meta/clinical/benign_malignant"),
            dx: text("/meta/clinical/diagnosis"),
            dx_type: text("/meta/clinical/diagnosis_confirm_type"),
            melanocytic: raw
                .pointer("/meta/clinical/melanocytic")
                .and_then(|v| v.as_bool()),
            tag_2016: false,
            tag_2017: false,
            tag_2018: false,
            tag_2019: false,
            tag_2020: false,
        };
        record.add_year_tags();
        Ok(record)
    }

    pub fn add_year_tags(&mut self) {
        let has = |year: u16| self.tags.contains(&year.to_string());
        let [y2016, y2017, y2018, y2019, y2020] = TAG_YEARS.map(has);
        self.tag_2016 = y2016;
        self.tag_2017 = y2017;
        self.tag_2018 = y2018;
        self.tag_2019 = y2019;
        self.tag_2020 = y2020;
    }

    pub fn belongs_to(&self, isic_name: &str) -> bool {
        self.dataset.eq_ignore_ascii_case(isic_name)
    }
}

/// Pages through the record endpoint until a short page comes back.
pub fn fetch_all(
    transport: &dyn Transport,
    api: &IsicApi,
    page_size: usize,
    sink: &dyn ProgressSink,
) -> Result<Vec<IsicRecord>, SlaError> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = api.fetch_page(transport, page_size, offset)?;
        let page_len = page.len();
        for raw in &page {
            records.push(IsicRecord::from_api(raw)?);
        }
        offset += page_size;
        sink.event(ProgressEvent {
            message: format!("phase=Catalog; {} records downloaded", records.len()),
            elapsed: None,
        });
        if page_len < page_size {
            break;
        }
    }
    Ok(records)
}

pub fn write_records(path: &Utf8Path, records: &[IsicRecord]) -> Result<(), SlaError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| SlaError::Csv(err.to_string()))?;
    Store::write_bytes_atomic(path, &bytes)
}

pub fn read_records(path: &Utf8Path) -> Result<Vec<IsicRecord>, SlaError> {
    let content =
        fs::read(path.as_std_path()).map_err(|err| SlaError::Filesystem(err.to_string()))?;
    let mut reader = csv::Reader::from_reader(content.as_slice());
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// The full record catalog, primed from the API into `path` on first use and then read
/// through. Loaded at most once per process.
pub struct IsicCatalogCache {
    path: Utf8PathBuf,
    loaded: Mutex<Option<Arc<Vec<IsicRecord>>>>,
}

impl IsicCatalogCache {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            loaded: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn records(
        &self,
        transport: &dyn Transport,
        api: &IsicApi,
        page_size: usize,
        sink: &dyn ProgressSink,
    ) -> Result<Arc<Vec<IsicRecord>>, SlaError> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| SlaError::Filesystem("image catalog lock poisoned".to_string()))?;
        if let Some(records) = loaded.as_ref() {
            return Ok(Arc::clone(records));
        }

        let records = if self.path.as_std_path().exists() {
            debug!("found local image catalog at '{}'", self.path);
            read_records(&self.path)?
        } else {
            info!("could not find the image-archive metadata locally, it is required to download image-archive datasets");
            info!("downloading image-archive metadata first, followed by images");
            let records = fetch_all(transport, api, page_size, sink)?;
            write_records(&self.path, &records)?;
            records
        };

        let records = Arc::new(records);
        *loaded = Some(Arc::clone(&records));
        Ok(records)
    }

    pub fn prime_with(&self, records: &[IsicRecord]) -> Result<(), SlaError> {
        if !self.path.as_std_path().exists() {
            write_records(&self.path, records)?;
        }
        Ok(())
    }
}
