use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Availability, AvailabilityFilter, CaptureFilter, CaptureMethod, DatasetId, DatasetMatch,
    Verbosity, match_dataset,
};
use crate::error::SlaError;

const BUNDLED_CATALOG: &str = include_str!("../db/datasets.json");

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Catalog {
    datasets: BTreeMap<String, DatasetEntry>,
    abbrev: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetEntry {
    pub info: DatasetInfo,
    #[serde(default)]
    pub labels: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetInfo {
    pub availability: Availability,
    pub capture_method: CaptureMethod,
    /// Declared size in MB, negative when unknown.
    pub size: f64,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub download: Vec<String>,
    #[serde(default)]
    pub isic_name: Option<String>,
}

impl DatasetEntry {
    pub fn download_url(&self) -> Option<&str> {
        self.info
            .download
            .iter()
            .map(String::as_str)
            .find(|url| !url.trim().is_empty())
    }

    pub fn total_images(&self) -> u64 {
        self.labels.values().sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub regex: Option<String>,
    pub availability: AvailabilityFilter,
    pub capture_method: CaptureFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Catalog {
    pub fn bundled() -> Result<Self, SlaError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    pub fn from_json(content: &str) -> Result<Self, SlaError> {
        serde_json::from_str(content).map_err(|err| SlaError::CatalogParse(err.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.datasets.keys().map(String::as_str).collect()
    }

    pub fn lookup(&self, id: &str) -> Result<&DatasetEntry, SlaError> {
        self.datasets
            .get(id)
            .ok_or_else(|| SlaError::UnknownDataset(id.to_string()))
    }

    pub fn resolve(&self, input: &str) -> Result<DatasetMatch, SlaError> {
        match_dataset(input, &self.names())
    }

    pub fn entry(&self, id: &DatasetId) -> Result<&DatasetEntry, SlaError> {
        self.lookup(id.as_str())
    }

    pub fn filter(&self, query: &CatalogQuery) -> Result<Vec<(&str, &DatasetEntry)>, SlaError> {
        let pattern = query
            .regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|err| SlaError::InvalidRegex(err.to_string()))?;
        Ok(self
            .datasets
            .iter()
            .filter(|(_, entry)| query.availability.matches(entry.info.availability))
            .filter(|(_, entry)| query.capture_method.matches(entry.info.capture_method))
            .filter(|(name, _)| {
                pattern
                    .as_ref()
                    .map(|pattern| pattern.is_match(name))
                    .unwrap_or(true)
            })
            .map(|(name, entry)| (name.as_str(), entry))
            .collect())
    }

    pub fn table(
        &self,
        query: &CatalogQuery,
        verbosity: Option<Verbosity>,
    ) -> Result<Table, SlaError> {
        let datasets = self.filter(query)?;
        let table = match verbosity {
            None | Some(Verbosity::Info) => Table {
                headers: vec!["Dataset Name".to_string()],
                rows: datasets
                    .iter()
                    .map(|(name, _)| vec![name.to_string()])
                    .collect(),
            },
            Some(Verbosity::Totals) => Table {
                headers: vec!["Dataset Name".to_string(), "No. Images".to_string()],
                rows: datasets
                    .iter()
                    .map(|(name, entry)| vec![name.to_string(), entry.total_images().to_string()])
                    .collect(),
            },
            Some(Verbosity::All) => {
                let mut headers = vec!["Dataset".to_string()];
                headers.extend(self.abbrev.values().cloned());
                let rows = datasets
                    .iter()
                    .map(|(name, entry)| {
                        let mut row = vec![name.to_string()];
                        row.extend(self.abbrev.keys().map(|dx| {
                            entry.labels.get(dx).copied().unwrap_or(0).to_string()
                        }));
                        row
                    })
                    .collect();
                Table { headers, rows }
            }
        };
        Ok(table)
    }

    pub fn legend(&self) -> Table {
        Table {
            headers: vec!["Abbrev.".to_string(), "Diagnosis".to_string()],
            rows: self
                .abbrev
                .iter()
                .map(|(dx, abbrev)| vec![abbrev.clone(), dx.clone()])
                .collect(),
        }
    }

    pub fn info_report(&self, query: &CatalogQuery) -> Result<String, SlaError> {
        let mut out = String::new();
        for (name, entry) in self.filter(query)? {
            let info = &entry.info;
            let size = if info.size < 0.0 {
                "--".to_string()
            } else {
                format!("{:.2}", info.size)
            };
            out.push_str(&format!("=== {name} ===\n"));
            out.push_str(&format!("   Availability:   {}\n", info.availability));
            out.push_str(&format!("   Capture method: {}\n", info.capture_method));
            out.push_str(&format!("   Size:           {size} MB\n"));
            out.push_str("   References:\n");
            for reference in &info.references {
                out.push_str(&format!("       - {reference}\n"));
            }
            out.push_str("   Data source URL:\n");
            for url in &info.download {
                out.push_str(&format!("       - {url}\n"));
            }
        }
        Ok(out)
    }
}

impl Table {
    pub fn to_text(&self) -> String {
        let index_width = self.rows.len().saturating_sub(1).to_string().len();
        let mut widths = self
            .headers
            .iter()
            .map(|header| header.len())
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(cell.len());
                }
            }
        }

        let render = |prefix: &str, cells: &[String]| {
            let mut line = format!("{prefix:>index_width$}");
            for (cell, width) in cells.iter().zip(&widths) {
                line.push_str("  ");
                line.push_str(&format!("{cell:<width$}"));
            }
            line.trim_end().to_string()
        };

        let mut lines = vec![render("", &self.headers)];
        lines.push(render(
            &"-".repeat(index_width),
            &widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>(),
        ));
        for (i, row) in self.rows.iter().enumerate() {
            lines.push(render(&i.to_string(), row));
        }
        lines.join("\n")
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), SlaError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .map_err(|err| SlaError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
