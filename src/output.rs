use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{DownloadResult, IsicMetadataResult, ItemStatus, ProgressEvent, ProgressSink};
use crate::catalog::Table;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_isic_metadata(result: &IsicMetadataResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_table(table: &Table) -> io::Result<()> {
        Self::print_json(table)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_download(result: &DownloadResult) {
        println!("Download summary");
        for item in &result.items {
            let status = match item.status {
                ItemStatus::Completed => "done",
                ItemStatus::Fetched => "fetched",
                ItemStatus::Skipped => "skipped",
                ItemStatus::Failed => "FAILED",
            };
            match (&item.path, &item.error) {
                (_, Some(error)) => println!("  {:<12} {} ({error})", status, item.dataset),
                (Some(path), None) if item.status == ItemStatus::Completed => println!(
                    "  {:<12} {} -> {path} ({} images)",
                    status, item.dataset, item.images
                ),
                (Some(path), None) => println!("  {:<12} {} -> {path}", status, item.dataset),
                (None, None) => println!("  {:<12} {}", status, item.dataset),
            }
        }
    }

    pub fn print_isic_metadata(result: &IsicMetadataResult) {
        println!("{} image records saved to {}", result.records, result.path);
    }

    pub fn print_table(table: &Table) {
        println!("{}", table.to_text());
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}
