use serde_json::Value;
use tracing::debug;

use crate::error::SlaError;
use crate::transport::Transport;

pub const DEFAULT_API_URL: &str = "https://isic-archive.com/api/v1";

#[derive(Debug, Clone)]
pub struct IsicApi {
    base_url: String,
}

impl IsicApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn page_url(&self) -> String {
        format!("{}/image", self.base_url)
    }

    pub fn page_query(limit: usize, offset: usize) -> Vec<(&'static str, String)> {
        vec![
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("sort", "name".to_string()),
            ("sortdir", "1".to_string()),
            ("detail", "true".to_string()),
        ]
    }

    pub fn batch_url(&self) -> String {
        format!("{}/image/download", self.base_url)
    }

    pub fn batch_query(ids: &[String]) -> Vec<(&'static str, String)> {
        vec![
            ("include", "images".to_string()),
            ("imageIds", format_id_list(ids)),
        ]
    }

    pub fn fetch_page(
        &self,
        transport: &dyn Transport,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Value>, SlaError> {
        let url = self.page_url();
        debug!(%url, limit, offset, "requesting image records");
        let body = transport.get_bytes(&url, &Self::page_query(limit, offset))?;
        let value: Value =
            serde_json::from_slice(&body).map_err(|err| SlaError::Http(err.to_string()))?;
        match value {
            Value::Array(records) => Ok(records),
            other => Err(SlaError::Http(format!(
                "expected a JSON array of image records, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn download_batch(
        &self,
        transport: &dyn Transport,
        ids: &[String],
    ) -> Result<Vec<u8>, SlaError> {
        transport.get_bundle(&self.batch_url(), &Self::batch_query(ids))
    }
}

/// Renders ids the way the download endpoint expects them: `["id1","id2"]`.
pub fn format_id_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("\"{id}\"")).collect();
    format!("[{}]", quoted.join(","))
}

pub fn parse_id_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|id| id.trim().trim_matches('"').to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_list_uses_quoted_brackets() {
        let ids = vec!["5436e3abbae478396759f0cf".to_string(), "abc".to_string()];
        assert_eq!(format_id_list(&ids), r#"["5436e3abbae478396759f0cf","abc"]"#);
        assert_eq!(parse_id_list(&format_id_list(&ids)), ids);
        assert_eq!(format_id_list(&[]), "[]");
        assert!(parse_id_list("[]").is_empty());
    }

    #[test]
    fn urls_drop_trailing_slash() {
        let api = IsicApi::new("https://isic-archive.com/api/v1/");
        assert_eq!(api.page_url(), "https://isic-archive.com/api/v1/image");
        assert_eq!(api.batch_url(), "https://isic-archive.com/api/v1/image/download");
    }

    #[test]
    fn page_query_is_name_sorted() {
        let query = IsicApi::page_query(5000, 10000);
        assert!(query.contains(&("limit", "5000".to_string())));
        assert!(query.contains(&("offset", "10000".to_string())));
        assert!(query.contains(&("sort", "name".to_string())));
        assert!(query.contains(&("detail", "true".to_string())));
    }
}
