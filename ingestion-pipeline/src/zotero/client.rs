use std::path::Path;

use common::{error::AppError, utils::config::AppConfig};
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://api.zotero.org";
const PAGE_LIMIT: usize = 100;

/// Read-only Zotero Web API client: list items, download attachment files.
pub struct ZoteroClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    library_id: String,
    library_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoteroItem {
    #[serde(default)]
    pub key: Option<String>,
    pub data: ZoteroItemData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoteroItemData {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "itemType", default)]
    pub item_type: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl ZoteroItem {
    pub fn is_attachment(&self) -> bool {
        self.data.item_type == "attachment"
    }

    /// Attachment filename, falling back to the title.
    pub fn attachment_filename(&self) -> Option<String> {
        self.data
            .filename
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.data.title.clone().filter(|name| !name.is_empty()))
    }

    pub fn is_pdf_attachment(&self) -> bool {
        self.is_attachment()
            && self
                .attachment_filename()
                .map(|name| name.to_lowercase().ends_with(".pdf"))
                .unwrap_or(false)
    }

    pub fn item_key(&self) -> Option<String> {
        self.data.key.clone().or_else(|| self.key.clone())
    }
}

impl ZoteroClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::with_base_url(
            DEFAULT_BASE_URL.to_string(),
            config.zotero_api_key.clone(),
            config.zotero_library_id.clone(),
            config.zotero_library_type.clone(),
        )
    }

    pub fn with_base_url(
        base_url: String,
        api_key: String,
        library_id: String,
        library_type: String,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().build().map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            library_id,
            library_type,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.is_empty() && !self.library_id.is_empty()
    }

    fn library_path(&self) -> String {
        format!("{}s/{}", self.library_type, self.library_id)
    }

    /// All items of the configured library, paged through in API-sized steps.
    pub async fn list_items(&self) -> Result<Vec<ZoteroItem>, AppError> {
        let mut items = Vec::new();
        let mut start = 0usize;

        loop {
            let url = format!("{}/{}/items", self.base_url, self.library_path());
            let response = self
                .client
                .get(url)
                .header("Zotero-API-Key", &self.api_key)
                .query(&[
                    ("format", "json".to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                    ("start", start.to_string()),
                ])
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(AppError::InternalError(format!(
                    "Zotero item listing failed with {status}"
                )));
            }

            let page: Vec<ZoteroItem> = response.json().await?;
            let page_len = page.len();
            items.extend(page);

            if page_len < PAGE_LIMIT {
                break;
            }
            start += page_len;
        }

        Ok(items)
    }

    /// Download one attachment file to the target path.
    pub async fn download_attachment(&self, key: &str, target: &Path) -> Result<(), AppError> {
        let url = format!("{}/{}/items/{key}/file", self.base_url, self.library_path());
        let response = self
            .client
            .get(url)
            .header("Zotero-API-Key", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::InternalError(format!(
                "Zotero file download for {key} failed with {status}"
            )));
        }

        let bytes = response.bytes().await?;
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(target, &bytes).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(item_type: &str, filename: Option<&str>, title: Option<&str>) -> ZoteroItem {
        ZoteroItem {
            key: Some("K1".to_string()),
            data: ZoteroItemData {
                key: Some("K1".to_string()),
                item_type: item_type.to_string(),
                filename: filename.map(ToString::to_string),
                title: title.map(ToString::to_string),
            },
        }
    }

    #[test]
    fn pdf_attachment_detection() {
        assert!(item("attachment", Some("paper.pdf"), None).is_pdf_attachment());
        assert!(item("attachment", Some("PAPER.PDF"), None).is_pdf_attachment());
        assert!(!item("attachment", Some("notes.docx"), None).is_pdf_attachment());
        assert!(!item("journalArticle", Some("paper.pdf"), None).is_pdf_attachment());
        assert!(!item("attachment", None, None).is_pdf_attachment());
    }

    #[test]
    fn filename_falls_back_to_title() {
        assert_eq!(
            item("attachment", None, Some("fallback.pdf")).attachment_filename(),
            Some("fallback.pdf".to_string())
        );
        assert_eq!(
            item("attachment", Some("primary.pdf"), Some("fallback.pdf")).attachment_filename(),
            Some("primary.pdf".to_string())
        );
    }

    #[test]
    fn enablement_requires_key_and_library() {
        let enabled = ZoteroClient::with_base_url(
            "http://localhost".to_string(),
            "key".to_string(),
            "12345".to_string(),
            "user".to_string(),
        )
        .expect("client");
        assert!(enabled.is_enabled());
        assert_eq!(enabled.library_path(), "users/12345");

        let disabled = ZoteroClient::with_base_url(
            "http://localhost".to_string(),
            String::new(),
            "12345".to_string(),
            "user".to_string(),
        )
        .expect("client");
        assert!(!disabled.is_enabled());
    }

    #[tokio::test]
    async fn list_items_deserializes_api_payloads() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/users/7/items");
                then.status(200).json_body(serde_json::json!([
                    {
                        "key": "A1",
                        "data": {
                            "key": "A1",
                            "itemType": "attachment",
                            "filename": "a.pdf",
                            "title": "A Paper"
                        }
                    },
                    {
                        "key": "N1",
                        "data": { "key": "N1", "itemType": "note" }
                    }
                ]));
            })
            .await;

        let client = ZoteroClient::with_base_url(
            server.base_url(),
            "key".to_string(),
            "7".to_string(),
            "user".to_string(),
        )
        .expect("client");

        let items = client.list_items().await.expect("list");
        assert_eq!(items.len(), 2);
        assert!(items[0].is_pdf_attachment());
        assert!(!items[1].is_attachment());
    }
}
