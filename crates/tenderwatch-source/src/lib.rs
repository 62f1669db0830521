//! REST client for the procurement portal, implementing the core's
//! [`AnnouncementSource`] capability.
//!
//! The portal lists lots, not announcements; this client filters lots by
//! keyword containment, groups the matches by their parent announcement and
//! fetches that announcement's details. Duplicate or partial upstream data
//! is expected and tolerated by the pipeline.

pub mod regions;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, warn};

use tenderwatch_core::config::SourceSettings;
use tenderwatch_core::source::{AnnouncementSource, SourceError, SourcedAnnouncement};
use tenderwatch_core::types::Lot;

const ANNOUNCE_PAGE_URL: &str = "https://goszakup.gov.kz/ru/announce/index";
const DEADLINE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Deserialize)]
struct LotsPage {
    #[serde(default)]
    items: Vec<LotItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct LotItem {
    trd_buy_id: Option<i64>,
    #[serde(default)]
    lot_number: Option<String>,
    #[serde(default)]
    name_ru: Option<String>,
    #[serde(default)]
    description_ru: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrdBuy {
    #[serde(default)]
    number_anno: Option<String>,
    #[serde(default)]
    name_ru: Option<String>,
    #[serde(default)]
    customer: Option<Customer>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    ref_trade_methods: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    #[serde(default)]
    bin: Option<String>,
    #[serde(default)]
    name_ru: Option<String>,
    #[serde(default)]
    legal_address: Option<String>,
    #[serde(default)]
    region: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name_ru: Option<String>,
}

pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl PortalClient {
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &settings.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SourceError::new(format!("invalid api token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::new(format!("building http client: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            page_size: settings.page_size,
        })
    }

    async fn fetch_lots_page(&self) -> Result<LotsPage, SourceError> {
        let url = format!("{}/lots", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("limit", self.page_size), ("offset", 0)])
            .send()
            .await
            .map_err(|e| SourceError::new(format!("fetching {url}: {e}")))?
            .error_for_status()
            .map_err(|e| SourceError::new(format!("fetching {url}: {e}")))?;

        response
            .json::<LotsPage>()
            .await
            .map_err(|e| SourceError::new(format!("decoding lots page: {e}")))
    }

    async fn fetch_announcement(&self, trd_buy_id: i64) -> Result<TrdBuy, SourceError> {
        let url = format!("{}/trd-buy/{}", self.base_url, trd_buy_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::new(format!("fetching {url}: {e}")))?
            .error_for_status()
            .map_err(|e| SourceError::new(format!("fetching {url}: {e}")))?;

        response
            .json::<TrdBuy>()
            .await
            .map_err(|e| SourceError::new(format!("decoding announcement {trd_buy_id}: {e}")))
    }
}

#[async_trait]
impl AnnouncementSource for PortalClient {
    async fn search(
        &self,
        keywords: &[String],
        days_back: u32,
    ) -> Result<Vec<SourcedAnnouncement>, SourceError> {
        debug!(keywords = keywords.len(), days_back, "searching portal lots");

        let page = self.fetch_lots_page().await?;
        let grouped = group_matched_lots(&page.items, keywords);

        let mut found = Vec::with_capacity(grouped.len());
        for (trd_buy_id, lots) in grouped {
            // A detail fetch failing for one announcement should not sink
            // the whole run; the next run sees it again.
            let details = match self.fetch_announcement(trd_buy_id).await {
                Ok(details) => details,
                Err(err) => {
                    warn!(trd_buy_id, error = %err, "announcement details unavailable, skipping");
                    continue;
                }
            };

            let Some(number) = details.number_anno.clone().filter(|n| !n.is_empty()) else {
                warn!(trd_buy_id, "announcement without a number, skipping");
                continue;
            };

            let customer = details.customer.as_ref();
            let legal_address = customer.and_then(|c| c.legal_address.clone());
            let region = customer
                .and_then(|c| c.region.as_ref())
                .and_then(|r| r.name_ru.clone())
                .unwrap_or_else(|| {
                    regions::extract_region(legal_address.as_deref().unwrap_or("")).to_string()
                });

            found.push(SourcedAnnouncement {
                announcement_number: number,
                announcement_url: Some(format!("{ANNOUNCE_PAGE_URL}/{trd_buy_id}")),
                organization_name: customer
                    .and_then(|c| c.name_ru.clone())
                    .or_else(|| details.name_ru.clone()),
                organization_bin: customer.and_then(|c| c.bin.clone()),
                legal_address,
                region,
                lots,
                procurement_method: details
                    .ref_trade_methods
                    .as_ref()
                    .and_then(|m| m.name_ru.clone()),
                application_deadline: details
                    .end_date
                    .as_deref()
                    .and_then(parse_local_deadline),
            });
        }

        debug!(found = found.len(), "portal search finished");
        Ok(found)
    }
}

/// Keyword containment check, case-insensitive, over a lot's name and
/// description. Returns the first matching keyword.
fn matched_keyword<'a>(item: &LotItem, keywords: &'a [String]) -> Option<&'a str> {
    let name = item.name_ru.as_deref().unwrap_or("").to_lowercase();
    let description = item.description_ru.as_deref().unwrap_or("").to_lowercase();
    keywords
        .iter()
        .find(|keyword| {
            let kw = keyword.to_lowercase();
            name.contains(&kw) || description.contains(&kw)
        })
        .map(String::as_str)
}

/// Filter lots by keyword and group them under their parent announcement,
/// preserving lot order within each announcement.
fn group_matched_lots(items: &[LotItem], keywords: &[String]) -> BTreeMap<i64, Vec<Lot>> {
    let mut grouped: BTreeMap<i64, Vec<Lot>> = BTreeMap::new();
    for item in items {
        let Some(trd_buy_id) = item.trd_buy_id else {
            continue;
        };
        let Some(keyword) = matched_keyword(item, keywords) else {
            continue;
        };
        grouped.entry(trd_buy_id).or_default().push(Lot {
            number: item.lot_number.clone(),
            name: item.name_ru.clone().unwrap_or_default(),
            description: item.description_ru.clone().unwrap_or_default(),
            keyword: keyword.to_string(),
        });
    }
    grouped
}

/// Deadlines come from the portal already in the operating region's local
/// time; they are parsed naive and must never be shifted to UTC.
fn parse_local_deadline(raw: &str) -> Option<NaiveDateTime> {
    DEADLINE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw.trim(), format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, number: Option<&str>, name: &str, description: &str) -> LotItem {
        LotItem {
            trd_buy_id: Some(id),
            lot_number: number.map(String::from),
            name_ru: Some(name.to_string()),
            description_ru: Some(description.to_string()),
        }
    }

    #[test]
    fn keyword_containment_is_case_insensitive() {
        let keywords = vec!["аренда".to_string(), "реагенты".to_string()];
        let lot = item(1, None, "АРЕНДА помещения", "");
        assert_eq!(matched_keyword(&lot, &keywords), Some("аренда"));

        let in_description = item(2, None, "Закуп", "поставка реагентов");
        assert_eq!(matched_keyword(&in_description, &keywords), Some("реагенты"));

        let miss = item(3, None, "Канцтовары", "бумага");
        assert_eq!(matched_keyword(&miss, &keywords), None);
    }

    #[test]
    fn lots_group_under_their_announcement() {
        let keywords = vec!["аренда".to_string()];
        let items = vec![
            item(10, Some("1"), "Аренда офиса", ""),
            item(11, None, "Не подходит", ""),
            item(10, Some("2"), "Аренда склада", ""),
        ];
        let grouped = group_matched_lots(&items, &keywords);
        assert_eq!(grouped.len(), 1);
        let lots = &grouped[&10];
        assert_eq!(lots.len(), 2);
        assert_eq!(lots[0].number.as_deref(), Some("1"));
        assert_eq!(lots[1].number.as_deref(), Some("2"));
    }

    #[test]
    fn deadline_parses_as_naive_local() {
        let parsed = parse_local_deadline("2026-03-15 18:30:00").expect("parses");
        assert_eq!(parsed.format("%d.%m.%Y %H:%M").to_string(), "15.03.2026 18:30");
        assert!(parse_local_deadline("2026-03-15T18:30:00").is_some());
        assert!(parse_local_deadline("not a date").is_none());
    }

    #[test]
    fn lots_page_decodes_with_missing_fields() {
        let page: LotsPage = serde_json::from_str(
            r#"{"items": [{"trd_buy_id": 5, "name_ru": "Аренда зала"}, {"name_ru": "без объявления"}]}"#,
        )
        .expect("decodes");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].trd_buy_id, Some(5));
        assert_eq!(page.items[1].trd_buy_id, None);
    }

    #[test]
    fn announcement_details_decode() {
        let details: TrdBuy = serde_json::from_str(
            r#"{
                "number_anno": "ANN-123",
                "name_ru": "Объявление",
                "customer": {
                    "bin": "123456789012",
                    "name_ru": "ТОО Заказчик",
                    "legal_address": "Карагандинская область, г. Караганда",
                    "region": null
                },
                "end_date": "2026-04-01 10:00:00",
                "ref_trade_methods": {"name_ru": "Запрос ценовых предложений"}
            }"#,
        )
        .expect("decodes");
        assert_eq!(details.number_anno.as_deref(), Some("ANN-123"));
        let customer = details.customer.expect("customer present");
        assert_eq!(customer.bin.as_deref(), Some("123456789012"));
    }
}
