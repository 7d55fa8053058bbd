//! HAR 1.2 archive assembled from the adapter's network events.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: DateTime<Utc>,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: BTreeMap<String, String>,
    pub timings: HarTimings,
    #[serde(rename = "_resourceType")]
    pub resource_type: String,
    #[serde(rename = "_error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub headers: Vec<HarPair>,
    pub query_string: Vec<HarPair>,
    pub cookies: Vec<HarPair>,
    pub headers_size: i64,
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: i64,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<HarPair>,
    pub cookies: Vec<HarPair>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarPair {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarTimings {
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

#[derive(Debug)]
struct Exchange {
    started_ms: u64,
    request: HarRequest,
    resource_type: String,
    response: Option<HarResponse>,
    response_ms: Option<u64>,
    finished_ms: Option<u64>,
    error: Option<String>,
}

/// Accumulates request/response pairs keyed by protocol request id.
#[derive(Debug, Default)]
pub struct HarRecorder {
    exchanges: Vec<Exchange>,
    open: HashMap<String, usize>,
}

pub struct RequestEvent<'a> {
    pub request_id: &'a str,
    pub url: &'a str,
    pub method: &'a str,
    pub resource_type: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub post_data: Option<&'a str>,
    pub ts: u64,
}

pub struct ResponseEvent<'a> {
    pub request_id: &'a str,
    pub status: i64,
    pub status_text: &'a str,
    pub mime_type: &'a str,
    pub protocol: Option<&'a str>,
    pub headers: &'a BTreeMap<String, String>,
    pub ts: u64,
}

impl HarRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// A repeated request id is a redirect hop: the previous exchange is closed as is.
    pub fn on_request(&mut self, event: RequestEvent<'_>) {
        let content_type = event
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        let post_data = event.post_data.map(|text| HarPostData {
            mime_type: content_type,
            text: text.to_string(),
        });
        let request = HarRequest {
            method: event.method.to_string(),
            url: event.url.to_string(),
            http_version: String::from("HTTP/1.1"),
            headers: pairs(event.headers),
            query_string: query_pairs(event.url),
            cookies: Vec::new(),
            headers_size: -1,
            body_size: post_data.as_ref().map(|data| data.text.len() as i64).unwrap_or(0),
            post_data,
        };
        self.exchanges.push(Exchange {
            started_ms: event.ts,
            request,
            resource_type: event.resource_type.to_string(),
            response: None,
            response_ms: None,
            finished_ms: None,
            error: None,
        });
        self.open
            .insert(event.request_id.to_string(), self.exchanges.len() - 1);
    }

    pub fn on_response(&mut self, event: ResponseEvent<'_>) {
        let Some(exchange) = self.exchange_mut(event.request_id) else {
            return;
        };
        let http_version = http_version(event.protocol);
        exchange.request.http_version = http_version.clone();
        let redirect_url = event
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("location"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        exchange.response = Some(HarResponse {
            status: event.status,
            status_text: event.status_text.to_string(),
            http_version,
            headers: pairs(event.headers),
            cookies: Vec::new(),
            content: HarContent {
                size: -1,
                mime_type: event.mime_type.to_string(),
            },
            redirect_url,
            headers_size: -1,
            body_size: -1,
        });
        exchange.response_ms = Some(event.ts);
    }

    pub fn on_finished(&mut self, request_id: &str, encoded_data_length: f64, ts: u64) {
        if let Some(index) = self.open.remove(request_id) {
            let exchange = &mut self.exchanges[index];
            exchange.finished_ms = Some(ts);
            if let Some(response) = exchange.response.as_mut() {
                let size = encoded_data_length.max(0.0) as i64;
                response.body_size = size;
                response.content.size = size;
            }
        }
    }

    pub fn on_failed(&mut self, request_id: &str, error_text: &str, ts: u64) {
        if let Some(index) = self.open.remove(request_id) {
            let exchange = &mut self.exchanges[index];
            exchange.finished_ms = Some(ts);
            exchange.error = Some(error_text.to_string());
        }
    }

    fn exchange_mut(&mut self, request_id: &str) -> Option<&mut Exchange> {
        let index = *self.open.get(request_id)?;
        self.exchanges.get_mut(index)
    }

    /// Snapshot of every exchange seen so far. Unanswered requests get status 0.
    pub fn to_har(&self) -> Har {
        let entries = self
            .exchanges
            .iter()
            .map(|exchange| {
                let response = exchange.response.clone().unwrap_or_else(|| HarResponse {
                    status: 0,
                    status_text: String::new(),
                    http_version: exchange.request.http_version.clone(),
                    headers: Vec::new(),
                    cookies: Vec::new(),
                    content: HarContent {
                        size: 0,
                        mime_type: String::new(),
                    },
                    redirect_url: String::new(),
                    headers_size: -1,
                    body_size: -1,
                });
                let wait = exchange
                    .response_ms
                    .map(|at| at.saturating_sub(exchange.started_ms))
                    .unwrap_or(0);
                let receive = match (exchange.response_ms, exchange.finished_ms) {
                    (Some(responded), Some(finished)) => finished.saturating_sub(responded),
                    _ => 0,
                };
                let total = exchange
                    .finished_ms
                    .or(exchange.response_ms)
                    .map(|end| end.saturating_sub(exchange.started_ms))
                    .unwrap_or(0);
                HarEntry {
                    started_date_time: millis_to_datetime(exchange.started_ms),
                    time: total as f64,
                    request: exchange.request.clone(),
                    response,
                    cache: BTreeMap::new(),
                    timings: HarTimings {
                        send: 0.0,
                        wait: wait as f64,
                        receive: receive as f64,
                    },
                    resource_type: exchange.resource_type.clone(),
                    error: exchange.error.clone(),
                }
            })
            .collect();

        Har {
            log: HarLog {
                version: String::from("1.2"),
                creator: HarCreator {
                    name: String::from("goldpath"),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                entries,
            },
        }
    }
}

pub(crate) fn millis_to_datetime(ts: u64) -> DateTime<Utc> {
    i64::try_from(ts)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

fn pairs(headers: &BTreeMap<String, String>) -> Vec<HarPair> {
    headers
        .iter()
        .map(|(name, value)| HarPair {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn query_pairs(raw: &str) -> Vec<HarPair> {
    Url::parse(raw)
        .map(|url| {
            url.query_pairs()
                .map(|(name, value)| HarPair {
                    name: name.into_owned(),
                    value: value.into_owned(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn http_version(protocol: Option<&str>) -> String {
    match protocol.map(str::to_ascii_lowercase).as_deref() {
        Some("h2") => "HTTP/2".to_string(),
        Some("h3") | Some("h3-29") => "HTTP/3".to_string(),
        Some("http/1.0") => "HTTP/1.0".to_string(),
        _ => "HTTP/1.1".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(id: &'a str, url: &'a str, headers: &'a BTreeMap<String, String>, ts: u64) -> RequestEvent<'a> {
        RequestEvent {
            request_id: id,
            url,
            method: "GET",
            resource_type: "Document",
            headers,
            post_data: None,
            ts,
        }
    }

    #[test]
    fn pairs_request_response_and_timings() {
        let headers = BTreeMap::new();
        let mut har = HarRecorder::new();
        har.on_request(request("1", "https://shop.test/search?q=shoes&page=2", &headers, 1_000));
        har.on_response(ResponseEvent {
            request_id: "1",
            status: 200,
            status_text: "OK",
            mime_type: "text/html",
            protocol: Some("h2"),
            headers: &headers,
            ts: 1_120,
        });
        har.on_finished("1", 5_120.0, 1_200);

        let archive = har.to_har();
        assert_eq!(archive.log.version, "1.2");
        let entry = &archive.log.entries[0];
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.http_version, "HTTP/2");
        assert_eq!(entry.response.content.size, 5_120);
        assert_eq!(entry.time, 200.0);
        assert_eq!(entry.timings.wait, 120.0);
        assert_eq!(entry.timings.receive, 80.0);
        let query: Vec<&str> = entry.request.query_string.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(query, vec!["q", "page"]);
    }

    #[test]
    fn failed_and_unanswered_requests_are_kept() {
        let headers = BTreeMap::new();
        let mut har = HarRecorder::new();
        har.on_request(request("1", "https://shop.test/api", &headers, 10));
        har.on_failed("1", "net::ERR_CONNECTION_RESET", 40);
        har.on_request(request("2", "https://shop.test/slow", &headers, 50));

        let archive = har.to_har();
        assert_eq!(archive.log.entries.len(), 2);
        assert_eq!(archive.log.entries[0].error.as_deref(), Some("net::ERR_CONNECTION_RESET"));
        assert_eq!(archive.log.entries[1].response.status, 0);

        let json = serde_json::to_value(&archive).unwrap();
        assert!(json["log"]["entries"][0]["response"].get("redirectURL").is_some());
        assert!(json["log"]["entries"][0].get("startedDateTime").is_some());
    }

    #[test]
    fn redirect_hops_become_separate_entries() {
        let mut location = BTreeMap::new();
        location.insert("Location".to_string(), "https://shop.test/new".to_string());
        let empty = BTreeMap::new();
        let mut har = HarRecorder::new();
        har.on_request(request("7", "https://shop.test/old", &empty, 0));
        har.on_response(ResponseEvent {
            request_id: "7",
            status: 301,
            status_text: "Moved Permanently",
            mime_type: "",
            protocol: None,
            headers: &location,
            ts: 5,
        });
        har.on_request(request("7", "https://shop.test/new", &empty, 6));

        let archive = har.to_har();
        assert_eq!(archive.log.entries.len(), 2);
        assert_eq!(archive.log.entries[0].response.redirect_url, "https://shop.test/new");
        assert_eq!(archive.log.entries[1].response.status, 0);
    }
}
