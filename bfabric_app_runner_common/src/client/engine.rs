//! Transports which actually talk to the LIMS.

use reqwest::{blocking, StatusCode};
use serde_json::{json, Value};
use url::Url;

use super::query::{Query, Record};
use crate::config::{Auth, ClientConfig};
use crate::prelude::*;

/// One raw response from the LIMS, before any checking for errors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineResponse {
    /// The records in this page of the response.
    pub records: Vec<Record>,
    /// How many pages the server has for this query.
    pub number_of_pages: u32,
    /// Any `errorreport` values found on the response or its records.
    pub errors: Vec<String>,
}

impl EngineResponse {
    /// Parse a response body of the form
    /// `{"numberofpages": n, "errorreport": ..., "<endpoint>": [...]}`.
    pub fn from_json(endpoint: &str, body: Value) -> Result<EngineResponse> {
        let mut body = match body {
            Value::Object(map) => map,
            other => {
                return Err(format_err!(
                    "expected a JSON object from endpoint {}, got {}",
                    endpoint,
                    other,
                ))
            }
        };

        let mut errors = vec![];
        if let Some(report) = body.remove("errorreport") {
            errors.extend(error_report_text(&report));
        }

        let records = match body.remove(endpoint) {
            None | Some(Value::Null) => vec![],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(record),
                    other => Err(format_err!(
                        "expected records from endpoint {}, got {}",
                        endpoint,
                        other,
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            // A single record is sometimes not wrapped in a list.
            Some(Value::Object(record)) => vec![record],
            Some(other) => {
                return Err(format_err!(
                    "unexpected records from endpoint {}: {}",
                    endpoint,
                    other,
                ))
            }
        };
        for record in &records {
            if let Some(report) = record.get("errorreport") {
                errors.extend(error_report_text(report));
            }
        }

        let number_of_pages = body
            .get("numberofpages")
            .and_then(Value::as_u64)
            .unwrap_or(if records.is_empty() { 0 } else { 1 });
        Ok(EngineResponse {
            records,
            number_of_pages: number_of_pages as u32,
            errors,
        })
    }
}

/// Turn an `errorreport` value into zero or more messages. Empty reports
/// count as no error.
fn error_report_text(report: &Value) -> Option<String> {
    match report {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Abstract interface to a LIMS transport.
///
/// The [`Client`](super::Client) facade layers paging, query splitting and
/// error checking on top of this, so implementations only need to perform
/// single requests.
pub trait LimsEngine {
    /// Read a single page of results matching `query`. Pages start at 1.
    fn read(&self, endpoint: &str, query: &Query, page: u32, id_only: bool) -> Result<EngineResponse>;

    /// Save `records`, creating them if they have no `id` and updating them
    /// otherwise.
    fn save(&self, endpoint: &str, records: &[Record]) -> Result<EngineResponse>;

    /// Delete the records with the specified IDs.
    fn delete(&self, endpoint: &str, ids: &[i64]) -> Result<EngineResponse>;
}

/// Talks to the JSON web service gateway of the LIMS using `reqwest`.
pub struct HttpEngine {
    base_url: Url,
    auth: Auth,
    http: blocking::Client,
}

impl HttpEngine {
    /// Create a new engine from a client config, which must contain
    /// credentials.
    pub fn new(config: &ClientConfig) -> Result<HttpEngine> {
        let auth = config.auth.clone().ok_or_else(|| {
            RunnerError::Auth(format!(
                "config environment {:?} has no login and password",
                config.environment,
            ))
        })?;
        let http = blocking::Client::builder()
            .user_agent(concat!("bfabric-app-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not build HTTP client")?;
        Ok(HttpEngine {
            base_url: config.base_url.clone(),
            auth,
            http,
        })
    }

    /// POST `body` to `{base_url}{endpoint}/{operation}` and parse the reply.
    fn post(&self, endpoint: &str, operation: &str, body: Value) -> Result<EngineResponse> {
        let url = self
            .base_url
            .join(&format!("{}/{}", endpoint, operation))
            .with_context(|| format!("could not build URL for {} {}", operation, endpoint))?;
        trace!("POST {}", url);
        let resp = self
            .http
            .post(url.clone())
            .json(&body)
            .send()
            .with_context(|| format!("error sending request to {}", url))?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RunnerError::Auth(format!(
                    "{} rejected login {:?} ({})",
                    url,
                    self.auth.login,
                    resp.status(),
                ))
                .into())
            }
            status if !status.is_success() => {
                return Err(format_err!("unexpected HTTP status {} from {}", status, url))
            }
            _ => {}
        }
        let body: Value = resp
            .json()
            .with_context(|| format!("could not parse response from {}", url))?;
        EngineResponse::from_json(endpoint, body)
    }
}

impl LimsEngine for HttpEngine {
    fn read(&self, endpoint: &str, query: &Query, page: u32, id_only: bool) -> Result<EngineResponse> {
        let body = json!({
            "login": self.auth.login,
            "password": self.auth.password,
            "page": page,
            "idonly": id_only,
            "query": query,
        });
        self.post(endpoint, "read", body)
    }

    fn save(&self, endpoint: &str, records: &[Record]) -> Result<EngineResponse> {
        let mut body = serde_json::Map::new();
        body.insert("login".to_owned(), json!(self.auth.login));
        body.insert("password".to_owned(), json!(self.auth.password));
        body.insert(endpoint.to_owned(), json!(records));
        self.post(endpoint, "save", Value::Object(body))
    }

    fn delete(&self, endpoint: &str, ids: &[i64]) -> Result<EngineResponse> {
        let body = json!({
            "login": self.auth.login,
            "password": self.auth.password,
            "id": ids,
        });
        self.post(endpoint, "delete", body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_base_url;
    use assert_matches::assert_matches;
    use mockito::{mock, Matcher};

    fn engine() -> HttpEngine {
        let config = ClientConfig {
            environment: "TEST".to_owned(),
            base_url: parse_base_url(&mockito::server_url()).unwrap(),
            auth: Some(Auth {
                login: "alice".to_owned(),
                password: "secret".to_owned(),
            }),
        };
        HttpEngine::new(&config).unwrap()
    }

    #[test]
    fn parses_records_and_error_reports() {
        let body = json!({
            "numberofpages": 3,
            "resource": [{"id": 1}, {"id": 2, "errorreport": "permission denied"}],
        });
        let resp = EngineResponse::from_json("resource", body).unwrap();
        assert_eq!(resp.records.len(), 2);
        assert_eq!(resp.number_of_pages, 3);
        assert_eq!(resp.errors, vec!["permission denied".to_owned()]);

        let empty = EngineResponse::from_json("resource", json!({"errorreport": ""})).unwrap();
        assert!(empty.errors.is_empty());
        assert_eq!(empty.number_of_pages, 0);
    }

    #[test]
    fn http_read_posts_query_with_credentials() {
        let mock = mock("POST", "/workunit/read")
            .match_body(Matcher::PartialJson(json!({
                "login": "alice",
                "page": 1,
                "query": {"id": 7},
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"numberofpages": 1, "workunit": [{"id": 7, "status": "PENDING"}]}"#)
            .create();
        let mut query = Query::new();
        query.insert("id".to_owned(), json!(7));
        let resp = engine().read("workunit", &query, 1, false).unwrap();
        mock.assert();
        assert_eq!(resp.records[0]["status"], "PENDING");
    }

    #[test]
    fn http_rejected_credentials_are_auth_errors() {
        let _mock = mock("POST", "/storage/read").with_status(401).create();
        let err = engine().read("storage", &Query::new(), 1, false).unwrap_err();
        assert_matches!(err.downcast_ref::<RunnerError>(), Some(RunnerError::Auth(_)));
    }
}
