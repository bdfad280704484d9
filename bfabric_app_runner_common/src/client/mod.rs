//! A typed facade over the LIMS web services.
//!
//! The [`Client`] offers `read`, `save` and `delete` over named endpoints.
//! Reads are paged transparently, and queries with more than
//! [`QUERY_LIMIT`] values in a list field are split into several requests.

use crate::config::ClientConfig;
use crate::prelude::*;

mod engine;
mod query;

pub use self::engine::{EngineResponse, HttpEngine, LimsEngine};
pub use self::query::{
    order_by_query_ids, query_from_json, record_id, requested_pages, split_multi_query,
    value_as_i64, Query, Record, QUERY_LIMIT,
};

/// Options for [`Client::read_with`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadOptions {
    /// The maximum number of results to fetch, or `None` to fetch all pages.
    /// Rounded up to whole pages when fetching, then truncated.
    pub max_results: Option<usize>,
    /// Should the server only return IDs?
    pub id_only: bool,
    /// Should error reports be turned into an `Err`?
    pub check: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            max_results: Some(QUERY_LIMIT),
            id_only: false,
            check: true,
        }
    }
}

/// The results of a request, plus any errors the LIMS reported.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultContainer {
    /// The records returned, in server order.
    pub records: Vec<Record>,
    /// How many pages the server had available.
    pub total_pages: u32,
    /// Error reports from the LIMS.
    pub errors: Vec<String>,
}

impl ResultContainer {
    /// Did the request succeed without error reports?
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return a [`RunnerError::Request`] if any error reports were returned.
    pub fn assert_success(&self, endpoint: &str) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(RunnerError::Request {
                endpoint: endpoint.to_owned(),
                message: self.errors.join("; "),
            }
            .into())
        }
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Are there no records?
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append the records and errors of another container.
    fn extend(&mut self, other: ResultContainer) {
        self.records.extend(other.records);
        self.total_pages += other.total_pages;
        self.errors.extend(other.errors);
    }
}

/// A client for the LIMS.
pub struct Client {
    engine: Box<dyn LimsEngine>,
}

impl Client {
    /// Create a client using the specified transport.
    pub fn new(engine: Box<dyn LimsEngine>) -> Client {
        Client { engine }
    }

    /// Create a client which talks HTTP to the LIMS described by `config`.
    pub fn connect(config: &ClientConfig) -> Result<Client> {
        debug!(
            "connecting to {} as environment {}",
            config.base_url, config.environment
        );
        Ok(Client::new(Box::new(HttpEngine::new(config)?)))
    }

    /// Read at most 100 records matching `query`, failing on error reports.
    pub fn read(&self, endpoint: &str, query: &Query) -> Result<ResultContainer> {
        self.read_with(endpoint, query, ReadOptions::default())
    }

    /// Read all records matching `query`.
    pub fn read_all(&self, endpoint: &str, query: &Query) -> Result<ResultContainer> {
        let opts = ReadOptions {
            max_results: None,
            ..ReadOptions::default()
        };
        self.read_with(endpoint, query, opts)
    }

    /// Read records matching `query`, with explicit options.
    ///
    /// When `query` contains a list field with more than [`QUERY_LIMIT`]
    /// values, it is split into several queries whose results are
    /// concatenated in order. `max_results` then applies to each of the
    /// split queries. Records found by an `id` list come back in the order
    /// of that list.
    #[instrument(
        level = "debug",
        skip(self, query),
        fields(query = %serde_json::Value::Object(query.clone()))
    )]
    pub fn read_with(&self, endpoint: &str, query: &Query, opts: ReadOptions) -> Result<ResultContainer> {
        let mut result = ResultContainer::default();
        for sub_query in split_multi_query(query)? {
            result.extend(self.read_paged(endpoint, &sub_query, opts)?);
        }
        order_by_query_ids(query, &mut result.records);
        if opts.check {
            result.assert_success(endpoint)?;
        }
        Ok(result)
    }

    /// Read all requested pages of a single query.
    fn read_paged(&self, endpoint: &str, query: &Query, opts: ReadOptions) -> Result<ResultContainer> {
        let first = self
            .engine
            .read(endpoint, query, 1, opts.id_only)
            .with_context(|| format!("could not read page 1 of {}", endpoint))?;
        let available = first.number_of_pages;
        let pages = requested_pages(opts.max_results, available).max(1);
        trace!("{} has {} pages, fetching {}", endpoint, available, pages);

        let mut result = ResultContainer {
            records: first.records,
            total_pages: available,
            errors: first.errors,
        };
        for page in 2..=pages {
            let resp = self
                .engine
                .read(endpoint, query, page, opts.id_only)
                .with_context(|| format!("could not read page {} of {}", page, endpoint))?;
            result.records.extend(resp.records);
            result.errors.extend(resp.errors);
        }
        if let Some(max_results) = opts.max_results {
            result.records.truncate(max_results);
        }
        Ok(result)
    }

    /// Save a single record. If it has an `id`, it is updated, otherwise it
    /// is created.
    pub fn save(&self, endpoint: &str, record: Record) -> Result<ResultContainer> {
        self.save_all(endpoint, vec![record], true)
    }

    /// Save several records, optionally without failing on error reports.
    pub fn save_all(&self, endpoint: &str, records: Vec<Record>, check: bool) -> Result<ResultContainer> {
        debug!("saving {} record(s) to {}", records.len(), endpoint);
        let resp = self
            .engine
            .save(endpoint, &records)
            .with_context(|| format!("could not save to {}", endpoint))?;
        let result = ResultContainer {
            records: resp.records,
            total_pages: resp.number_of_pages,
            errors: resp.errors,
        };
        if check {
            result.assert_success(endpoint)?;
        }
        Ok(result)
    }

    /// Delete the records with the specified IDs. Deleting nothing is a no-op.
    pub fn delete(&self, endpoint: &str, ids: &[i64], check: bool) -> Result<ResultContainer> {
        if ids.is_empty() {
            return Ok(ResultContainer::default());
        }
        debug!("deleting {:?} from {}", ids, endpoint);
        let resp = self
            .engine
            .delete(endpoint, ids)
            .with_context(|| format!("could not delete from {}", endpoint))?;
        let result = ResultContainer {
            records: resp.records,
            total_pages: resp.number_of_pages,
            errors: resp.errors,
        };
        if check {
            result.assert_success(endpoint)?;
        }
        Ok(result)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLims, LimsCall};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn resources(n: i64) -> FakeLims {
        let lims = FakeLims::new();
        for id in 1..=n {
            lims.insert("resource", json!({"id": id, "name": format!("r{}", id)}));
        }
        lims
    }

    #[test]
    fn reading_350_ids_issues_four_requests_in_order() {
        let lims = resources(400);
        let client = lims.client();
        let ids = (1..=350).rev().collect::<Vec<i64>>();
        let query = query_from_json(json!({ "id": ids }));
        let result = client.read_all("resource", &query).unwrap();

        let page_sizes = lims
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                LimsCall::Read { query, .. } => Some(query["id"].as_array().unwrap().len()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(page_sizes, vec![100, 100, 100, 50]);

        let got = result.records.iter().filter_map(record_id).collect::<Vec<_>>();
        assert_eq!(got, ids);
    }

    #[test]
    fn pagination_stops_at_max_results() {
        let lims = resources(250);
        let client = lims.client();
        let result = client.read("resource", &Query::new()).unwrap();
        assert_eq!(result.len(), 100);
        assert_eq!(result.total_pages, 3);
        assert_eq!(lims.calls().len(), 1);

        let all = client.read_all("resource", &Query::new()).unwrap();
        assert_eq!(all.len(), 250);
        assert_eq!(lims.calls().len(), 4);
    }

    #[test]
    fn error_reports_fail_only_when_checked() {
        let lims = FakeLims::new();
        lims.fail_endpoint("sample", "access denied");
        let client = lims.client();

        let err = client.read("sample", &Query::new()).unwrap_err();
        assert_matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::Request { endpoint, .. }) if endpoint == "sample"
        );

        let opts = ReadOptions {
            check: false,
            ..ReadOptions::default()
        };
        let result = client.read_with("sample", &Query::new(), opts).unwrap();
        assert!(!result.is_success());
    }

    #[test]
    fn empty_delete_is_a_no_op() {
        let lims = FakeLims::new();
        lims.client().delete("resource", &[], true).unwrap();
        assert!(lims.calls().is_empty());
    }
}
