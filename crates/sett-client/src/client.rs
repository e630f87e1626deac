//! Remote execution client for the datasette JSON query protocol.
//!
//! Wire contract (pinned to datasette >= 0.60, `_shape=arrays`):
//!
//! ```text
//! GET {base}/{database}.json?sql=<sql>&_shape=arrays&_size=max[&_next=<cursor>]
//! -> {"ok": true, "database": "...", "columns": [...], "rows": [[...], ...],
//!     "next": <cursor-or-null>, "truncated": false}
//! ```
//!
//! Unknown response fields are ignored. Pages are fetched strictly
//! sequentially by following the `next` cursor; the client never retries and
//! never reorders. Dropping the returned future between pages cancels the
//! fetch without leaking the connection.

use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value as Json;
use sett_ir::{DataType, TableSchema, Value};
use sett_sql::CompiledQuery;
use tracing::{debug, trace};

use crate::decode::decode_value;
use crate::errors::ExecutionError;

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// One remote queryable surface: base URL, database name, optional bearer
/// token. Immutable once built.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: Url,
    database: String,
    token: Option<String>,
}

impl Endpoint {
    /// Default database name used by datasette for single-file deployments.
    pub const DEFAULT_DATABASE: &'static str = "main";

    pub fn new(base_url: &str) -> Result<Self, ExecutionError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ExecutionError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self {
            base_url,
            database: Self::DEFAULT_DATABASE.to_string(),
            token: None,
        })
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Query URL for this endpoint's database: `{base}/{database}.json`.
    fn query_url(&self) -> Result<Url, ExecutionError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ExecutionError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.push(&format!("{}.json", self.database));
        }
        Ok(url)
    }
}

/// Complete, decoded result set aligned to a [`CompiledQuery`]'s output
/// schema. Every row has exactly `columns.len()` values.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedTable {
    pub columns: Vec<String>,
    pub types: Vec<DataType>,
    pub rows: Vec<Vec<Value>>,
}

impl MaterializedTable {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(
            self.columns
                .iter()
                .cloned()
                .zip(self.types.iter().copied())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One page of the paginated response, still holding raw JSON scalars.
#[derive(Debug, Deserialize)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Json>>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct DatasetteClient {
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl DatasetteClient {
    pub fn new(endpoint: Endpoint) -> Result<Self, ExecutionError> {
        let http = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()?;
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Fetch one page; `cursor` continues a previous page's `next`.
    async fn fetch_page(
        &self,
        sql: &str,
        cursor: Option<&str>,
    ) -> Result<ResultPage, ExecutionError> {
        let url = self.endpoint.query_url()?;
        let mut req = self.http.get(url).query(&[
            ("sql", sql),
            ("_shape", "arrays"),
            ("_size", "max"),
        ]);
        if let Some(cursor) = cursor {
            req = req.query(&[("_next", cursor)]);
        }
        if let Some(token) = &self.endpoint.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(ExecutionError::RemoteFailure {
                status: status.as_u16(),
                message,
            });
        }

        let body = res.text().await?;
        let page: ResultPage = serde_json::from_str(&body).map_err(|e| {
            ExecutionError::ProtocolViolation(format!("unparseable response body: {e}"))
        })?;
        trace!(rows = page.rows.len(), next = ?page.next, "fetched page");
        Ok(page)
    }

    /// Execute a compiled query, following continuation cursors until the
    /// server reports no more pages.
    ///
    /// Either the complete result set is returned or an error is raised; a
    /// transport failure mid-pagination surfaces as `IncompleteResult`, never
    /// as a silently truncated table.
    pub async fn execute(
        &self,
        query: &CompiledQuery,
    ) -> Result<MaterializedTable, ExecutionError> {
        debug!(sql = %query.sql, database = %self.endpoint.database, "executing");

        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = match self.fetch_page(&query.sql, cursor.as_deref()).await {
                Ok(page) => page,
                Err(err) if pages > 0 => {
                    return Err(ExecutionError::IncompleteResult {
                        rows: rows.len(),
                        reason: err.to_string(),
                    })
                }
                Err(err) => return Err(err),
            };
            pages += 1;

            // The compiler and the server must agree on names and order; a
            // mismatch is a bug signal, never something to silently fix up.
            if page.columns != query.columns {
                return Err(ExecutionError::SchemaMismatch {
                    expected: query.columns.clone(),
                    actual: page.columns,
                });
            }

            for raw_row in &page.rows {
                if raw_row.len() != query.columns.len() {
                    return Err(ExecutionError::ProtocolViolation(format!(
                        "row width {} does not match {} columns",
                        raw_row.len(),
                        query.columns.len()
                    )));
                }
                let row = raw_row
                    .iter()
                    .zip(query.types.iter())
                    .map(|(value, ty)| decode_value(value, *ty))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(row);
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => {
                    if page.truncated {
                        // The server hit its row ceiling with no cursor to
                        // continue from.
                        return Err(ExecutionError::IncompleteResult {
                            rows: rows.len(),
                            reason: "server truncated the result set".to_string(),
                        });
                    }
                    break;
                }
            }
        }

        debug!(rows = rows.len(), pages, "materialized");
        Ok(MaterializedTable {
            columns: query.columns.clone(),
            types: query.types.clone(),
            rows,
        })
    }
}
