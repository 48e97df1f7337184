//! Track search HTTP client
//!
//! Queries the coordinator's search endpoint. Results are candidates only;
//! they reach the shared queue through the add-track intent.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::sync::Track;

/// Default search endpoint base URL
pub const DEFAULT_SEARCH_URL: &str = "http://127.0.0.1:3001";

/// Queries this short (after trimming) are not sent
const MIN_QUERY_CHARS: usize = 3;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors that can occur while searching
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search failed: {0}")]
    Api(String),
}

/// Which catalogue to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchSource {
    #[default]
    Youtube,
    Soundcloud,
    All,
}

impl SearchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchSource::Youtube => "youtube",
            SearchSource::Soundcloud => "soundcloud",
            SearchSource::All => "all",
        }
    }
}

/// Candidates plus an optional transient warning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub tracks: Vec<Track>,
    pub warning: Option<String>,
}

/// The endpoint answers with one of three shapes
#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Envelope {
        results: Vec<Track>,
        warnings: Vec<String>,
    },
    Tracks(Vec<Track>),
    Other {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Client for the search endpoint
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SearchError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Search `source` for `query`. Short queries return nothing without a request.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn search(
        &self,
        query: &str,
        source: SearchSource,
    ) -> Result<SearchOutcome, SearchError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            debug!("Query too short, skipping search");
            return Ok(SearchOutcome::default());
        }

        let url = format!("{}/search", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("q", query), ("source", source.as_str())])
            .send()
            .await?;

        let status = resp.status();
        match resp.json::<SearchResponse>().await {
            Ok(body) => interpret(body),
            Err(e) if !status.is_success() => {
                warn!("Search returned {} with an unreadable body: {}", status, e);
                Err(SearchError::Api(format!("server returned {status}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn interpret(body: SearchResponse) -> Result<SearchOutcome, SearchError> {
    match body {
        SearchResponse::Envelope { results, warnings } => {
            let warning = (!warnings.is_empty()).then(|| warnings.join(". "));
            if let Some(warning) = &warning {
                warn!("Search warnings: {}", warning);
            }
            Ok(SearchOutcome {
                tracks: results,
                warning,
            })
        }
        SearchResponse::Tracks(tracks) => Ok(SearchOutcome {
            tracks,
            warning: None,
        }),
        SearchResponse::Other { message: Some(message) } => Err(SearchError::Api(message)),
        SearchResponse::Other { message: None } => Ok(SearchOutcome::default()),
    }
}
