use std::future::Future;

use anyhow::{Result, bail};
use reqwest::Client;
use tracing::debug;
use uuid::Uuid;

use thinkspace_types::api::{SearchRequest, SearchResponse, SearchResult};

pub const MAX_LIMIT: u32 = 50;

/// The external similarity-search service.
pub trait SearchClient: Send + Sync {
    fn search(&self, request: SearchRequest) -> impl Future<Output = Result<SearchResponse>> + Send;
}

/// Search service reached over HTTP with a JSON POST.
#[derive(Clone)]
pub struct HttpSearch {
    client: Client,
    url: String,
}

impl HttpSearch {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

impl SearchClient for HttpSearch {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }
}

/// Query the search service for `owner_id`. Blank queries return nothing
/// without a call; `limit` is clamped to `1..=50`; results are ranked by
/// similarity, highest first.
pub async fn run_search<S: SearchClient>(client: &S, owner_id: Uuid, query: &str, limit: u32) -> Result<Vec<SearchResult>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let request = SearchRequest {
        query: query.to_string(),
        owner_id,
        limit: limit.clamp(1, MAX_LIMIT),
    };
    let response = client.search(request).await?;
    if !response.success {
        bail!(
            "search failed: {}",
            response.error.unwrap_or_else(|| "unknown error".into())
        );
    }

    let mut results = response.results;
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    debug!("Search {:?} returned {} hits", query, results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::clock;

    struct Canned {
        response: SearchResponse,
        seen: Mutex<Vec<SearchRequest>>,
    }

    impl SearchClient for Canned {
        async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn hit(similarity: f32) -> SearchResult {
        SearchResult {
            id: Uuid::new_v4(),
            content: format!("hit {}", similarity),
            similarity,
            chain_id: None,
            anchored_at: None,
            created_at: clock::now(),
        }
    }

    #[tokio::test]
    async fn test_blank_query_skips_the_call() {
        let client = Canned {
            response: SearchResponse { success: true, results: vec![hit(0.5)], error: None },
            seen: Mutex::new(Vec::new()),
        };
        assert!(run_search(&client, Uuid::new_v4(), "   ", 10).await.unwrap().is_empty());
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_ranked_and_limit_clamped() {
        let client = Canned {
            response: SearchResponse {
                success: true,
                results: vec![hit(0.2), hit(0.9), hit(0.5)],
                error: None,
            },
            seen: Mutex::new(Vec::new()),
        };
        let results = run_search(&client, Uuid::new_v4(), " garden ", 500).await.unwrap();

        let scores: Vec<f32> = results.iter().map(|r| r.similarity).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].limit, MAX_LIMIT);
        assert_eq!(seen[0].query, "garden");
    }

    #[tokio::test]
    async fn test_unsuccessful_response_is_an_error() {
        let client = Canned {
            response: SearchResponse {
                success: false,
                results: vec![],
                error: Some("index offline".into()),
            },
            seen: Mutex::new(Vec::new()),
        };
        let err = run_search(&client, Uuid::new_v4(), "x", 5).await.unwrap_err();
        assert!(err.to_string().contains("index offline"));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = SearchRequest {
            query: "q".into(),
            owner_id: Uuid::nil(),
            limit: 5,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["ownerId"], Uuid::nil().to_string());
        assert_eq!(json["limit"], 5);
    }
}
