//! Elasticsearch document writer with create-only semantics.
//!
//! Writes go through `PUT /{index}/_create/{id}`, which fails with a
//! conflict instead of overwriting when the id already exists. Re-running
//! a sync cycle therefore never duplicates a document.

use serde::Deserialize;
use thiserror::Error;

use crate::document::Document;

#[derive(Debug, Error)]
pub enum ElasticError {
    /// A document with this id already exists — the expected outcome for
    /// re-delivered samples, not a genuine failure.
    #[error("document {id} already exists")]
    Conflict { id: String },
    #[error("index request failed with status {status}: {body}")]
    Index {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("elasticsearch request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Acknowledgement returned by the document API.
#[derive(Debug, Deserialize)]
pub struct IndexedDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub result: String,
}

/// Process-scoped client for the document API of one index.
pub struct ElasticClient {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticClient {
    pub fn new(scheme: &str, host: &str, port: u16, index: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{scheme}://{host}:{port}"),
            index: index.to_string(),
        }
    }

    /// Create the document under the given id, failing on conflict.
    pub async fn create(
        &self,
        id: &str,
        document: &Document,
    ) -> Result<IndexedDocument, ElasticError> {
        let response = self
            .client
            .put(self.document_url(id))
            .json(document)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(write_failure(status, id, body))
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}/_create/{}", self.base_url, self.index, id)
    }
}

fn write_failure(status: reqwest::StatusCode, id: &str, body: String) -> ElasticError {
    if status == reqwest::StatusCode::CONFLICT {
        ElasticError::Conflict { id: id.to_string() }
    } else {
        ElasticError::Index { status, body }
    }
}
