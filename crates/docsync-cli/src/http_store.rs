//! HttpStore: `DocumentStore` over the REST gateway.
//!
//! The gateway fronts the wallet SDK and the contract; this client only
//! shuttles JSON. Transport problems and gateway rejections map onto the
//! `StoreError` taxonomy so the controller treats them like any other store.

use async_trait::async_trait;
use docsync_core::{
    Address, DocumentStore, FeeMode, Operation, QueryRequest, QueryResponse, StoreError,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteBody<'a> {
    sender: &'a Address,
    contract: &'a Address,
    operation: &'a Operation,
    fee_mode: &'a FeeMode,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    contract: &'a Address,
    request: &'a QueryRequest,
}

#[derive(Deserialize)]
struct QueryReply {
    #[serde(default)]
    result: Option<QueryResponse>,
}

/// REST gateway client for the document store.
pub struct HttpStore {
    client: reqwest::Client,
    rest_url: String,
}

impl HttpStore {
    pub fn new(rest_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url: rest_url.into(),
        }
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn execute(
        &self,
        sender: &Address,
        target: &Address,
        op: Operation,
        fee: &FeeMode,
    ) -> Result<(), StoreError> {
        let url = format!("{}/v1/execute", self.rest_url);
        let body = ExecuteBody {
            sender,
            contract: target,
            operation: &op,
            fee_mode: fee,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected(format!("{status}: {text}")));
        }
        Ok(())
    }

    async fn query(
        &self,
        target: &Address,
        request: QueryRequest,
    ) -> Result<Option<QueryResponse>, StoreError> {
        let url = format!("{}/v1/query", self.rest_url);
        let body = QueryBody {
            contract: target,
            request: &request,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Query(format!("{status}: {text}")));
        }

        let reply: QueryReply = response
            .json()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(reply.result)
    }
}
