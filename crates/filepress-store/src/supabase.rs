use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use filepress_core::FilepressError;

use crate::{DurableStore, Filter};

/// Durable store backed by the Supabase PostgREST endpoint.
///
/// Every row travels as JSON; filters become `column=eq.value` query pairs.
/// The service key is used for both the `apikey` header and the bearer token
/// so writes bypass row-level security.
pub struct SupabaseStore {
    http: reqwest::Client,
    rest_url: String,
    service_key: String,
}

fn durable_err(e: reqwest::Error) -> FilepressError {
    FilepressError::DurableStore(e.to_string())
}

impl SupabaseStore {
    pub fn new(rest_url: &str, service_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_url: rest_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    fn eq_pairs(filters: &[Filter]) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|(col, val)| (col.clone(), format!("eq.{val}")))
            .collect()
    }

    async fn expect_success(
        resp: reqwest::Response,
        table: &str,
        op: &str,
    ) -> Result<reqwest::Response, FilepressError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(FilepressError::DurableStore(format!(
            "{op} on {table} returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl DurableStore for SupabaseStore {
    async fn select(&self, table: &str, filters: &[Filter])
        -> Result<Vec<Value>, FilepressError>
    {
        let resp = self
            .request(reqwest::Method::GET, table)
            .query(&Self::eq_pairs(filters))
            .send()
            .await
            .map_err(durable_err)?;
        let resp = Self::expect_success(resp, table, "select").await?;
        resp.json().await.map_err(durable_err)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), FilepressError> {
        let resp = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(durable_err)?;
        Self::expect_success(resp, table, "insert").await?;
        debug!(table, "durable insert");
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str)
        -> Result<(), FilepressError>
    {
        let resp = self
            .request(reqwest::Method::POST, table)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(durable_err)?;
        Self::expect_success(resp, table, "upsert").await?;
        debug!(table, on_conflict, "durable upsert");
        Ok(())
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value)
        -> Result<u64, FilepressError>
    {
        let resp = self
            .request(reqwest::Method::PATCH, table)
            .query(&Self::eq_pairs(filters))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .map_err(durable_err)?;
        let resp = Self::expect_success(resp, table, "update").await?;
        let rows: Vec<Value> = resp.json().await.map_err(durable_err)?;
        Ok(rows.len() as u64)
    }
}
