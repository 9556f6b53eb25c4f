use std::sync::atomic::Ordering;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::DashboardConfig;
use crate::metrics::METRICS;
use crate::schema::TraceResult;

/// Minimal record shape accepted by the dashboard's submission
/// endpoint. The endpoint upserts by `id` and refreshes a last-seen
/// timestamp on conflict, which is how independently run collectors
/// merge into the shared dataset.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SubmittedBalancer {
    pub id: String,

    #[serde(rename = "ipAddress")]
    pub ip_address: String,

    pub country: String,

    #[serde(rename = "colocationCenter")]
    pub colocation_center: String,
}

impl SubmittedBalancer {
    /// Extracts the submission tuple from a record.
    ///
    /// Only records with a balancer id are submittable; the other
    /// fields degrade to empty strings rather than blocking the
    /// upsert.
    pub fn from_result(result: &TraceResult) -> Option<Self> {
        Some(Self {
            id: result.balancer_id.clone()?,
            ip_address: result.balancer_ip.clone().unwrap_or_default(),
            country: result.balancer_country.clone().unwrap_or_default(),
            colocation_center: result
                .balancer_colocation_center
                .clone()
                .unwrap_or_default(),
        })
    }
}

/// Batching client for the dashboard endpoint.
///
/// Submission is strictly best-effort: a failed POST is logged and
/// the batch is dropped. Collection must never stall on the
/// dashboard being down; the CSV stream remains the source of truth.
pub struct DashboardSubmitter {
    http: reqwest::Client,
    cfg: DashboardConfig,
    pending: Mutex<Vec<SubmittedBalancer>>,
}

impl DashboardSubmitter {
    pub fn new(cfg: DashboardConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues one record; flushes when the batch is full.
    pub async fn push(&self, result: &TraceResult) {
        let Some(record) = SubmittedBalancer::from_result(result) else {
            return;
        };

        let batch = {
            let mut pending = self.pending.lock().await;
            pending.push(record);
            if pending.len() < self.cfg.batch_size {
                return;
            }
            std::mem::take(&mut *pending)
        };

        self.post(batch).await;
    }

    /// Flushes whatever is queued. Called once at the end of a run.
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        if !batch.is_empty() {
            self.post(batch).await;
        }
    }

    async fn post(&self, batch: Vec<SubmittedBalancer>) {
        let count = batch.len();
        match self.http.post(&self.cfg.url).json(&batch).send().await {
            Ok(response) if response.status().is_success() => {
                METRICS.records_submitted.fetch_add(count, Ordering::Relaxed);
                info!("Submitted {} balancers to dashboard", count);
            }
            Ok(response) => {
                warn!(
                    "Dashboard rejected batch of {}: HTTP {}",
                    count,
                    response.status()
                );
            }
            Err(e) => {
                warn!("Dashboard submission failed ({} records): {}", count, e);
            }
        }
    }
}
