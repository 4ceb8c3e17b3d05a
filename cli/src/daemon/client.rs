// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

use qnms_core::application::command_queue::QueueStats;
use qnms_core::application::metrics::SystemMetrics;
use qnms_core::domain::agent::SwarmAgentState;
use qnms_core::domain::defect::{DefectId, DefectRecord};
use qnms_core::domain::errors::ErrorResponse;

use super::server::{CancelRequest, IngestResponse, RegisterAgentRequest, SensorDataRequest};
use crate::hub::{HealthReport, Withdrawal};

/// A request the hub refused, carrying its structured error body.
#[derive(Debug, thiserror::Error)]
pub struct ApiFailure {
    pub action: &'static str,
    pub status: u16,
    pub body: ErrorResponse,
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let error = &self.body.error;
        write!(f, "{} failed: {:?} {}", self.action, error.code, error.message)?;
        if let (Some(field), Some(constraint)) = (&error.details.field, &error.details.constraint) {
            write!(f, " ({}: {})", field, constraint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: super::base_url(host, port),
        })
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Failed to reach hub")?;
        decode(response, "health check").await
    }

    pub async fn ingest(&self, request: &SensorDataRequest) -> Result<IngestResponse> {
        let response = self
            .client
            .post(format!("{}/api/v1/sensor-data", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to submit sensor data")?;
        decode(response, "sensor data submission").await
    }

    pub async fn list_agents(&self) -> Result<Vec<SwarmAgentState>> {
        let response = self
            .client
            .get(format!("{}/api/v1/agents", self.base_url))
            .send()
            .await
            .context("Failed to list agents")?;
        decode(response, "agent listing").await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<SwarmAgentState> {
        let response = self
            .client
            .get(format!("{}/api/v1/agents/{}", self.base_url, agent_id))
            .send()
            .await
            .context("Failed to get agent")?;
        decode(response, "agent lookup").await
    }

    pub async fn register_agent(&self, request: &RegisterAgentRequest) -> Result<SwarmAgentState> {
        let response = self
            .client
            .post(format!("{}/api/v1/agents", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to register agent")?;
        decode(response, "agent registration").await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let response = self
            .client
            .get(format!("{}/api/v1/queue/stats", self.base_url))
            .send()
            .await
            .context("Failed to get queue stats")?;
        decode(response, "queue stats").await
    }

    pub async fn metrics(&self) -> Result<SystemMetrics> {
        let response = self
            .client
            .get(format!("{}/api/v1/metrics", self.base_url))
            .send()
            .await
            .context("Failed to get metrics")?;
        decode(response, "metrics").await
    }

    pub async fn list_defects(&self) -> Result<Vec<DefectRecord>> {
        let response = self
            .client
            .get(format!("{}/api/v1/defects", self.base_url))
            .send()
            .await
            .context("Failed to list defects")?;
        decode(response, "defect listing").await
    }

    pub async fn get_defect(&self, defect_id: DefectId) -> Result<DefectRecord> {
        let response = self
            .client
            .get(format!("{}/api/v1/defects/{}", self.base_url, defect_id))
            .send()
            .await
            .context("Failed to get defect")?;
        decode(response, "defect lookup").await
    }

    pub async fn cancel_defect(&self, defect_id: DefectId, reason: Option<String>) -> Result<Withdrawal> {
        let response = self
            .client
            .post(format!("{}/api/v1/defects/{}/cancel", self.base_url, defect_id))
            .json(&CancelRequest { reason })
            .send()
            .await
            .context("Failed to cancel defect")?;
        decode(response, "defect cancellation").await
    }
}

async fn decode<T: DeserializeOwned>(response: Response, action: &'static str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(body) => Err(ApiFailure {
                action,
                status: status.as_u16(),
                body,
            }
            .into()),
            Err(_) => Err(anyhow::anyhow!("{} failed: HTTP {} {}", action, status, text)),
        };
    }

    response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", action))
}
