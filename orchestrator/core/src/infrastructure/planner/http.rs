// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for the repair path planner.
//!
//! `POST {endpoint}/plan-repair` with a [`PlanningRequest`] body. Transport
//! faults and 5xx responses are `Unavailable`; everything the planner does
//! answer goes through [`parse_planner_response`].

use crate::domain::planner::{
    parse_planner_response, PathPlanner, PlannedPath, PlanningError, PlanningRequest,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct HttpPathPlanner {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpPathPlanner {
    pub fn new(endpoint: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/plan-repair", endpoint.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PathPlanner for HttpPathPlanner {
    async fn plan(&self, request: &PlanningRequest) -> Result<PlannedPath, PlanningError> {
        debug!(
            defect_id = %request.defect_id,
            correlation_id = %request.correlation_id,
            "Requesting repair path"
        );

        let response = self
            .client
            .post(&self.url)
            .header("X-Correlation-ID", request.correlation_id.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlanningError::Timeout(self.timeout)
                } else {
                    PlanningError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) if status.is_server_error() => {
                return Err(PlanningError::Unavailable(format!("planner returned {}", status)));
            }
            Err(e) => {
                return Err(PlanningError::Malformed(format!(
                    "planner returned {} with unreadable body: {}",
                    status, e
                )));
            }
        };

        if status.is_server_error() && body.get("error").is_none() {
            return Err(PlanningError::Unavailable(format!("planner returned {}", status)));
        }
        parse_planner_response(body)
    }
}
