//! Outbound approval requests.
//!
//! With `dispatch.endpoint_url` set, requests go to the approval service as a
//! JSON POST. Without it they are only logged so local runs keep working.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use equiptrack_core::config::DispatchConfig;
use equiptrack_core::ports::{ApprovalDispatch, DispatchError, DispatchReceipt, DispatchRequest};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CALLBACK_PATH: &str = "/api/v1/approvals/callback";

pub fn build(config: &DispatchConfig) -> Result<Arc<dyn ApprovalDispatch>, reqwest::Error> {
    match &config.endpoint_url {
        Some(endpoint_url) => {
            let client =
                Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
            Ok(Arc::new(HttpApprovalDispatch {
                client,
                endpoint_url: endpoint_url.clone(),
                callback_url: config
                    .callback_base_url
                    .as_deref()
                    .map(|base| format!("{}{CALLBACK_PATH}", base.trim_end_matches('/'))),
                api_token: config.api_token.clone(),
            }))
        }
        None => Ok(Arc::new(LoggingApprovalDispatch)),
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    request: &'a DispatchRequest,
    callback_url: Option<&'a str>,
}

#[derive(Default, Deserialize)]
struct AcceptedResponse {
    #[serde(default)]
    external_reference: Option<String>,
}

pub struct HttpApprovalDispatch {
    client: Client,
    endpoint_url: String,
    callback_url: Option<String>,
    api_token: Option<SecretString>,
}

#[async_trait]
impl ApprovalDispatch for HttpApprovalDispatch {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let mut outbound = self
            .client
            .post(&self.endpoint_url)
            .header("x-correlation-id", &request.correlation_id)
            .json(&Envelope { request, callback_url: self.callback_url.as_deref() });
        if let Some(token) = &self.api_token {
            outbound = outbound.bearer_auth(token.expose_secret());
        }

        let response = outbound.send().await.map_err(|error| {
            warn!(
                event_name = "dispatch.request_failed",
                correlation_id = %request.correlation_id,
                ticket_id = %request.ticket_id,
                error = %error,
                "approval service request failed"
            );
            DispatchError::Unavailable(error.to_string())
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DispatchError::Unavailable(format!("approval service returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = if body.trim().is_empty() { status.to_string() } else { body };
            return Err(DispatchError::Rejected(reason));
        }

        // An empty or unparseable body still counts as accepted.
        let accepted = response.json::<AcceptedResponse>().await.unwrap_or_default();
        info!(
            event_name = "dispatch.accepted",
            correlation_id = %request.correlation_id,
            ticket_id = %request.ticket_id,
            steps = request.approval_flow.len(),
            "approval request accepted"
        );
        Ok(DispatchReceipt { external_reference: accepted.external_reference })
    }
}

/// Accepts every request and writes it to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingApprovalDispatch;

#[async_trait]
impl ApprovalDispatch for LoggingApprovalDispatch {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let approvers = request
            .approval_flow
            .0
            .iter()
            .map(|step| step.approver.0.as_str())
            .collect::<Vec<_>>()
            .join(",");
        info!(
            event_name = "dispatch.logged",
            correlation_id = %request.correlation_id,
            ticket_id = %request.ticket_id,
            operation = request.operation.as_str(),
            approvers = %approvers,
            lines = request.lines.len(),
            "no approval endpoint configured; request logged only"
        );
        Ok(DispatchReceipt::default())
    }
}
