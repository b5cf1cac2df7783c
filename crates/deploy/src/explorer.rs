//! Etherscan-compatible source verification client.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::client::{ExplorerClient, ExplorerResponse, ExplorerStatus, VerificationRequest};

/// Timeout for a single explorer request; standard JSON inputs can be large.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How many times a queued verification job is polled before reporting it as pending.
const DEFAULT_STATUS_POLLS: u32 = 5;

const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Generic envelope of Etherscan API responses.
#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl EtherscanResponse {
    fn is_ok(&self) -> bool {
        self.status == "1"
    }

    /// `result` carries the guid on success and the error text otherwise.
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Map an Etherscan result message to an [`ExplorerStatus`].
pub fn classify_message(message: &str) -> ExplorerStatus {
    let message = message.to_lowercase();
    if message.contains("rate limit") {
        ExplorerStatus::RateLimited
    } else if message.contains("already verified") {
        ExplorerStatus::AlreadyVerified
    } else if message.contains("pass - verified") {
        ExplorerStatus::Verified
    } else if message.contains("pending in queue")
        || message.contains("in progress")
        || message.contains("unable to locate contractcode")
    {
        ExplorerStatus::Pending
    } else {
        ExplorerStatus::Rejected
    }
}

/// HTTP statuses that decide the outcome before the body is read.
///
/// Client errors (bad API key, wrong endpoint) are permanent, except throttling.
fn classify_http_status(status: StatusCode) -> Option<ExplorerStatus> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ExplorerStatus::RateLimited)
    } else if status.is_server_error() {
        Some(ExplorerStatus::Unavailable)
    } else if status.is_client_error() {
        Some(ExplorerStatus::Rejected)
    } else {
        None
    }
}

/// Form fields of a `verifysourcecode` submission.
fn verification_form(request: &VerificationRequest, api_key: &str) -> Vec<(&'static str, String)> {
    vec![
        ("apikey", api_key.to_string()),
        ("module", "contract".to_string()),
        ("action", "verifysourcecode".to_string()),
        ("contractaddress", request.address.to_string()),
        (
            "sourceCode",
            request.source.standard_json_input.to_string(),
        ),
        ("codeformat", "solidity-standard-json-input".to_string()),
        (
            "contractname",
            request.source.fully_qualified_name.clone(),
        ),
        ("compilerversion", request.source.compiler_version.clone()),
        // Field name is misspelled in the Etherscan API.
        (
            "constructorArguements",
            hex::encode(&request.constructor_args),
        ),
    ]
}

/// Client for the Etherscan v2 multichain API (and compatible explorers).
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    status_polls: u32,
    status_poll_interval: Duration,
}

impl EtherscanClient {
    pub fn new(api_url: Url, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url,
            api_key: api_key.into(),
            status_polls: DEFAULT_STATUS_POLLS,
            status_poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
        })
    }

    /// Configure how a queued verification job is followed up.
    pub fn with_status_polling(mut self, polls: u32, interval: Duration) -> Self {
        self.status_polls = polls;
        self.status_poll_interval = interval;
        self
    }

    fn endpoint(&self, chain_id: Option<u64>) -> Url {
        let mut url = self.api_url.clone();
        if let Some(chain_id) = chain_id {
            url.query_pairs_mut()
                .append_pair("chainid", &chain_id.to_string());
        }
        url
    }

    /// Read an explorer reply, short-circuiting on non-success HTTP statuses.
    async fn read_response(
        response: reqwest::Response,
    ) -> anyhow::Result<Result<EtherscanResponse, ExplorerResponse>> {
        let status = response.status();
        if let Some(explorer_status) = classify_http_status(status) {
            return Ok(Err(ExplorerResponse::new(
                explorer_status,
                format!("HTTP {status}"),
            )));
        }

        let body: EtherscanResponse = response
            .json()
            .await
            .context("Failed to parse explorer response")?;
        Ok(Ok(body))
    }

    async fn check_status(
        &self,
        chain_id: Option<u64>,
        guid: &str,
    ) -> anyhow::Result<ExplorerResponse> {
        let response = self
            .client
            .get(self.endpoint(chain_id))
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .context("Failed to send checkverifystatus request")?;

        let body = match Self::read_response(response).await? {
            Ok(body) => body,
            Err(short_circuit) => return Ok(short_circuit),
        };

        let text = body.result_text();
        Ok(ExplorerResponse::new(classify_message(&text), text))
    }
}

impl ExplorerClient for EtherscanClient {
    async fn submit_verification(
        &self,
        request: &VerificationRequest,
    ) -> anyhow::Result<ExplorerResponse> {
        let response = self
            .client
            .post(self.endpoint(request.chain_id))
            .form(&verification_form(request, &self.api_key))
            .send()
            .await
            .context("Failed to send verifysourcecode request")?;

        let body = match Self::read_response(response).await? {
            Ok(body) => body,
            Err(short_circuit) => return Ok(short_circuit),
        };

        let text = body.result_text();
        if !body.is_ok() {
            return Ok(ExplorerResponse::new(classify_message(&text), text));
        }

        let guid = text;
        tracing::debug!(address = %request.address, guid = %guid, "Verification submitted");

        let mut last = ExplorerResponse::new(ExplorerStatus::Pending, "Pending in queue");
        for _ in 0..self.status_polls {
            tokio::time::sleep(self.status_poll_interval).await;
            last = self.check_status(request.chain_id, &guid).await?;
            if last.status != ExplorerStatus::Pending {
                break;
            }
        }

        Ok(last)
    }
}
