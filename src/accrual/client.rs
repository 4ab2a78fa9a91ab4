use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::AppResult;
use crate::ledger::models::{AccrualUpdate, OrderNumber};

/// Classified answer of the accrual authority for one order.
///
/// Every HTTP exchange maps to exactly one variant, so the reconciler can
/// match exhaustively and never lose an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// Terminal verdict: PROCESSED with its accrual, or INVALID.
    Final(AccrualUpdate),
    /// Authority has the order but has not decided yet.
    Pending,
    RateLimited { retry_after: Option<Duration> },
    ServerFault { status: u16 },
    TransportError(String),
}

/// Status reported by the accrual authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorityStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

/// Response body of `GET /api/orders/{number}`
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AuthorityStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn query(&self, number: OrderNumber) -> AccrualOutcome;
}

/// HTTP client for the external accrual authority
pub struct AccrualClient {
    client: Client,
    base_url: String,
}

impl AccrualClient {
    pub fn new(address: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(address),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AccrualSource for AccrualClient {
    async fn query(&self, number: OrderNumber) -> AccrualOutcome {
        let url = format!("{}/api/orders/{}", self.base_url, number);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return AccrualOutcome::TransportError(format!("request failed: {}", e)),
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = if status == StatusCode::OK {
            match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    return AccrualOutcome::TransportError(format!("reading body failed: {}", e))
                }
            }
        } else {
            Vec::new()
        };

        let outcome = classify(number, status, retry_after, &body);
        debug!("Accrual query {} -> {} => {:?}", number, status, outcome);
        outcome
    }
}

/// Map one HTTP exchange onto an [`AccrualOutcome`].
pub fn classify(
    number: OrderNumber,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &[u8],
) -> AccrualOutcome {
    match status {
        StatusCode::OK => classify_body(number, body),
        StatusCode::TOO_MANY_REQUESTS => AccrualOutcome::RateLimited { retry_after },
        s if s.is_server_error() => AccrualOutcome::ServerFault { status: s.as_u16() },
        s => AccrualOutcome::TransportError(format!("unexpected status {}", s)),
    }
}

fn classify_body(number: OrderNumber, body: &[u8]) -> AccrualOutcome {
    let response: AccrualResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(e) => return AccrualOutcome::TransportError(format!("malformed body: {}", e)),
    };

    if response.order.trim().parse::<i64>() != Ok(number.value()) {
        return AccrualOutcome::TransportError(format!(
            "response for order {:?} while querying {}",
            response.order, number
        ));
    }

    match response.status {
        AuthorityStatus::Registered | AuthorityStatus::Processing => AccrualOutcome::Pending,
        AuthorityStatus::Invalid => AccrualOutcome::Final(AccrualUpdate::invalid()),
        AuthorityStatus::Processed => {
            let accrual = response.accrual.unwrap_or(Decimal::ZERO);
            if accrual < Decimal::ZERO {
                return AccrualOutcome::TransportError(format!("negative accrual {}", accrual));
            }
            AccrualOutcome::Final(AccrualUpdate::processed(accrual))
        }
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn normalize_base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
