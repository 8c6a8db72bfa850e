//! HTTP client for a remote ledger service
//!
//! Wire contract:
//! - `POST {base}/authorize` with `{"wallet", "amount"}`. A 200 returns
//!   `{"reservation": "<id>"}`, a 402 means insufficient funds (optionally
//!   `{"available": "<amount>"}`).
//! - `POST {base}/settle` with `{"wallet", "amount", "reservation", "authorized"}`.
//!   A 200 means done.
//!
//! Anything else, including network errors and timeouts, is reported as the
//! ledger being unavailable. Nothing is retried here.

use std::time::Duration;

use http::header::{HeaderValue, AUTHORIZATION};
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ledger::{Ledger, LedgerError, Reservation};
use super::MoneyAmount;
use crate::config::LedgerConfig;
use crate::wallet::WalletIdentity;

#[derive(Debug, Serialize)]
struct AuthorizeRequest<'a> {
    wallet: &'a WalletIdentity,
    amount: MoneyAmount,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    reservation: String,
}

#[derive(Debug, Default, Deserialize)]
struct InsufficientFundsResponse {
    #[serde(default)]
    available: Option<MoneyAmount>,
}

#[derive(Debug, Serialize)]
struct SettleRequest<'a> {
    wallet: &'a WalletIdentity,
    amount: MoneyAmount,
    reservation: &'a str,
    authorized: MoneyAmount,
}

/// Errors from LedgerClient HTTP operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Invalid API key: {source}")]
    InvalidApiKey {
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("Ledger URL not configured")]
    MissingLedgerUrl,
}

impl From<LedgerClientError> for LedgerError {
    fn from(err: LedgerClientError) -> Self {
        LedgerError::Unavailable(err.to_string())
    }
}

/// A client for a ledger service reachable over HTTP.
#[derive(Clone, Debug)]
pub struct LedgerClient {
    authorize_url: Url,
    settle_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl LedgerClient {
    pub fn try_new(base_url: Url) -> Result<Self, LedgerClientError> {
        let authorize_url = base_url.join("./authorize").map_err(|e| {
            LedgerClientError::UrlParse {
                context: "Failed to construct ./authorize URL",
                source: e,
            }
        })?;
        let settle_url = base_url.join("./settle").map_err(|e| {
            LedgerClientError::UrlParse {
                context: "Failed to construct ./settle URL",
                source: e,
            }
        })?;
        Ok(Self {
            authorize_url,
            settle_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Send `Authorization: Bearer <key>` with every call
    pub fn with_api_key(mut self, key: &str) -> Result<Self, LedgerClientError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|source| LedgerClientError::InvalidApiKey { source })?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    async fn post<T>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<reqwest::Response, LedgerClientError>
    where
        T: Serialize + ?Sized,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req.send()
            .await
            .map_err(|source| LedgerClientError::Http { context, source })
    }
}

/// Status and body of a non-success response, for error reporting
async fn unexpected_status(response: reqwest::Response, context: &'static str) -> LedgerClientError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
    LedgerClientError::HttpStatus {
        context,
        status,
        body,
    }
}

impl Ledger for LedgerClient {
    async fn authorize(
        &self,
        wallet: &WalletIdentity,
        amount: MoneyAmount,
    ) -> Result<Reservation, LedgerError> {
        const CONTEXT: &str = "POST /authorize";

        let response = self
            .post(&self.authorize_url, CONTEXT, &AuthorizeRequest { wallet, amount })
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body: AuthorizeResponse = response.json().await.map_err(|source| {
                    LedgerClientError::JsonDeserialization {
                        context: CONTEXT,
                        source,
                    }
                })?;
                Ok(Reservation {
                    id: body.reservation,
                    wallet: wallet.clone(),
                    amount,
                })
            }
            StatusCode::PAYMENT_REQUIRED => {
                // The body is advisory; a 402 without one is still a denial.
                let body: InsufficientFundsResponse = response.json().await.unwrap_or_default();
                Err(LedgerError::InsufficientFunds {
                    required: amount,
                    available: body.available,
                })
            }
            _ => Err(unexpected_status(response, CONTEXT).await.into()),
        }
    }

    async fn settle(
        &self,
        wallet: &WalletIdentity,
        actual: MoneyAmount,
        reservation: Reservation,
    ) -> Result<(), LedgerError> {
        const CONTEXT: &str = "POST /settle";

        let payload = SettleRequest {
            wallet,
            amount: actual,
            reservation: &reservation.id,
            authorized: reservation.amount,
        };
        let response = self.post(&self.settle_url, CONTEXT, &payload).await?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(unexpected_status(response, CONTEXT).await.into())
        }
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}

// ============================================================================
// Conversion Implementations
// ============================================================================

/// Create LedgerClient from a base URL string
impl TryFrom<&str> for LedgerClient {
    type Error = LedgerClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| LedgerClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        LedgerClient::try_new(url)
    }
}

impl TryFrom<&LedgerConfig> for LedgerClient {
    type Error = LedgerClientError;

    fn try_from(config: &LedgerConfig) -> Result<Self, Self::Error> {
        let url = config
            .url
            .as_deref()
            .ok_or(LedgerClientError::MissingLedgerUrl)?;

        let mut client = LedgerClient::try_from(url)?;
        if let Some(key) = &config.api_key {
            client = client.with_api_key(key)?;
        }
        if let Some(secs) = config.timeout_secs {
            client = client.with_timeout(Duration::from_secs(secs));
        }
        Ok(client)
    }
}
