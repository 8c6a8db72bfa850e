//! Request adapter
//!
//! Binds the caller's wallet to the request before the MCP handler runs.
//! The wallet comes from the configured header, or when that header is absent
//! from the payer of an x402 `X-Payment` header. A request without either goes
//! through; the payment gate refuses its tool calls as unauthenticated.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use serde::Deserialize;

use super::AppState;
use crate::wallet::WalletIdentity;

pub const X_PAYMENT: &str = "x-payment";

/// The part of an x402 payment payload that names the payer
#[derive(Deserialize)]
struct PaymentEnvelope {
    payload: PaymentBody,
}

#[derive(Deserialize)]
struct PaymentBody {
    authorization: Authorization,
}

#[derive(Deserialize)]
struct Authorization {
    from: String,
}

/// Wallet presented with a request, if any.
///
/// `X-Payment` is only consulted when the wallet header is absent. A wallet
/// header that is present but malformed yields no wallet at all.
pub fn extract_wallet(headers: &HeaderMap, wallet_header: &HeaderName) -> Option<WalletIdentity> {
    match headers.get(wallet_header) {
        Some(value) => header_wallet(value, wallet_header),
        None => payment_wallet(headers),
    }
}

fn header_wallet(value: &HeaderValue, wallet_header: &HeaderName) -> Option<WalletIdentity> {
    let parsed = value
        .to_str()
        .map_err(|e| e.to_string())
        .and_then(|raw| WalletIdentity::parse(raw).map_err(|e| e.to_string()));
    match parsed {
        Ok(wallet) => Some(wallet),
        Err(error) => {
            tracing::debug!(header = %wallet_header, %error, "malformed wallet header, request has no wallet");
            None
        }
    }
}

fn payment_wallet(headers: &HeaderMap) -> Option<WalletIdentity> {
    let header = headers.get(X_PAYMENT)?.to_str().ok()?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header.trim())
        .ok()?;
    let envelope: PaymentEnvelope = serde_json::from_slice(&bytes).ok()?;
    WalletIdentity::parse(&envelope.payload.authorization.from).ok()
}

/// Middleware running the rest of the request inside its own wallet context
pub async fn wallet_scope(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let wallet = extract_wallet(request.headers(), &state.wallet_header);
    match &wallet {
        Some(wallet) => tracing::debug!(%wallet, "wallet presented"),
        None => tracing::debug!("no wallet presented"),
    }

    state.wallets.run(wallet, next.run(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header() -> HeaderName {
        HeaderName::from_static("x-agent-wallet")
    }

    fn x_payment(from: &str) -> HeaderValue {
        let payload = json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "base-sepolia",
            "payload": {
                "signature": "0x00",
                "authorization": { "from": from, "to": "0x0000000000000000000000000000000000000001", "value": "100" }
            }
        });
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload.to_string());
        HeaderValue::from_str(&encoded).unwrap()
    }

    #[test]
    fn test_wallet_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-agent-wallet", HeaderValue::from_static("alice"));
        headers.insert(X_PAYMENT, x_payment("0x1111111111111111111111111111111111111111"));

        let wallet = extract_wallet(&headers, &header()).unwrap();
        assert_eq!(wallet.as_str(), "alice");
    }

    #[test]
    fn test_x_payment_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(X_PAYMENT, x_payment("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));

        let wallet = extract_wallet(&headers, &header()).unwrap();
        assert_eq!(wallet.as_str(), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    }

    #[test]
    fn test_malformed_headers_mean_no_wallet() {
        let mut headers = HeaderMap::new();
        assert!(extract_wallet(&headers, &header()).is_none());

        headers.insert("x-agent-wallet", HeaderValue::from_static("two words"));
        headers.insert(X_PAYMENT, HeaderValue::from_static("not base64!"));
        assert!(extract_wallet(&headers, &header()).is_none());

        let mut headers = HeaderMap::new();
        let no_payer = base64::engine::general_purpose::STANDARD.encode(r#"{"payload":{}}"#);
        headers.insert(X_PAYMENT, HeaderValue::from_str(&no_payer).unwrap());
        assert!(extract_wallet(&headers, &header()).is_none());
    }

    #[test]
    fn test_malformed_wallet_header_does_not_fall_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-agent-wallet", HeaderValue::from_static("two words"));
        headers.insert(X_PAYMENT, x_payment("0x1111111111111111111111111111111111111111"));

        assert!(extract_wallet(&headers, &header()).is_none());
    }

    #[test]
    fn test_custom_header_name() {
        let mut headers = HeaderMap::new();
        headers.insert("x-agent-wallet", HeaderValue::from_static("alice"));
        headers.insert("x-wallet", HeaderValue::from_static("bob"));

        let custom = HeaderName::from_static("x-wallet");
        assert_eq!(extract_wallet(&headers, &custom).unwrap().as_str(), "bob");
    }
}
