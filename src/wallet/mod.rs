//! Caller wallet identity and its per-request context
//!
//! A wallet identity is resolved once per inbound request and made visible to
//! everything running on behalf of that request, and nothing else.

pub mod context;
pub mod identity;

pub use context::{ContextGuard, ContextToken, WalletContextStore};
pub use identity::{WalletIdentity, WalletIdentityError};
