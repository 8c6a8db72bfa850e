//! Request-scoped wallet context
//!
//! Each inbound request gets a [`ContextToken`] that lives in tokio task-local
//! storage for the duration of that request's future. The store maps tokens
//! to wallet identities, so `resolve()` only ever sees the identity installed
//! by the request it is running inside of.
//!
//! Entries are released by [`ContextGuard`] on drop. That covers normal
//! completion, errors, panics (unwinding drops the guard) and cancellation
//! (the future being dropped when a client disconnects).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::WalletIdentity;

tokio::task_local! {
    static CURRENT: ContextToken;
}

/// Tokens are unique across every store in the process, so a token scoped by
/// one store can never alias an entry in another.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Handle for one installed request context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(u64);

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Process-wide store of in-flight request contexts.
///
/// Cheap to clone; clones share the same entries. The lock is only held for
/// a map lookup or update, never across an await point.
#[derive(Clone, Default)]
pub struct WalletContextStore {
    entries: Arc<RwLock<HashMap<ContextToken, WalletIdentity>>>,
}

impl fmt::Debug for WalletContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletContextStore")
            .field("live", &self.len())
            .finish()
    }
}

impl WalletContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a token for a new request and record its identity.
    ///
    /// An absent identity still gets a token: the request runs scoped, and
    /// `resolve()` inside it reports absent.
    pub fn install(&self, identity: Option<WalletIdentity>) -> ContextToken {
        let token = ContextToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        match identity {
            Some(identity) => {
                tracing::trace!(%token, wallet = %identity, "wallet context installed");
                self.write().insert(token, identity);
            }
            None => tracing::trace!(%token, "anonymous context installed"),
        }
        token
    }

    /// Identity of the request the caller is running inside of, if any
    pub fn resolve(&self) -> Option<WalletIdentity> {
        let token = Self::current_token()?;
        self.read().get(&token).cloned()
    }

    /// Remove a context. Returns `false` if it was already gone.
    pub fn remove(&self, token: ContextToken) -> bool {
        let removed = self.write().remove(&token).is_some();
        if removed {
            tracing::trace!(%token, "wallet context removed");
        }
        removed
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Guard that removes `token` when dropped
    pub fn guard(&self, token: ContextToken) -> ContextGuard {
        ContextGuard {
            store: self.clone(),
            token,
        }
    }

    /// Run `fut` as one request carrying `identity`.
    ///
    /// The context is installed before `fut` is first polled and removed on
    /// every exit path, including when the returned future is dropped early.
    pub async fn run<F>(&self, identity: Option<WalletIdentity>, fut: F) -> F::Output
    where
        F: Future,
    {
        let token = self.install(identity);
        let _guard = self.guard(token);
        Self::scope(token, fut).await
    }

    /// Run `fut` with `token` as the current request
    pub fn scope<F>(token: ContextToken, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        CURRENT.scope(token, fut)
    }

    /// Token of the enclosing request, if the caller runs inside one
    pub fn current_token() -> Option<ContextToken> {
        CURRENT.try_with(|token| *token).ok()
    }

    /// Bind `fut` to the enclosing request before it is handed to
    /// `tokio::spawn`. Task-locals do not cross spawn boundaries on their own.
    ///
    /// The token is captured here, at call time, not when `fut` first runs.
    pub fn inherit<F>(fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let token = Self::current_token();
        async move {
            match token {
                Some(token) => CURRENT.scope(token, fut).await,
                None => fut.await,
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ContextToken, WalletIdentity>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ContextToken, WalletIdentity>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its context from the store on drop
#[must_use = "the context is removed as soon as the guard is dropped"]
pub struct ContextGuard {
    store: WalletContextStore,
    token: ContextToken,
}

impl ContextGuard {
    pub fn token(&self) -> ContextToken {
        self.token
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.store.remove(self.token);
    }
}
