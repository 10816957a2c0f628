//! Session- and file-level cancellation.
//!
//! Every in-flight network operation registers a [`CancellationToken`]
//! keyed by `(scope, op)`. All tokens are children of one session root
//! token, so cancelling the session aborts every operation at once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Who an operation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenScope {
    /// Session-wide operations (the initiate call).
    Session,
    File(String),
}

/// Which operation within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    Initiate,
    Part(usize),
    Complete,
}

type TokenKey = (TokenScope, OpTag);

struct RegistryInner {
    cancelled_all: bool,
    cancelled_files: HashSet<String>,
    tokens: HashMap<TokenKey, (u64, CancellationToken)>,
    next_generation: u64,
}

/// Tracks cancellation state and the live tokens of in-flight operations.
pub struct CancellationRegistry {
    root: CancellationToken,
    inner: Mutex<RegistryInner>,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            inner: Mutex::new(RegistryInner {
                cancelled_all: false,
                cancelled_files: HashSet::new(),
                tokens: HashMap::new(),
                next_generation: 0,
            }),
        }
    }

    /// Registers a token for one operation and returns it.
    ///
    /// If the scope is already cancelled the token is returned cancelled.
    /// An unreleased token under the same key is replaced.
    pub fn register_token(&self, scope: TokenScope, op: OpTag) -> CancellationToken {
        self.register(scope, op).1
    }

    /// Registers a token that is released when the guard drops.
    pub fn guard(self: &Arc<Self>, scope: TokenScope, op: OpTag) -> TokenGuard {
        let (generation, token) = self.register(scope.clone(), op);
        TokenGuard {
            registry: Arc::clone(self),
            key: (scope, op),
            generation,
            token,
        }
    }

    fn register(&self, scope: TokenScope, op: OpTag) -> (u64, CancellationToken) {
        let token = self.root.child_token();
        let mut inner = self.inner.lock().unwrap();

        let already_cancelled = match &scope {
            TokenScope::Session => inner.cancelled_all,
            TokenScope::File(name) => inner.cancelled_all || inner.cancelled_files.contains(name),
        };
        if already_cancelled {
            token.cancel();
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        if inner
            .tokens
            .insert((scope.clone(), op), (generation, token.clone()))
            .is_some()
        {
            warn!(?scope, ?op, "replacing unreleased cancel token");
        }
        (generation, token)
    }

    /// Removes the token for `(scope, op)`. No-op if absent.
    pub fn release_token(&self, scope: &TokenScope, op: OpTag) {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens.remove(&(scope.clone(), op));
    }

    fn release_generation(&self, key: &TokenKey, generation: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.tokens.get(key).is_some_and(|(g, _)| *g == generation) {
            inner.tokens.remove(key);
        }
    }

    /// Marks `name` cancelled and aborts its in-flight operations.
    pub fn cancel_file(&self, name: &str) {
        let aborted: Vec<CancellationToken> = {
            let mut inner = self.inner.lock().unwrap();
            inner.cancelled_files.insert(name.to_string());
            let keys: Vec<TokenKey> = inner
                .tokens
                .keys()
                .filter(|(scope, _)| matches!(scope, TokenScope::File(f) if f == name))
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|k| inner.tokens.remove(k).map(|(_, t)| t))
                .collect()
        };
        info!(file = %name, in_flight = aborted.len(), "cancelling file");
        for token in aborted {
            token.cancel();
        }
    }

    /// Cancels the whole session: every registered token and every future one.
    pub fn cancel_all(&self) {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            inner.cancelled_all = true;
            let count = inner.tokens.len();
            inner.tokens.clear();
            count
        };
        info!(in_flight = count, "cancelling session");
        self.root.cancel();
    }

    /// `true` if the session or this file has been cancelled.
    pub fn is_cancelled(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.cancelled_all || inner.cancelled_files.contains(name)
    }

    pub fn is_session_cancelled(&self) -> bool {
        self.inner.lock().unwrap().cancelled_all
    }

    /// Number of currently registered tokens.
    pub fn active_tokens(&self) -> usize {
        self.inner.lock().unwrap().tokens.len()
    }
}

/// Live token of one operation; releases its registry entry on drop.
pub struct TokenGuard {
    registry: Arc<CancellationRegistry>,
    key: TokenKey,
    generation: u64,
    token: CancellationToken,
}

impl TokenGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        debug!(scope = ?self.key.0, op = ?self.key.1, "releasing cancel token");
        self.registry.release_generation(&self.key, self.generation);
    }
}

/// Cloneable handle for cancelling a running session from elsewhere.
#[derive(Clone)]
pub struct CancelHandle {
    registry: Arc<CancellationRegistry>,
}

impl CancelHandle {
    pub(crate) fn new(registry: Arc<CancellationRegistry>) -> Self {
        Self { registry }
    }

    /// Stops the remaining parts and the complete call of one file.
    pub fn cancel_file(&self, name: &str) {
        self.registry.cancel_file(name);
    }

    /// Aborts all in-flight operations and prevents new ones.
    pub fn cancel_all(&self) {
        self.registry.cancel_all();
    }

    pub fn is_cancelled(&self, name: &str) -> bool {
        self.registry.is_cancelled(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> TokenScope {
        TokenScope::File(name.into())
    }

    #[test]
    fn register_and_release() {
        let reg = CancellationRegistry::new();
        let token = reg.register_token(file("a"), OpTag::Part(0));
        assert!(!token.is_cancelled());
        assert_eq!(reg.active_tokens(), 1);

        reg.release_token(&file("a"), OpTag::Part(0));
        assert_eq!(reg.active_tokens(), 0);
        // Releasing again is a no-op.
        reg.release_token(&file("a"), OpTag::Part(0));
    }

    #[test]
    fn cancel_file_aborts_only_that_file() {
        let reg = CancellationRegistry::new();
        let a0 = reg.register_token(file("a"), OpTag::Part(0));
        let a_complete = reg.register_token(file("a"), OpTag::Complete);
        let b0 = reg.register_token(file("b"), OpTag::Part(0));

        reg.cancel_file("a");

        assert!(a0.is_cancelled());
        assert!(a_complete.is_cancelled());
        assert!(!b0.is_cancelled());
        assert!(reg.is_cancelled("a"));
        assert!(!reg.is_cancelled("b"));
        // Only b's token remains registered.
        assert_eq!(reg.active_tokens(), 1);
    }

    #[test]
    fn cancel_all_aborts_everything() {
        let reg = CancellationRegistry::new();
        let init = reg.register_token(TokenScope::Session, OpTag::Initiate);
        let a0 = reg.register_token(file("a"), OpTag::Part(0));

        reg.cancel_all();

        assert!(init.is_cancelled());
        assert!(a0.is_cancelled());
        assert!(reg.is_cancelled("a"));
        assert!(reg.is_cancelled("never-seen"));
        assert!(reg.is_session_cancelled());
        assert_eq!(reg.active_tokens(), 0);
    }

    #[test]
    fn tokens_registered_after_cancel_start_cancelled() {
        let reg = CancellationRegistry::new();
        reg.cancel_file("a");
        assert!(reg.register_token(file("a"), OpTag::Part(3)).is_cancelled());
        assert!(!reg.register_token(file("b"), OpTag::Part(0)).is_cancelled());

        reg.cancel_all();
        assert!(
            reg.register_token(TokenScope::Session, OpTag::Initiate)
                .is_cancelled()
        );
    }

    #[test]
    fn guard_releases_on_drop() {
        let reg = Arc::new(CancellationRegistry::new());
        {
            let guard = reg.guard(file("a"), OpTag::Part(1));
            assert!(!guard.token().is_cancelled());
            assert_eq!(reg.active_tokens(), 1);
        }
        assert_eq!(reg.active_tokens(), 0);
    }

    #[test]
    fn stale_guard_does_not_release_replacement() {
        let reg = Arc::new(CancellationRegistry::new());
        let old = reg.guard(file("a"), OpTag::Complete);
        let replacement = reg.guard(file("a"), OpTag::Complete);
        drop(old);
        assert_eq!(reg.active_tokens(), 1);

        reg.cancel_file("a");
        assert!(replacement.token().is_cancelled());
    }

    #[test]
    fn handle_shares_registry() {
        let reg = Arc::new(CancellationRegistry::new());
        let handle = CancelHandle::new(Arc::clone(&reg));
        let token = reg.register_token(file("x"), OpTag::Part(0));

        handle.clone().cancel_file("x");
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled("x"));
    }

    #[test]
    fn concurrent_register_and_cancel() {
        let reg = Arc::new(CancellationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let name = format!("f{}", t % 2);
                    for i in 0..200 {
                        let token =
                            reg.register_token(TokenScope::File(name.clone()), OpTag::Part(i));
                        if i % 50 == 0 {
                            reg.cancel_file(&name);
                        }
                        reg.release_token(&TokenScope::File(name.clone()), OpTag::Part(i));
                        drop(token);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.active_tokens(), 0);
        assert!(reg.is_cancelled("f0"));
        assert!(reg.is_cancelled("f1"));
    }
}
