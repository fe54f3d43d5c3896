//! Identity provider boundary.
//!
//! The engine never acquires tokens itself; the host supplies an
//! implementation over its sign-in flow and forwards sign-in/sign-out
//! transitions to [`crate::sync::SyncManager::handle_auth_change`]. Token
//! absence means "offline for sync purposes" — never an error.

pub trait IdentityProvider: Send + Sync {
    fn is_signed_in(&self) -> bool;

    /// Current bearer token, if any. `None` while signed out or between
    /// token refreshes.
    fn bearer_token(&self) -> Option<String>;
}
