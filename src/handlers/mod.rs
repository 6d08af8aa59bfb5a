pub mod callback;
pub mod orders;
pub mod payments;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Cookie carrying the checkout session id between checkout and callback.
pub const SESSION_COOKIE: &str = "checkout_session";
