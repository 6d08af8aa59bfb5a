use std::sync::Mutex;
use tracing::debug;

use super::reference::PaymentReference;

/// Single-shot latch owned by one reconciliation flow.
///
/// The first `try_latch` wins and records its reference; every later call is
/// refused, whatever reference it carries. The check and the write happen
/// under the same lock.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    latched: Mutex<Option<String>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call latched the guard.
    pub fn try_latch(&self, reference: &PaymentReference) -> bool {
        let mut latched = match self.latched.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match latched.as_deref() {
            Some(existing) => {
                debug!(
                    latched = existing,
                    requested = reference.as_str(),
                    "reconciliation already latched; ignoring trigger"
                );
                false
            }
            None => {
                *latched = Some(reference.as_str().to_owned());
                true
            }
        }
    }

    pub fn latched(&self) -> Option<String> {
        match self.latched.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
