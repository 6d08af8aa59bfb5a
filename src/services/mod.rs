// Order persistence with create-once semantics
pub mod orders;

// Gateway-facing checkout operations
pub mod payments;

// In-process adapter used by the callback handler
pub mod local_backend;

pub use local_backend::LocalOrderBackend;
pub use orders::{CreateOrderOutcome, OrderService};
pub use payments::{InitializePaymentRequest, InitializedPayment, PaymentService};
