//! Callback envelopes and their delivery.

mod dispatcher;
mod envelope;

pub use dispatcher::{CallbackDispatcher, DeliveryOutcome, IDEMPOTENCY_HEADER};
pub use envelope::{CallbackEnvelope, ContentBundle, EnvelopeStatus};
