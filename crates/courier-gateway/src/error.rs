use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy for the gateway.
///
/// None of these propagate out of the event loop: `Unauthenticated` refuses
/// the connection before it registers, the rest are logged per event and the
/// connection keeps running.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection credential was missing, expired, or invalid.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Inbound event failed validation; the event is dropped.
    #[error("invalid event payload: {0}")]
    Validation(String),

    /// A side-effect write failed. The broadcast it rode with is not rolled
    /// back and there is no retry.
    #[error("side-effect persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Intended recipient had no live connection. The durable notification
    /// record is the only trace.
    #[error("no live connection for recipient {0}")]
    DeliveryGap(Uuid),
}
