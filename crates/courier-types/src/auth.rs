use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims carried by the connection-time bearer credential.
///
/// Token issuance lives in the external auth service; the gateway only
/// verifies and reads these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}
