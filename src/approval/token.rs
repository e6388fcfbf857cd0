use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::AppError;
use crate::store::RecordStore;

/// 256 bits from the OS CSPRNG.
const TOKEN_BYTES: usize = 32;
const MAX_ATTEMPTS: usize = 5;

/// Issues one-time approval tokens that are not live on any other record.
#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn RecordStore>,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Generate a token for `project_id`. The caller persists it.
    pub async fn issue(&self, project_id: &str) -> Result<String, AppError> {
        for attempt in 0..MAX_ATTEMPTS {
            let token = generate_token();
            if !self.store.token_exists(&token).await? {
                return Ok(token);
            }
            tracing::warn!(project_id, attempt, "approval token collision, regenerating");
        }
        Err(AppError::Internal(format!(
            "could not issue a unique approval token for {} after {} attempts",
            project_id, MAX_ATTEMPTS
        )))
    }
}

/// URL-safe base64 (no padding) of `TOKEN_BYTES` random bytes.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
