use async_trait::async_trait;

use super::{AcquisitionClient, ClientError, Placement};
use crate::storage::CachedPayload;

/// Stand-in used when no download client is configured.
///
/// Feeds are still fetched and filtered, but nothing is submitted and so
/// nothing is ever written to the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClient;

#[async_trait]
impl AcquisitionClient for NoopClient {
    fn client_type(&self) -> &'static str {
        "none"
    }

    fn supports_placement_submission(&self) -> bool {
        false
    }

    async fn add_payload(
        &self,
        _payload: &CachedPayload,
        _placement: &Placement,
    ) -> Result<(), ClientError> {
        Err(ClientError::Unsupported(self.client_type()))
    }
}
