//! Administrative connection verification.

use tracing::info;

use cask_store::StoreResult;

use crate::client::ObjectClient;

/// Prove the provider credentials work before a cloud store is created or
/// reconfigured.
///
/// On failure the provider's error message is propagated verbatim inside
/// [`StoreError::Connection`](cask_store::StoreError::Connection) so the
/// administrative surface can show it unchanged.
pub fn verify_connection(client: &dyn ObjectClient) -> StoreResult<()> {
    client.verify_connection()?;
    info!("cloud connection verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryObjectClient;
    use cask_store::StoreError;

    #[test]
    fn verified_when_the_provider_answers() {
        let client = InMemoryObjectClient::new();
        assert!(verify_connection(&client).is_ok());
    }

    #[test]
    fn provider_message_is_propagated_verbatim() {
        let client = InMemoryObjectClient::new();
        client.set_connection_failure(Some("SignatureDoesNotMatch (403)"));
        match verify_connection(&client) {
            Err(StoreError::Connection { message }) => {
                assert_eq!(message, "SignatureDoesNotMatch (403)");
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }
}
