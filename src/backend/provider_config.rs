//! Persistence of the provider configuration.

use crate::provider::ProviderConfig;
use crate::Result;

use super::storage::Storage;

/// Storage key of the provider configuration
pub const CONFIG_KEY: &str = "config";

/// Read the stored provider configuration, if any
pub async fn load(storage: &dyn Storage) -> Result<Option<ProviderConfig>> {
    match storage.get(CONFIG_KEY).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Replace the stored provider configuration
pub async fn save(storage: &dyn Storage, config: &ProviderConfig) -> Result<()> {
    storage.put(CONFIG_KEY, serde_json::to_vec(config)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::InMemoryStorage;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let storage = InMemoryStorage::new();
        assert!(load(&storage).await.unwrap().is_none());

        let config = ProviderConfig {
            issuer: "https://idp.example".to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
        };
        save(&storage, &config).await.unwrap();

        assert_eq!(load(&storage).await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn corrupt_entry_is_an_error() {
        let storage = InMemoryStorage::new();
        storage.put(CONFIG_KEY, b"not json".to_vec()).await.unwrap();

        assert!(load(&storage).await.is_err());
    }
}
