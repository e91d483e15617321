use crate::error::StoreError;
use async_trait::async_trait;
use model::pagination::{cursor::Cursor, page::ListPage};
use std::path::Path;

/// A remote object namespace with a paginated listing API.
///
/// Implementations must keep continuation tokens valid across calls so a
/// cursor persisted by one process can be resumed by the next.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Lists at most `max_keys` objects under `prefix`, starting at `cursor`.
    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        max_keys: usize,
    ) -> Result<ListPage, StoreError>;

    /// Downloads `key` into `dest`, returning the number of bytes written.
    async fn get_object(&self, key: &str, dest: &Path) -> Result<u64, StoreError>;

    /// Uploads the local file `src` under `key`, overwriting any existing object.
    async fn put_object(&self, src: &Path, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        (**self).list_page(prefix, cursor, max_keys).await
    }

    async fn get_object(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        (**self).get_object(key, dest).await
    }

    async fn put_object(&self, src: &Path, key: &str) -> Result<(), StoreError> {
        (**self).put_object(src, key).await
    }
}

/// Rejects keys that cannot be mapped onto a store namespace safely.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
