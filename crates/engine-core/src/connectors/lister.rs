use crate::filter::AdmissionFilter;
use connectors::{error::StoreError, store::ObjectStore};
use model::pagination::{cursor::Cursor, page::ListPage};
use std::sync::Arc;
use tracing::info;

/// Threads a source prefix and page size through repeated listing calls.
#[derive(Clone)]
pub struct RemoteLister {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    page_size: usize,
}

impl RemoteLister {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, page_size: usize) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub async fn list_page(&self, cursor: &Cursor) -> Result<ListPage, StoreError> {
        self.store
            .list_page(&self.prefix, cursor, self.page_size)
            .await
    }

    /// Walks the whole listing and counts admissible objects.
    pub async fn count(&self, filter: &AdmissionFilter) -> Result<u64, StoreError> {
        let mut cursor = Cursor::Start;
        let mut pages = 0u64;
        let mut admissible = 0u64;

        loop {
            let page = self.list_page(&cursor).await?;
            pages += 1;
            admissible += page.entries.iter().filter(|e| filter.admits(&e.key)).count() as u64;

            match page.next_token {
                Some(token) => cursor = Cursor::Token(token),
                None => break,
            }
        }

        info!(prefix = %self.prefix, pages, admissible, "Counted remote objects");
        Ok(admissible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::local::LocalObjectStore;
    use tempfile::tempdir;

    async fn bucket(keys: &[&str]) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for key in keys {
            let path = dir.path().join(key);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, b"x").await.unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn count_walks_every_page_and_filters() {
        let dir = bucket(&["in/1.wav", "in/2.WAV", "in/3.txt", "in/4.wav", "out/5.wav"]).await;
        let lister = RemoteLister::new(Arc::new(LocalObjectStore::new(dir.path())), "", 2);
        let filter = AdmissionFilter::new([".wav"], ["out/"]);

        assert_eq!(lister.count(&filter).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_page_keeps_prefix_and_page_size() {
        let dir = bucket(&["in/1.wav", "in/2.wav", "in/3.wav", "skip/4.wav"]).await;
        let lister = RemoteLister::new(Arc::new(LocalObjectStore::new(dir.path())), "in/", 0);
        assert_eq!(lister.page_size(), 1);

        let page = lister.list_page(&Cursor::Start).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.entries[0].key, "in/1.wav");
        assert!(!page.is_last());
    }
}
