use crate::{
    error::StoreError,
    store::{ObjectStore, validate_key},
};
use async_trait::async_trait;
use model::pagination::{
    cursor::Cursor,
    page::{ListPage, ObjectEntry},
};
use std::path::{Path, PathBuf};
use tokio::{fs, io};
use tracing::debug;

/// A directory that stands in for a bucket.
///
/// Keys are `/`-joined paths relative to the root. Listings are returned in
/// lexicographic key order and the continuation token is the last key of the
/// previous page, so a token stays valid for as long as that key sorts the
/// same way.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(key
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part)))
    }

    async fn walk(&self) -> Result<Vec<ObjectEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == io::ErrorKind::NotFound && dir == self.root => {
                    return Err(StoreError::Config(format!(
                        "store root {} does not exist",
                        self.root.display()
                    )));
                }
                Err(e) => return Err(StoreError::Io(e)),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if file_type.is_file() {
                    let size = entry.metadata().await?.len();
                    entries.push(ObjectEntry { key, size });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        if max_keys == 0 {
            return Err(StoreError::Config("max_keys must be positive".to_string()));
        }

        let after = cursor.token();
        let mut remaining = self
            .walk()
            .await?
            .into_iter()
            .filter(|e| e.key.starts_with(prefix))
            .filter(|e| after.is_none_or(|t| e.key.as_str() > t))
            .peekable();

        let entries: Vec<ObjectEntry> = remaining.by_ref().take(max_keys).collect();
        let next_token = match (remaining.peek(), entries.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };

        debug!(
            store = self.name(),
            prefix,
            cursor = %cursor,
            listed = entries.len(),
            has_more = next_token.is_some(),
            "Listed page"
        );

        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn get_object(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        let src = self.path_for(key)?;
        let mut reader = match fs::File::open(&src).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut writer = fs::File::create(dest)
            .await
            .map_err(|e| StoreError::local(dest, e))?;
        let written = io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| StoreError::local(dest, e))?;
        writer
            .sync_all()
            .await
            .map_err(|e| StoreError::local(dest, e))?;

        Ok(written)
    }

    async fn put_object(&self, src: &Path, key: &str) -> Result<(), StoreError> {
        let dest = self.path_for(key)?;
        let mut reader = fs::File::open(src)
            .await
            .map_err(|e| StoreError::local(src, e))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut writer = fs::File::create(&dest).await?;
        io::copy(&mut reader, &mut writer).await?;
        writer.sync_all().await?;
        Ok(())
    }
}
