use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::domain::{
    CopyNumberSegment, DataSet, DataSource, ExpressionValue, Gene, Mutation, Sample,
};
use crate::error::ImportError;
use crate::identity::checksum_bytes;
use crate::repository::{Entity, Repositories, Repository};

pub const DEFAULT_STORE_DIR: &str = ".kira-import";
const UNOWNED_SHARD: &str = "_";

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    /// Store at `.kira-import` in the working directory.
    pub fn new() -> Result<Self, ImportError> {
        let cwd = std::env::current_dir().map_err(fs_error)?;
        Self::at(cwd.join(DEFAULT_STORE_DIR))
    }

    pub fn at(root: impl Into<PathBuf>) -> Result<Self, ImportError> {
        let root = Utf8PathBuf::from_path_buf(root.into()).map_err(|path| {
            ImportError::Filesystem(format!("invalid store path {}", path.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn collection_dir(&self, collection: &str) -> Utf8PathBuf {
        self.root.join(collection)
    }

    pub fn ensure_root(&self) -> Result<(), ImportError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(fs_error)
    }

    /// One [`JsonRepository`] per persisted type.
    pub fn repositories(&self) -> Result<Repositories, ImportError> {
        self.ensure_root()?;
        Ok(Repositories {
            data_sets: Arc::new(JsonRepository::<DataSet>::new(self.clone())),
            data_sources: Arc::new(JsonRepository::<DataSource>::new(self.clone())),
            genes: Arc::new(JsonRepository::<Gene>::new(self.clone())),
            samples: Arc::new(JsonRepository::<Sample>::new(self.clone())),
            mutations: Arc::new(JsonRepository::<Mutation>::new(self.clone())),
            expression: Arc::new(JsonRepository::<ExpressionValue>::new(self.clone())),
            copy_number: Arc::new(JsonRepository::<CopyNumberSegment>::new(self.clone())),
        })
    }

    /// Writes `value` next to `path` first and renames it into place.
    pub fn write_json_atomic<T: Serialize>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), ImportError> {
        let parent = path
            .parent()
            .ok_or_else(|| ImportError::Filesystem(format!("invalid destination {path}")))?;
        fs::create_dir_all(parent.as_std_path()).map_err(fs_error)?;
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| ImportError::Persistence(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".kira-import")
            .suffix(".tmp")
            .tempfile_in(parent.as_std_path())
            .map_err(fs_error)?;
        fs::write(temp.path(), &content).map_err(fs_error)?;
        temp.persist(path.as_std_path())
            .map_err(|err| ImportError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ImportError> {
        let content = fs::read(path).map_err(fs_error)?;
        serde_json::from_slice(&content).map_err(|err| {
            ImportError::Persistence(format!("corrupt document {}: {err}", path.display()))
        })
    }
}

/// One JSON document per entity at `<root>/<collection>/<shard>/<md5(key)>.json`,
/// sharded by owning data source (`_` when unowned).
pub struct JsonRepository<T> {
    store: Store,
    lock: Mutex<()>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> JsonRepository<T> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            _entity: PhantomData,
        }
    }

    fn collection(&self) -> Utf8PathBuf {
        self.store.collection_dir(T::COLLECTION)
    }

    fn shard_dir(&self, owner: Option<&str>) -> Utf8PathBuf {
        self.collection().join(shard_name(owner))
    }

    fn document_path(&self, entity: &T) -> Utf8PathBuf {
        self.shard_dir(entity.data_source_id())
            .join(document_name(&entity.stable_key()))
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>, ImportError> {
        self.lock
            .lock()
            .map_err(|_| ImportError::Persistence("repository lock poisoned".to_string()))
    }

    fn shards(&self) -> Result<Vec<PathBuf>, ImportError> {
        let collection = self.collection();
        if !collection.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut shards = Vec::new();
        for entry in fs::read_dir(collection.as_std_path()).map_err(fs_error)? {
            let path = entry.map_err(fs_error)?.path();
            if path.is_dir() {
                shards.push(path);
            }
        }
        shards.sort();
        Ok(shards)
    }

    /// Locates the document for `key` in any shard.
    fn locate(&self, key: &str) -> Result<Option<PathBuf>, ImportError> {
        let name = document_name(key);
        for shard in self.shards()? {
            let candidate = shard.join(&name);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl<T> Repository<T> for JsonRepository<T>
where
    T: Entity + Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn find_by_stable_key(&self, key: &str) -> Result<Option<T>, ImportError> {
        match self.locate(key)? {
            Some(path) => Store::read_json(&path).map(Some),
            None => Ok(None),
        }
    }

    fn insert(&self, entity: T) -> Result<T, ImportError> {
        let _guard = self.guard()?;
        let key = entity.stable_key();
        if self.locate(&key)?.is_some() {
            return Err(ImportError::Persistence(format!(
                "{}: duplicate key {key}",
                T::COLLECTION
            )));
        }
        Store::write_json_atomic(&self.document_path(&entity), &entity)?;
        Ok(entity)
    }

    fn update(&self, entity: T) -> Result<T, ImportError> {
        let _guard = self.guard()?;
        let key = entity.stable_key();
        let previous = self.locate(&key)?.ok_or_else(|| {
            ImportError::Persistence(format!("{}: no entity with key {key}", T::COLLECTION))
        })?;
        let target = self.document_path(&entity);
        Store::write_json_atomic(&target, &entity)?;
        if previous != target.as_std_path() {
            fs::remove_file(&previous).map_err(fs_error)?;
        }
        Ok(entity)
    }

    fn delete(&self, entity: &T) -> Result<(), ImportError> {
        let _guard = self.guard()?;
        if let Some(path) = self.locate(&entity.stable_key())? {
            fs::remove_file(&path).map_err(fs_error)?;
        }
        Ok(())
    }

    fn delete_by_data_source_id(&self, id: &str) -> Result<usize, ImportError> {
        let _guard = self.guard()?;
        let shard = self.shard_dir(Some(id));
        if !shard.as_std_path().exists() {
            return Ok(0);
        }
        let removed = json_documents(shard.as_std_path())?.len();
        fs::remove_dir_all(shard.as_std_path()).map_err(fs_error)?;
        Ok(removed)
    }

    fn find_all(&self) -> Result<Vec<T>, ImportError> {
        let mut entities = Vec::new();
        for shard in self.shards()? {
            for path in json_documents(&shard)? {
                entities.push(Store::read_json(&path)?);
            }
        }
        Ok(entities)
    }
}

fn json_documents(dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
    let mut documents = Vec::new();
    for entry in fs::read_dir(dir).map_err(fs_error)? {
        let path = entry.map_err(fs_error)?.path();
        if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

/// Data source ids are UUIDs and used verbatim; anything else is hashed.
fn shard_name(owner: Option<&str>) -> String {
    match owner {
        None => UNOWNED_SHARD.to_string(),
        Some(id)
            if !id.is_empty()
                && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') =>
        {
            id.to_string()
        }
        Some(id) => checksum_bytes(id.as_bytes()),
    }
}

fn document_name(key: &str) -> String {
    format!("{}.json", checksum_bytes(key.as_bytes()))
}

fn fs_error(err: std::io::Error) -> ImportError {
    ImportError::Filesystem(err.to_string())
}
