use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{
    CopyNumberSegment, DataSet, DataSource, ExpressionValue, Gene, Mutation, Sample,
};
use crate::error::ImportError;
use crate::model::scoped_key;

/// A persisted type with a unique stable key.
pub trait Entity {
    /// Directory / collection name used by storage adapters.
    const COLLECTION: &'static str;

    fn stable_key(&self) -> String;

    /// Owning data source, if the entity was produced by an import.
    fn data_source_id(&self) -> Option<&str> {
        None
    }
}

pub trait Repository<T>: Send + Sync {
    fn find_by_stable_key(&self, key: &str) -> Result<Option<T>, ImportError>;

    /// Inserts a new entity; an existing key is an error.
    fn insert(&self, entity: T) -> Result<T, ImportError>;

    fn insert_all(&self, entities: Vec<T>) -> Result<usize, ImportError> {
        let count = entities.len();
        for entity in entities {
            self.insert(entity)?;
        }
        Ok(count)
    }

    /// Replaces an existing entity; a missing key is an error.
    fn update(&self, entity: T) -> Result<T, ImportError>;

    fn delete(&self, entity: &T) -> Result<(), ImportError>;

    /// Removes every entity owned by the data source, returning the count.
    fn delete_by_data_source_id(&self, id: &str) -> Result<usize, ImportError>;

    fn find_all(&self) -> Result<Vec<T>, ImportError>;
}

/// Lookups are scoped to the data set being imported.
pub trait ForeignKeyResolver: Send + Sync {
    fn find_sample_id(
        &self,
        data_set: &str,
        natural_key: &str,
    ) -> Result<Option<String>, ImportError>;

    /// Exact gene id lookup.
    fn find_gene_id(
        &self,
        data_set: &str,
        natural_key: &str,
    ) -> Result<Option<String>, ImportError>;

    /// Lowercased symbol to gene id for every gene of the data set.
    fn gene_symbols(&self, data_set: &str) -> Result<HashMap<String, String>, ImportError>;
}

/// One repository per persisted type.
#[derive(Clone)]
pub struct Repositories {
    pub data_sets: Arc<dyn Repository<DataSet>>,
    pub data_sources: Arc<dyn Repository<DataSource>>,
    pub genes: Arc<dyn Repository<Gene>>,
    pub samples: Arc<dyn Repository<Sample>>,
    pub mutations: Arc<dyn Repository<Mutation>>,
    pub expression: Arc<dyn Repository<ExpressionValue>>,
    pub copy_number: Arc<dyn Repository<CopyNumberSegment>>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            data_sets: Arc::new(MemoryRepository::<DataSet>::new()),
            data_sources: Arc::new(MemoryRepository::<DataSource>::new()),
            genes: Arc::new(MemoryRepository::<Gene>::new()),
            samples: Arc::new(MemoryRepository::<Sample>::new()),
            mutations: Arc::new(MemoryRepository::<Mutation>::new()),
            expression: Arc::new(MemoryRepository::<ExpressionValue>::new()),
            copy_number: Arc::new(MemoryRepository::<CopyNumberSegment>::new()),
        }
    }

    /// Resolver backed by the sample and gene repositories of this set.
    pub fn resolver(&self) -> RepositoryResolver {
        RepositoryResolver::new(self.samples.clone(), self.genes.clone())
    }
}

pub struct MemoryRepository<T> {
    entities: Mutex<BTreeMap<String, T>>,
    inserts: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    fail_after_inserts: Mutex<Option<usize>>,
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            entities: Mutex::new(BTreeMap::new()),
            inserts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_after_inserts: Mutex::new(None),
        }
    }
}

impl<T> MemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every insert after the first `count` successful ones fail.
    pub fn fail_after_inserts(&self, count: usize) {
        if let Ok(mut guard) = self.fail_after_inserts.lock() {
            *guard = Some(count);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, T>>, ImportError> {
        self.entities
            .lock()
            .map_err(|_| ImportError::Persistence("repository lock poisoned".to_string()))
    }
}

impl<T> Repository<T> for MemoryRepository<T>
where
    T: Entity + Clone + Send + Sync,
{
    fn find_by_stable_key(&self, key: &str) -> Result<Option<T>, ImportError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn insert(&self, entity: T) -> Result<T, ImportError> {
        let limit = *self
            .fail_after_inserts
            .lock()
            .map_err(|_| ImportError::Persistence("repository lock poisoned".to_string()))?;
        if let Some(limit) = limit {
            if self.insert_count() >= limit {
                return Err(ImportError::Persistence(format!(
                    "{}: injected insert failure",
                    T::COLLECTION
                )));
            }
        }

        let key = entity.stable_key();
        let mut map = self.lock()?;
        if map.contains_key(&key) {
            return Err(ImportError::Persistence(format!(
                "{}: duplicate key {key}",
                T::COLLECTION
            )));
        }
        map.insert(key, entity.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(entity)
    }

    fn update(&self, entity: T) -> Result<T, ImportError> {
        let key = entity.stable_key();
        let mut map = self.lock()?;
        let slot = map.get_mut(&key).ok_or_else(|| {
            ImportError::Persistence(format!("{}: no entity with key {key}", T::COLLECTION))
        })?;
        *slot = entity.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(entity)
    }

    fn delete(&self, entity: &T) -> Result<(), ImportError> {
        if self.lock()?.remove(&entity.stable_key()).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn delete_by_data_source_id(&self, id: &str) -> Result<usize, ImportError> {
        let mut map = self.lock()?;
        let before = map.len();
        map.retain(|_, entity| entity.data_source_id() != Some(id));
        let removed = before - map.len();
        self.deletes.fetch_add(removed, Ordering::SeqCst);
        Ok(removed)
    }

    fn find_all(&self) -> Result<Vec<T>, ImportError> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

#[derive(Clone)]
pub struct RepositoryResolver {
    samples: Arc<dyn Repository<Sample>>,
    genes: Arc<dyn Repository<Gene>>,
}

impl RepositoryResolver {
    pub fn new(samples: Arc<dyn Repository<Sample>>, genes: Arc<dyn Repository<Gene>>) -> Self {
        Self { samples, genes }
    }
}

impl ForeignKeyResolver for RepositoryResolver {
    fn find_sample_id(
        &self,
        data_set: &str,
        natural_key: &str,
    ) -> Result<Option<String>, ImportError> {
        Ok(self
            .samples
            .find_by_stable_key(&scoped_key(data_set, natural_key))?
            .map(|sample| sample.sample_id))
    }

    fn find_gene_id(
        &self,
        data_set: &str,
        natural_key: &str,
    ) -> Result<Option<String>, ImportError> {
        Ok(self
            .genes
            .find_by_stable_key(&scoped_key(data_set, natural_key))?
            .map(|gene| gene.gene_id))
    }

    fn gene_symbols(&self, data_set: &str) -> Result<HashMap<String, String>, ImportError> {
        let mut symbols = HashMap::new();
        for gene in self.genes.find_all()? {
            if gene.data_set == data_set {
                symbols
                    .entry(gene.symbol.to_lowercase())
                    .or_insert(gene.gene_id);
            }
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample(id: &str, source: &str) -> Sample {
        Sample {
            sample_id: id.to_string(),
            subject_id: None,
            tissue: None,
            sample_type: None,
            age: None,
            data_set: "ds1".to_string(),
            data_source: source.to_string(),
        }
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let repo = MemoryRepository::<Sample>::new();
        repo.insert(sample("S1", "a")).unwrap();
        let err = repo.insert(sample("S1", "a")).unwrap_err();
        assert_matches!(err, ImportError::Persistence(_));
        assert_eq!(repo.insert_count(), 1);

        let mut renamed = sample("S1", "a");
        renamed.tissue = Some("lung".to_string());
        repo.update(renamed).unwrap();
        assert_eq!(repo.update_count(), 1);
    }

    #[test]
    fn delete_by_data_source_only_touches_owned_rows() {
        let repo = MemoryRepository::<Sample>::new();
        repo.insert(sample("S1", "a")).unwrap();
        repo.insert(sample("S2", "a")).unwrap();
        repo.insert(sample("S3", "b")).unwrap();
        assert_eq!(repo.delete_by_data_source_id("a").unwrap(), 2);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.delete_count(), 2);
        assert!(repo.find_by_stable_key("ds1:S3").unwrap().is_some());
    }

    #[test]
    fn resolver_is_scoped_to_the_data_set() {
        let samples = Arc::new(MemoryRepository::<Sample>::new());
        samples.insert(sample("S1", "a")).unwrap();
        let genes = Arc::new(MemoryRepository::<Gene>::new());
        let resolver = RepositoryResolver::new(samples, genes);

        assert_eq!(resolver.find_sample_id("ds1", " S1 ").unwrap().as_deref(), Some("S1"));
        assert!(resolver.find_sample_id("ds2", "S1").unwrap().is_none());
    }

    #[test]
    fn injected_failure_after_limit() {
        let repo = MemoryRepository::<Sample>::new();
        repo.fail_after_inserts(1);
        repo.insert(sample("S1", "a")).unwrap();
        assert_matches!(
            repo.insert(sample("S2", "a")),
            Err(ImportError::Persistence(_))
        );
    }
}
