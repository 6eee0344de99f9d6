use std::path::Path;
use std::sync::{Arc, Mutex};

use log::info;

use crate::buffer::BufferPool;
use crate::catalog::{AttrDef, Catalog};
use crate::disk::FileManager;
use crate::error::Result;
use crate::heap::HeapFile;
use crate::page::Rid;
use crate::query::{self, Filter};

/// A database instance: one buffer pool over a directory of heap files,
/// with the system catalog attached.
///
/// Dropping the instance detaches cleanly: the catalog's files close and
/// flush first, then the pool writes back whatever else is dirty.
pub struct Database {
    pool: Arc<Mutex<BufferPool>>,
    catalog: Catalog,
}

impl Database {
    /// Attach to (or initialize) the database stored under `dir`.
    pub fn open(dir: impl AsRef<Path>, pool_size: usize) -> Result<Database> {
        let files = FileManager::new(dir)?;
        let pool = Arc::new(Mutex::new(BufferPool::new(files, pool_size)));
        let catalog = Catalog::open(&pool)?;
        info!("database attached (pool of {pool_size} frames)");
        Ok(Database { pool, catalog })
    }

    pub fn pool(&self) -> &Arc<Mutex<BufferPool>> {
        &self.pool
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn create_relation(&self, rel: &str, attrs: &[AttrDef]) -> Result<()> {
        self.catalog.create_rel(rel, attrs)
    }

    pub fn destroy_relation(&self, rel: &str) -> Result<()> {
        self.catalog.destroy_rel(rel)
    }

    pub fn insert(&self, rel: &str, values: &[(&str, &str)]) -> Result<Rid> {
        query::insert(&self.pool, &self.catalog, rel, values)
    }

    pub fn delete(&self, rel: &str, filter: Option<Filter<'_>>) -> Result<usize> {
        query::delete(&self.pool, &self.catalog, rel, filter)
    }

    pub fn select(
        &self,
        result: &str,
        rel: &str,
        projections: &[&str],
        filter: Option<Filter<'_>>,
    ) -> Result<usize> {
        query::select(&self.pool, &self.catalog, result, rel, projections, filter)
    }

    /// Live record count of a cataloged relation.
    pub fn record_count(&self, rel: &str) -> Result<u32> {
        self.catalog.get_rel(rel)?;
        let file = HeapFile::open(&self.pool, rel)?;
        Ok(file.rec_cnt())
    }
}
