use anyhow::{Context, Result};
use arrow_interop::read_parquet;
use columnar_model::{Batch, BatchSource, MemorySource, SchemaRef};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Named in-memory tables that pipelines scan.
#[derive(Default)]
pub struct Catalog {
    tables: DashMap<String, Table>,
}

#[derive(Clone)]
struct Table {
    schema: SchemaRef,
    batches: Arc<Vec<Batch>>,
    location: Option<PathBuf>,
    row_count: usize,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register batches under `name`, replacing any table of that name.
    pub fn register(&self, name: &str, schema: SchemaRef, batches: Vec<Batch>) -> Result<()> {
        // Validates that every batch matches the schema.
        MemorySource::new(Arc::clone(&schema), batches.clone())
            .with_context(|| format!("Failed to register table '{}'", name))?;
        let row_count = batches.iter().map(Batch::num_rows).sum();
        self.tables.insert(
            name.to_string(),
            Table {
                schema,
                batches: Arc::new(batches),
                location: None,
                row_count,
            },
        );
        info!("Registered table '{}' ({} rows)", name, row_count);
        Ok(())
    }

    /// Load a table from a Parquet file
    pub fn load_parquet(&self, name: &str, path: impl AsRef<Path>, batch_size: usize) -> Result<()> {
        let path = path.as_ref();
        info!("Loading table '{}' from {}", name, path.display());

        let (schema, batches) = read_parquet(path, batch_size)
            .with_context(|| format!("Failed to load table '{}' from {}", name, path.display()))?;
        let row_count = batches.iter().map(Batch::num_rows).sum();

        info!("  Columns: {}", schema.len());
        info!("  Rows: {}", row_count);

        self.tables.insert(
            name.to_string(),
            Table {
                schema,
                batches: Arc::new(batches),
                location: Some(path.to_path_buf()),
                row_count,
            },
        );
        info!("Table '{}' loaded successfully", name);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Result<SchemaRef> {
        let entry = self
            .tables
            .get(name)
            .with_context(|| format!("Table not found: {}", name))?;
        Ok(Arc::clone(&entry.schema))
    }

    pub fn row_count(&self, name: &str) -> Result<usize> {
        let entry = self
            .tables
            .get(name)
            .with_context(|| format!("Table not found: {}", name))?;
        Ok(entry.row_count)
    }

    /// File the table was loaded from, if any.
    pub fn location(&self, name: &str) -> Result<Option<PathBuf>> {
        let entry = self
            .tables
            .get(name)
            .with_context(|| format!("Table not found: {}", name))?;
        Ok(entry.location.clone())
    }

    /// A fresh source over the table's batches.
    pub fn scan(&self, name: &str) -> Result<Box<dyn BatchSource>> {
        let table = self
            .tables
            .get(name)
            .with_context(|| format!("Table not found: {}", name))?
            .clone();
        let source = MemorySource::new(table.schema, table.batches.as_ref().clone())?;
        Ok(Box::new(source))
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .remove(name)
            .with_context(|| format!("Table not found: {}", name))?;
        info!("Dropped table '{}'", name);
        Ok(())
    }
}
