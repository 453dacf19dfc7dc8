//! Read-only registry of DAGs.
//!
//! DAGs are registered once while the catalog is built. After that the
//! catalog is shared behind an `Arc` and never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::dag::Dag;
use super::types::DagId;

/// Errors raised while building a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A DAG with the same id was already registered.
    #[error("duplicate dag: {0}")]
    DuplicateDag(DagId),
}

/// Registry of validated DAGs keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DagCatalog {
    dags: HashMap<DagId, Arc<Dag>>,
}

impl DagCatalog {
    /// Start building a catalog.
    pub fn builder() -> DagCatalogBuilder {
        DagCatalogBuilder::default()
    }

    /// Build a catalog from an iterator of DAGs.
    pub fn from_dags(dags: impl IntoIterator<Item = Dag>) -> Result<Self, CatalogError> {
        dags.into_iter()
            .try_fold(Self::builder(), |builder, dag| builder.register(dag))
            .map(DagCatalogBuilder::build)
    }

    /// Look up a DAG.
    pub fn get(&self, id: &DagId) -> Option<Arc<Dag>> {
        self.dags.get(id).cloned()
    }

    /// Whether a DAG is registered.
    pub fn contains(&self, id: &DagId) -> bool {
        self.dags.contains_key(id)
    }

    /// Registered DAG ids, sorted.
    pub fn dag_ids(&self) -> Vec<DagId> {
        let mut ids: Vec<DagId> = self.dags.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered DAGs.
    pub fn len(&self) -> usize {
        self.dags.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.dags.is_empty()
    }
}

/// Builder for [`DagCatalog`].
#[derive(Debug, Default)]
pub struct DagCatalogBuilder {
    dags: HashMap<DagId, Arc<Dag>>,
}

impl DagCatalogBuilder {
    /// Register a DAG. Fails if the id is taken.
    pub fn register(mut self, dag: Dag) -> Result<Self, CatalogError> {
        let id = dag.id().clone();
        if self.dags.contains_key(&id) {
            return Err(CatalogError::DuplicateDag(id));
        }
        self.dags.insert(id, Arc::new(dag));
        Ok(self)
    }

    /// Freeze the catalog.
    pub fn build(self) -> DagCatalog {
        DagCatalog { dags: self.dags }
    }
}
