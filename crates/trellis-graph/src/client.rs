//! Neo4j connection management and the Neo4j-backed graph store.

use neo4rs::{ConfigBuilder, Graph, Query};

use trellis_core::TrellisError;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("{label} not found: {id}")]
    NotFound { label: String, id: String },

    /// A change would leave a dangling reference; the commit was rejected.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    pub fn not_found(label: &str, id: impl ToString) -> Self {
        Self::NotFound {
            label: label.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<GraphError> for TrellisError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NotFound { label, id } => {
                let kind = match label.as_str() {
                    "Document" => "Document",
                    "Item" => "Item",
                    "ItemType" => "ItemType",
                    "Association" => "Association",
                    "Grouping" => "Grouping",
                    "ObjectLock" => "ObjectLock",
                    _ => "Record",
                };
                TrellisError::NotFound { kind, id }
            }
            other => TrellisError::Store(other.to_string()),
        }
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "trellis-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

impl From<&trellis_core::config::Neo4jSettings> for GraphConfig {
    fn from(settings: &trellis_core::config::Neo4jSettings) -> Self {
        Self {
            uri: settings.uri.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            ..Default::default()
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Implements [`GraphStore`](crate::GraphStore): reads live in
/// `queries.rs`, the transactional commit in `mutations.rs`.
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

/// The Neo4j-backed store.
pub type Neo4jGraphStore = GraphClient;

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a write-only query.
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Begin a transaction.
    pub async fn start_txn(&self) -> Result<neo4rs::Txn, GraphError> {
        Ok(self.graph.start_txn().await?)
    }

    /// Create the uniqueness constraints and lookup indexes the store relies on.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        let statements = [
            "CREATE CONSTRAINT trellis_document_id IF NOT EXISTS FOR (n:Document) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT trellis_item_id IF NOT EXISTS FOR (n:Item) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT trellis_item_type_id IF NOT EXISTS FOR (n:ItemType) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT trellis_association_id IF NOT EXISTS FOR (n:Association) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT trellis_grouping_id IF NOT EXISTS FOR (n:Grouping) REQUIRE n.id IS UNIQUE",
            "CREATE CONSTRAINT trellis_lock_target IF NOT EXISTS FOR (n:ObjectLock) REQUIRE n.target IS UNIQUE",
            "CREATE INDEX trellis_item_document IF NOT EXISTS FOR (n:Item) ON (n.document)",
            "CREATE INDEX trellis_item_type_code IF NOT EXISTS FOR (n:ItemType) ON (n.code)",
            "CREATE INDEX trellis_assoc_destination IF NOT EXISTS FOR (n:Association) ON (n.destination_key)",
            "CREATE INDEX trellis_assoc_origin IF NOT EXISTS FOR (n:Association) ON (n.origin_item)",
            "CREATE INDEX trellis_assoc_document IF NOT EXISTS FOR (n:Association) ON (n.document)",
        ];
        for statement in statements {
            self.run(neo4rs::query(statement)).await?;
        }
        tracing::info!("Ensured Neo4j schema");
        Ok(())
    }
}
