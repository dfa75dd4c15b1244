//! # Cluster Repository
//!
//! Directory of target warehouse clusters. The scanner resolves a job's
//! `cluster_id` into connection coordinates when building a work item.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use crate::error::EtlError;
use crate::models::cluster::{ActiveModel, Entity, Model};

/// Connection coordinates for a resolved cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    pub host: String,
    pub port: i32,
    pub db_schema: String,
}

/// Repository for cluster directory database operations
pub struct ClusterRepository {
    db: DatabaseConnection,
}

impl ClusterRepository {
    /// Create a new ClusterRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Resolve a cluster id into its connection coordinates.
    pub async fn resolve(&self, cluster_id: &str) -> Result<ClusterEndpoint, EtlError> {
        let cluster = Entity::find_by_id(cluster_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| EtlError::ClusterNotFound(cluster_id.to_string()))?;

        Ok(ClusterEndpoint {
            host: cluster.host,
            port: cluster.port,
            db_schema: cluster.db_schema,
        })
    }

    /// Register a cluster in the directory.
    pub async fn insert(
        &self,
        cluster_id: &str,
        host: &str,
        port: i32,
        db_schema: &str,
    ) -> Result<Model, EtlError> {
        let cluster = ActiveModel {
            cluster_id: Set(cluster_id.to_string()),
            host: Set(host.to_string()),
            port: Set(port),
            db_schema: Set(db_schema.to_string()),
            status: Set("active".to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(&self.db)
        .await?;

        Ok(cluster)
    }
}
