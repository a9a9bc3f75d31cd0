//! Annotation repository implementation.
//!
//! Annotations come from two tables: `cell_metadata` rows carry study-wide
//! annotations, `cluster_annotations` rows carry per-cluster ones. Both are
//! mapped into the same Annotation shape for differential-expression
//! eligibility checks.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cellarium_core::{
    Annotation, AnnotationRepository, AnnotationScope, AnnotationType, Error, Result,
};

/// PostgreSQL implementation of AnnotationRepository.
pub struct PgAnnotationRepository {
    pool: PgPool,
}

impl PgAnnotationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn annotation_type(s: &str) -> AnnotationType {
        match s {
            "numeric" => AnnotationType::Numeric,
            _ => AnnotationType::Group,
        }
    }
}

#[async_trait]
impl AnnotationRepository for PgAnnotationRepository {
    async fn annotations_for_study(&self, study_id: Uuid) -> Result<Vec<Annotation>> {
        let mut annotations = Vec::new();

        let study_rows = sqlx::query(
            "SELECT name, annotation_type, values, is_ontology_labeled
             FROM cell_metadata
             WHERE study_id = $1",
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        for row in study_rows {
            let annotation_type: String = row.get("annotation_type");
            annotations.push(Annotation {
                name: row.get("name"),
                scope: AnnotationScope::Study,
                annotation_type: Self::annotation_type(&annotation_type),
                cluster_name: None,
                values: row.get("values"),
                is_ontology_labeled: row.get("is_ontology_labeled"),
            });
        }

        let cluster_rows = sqlx::query(
            "SELECT ca.name, ca.annotation_type, ca.values, ca.is_ontology_labeled,
                    cg.name AS cluster_name
             FROM cluster_annotations ca
             JOIN cluster_groups cg ON cg.id = ca.cluster_group_id
             WHERE cg.study_id = $1",
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        for row in cluster_rows {
            let annotation_type: String = row.get("annotation_type");
            annotations.push(Annotation {
                name: row.get("name"),
                scope: AnnotationScope::Cluster,
                annotation_type: Self::annotation_type(&annotation_type),
                cluster_name: row.get("cluster_name"),
                values: row.get("values"),
                is_ontology_labeled: row.get("is_ontology_labeled"),
            });
        }

        Ok(annotations)
    }
}
