//! Differential-expression eligibility and launch planning.
//!
//! After a successful expression-bearing ingest, every eligible group
//! annotation in the study gets a DE job. Eligibility and deduplication
//! rules live here; actual submission goes through the submission service.

use std::collections::HashSet;

use tracing::debug;

use cellarium_core::{
    defaults, Annotation, AnnotationScope, AnnotationType, StudyFile,
};

use crate::params::{DeType, DifferentialExpressionParams, MatrixFileType};

/// Whether one annotation qualifies for differential expression.
///
/// Group annotations only, with at least two distinct groups, and not
/// all-unique (an annotation with one value per cell carries no group
/// structure worth comparing).
pub fn is_eligible(annotation: &Annotation, total_cells: i64) -> bool {
    if annotation.annotation_type != AnnotationType::Group {
        return false;
    }
    let groups = annotation.values.len();
    if groups < defaults::DE_MIN_GROUPS {
        return false;
    }
    if total_cells > 0 && groups as i64 >= total_cells {
        return false;
    }
    true
}

/// Filter a study's annotations down to the DE-eligible set.
///
/// Both cluster-scoped and study-wide annotations participate. When an
/// ontology-labeled ("official") annotation exists, its `__custom`-suffixed
/// user counterpart is dropped so a study never computes the same comparison
/// twice.
pub fn eligible_annotations(annotations: &[Annotation], total_cells: i64) -> Vec<Annotation> {
    let official: HashSet<(String, AnnotationScope)> = annotations
        .iter()
        .filter(|a| a.is_ontology_labeled)
        .map(|a| (a.name.clone(), a.scope))
        .collect();

    annotations
        .iter()
        .filter(|a| is_eligible(a, total_cells))
        .filter(|a| {
            match a.name.strip_suffix(defaults::CUSTOM_ANNOTATION_SUFFIX) {
                Some(base) => {
                    let shadowed = official.contains(&(base.to_string(), a.scope));
                    if shadowed {
                        debug!(
                            annotation = %a.identifier(),
                            "Skipping custom annotation shadowed by official counterpart"
                        );
                    }
                    !shadowed
                }
                None => true,
            }
        })
        .cloned()
        .collect()
}

/// Pairwise comparison groups from a sorted group list.
///
/// Combinations over the full sorted list, so the alphabetically-last group
/// appears only as the second member of a pair, never leading a comparison.
pub fn pairwise_comparisons(values: &[String]) -> Vec<(String, String)> {
    let mut sorted: Vec<&String> = values.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut pairs = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            pairs.push((a.to_string(), b.to_string()));
        }
    }
    pairs
}

/// Build one-vs-rest DE parameters for an annotation against a cluster and
/// matrix file pair.
pub fn de_params_for(
    annotation: &Annotation,
    cluster_name: &str,
    cluster_file: &StudyFile,
    matrix_file: &StudyFile,
) -> DifferentialExpressionParams {
    DifferentialExpressionParams {
        annotation_name: annotation.name.clone(),
        annotation_scope: annotation.scope.as_str().to_string(),
        annotation_type: "group".to_string(),
        cluster_name: cluster_name.to_string(),
        cluster_file: cluster_file.bucket_url(),
        matrix_file_path: matrix_file.bucket_url(),
        matrix_file_type: MatrixFileType::Dense,
        matrix_file_size: matrix_file.upload_file_size,
        gene_file: None,
        barcode_file: None,
        de_type: DeType::Rest,
        group1: None,
        group2: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(
        name: &str,
        scope: AnnotationScope,
        values: &[&str],
        official: bool,
    ) -> Annotation {
        Annotation {
            name: name.to_string(),
            scope,
            annotation_type: AnnotationType::Group,
            cluster_name: (scope == AnnotationScope::Cluster).then(|| "UMAP".to_string()),
            values: values.iter().map(|v| v.to_string()).collect(),
            is_ontology_labeled: official,
        }
    }

    fn study_file(study_id: uuid::Uuid, name: &str, size: i64) -> StudyFile {
        use cellarium_core::{FileType, ParseStatus};
        let now = chrono::Utc::now();
        StudyFile {
            id: uuid::Uuid::new_v4(),
            study_id,
            study_accession: "SCP42".to_string(),
            name: name.to_string(),
            file_type: FileType::AnnData,
            upload_file_size: size,
            bucket_id: "fc-bucket".to_string(),
            remote_location: None,
            parse_status: ParseStatus::Parsed,
            queued_for_deletion: false,
            is_reference_anndata: false,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_single_group_not_eligible() {
        let ann = annotation("cell_type", AnnotationScope::Study, &["B cell"], false);
        assert!(!is_eligible(&ann, 1000));
    }

    #[test]
    fn test_two_groups_eligible() {
        let ann = annotation(
            "cell_type",
            AnnotationScope::Study,
            &["B cell", "T cell"],
            false,
        );
        assert!(is_eligible(&ann, 1000));
    }

    #[test]
    fn test_all_unique_values_not_eligible() {
        let values: Vec<String> = (0..100).map(|i| format!("cell_{}", i)).collect();
        let ann = Annotation {
            name: "barcode".to_string(),
            scope: AnnotationScope::Study,
            annotation_type: AnnotationType::Group,
            cluster_name: None,
            values,
            is_ontology_labeled: false,
        };
        assert!(!is_eligible(&ann, 100));
    }

    #[test]
    fn test_numeric_annotation_not_eligible() {
        let mut ann = annotation(
            "n_genes",
            AnnotationScope::Study,
            &["100", "200", "300"],
            false,
        );
        ann.annotation_type = AnnotationType::Numeric;
        assert!(!is_eligible(&ann, 1000));
    }

    #[test]
    fn test_custom_shadowed_by_official() {
        let anns = vec![
            annotation(
                "cell_type",
                AnnotationScope::Study,
                &["B cell", "T cell"],
                true,
            ),
            annotation(
                "cell_type__custom",
                AnnotationScope::Study,
                &["B", "T"],
                false,
            ),
        ];
        let eligible = eligible_annotations(&anns, 1000);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name, "cell_type");
    }

    #[test]
    fn test_custom_kept_without_official_counterpart() {
        let anns = vec![annotation(
            "cell_type__custom",
            AnnotationScope::Study,
            &["B", "T"],
            false,
        )];
        assert_eq!(eligible_annotations(&anns, 1000).len(), 1);
    }

    #[test]
    fn test_scopes_deduplicated_independently() {
        // Official study-scope annotation does not shadow a cluster-scope custom.
        let anns = vec![
            annotation(
                "cell_type",
                AnnotationScope::Study,
                &["B cell", "T cell"],
                true,
            ),
            annotation(
                "cell_type__custom",
                AnnotationScope::Cluster,
                &["B", "T"],
                false,
            ),
        ];
        assert_eq!(eligible_annotations(&anns, 1000).len(), 2);
    }

    #[test]
    fn test_pairwise_last_sorted_group_never_leads() {
        let values = vec![
            "T cell".to_string(),
            "B cell".to_string(),
            "monocyte".to_string(),
        ];
        // Sorted: ["B cell", "T cell", "monocyte"].
        let pairs = pairwise_comparisons(&values);
        assert_eq!(
            pairs,
            vec![
                ("B cell".to_string(), "T cell".to_string()),
                ("B cell".to_string(), "monocyte".to_string()),
                ("T cell".to_string(), "monocyte".to_string()),
            ]
        );
        assert!(pairs.iter().all(|(g1, _)| g1 != "monocyte"));
    }

    #[test]
    fn test_pairwise_two_groups_single_pair() {
        let values = vec!["T cell".to_string(), "B cell".to_string()];
        assert_eq!(
            pairwise_comparisons(&values),
            vec![("B cell".to_string(), "T cell".to_string())]
        );
    }

    #[test]
    fn test_pairwise_four_groups() {
        let values: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let pairs = pairwise_comparisons(&values);
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "b".to_string()),
                ("a".to_string(), "c".to_string()),
                ("a".to_string(), "d".to_string()),
                ("b".to_string(), "c".to_string()),
                ("b".to_string(), "d".to_string()),
                ("c".to_string(), "d".to_string()),
            ]
        );
    }

    #[test]
    fn test_de_params_carry_matrix_size() {
        let ann = annotation(
            "cell_type",
            AnnotationScope::Study,
            &["B cell", "T cell"],
            true,
        );
        let study_id = uuid::Uuid::new_v4();
        let cluster = study_file(study_id, "UMAP", 1024);
        let matrix = study_file(study_id, "matrix.h5ad", 30 * 1024 * 1024 * 1024);
        let params = de_params_for(&ann, "UMAP", &cluster, &matrix);
        assert_eq!(params.matrix_file_size, matrix.upload_file_size);
    }
}
