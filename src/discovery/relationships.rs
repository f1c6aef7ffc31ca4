//! Relationship detection.
//!
//! Produces [`RelationshipCandidate`] rows for review. Declared foreign
//! keys are honoured outright; value overlap and name inference propose
//! further candidates, which a defensive filter, a test join, and an LLM
//! triage pass then confirm, reject, or hand to the user.

use super::singular::singularise;
use crate::datasource::Datasource;
use crate::llm::{extract_json, LlmRuntime};
use crate::models::{
    CandidateId, CandidateMetrics, Cardinality, DatasourceId, DetectionMethod,
    RelationshipCandidate, ReviewStatus, SchemaColumn, TriageVerdict, WorkflowId,
};
use crate::pool::CancelToken;
use crate::storage::TenantSession;
use crate::Result;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Minimum sample overlap for a value-match candidate.
pub const VALUE_MATCH_THRESHOLD: f64 = 0.30;

/// Orphan rate above which a candidate is rejected outright.
const ORPHAN_REJECT_RATE: f64 = 0.50;

/// Orphan rate above which confidence is lowered.
const ORPHAN_SOFT_RATE: f64 = 0.10;

/// Confidence multiplier for soft orphan rates.
const ORPHAN_CONFIDENCE_PENALTY: f64 = 0.8;

/// Confidence at or above which triage verdicts are applied automatically.
const AUTO_DECISION_CONFIDENCE: f64 = 0.85;

/// Minimum distinct values for a column to enter value matching.
const MIN_DISTINCT_FOR_MATCH: i64 = 20;

/// Small-integer columns are not real FKs into large sequences.
const SMALL_INT_MAX: i64 = 10;

/// Source columns with a cardinality ratio below this are status/type
/// columns, not keys.
const MIN_CARDINALITY_RATIO: f64 = 0.01;

/// Column-name prefixes excluded from value matching.
const EXCLUDED_PREFIXES: &[&str] = &["num_", "total_"];

/// Column-name suffixes excluded from value matching.
const EXCLUDED_SUFFIXES: &[&str] = &[
    "_count", "_amount", "_total", "_sum", "_avg", "_min", "_max", "_rating", "_score", "_level",
];

/// Bare column names excluded from value matching.
const EXCLUDED_NAMES: &[&str] = &["rating", "score", "level"];

const TRIAGE_SYSTEM_PROMPT: &str = "You are reviewing proposed foreign-key relationships in a \
relational schema. For each proposal decide: confirm (a real reference), reject (coincidental \
value overlap), or needs_review (a human should look). Respond with JSON only: \
{\"assessments\": [{\"source_column\": string, \"target_table\": string, \"verdict\": \
\"confirm\"|\"reject\"|\"needs_review\", \"confidence\": number, \"reasoning\": string}]}.";

/// LLM triage response shapes.
#[derive(Debug, Deserialize)]
struct TriageResponse {
    #[serde(default)]
    assessments: Vec<TriageAssessment>,
}

#[derive(Debug, Deserialize)]
struct TriageAssessment {
    source_column: String,
    target_table: String,
    verdict: String,
    #[serde(default = "default_triage_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

const fn default_triage_confidence() -> f64 {
    0.5
}

/// Whether a column's name disqualifies it from value matching.
fn name_is_excluded(name: &str) -> bool {
    let lower = name.to_lowercase();
    EXCLUDED_NAMES.contains(&lower.as_str())
        || EXCLUDED_PREFIXES.iter().any(|p| lower.starts_with(p))
        || EXCLUDED_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// The defensive filter applied before a column may enter value matching.
fn passes_pre_filter(column: &SchemaColumn) -> bool {
    let Some(stats) = &column.stats else {
        // NULL distinct_count: never scanned.
        return false;
    };
    if stats.is_joinable != crate::models::Joinability::Joinable {
        return false;
    }
    if stats.distinct_count < MIN_DISTINCT_FOR_MATCH {
        return false;
    }
    !name_is_excluded(&column.name)
}

/// Detects relationships and persists candidates.
pub struct RelationshipDetectionService {
    datasource: Arc<dyn Datasource>,
    llm: Option<Arc<LlmRuntime>>,
}

impl RelationshipDetectionService {
    /// Creates a detection service with LLM triage.
    #[must_use]
    pub const fn new(datasource: Arc<dyn Datasource>, llm: Arc<LlmRuntime>) -> Self {
        Self {
            datasource,
            llm: Some(llm),
        }
    }

    /// Creates a detection service without triage; every non-obvious
    /// candidate goes to the user.
    #[must_use]
    pub const fn without_llm(datasource: Arc<dyn Datasource>) -> Self {
        Self {
            datasource,
            llm: None,
        }
    }

    /// Runs the detection pipeline and upserts candidates for review.
    ///
    /// Returns the number of candidates produced. `on_progress` receives
    /// `(done, total, table)` per source table.
    ///
    /// # Errors
    ///
    /// Returns adapter or storage errors. LLM triage failure is not fatal:
    /// affected candidates stay pending for the user.
    pub fn detect(
        &self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        workflow_id: WorkflowId,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(usize, usize, &str),
    ) -> Result<usize> {
        let columns = session.list_schema_columns(datasource_id)?;
        let targets = key_targets(&columns);
        let by_table = group_by_table(&columns);

        let mut total = 0;
        let mut table_names: Vec<&String> = by_table.keys().collect();
        table_names.sort();
        let table_count = table_names.len();
        for (index, table) in table_names.into_iter().enumerate() {
            cancel.check()?;
            let sources = &by_table[table];
            let mut candidates = self.propose_for_table(sources, &targets, &columns);
            self.test_joins(&mut candidates, cancel)?;
            self.triage(table, sources, &mut candidates);
            for mut proto in candidates {
                band(&mut proto);
                let candidate = proto.into_candidate(session, datasource_id, workflow_id);
                session.upsert_candidate(&candidate)?;
                total += 1;
            }
            on_progress(index + 1, table_count, table);
        }
        Ok(total)
    }

    /// Stages 1 to 3: FK honouring, value overlap, name inference.
    fn propose_for_table(
        &self,
        sources: &[&SchemaColumn],
        targets: &[&SchemaColumn],
        all_columns: &[SchemaColumn],
    ) -> Vec<ProtoCandidate> {
        let mut proposals: Vec<ProtoCandidate> = Vec::new();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let table_names: HashSet<&str> = all_columns
            .iter()
            .map(|c| c.table_name.as_str())
            .collect();

        for source in sources {
            // Stage 1: declared FK constraints, accepted outright.
            if let Some(fk) = &source.fk_target {
                if seen.insert((
                    source.name.clone(),
                    fk.table.clone(),
                    fk.column.clone(),
                )) {
                    proposals.push(ProtoCandidate::declared_fk(source, &fk.table, &fk.column));
                }
                continue;
            }

            // A table's own key identifies its rows; it is not a
            // reference into another table.
            if source.is_primary_key {
                continue;
            }

            // Stage 2: sample-value overlap against key columns
            // elsewhere. The defensive filter gates this stage only.
            if passes_pre_filter(source) {
                for target in targets {
                    if target.table_name == source.table_name {
                        continue;
                    }
                    let overlap = sample_overlap_rate(source, target);
                    if overlap >= VALUE_MATCH_THRESHOLD
                        && seen.insert((
                            source.name.clone(),
                            target.table_name.clone(),
                            target.name.clone(),
                        ))
                    {
                        proposals.push(ProtoCandidate::value_match(source, target, overlap));
                    }
                }
            }

            // Stage 3: name inference.
            if let Some(inferred) =
                infer_by_name(source, targets, &table_names)
            {
                if seen.insert((
                    source.name.clone(),
                    inferred.target_table.clone(),
                    inferred.target_column.clone(),
                )) {
                    proposals.push(inferred);
                }
            }
        }
        proposals
    }

    /// Stage 4: test join for every candidate; declared FKs only pick up
    /// cardinality, the rest face the orphan gates and the post-join
    /// defensive filter.
    fn test_joins(&self, candidates: &mut Vec<ProtoCandidate>, cancel: &CancelToken) -> Result<()> {
        for candidate in candidates.iter_mut() {
            cancel.check()?;
            let metrics = match self.datasource.analyse_join(
                &candidate.source_table,
                &candidate.source_column,
                &candidate.target_table,
                &candidate.target_column,
            ) {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(
                        source = %candidate.source_column,
                        target = %candidate.target_table,
                        error = %err,
                        "test join failed, leaving candidate for review"
                    );
                    continue;
                },
            };
            candidate.cardinality = metrics.cardinality;
            candidate.metrics.join_match_rate = Some(metrics.match_rate);
            candidate.metrics.orphan_rate = Some(metrics.orphan_rate);
            candidate.metrics.target_coverage = Some(metrics.target_coverage);

            if candidate.detection_method == DetectionMethod::ForeignKey {
                continue;
            }

            if metrics.orphan_rate > ORPHAN_REJECT_RATE {
                candidate.status = Some(ReviewStatus::Rejected);
                candidate.reasoning = Some(format!(
                    "{:.0}% of source rows have no target match",
                    metrics.orphan_rate * 100.0
                ));
                continue;
            }
            if metrics.orphan_rate > ORPHAN_SOFT_RATE {
                candidate.confidence *= ORPHAN_CONFIDENCE_PENALTY;
            }

            // Post-join defensive filter: small-integer columns aren't
            // real FKs into large sequences, and near-constant columns are
            // status flags.
            if let Some(max) = metrics.max_source_value {
                if max <= SMALL_INT_MAX && metrics.target_row_count > 10 {
                    candidate.status = Some(ReviewStatus::Rejected);
                    candidate.reasoning =
                        Some("small-integer source values against a large target".to_string());
                    continue;
                }
            }
            if candidate.source_cardinality_ratio < MIN_CARDINALITY_RATIO {
                candidate.status = Some(ReviewStatus::Rejected);
                candidate.reasoning = Some("source column is near-constant".to_string());
            }
        }
        Ok(())
    }

    /// Stage 5: LLM triage over the table's unresolved candidates.
    fn triage(
        &self,
        table: &str,
        sources: &[&SchemaColumn],
        candidates: &mut [ProtoCandidate],
    ) {
        let Some(llm) = &self.llm else { return };
        let open: Vec<&ProtoCandidate> = candidates
            .iter()
            .filter(|c| c.status.is_none() && c.detection_method != DetectionMethod::ForeignKey)
            .collect();
        if open.is_empty() {
            return;
        }

        let prompt = triage_prompt(table, sources, &open);
        let assessments = match llm.complete_guarded(TRIAGE_SYSTEM_PROMPT, &prompt) {
            Ok(response) => {
                match serde_json::from_str::<TriageResponse>(&extract_json(&response)) {
                    Ok(parsed) => parsed.assessments,
                    Err(err) => {
                        tracing::warn!(table, error = %err, "unparsable triage response");
                        return;
                    },
                }
            },
            Err(err) => {
                tracing::warn!(table, error = %err, "triage failed, candidates stay pending");
                return;
            },
        };

        for assessment in assessments {
            let Some(verdict) = TriageVerdict::parse(&assessment.verdict) else {
                continue;
            };
            if let Some(candidate) = candidates.iter_mut().find(|c| {
                c.status.is_none()
                    && c.source_column == assessment.source_column
                    && c.target_table == assessment.target_table
            }) {
                candidate.triage = Some((verdict, assessment.confidence.clamp(0.0, 1.0)));
                candidate.reasoning = assessment.reasoning;
            }
        }
    }
}

/// Stage 6: confidence banding into the final status.
fn band(candidate: &mut ProtoCandidate) {
    if candidate.detection_method == DetectionMethod::ForeignKey {
        return;
    }
    if candidate.status.is_some() {
        // Already rejected by the join gates.
        return;
    }
    match candidate.triage {
        Some((TriageVerdict::Confirm, confidence)) if confidence >= AUTO_DECISION_CONFIDENCE => {
            candidate.status = Some(ReviewStatus::Accepted);
            candidate.confidence = confidence;
        },
        Some((TriageVerdict::Reject, confidence)) if confidence >= AUTO_DECISION_CONFIDENCE => {
            candidate.status = Some(ReviewStatus::Rejected);
            candidate.confidence = confidence;
        },
        _ => {
            candidate.status = Some(ReviewStatus::Pending);
            candidate.is_required = true;
        },
    }
}

/// Intermediate candidate being shaped by the pipeline.
struct ProtoCandidate {
    source_table: String,
    source_column: String,
    target_table: String,
    target_column: String,
    detection_method: DetectionMethod,
    confidence: f64,
    cardinality: Cardinality,
    metrics: CandidateMetrics,
    reasoning: Option<String>,
    status: Option<ReviewStatus>,
    is_required: bool,
    triage: Option<(TriageVerdict, f64)>,
    source_cardinality_ratio: f64,
}

impl ProtoCandidate {
    fn declared_fk(source: &SchemaColumn, target_table: &str, target_column: &str) -> Self {
        Self {
            source_table: source.table_name.clone(),
            source_column: source.name.clone(),
            target_table: target_table.to_string(),
            target_column: target_column.to_string(),
            detection_method: DetectionMethod::ForeignKey,
            confidence: 1.0,
            cardinality: Cardinality::Unknown,
            metrics: CandidateMetrics::default(),
            reasoning: None,
            status: Some(ReviewStatus::Accepted),
            is_required: false,
            triage: None,
            source_cardinality_ratio: 1.0,
        }
    }

    fn value_match(source: &SchemaColumn, target: &SchemaColumn, overlap: f64) -> Self {
        Self {
            source_table: source.table_name.clone(),
            source_column: source.name.clone(),
            target_table: target.table_name.clone(),
            target_column: target.name.clone(),
            detection_method: DetectionMethod::ValueMatch,
            confidence: overlap,
            cardinality: Cardinality::Unknown,
            metrics: CandidateMetrics {
                value_match_rate: Some(overlap),
                name_similarity: Some(name_similarity(&source.name, &target.table_name)),
                ..CandidateMetrics::default()
            },
            reasoning: None,
            status: None,
            is_required: false,
            triage: None,
            source_cardinality_ratio: source
                .stats
                .as_ref()
                .map_or(0.0, crate::models::ColumnStats::cardinality_ratio),
        }
    }

    fn into_candidate(
        self,
        session: &TenantSession,
        datasource_id: DatasourceId,
        workflow_id: WorkflowId,
    ) -> RelationshipCandidate {
        let status = self.status.unwrap_or(ReviewStatus::Pending);
        RelationshipCandidate {
            id: CandidateId::generate(),
            project_id: session.project_id(),
            datasource_id,
            workflow_id,
            source_table: self.source_table,
            source_column: self.source_column,
            target_table: self.target_table,
            target_column: self.target_column,
            detection_method: self.detection_method,
            confidence: self.confidence.clamp(0.0, 1.0),
            cardinality: self.cardinality,
            metrics: self.metrics,
            reasoning: self.reasoning,
            status,
            is_required: self.is_required,
            user_decision: None,
        }
    }
}

/// Key columns (PK or unique) that can be relationship targets.
fn key_targets(columns: &[SchemaColumn]) -> Vec<&SchemaColumn> {
    columns
        .iter()
        .filter(|c| c.is_primary_key || c.is_unique)
        .collect()
}

fn group_by_table(columns: &[SchemaColumn]) -> HashMap<String, Vec<&SchemaColumn>> {
    let mut by_table: HashMap<String, Vec<&SchemaColumn>> = HashMap::new();
    for column in columns {
        by_table
            .entry(column.table_name.clone())
            .or_default()
            .push(column);
    }
    by_table
}

#[allow(clippy::cast_precision_loss)]
fn sample_overlap_rate(source: &SchemaColumn, target: &SchemaColumn) -> f64 {
    let (Some(source_stats), Some(target_stats)) = (&source.stats, &target.stats) else {
        return 0.0;
    };
    if source_stats.sample_values.is_empty() {
        return 0.0;
    }
    let target_values: HashSet<&str> = target_stats
        .sample_values
        .iter()
        .map(String::as_str)
        .collect();
    let hits = source_stats
        .sample_values
        .iter()
        .filter(|v| target_values.contains(v.as_str()))
        .count();
    hits as f64 / source_stats.sample_values.len() as f64
}

/// Stage 3: name inference. `{x}_id` against a table resolving to `x`
/// gets 0.8; a column named exactly like a table gets 0.7.
fn infer_by_name(
    source: &SchemaColumn,
    targets: &[&SchemaColumn],
    table_names: &HashSet<&str>,
) -> Option<ProtoCandidate> {
    let find_pk = |table: &str| {
        targets
            .iter()
            .find(|t| t.table_name == table && t.is_primary_key)
            .copied()
    };

    let (referenced, confidence) = if let Some(stem) = source.name.strip_suffix("_id") {
        let stem = stem.to_lowercase();
        let table = table_names
            .iter()
            .find(|t| {
                let lower = t.to_lowercase();
                lower == stem || singularise(&lower) == stem
            })
            .copied()?;
        (table, 0.8)
    } else if table_names.contains(source.name.as_str()) && source.name != source.table_name {
        (source.name.as_str(), 0.7)
    } else {
        return None;
    };

    let target = find_pk(referenced)?;
    if target.table_name == source.table_name {
        return None;
    }
    Some(ProtoCandidate {
        source_table: source.table_name.clone(),
        source_column: source.name.clone(),
        target_table: target.table_name.clone(),
        target_column: target.name.clone(),
        detection_method: DetectionMethod::NameInference,
        confidence,
        cardinality: Cardinality::Unknown,
        metrics: CandidateMetrics {
            name_similarity: Some(1.0),
            ..CandidateMetrics::default()
        },
        reasoning: None,
        status: None,
        is_required: false,
        triage: None,
        source_cardinality_ratio: source
            .stats
            .as_ref()
            .map_or(1.0, crate::models::ColumnStats::cardinality_ratio),
    })
}

/// Crude lexical similarity between a source column and a target table.
fn name_similarity(source_column: &str, target_table: &str) -> f64 {
    let stem = source_column
        .strip_suffix("_id")
        .unwrap_or(source_column)
        .to_lowercase();
    let table = singularise(target_table);
    if stem == table {
        1.0
    } else if stem.contains(&table) || table.contains(&stem) {
        0.7
    } else {
        0.0
    }
}

fn triage_prompt(table: &str, sources: &[&SchemaColumn], open: &[&ProtoCandidate]) -> String {
    use std::fmt::Write;

    let mut prompt = format!("Schema slice for table '{table}':\n");
    for column in sources {
        let _ = write!(prompt, "- {} {}", column.name, column.data_type);
        if let Some(stats) = &column.stats {
            let _ = write!(
                prompt,
                " (null {:.0}%, distinct {}",
                stats.null_percent(),
                stats.distinct_count
            );
            let _ = write!(prompt, ")");
        }
        if let Some(fk) = &column.fk_target {
            let _ = write!(prompt, " [declared FK -> {}.{}]", fk.table, fk.column);
        }
        let _ = writeln!(prompt);
    }
    let _ = writeln!(prompt, "\nProposed relationships:");
    for candidate in open {
        let _ = writeln!(
            prompt,
            "- {}.{} -> {}.{} (method {}, overlap {:?}, orphan {:?}, cardinality {})",
            candidate.source_table,
            candidate.source_column,
            candidate.target_table,
            candidate.target_column,
            candidate.detection_method,
            candidate.metrics.value_match_rate,
            candidate.metrics.orphan_rate,
            candidate.cardinality,
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnId, ColumnStats, Joinability, ProjectId, TableId};
    use chrono::Utc;

    fn column(table: &str, name: &str, is_pk: bool, distinct: i64, samples: &[&str]) -> SchemaColumn {
        SchemaColumn {
            id: ColumnId::generate(),
            project_id: ProjectId::generate(),
            table_id: TableId::generate(),
            table_name: table.to_string(),
            name: name.to_string(),
            data_type: "integer".to_string(),
            is_nullable: false,
            is_primary_key: is_pk,
            is_unique: is_pk,
            fk_target: None,
            stats: Some(ColumnStats {
                row_count: 1000,
                non_null_count: 1000,
                distinct_count: distinct,
                sample_values: samples.iter().map(ToString::to_string).collect(),
                is_joinable: Joinability::Joinable,
                joinability_reason: None,
                joinability_score: 1.0,
                stats_updated_at: Utc::now(),
            }),
        }
    }

    #[test]
    fn test_excluded_name_patterns() {
        for name in [
            "num_items",
            "total_spend",
            "item_count",
            "order_amount",
            "grand_total",
            "score",
            "rating",
            "level",
            "risk_level",
        ] {
            assert!(name_is_excluded(name), "{name} should be excluded");
        }
        for name in ["user_id", "email", "customer_ref"] {
            assert!(!name_is_excluded(name), "{name} should pass");
        }
    }

    #[test]
    fn test_pre_filter_gates() {
        let good = column("orders", "user_id", false, 500, &[]);
        assert!(passes_pre_filter(&good));

        let low_distinct = column("orders", "user_id", false, 5, &[]);
        assert!(!passes_pre_filter(&low_distinct));

        let mut unscanned = column("orders", "user_id", false, 500, &[]);
        unscanned.stats = None;
        assert!(!passes_pre_filter(&unscanned));

        let mut not_joinable = column("orders", "user_id", false, 500, &[]);
        if let Some(stats) = &mut not_joinable.stats {
            stats.is_joinable = Joinability::NotJoinable;
        }
        assert!(!passes_pre_filter(&not_joinable));

        let excluded_name = column("orders", "total_amount", false, 500, &[]);
        assert!(!passes_pre_filter(&excluded_name));
    }

    #[test]
    fn test_sample_overlap_rate() {
        let source = column("orders", "user_id", false, 100, &["1", "2", "3", "4"]);
        let target = column("users", "id", true, 100, &["1", "2", "9"]);
        assert!((sample_overlap_rate(&source, &target) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_infer_by_name_id_suffix() {
        let source = column("orders", "user_id", false, 100, &[]);
        let users_pk = column("users", "id", true, 100, &[]);
        let targets = vec![&users_pk];
        let mut tables = HashSet::new();
        tables.insert("orders");
        tables.insert("users");
        let inferred = infer_by_name(&source, &targets, &tables).unwrap();
        assert_eq!(inferred.target_table, "users");
        assert!((inferred.confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(inferred.detection_method, DetectionMethod::NameInference);
    }

    #[test]
    fn test_infer_by_name_exact_table_name() {
        let source = column("orders", "users", false, 100, &[]);
        let users_pk = column("users", "id", true, 100, &[]);
        let targets = vec![&users_pk];
        let mut tables = HashSet::new();
        tables.insert("users");
        tables.insert("orders");
        let inferred = infer_by_name(&source, &targets, &tables).unwrap();
        assert!((inferred.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_band_needs_review_when_no_triage() {
        let source = column("orders", "user_id", false, 100, &["1"]);
        let target = column("users", "id", true, 100, &["1"]);
        let mut proto = ProtoCandidate::value_match(&source, &target, 0.6);
        band(&mut proto);
        assert_eq!(proto.status, Some(ReviewStatus::Pending));
        assert!(proto.is_required);
    }

    #[test]
    fn test_band_applies_confident_triage() {
        let source = column("orders", "user_id", false, 100, &["1"]);
        let target = column("users", "id", true, 100, &["1"]);

        let mut confirmed = ProtoCandidate::value_match(&source, &target, 0.6);
        confirmed.triage = Some((TriageVerdict::Confirm, 0.9));
        band(&mut confirmed);
        assert_eq!(confirmed.status, Some(ReviewStatus::Accepted));
        assert!(!confirmed.is_required);

        let mut rejected = ProtoCandidate::value_match(&source, &target, 0.6);
        rejected.triage = Some((TriageVerdict::Reject, 0.95));
        band(&mut rejected);
        assert_eq!(rejected.status, Some(ReviewStatus::Rejected));

        let mut unsure = ProtoCandidate::value_match(&source, &target, 0.6);
        unsure.triage = Some((TriageVerdict::Confirm, 0.6));
        band(&mut unsure);
        assert_eq!(unsure.status, Some(ReviewStatus::Pending));
        assert!(unsure.is_required);
    }

    #[test]
    fn test_name_similarity() {
        assert!((name_similarity("user_id", "users") - 1.0).abs() < f64::EPSILON);
        assert!((name_similarity("customer_id", "orders")).abs() < f64::EPSILON);
    }
}
