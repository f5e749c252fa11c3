//! Mapping helpers between Qdrant points and ranked fragments.

use crate::{
    processing::types::{Fragment, RankedResult},
    qdrant::{
        ScoredPoint,
        payload::{SEQUENCE_KEY, SOURCE_KEY, TEXT_KEY},
    },
    store::FragmentStoreError,
};
use serde_json::Value;
use std::cmp::Ordering;

/// Map a Qdrant scored point into a ranked fragment.
///
/// Points without fragment text are rejected; a missing filename maps to an empty source and a
/// missing sequence sorts last among equal scores.
pub(crate) fn map_scored_point(point: ScoredPoint) -> Result<RankedResult, FragmentStoreError> {
    let ScoredPoint { id, score, payload } = point;
    let mut payload = payload.ok_or_else(|| FragmentStoreError::MalformedPoint(id.clone()))?;

    let text = match payload.remove(TEXT_KEY) {
        Some(Value::String(value)) if !value.trim().is_empty() => value,
        _ => return Err(FragmentStoreError::MalformedPoint(id)),
    };
    let source = match payload.remove(SOURCE_KEY) {
        Some(Value::String(value)) => value.trim().to_string(),
        _ => String::new(),
    };
    let sequence = payload
        .get(SEQUENCE_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX);

    Ok(RankedResult {
        fragment: Fragment {
            source,
            text,
            sequence,
        },
        score,
    })
}

/// Sort by descending score, breaking ties by ascending insertion sequence.
///
/// The sort is stable, so results with equal score and sequence keep their incoming order.
pub(crate) fn rank_results(results: &mut [RankedResult]) {
    results.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.fragment.sequence.cmp(&right.fragment.sequence))
    });
}
