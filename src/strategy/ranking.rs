//! Field priority used to partition and prune projections.

use std::cmp::Ordering;

use crate::context::OptimizationContext;

const ACCESS_FREQUENCY_WEIGHT: f64 = 10.0;
const INVERSE_SIZE_NUMERATOR: f64 = 1000.0;
const INDEXED_BONUS: f64 = 500.0;

fn name_bonus(name: &str) -> f64 {
    let lower = name.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));
    if name == "id" || name == "_id" || name.ends_with("Id") || name.ends_with("_id") {
        1000.0
    } else if has(&["name", "title"]) {
        800.0
    } else if has(&["status", "type"]) {
        700.0
    } else if has(&["date", "time"]) || name.ends_with("At") {
        600.0
    } else if has(&["count", "total"]) {
        500.0
    } else if has(&["description", "content"]) {
        300.0
    } else if has(&["image", "file"]) {
        100.0
    } else {
        0.0
    }
}

/// Priority of a field; higher scores are fetched first.
///
/// Statistics always contribute the inverse size term; `field_sizes` is
/// consulted only for fields without statistics.
pub fn priority_score(name: &str, ctx: &OptimizationContext) -> f64 {
    let mut score = match ctx.field_statistics.get(name) {
        Some(stats) => {
            let indexed = if stats.indexed { INDEXED_BONUS } else { 0.0 };
            stats.access_frequency * ACCESS_FREQUENCY_WEIGHT
                + INVERSE_SIZE_NUMERATOR / stats.average_size.max(1.0)
                + indexed
        }
        None => ctx
            .field_sizes
            .get(name)
            .map_or(0.0, |bytes| INVERSE_SIZE_NUMERATOR / (*bytes as f64).max(1.0)),
    };
    score += name_bonus(name);
    score
}

/// Sorts names by descending priority, breaking ties by name.
pub fn rank_fields<'a, I>(names: I, ctx: &OptimizationContext) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(f64, &str)> = names
        .into_iter()
        .map(|name| (priority_score(name, ctx), name))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored.into_iter().map(|(_, name)| name.to_string()).collect()
}
