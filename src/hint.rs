//! Diagnostics for anchors that were not found.
//!
//! Anchor drift is the usual reason a patch misses: an earlier patch or a
//! hand edit changed a few characters of the anchored line. The closest line
//! in the target (normalized Levenshtein) usually points straight at it.

use serde::Serialize;

/// Lines scoring below this are not worth showing.
const MIN_SIMILARITY: f64 = 0.6;

/// Bytes of context shown before and after a hint marker.
const MARKER_BEFORE: usize = 20;
const MARKER_AFTER: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closest: Option<ClosestLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<MarkerContext>,
}

/// The target line most similar to the anchor's first line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosestLine {
    /// 1-based
    pub line: usize,
    pub similarity: f64,
    pub text: String,
}

/// Where a patch's declared hint marker sits in the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerContext {
    pub marker: String,
    /// 1-based
    pub line: usize,
    pub context: String,
}

/// Build a hint for an anchor probe (its literal text or pattern source).
///
/// Returns `None` when neither a similar line nor the marker was found.
pub fn diagnose(content: &str, probe: &str, marker: Option<&str>) -> Option<AnchorHint> {
    let closest = closest_line(content, probe);
    let marker = marker.and_then(|m| locate_marker(content, m));

    if closest.is_none() && marker.is_none() {
        return None;
    }
    Some(AnchorHint { closest, marker })
}

fn closest_line(content: &str, probe: &str) -> Option<ClosestLine> {
    let needle = probe.lines().map(str::trim).find(|l| !l.is_empty())?;

    let mut best: Option<ClosestLine> = None;
    for (idx, line) in content.lines().enumerate() {
        let candidate = line.trim();
        if candidate.is_empty() {
            continue;
        }
        let similarity = strsim::normalized_levenshtein(needle, candidate);
        if similarity < MIN_SIMILARITY {
            continue;
        }
        if best.as_ref().map_or(true, |b| similarity > b.similarity) {
            best = Some(ClosestLine {
                line: idx + 1,
                similarity,
                text: candidate.to_string(),
            });
        }
    }
    best
}

fn locate_marker(content: &str, marker: &str) -> Option<MarkerContext> {
    if marker.is_empty() {
        return None;
    }
    let idx = content.find(marker)?;
    let line = content[..idx].matches('\n').count() + 1;

    let mut from = idx.saturating_sub(MARKER_BEFORE);
    while !content.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (idx + marker.len() + MARKER_AFTER).min(content.len());
    while !content.is_char_boundary(to) {
        to += 1;
    }

    Some(MarkerContext {
        marker: marker.to_string(),
        line,
        context: content[from..to].replace('\n', "\\n"),
    })
}
