use crate::shared_data::ApproachCandidate;

/// Picks the candidate closest to the stop line. On equal distance the one
/// scanned first wins, so the result only depends on scan order.
pub fn select_candidate(candidates: &[ApproachCandidate]) -> Option<&ApproachCandidate> {
    let mut best: Option<&ApproachCandidate> = None;
    for candidate in candidates {
        match best {
            Some(current)
                if candidate.distance_to_intersection_m >= current.distance_to_intersection_m => {}
            _ => best = Some(candidate),
        }
    }
    best
}
