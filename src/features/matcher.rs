use super::orb::Descriptor;

/// Pairing of a query descriptor with a train descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Index of the closest candidate; the first one wins ties.
fn nearest(needle: &Descriptor, haystack: &[Descriptor]) -> Option<(usize, u32)> {
    let mut best: Option<(usize, u32)> = None;
    for (i, d) in haystack.iter().enumerate() {
        let distance = hamming(needle, d);
        if best.map_or(true, |(_, b)| distance < b) {
            best = Some((i, distance));
        }
    }
    best
}

/// Brute-force Hamming matching with cross-check.
///
/// A pair survives only when each side is the other's nearest neighbour.
/// The result is sorted ascending by distance; equal distances keep query order.
pub fn match_cross_check(query: &[Descriptor], train: &[Descriptor]) -> Vec<FeatureMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let backward: Vec<Option<usize>> = train
        .iter()
        .map(|t| nearest(t, query).map(|(i, _)| i))
        .collect();

    let mut matches: Vec<FeatureMatch> = query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (ti, distance) = nearest(q, train)?;
            (backward[ti] == Some(qi)).then_some(FeatureMatch {
                query: qi,
                train: ti,
                distance,
            })
        })
        .collect();

    matches.sort_by_key(|m| m.distance);
    matches
}
