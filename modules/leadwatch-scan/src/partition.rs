use leadwatch_common::types::Location;

/// Deal locations round-robin into one chunk per worker. Always returns
/// exactly `workers` chunks; trailing chunks are empty when there are
/// fewer locations than workers. Worker counts are clamped upstream, so
/// a zero here is a caller bug.
pub fn partition(locations: &[Location], workers: usize) -> Vec<Vec<Location>> {
    assert!(workers > 0, "partition requires at least one worker");

    let mut chunks: Vec<Vec<Location>> = (0..workers)
        .map(|_| Vec::with_capacity(locations.len() / workers + 1))
        .collect();
    for (i, location) in locations.iter().enumerate() {
        chunks[i % workers].push(location.clone());
    }
    chunks
}
