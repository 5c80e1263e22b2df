use rand::Rng;

// ============================================================================
// Sample Selector
// ============================================================================
//
// Draws the ballots a reviewer has to check by hand when a bundle is closed.
// Called once by the command handler; the drawn numbers travel inside the
// close event, replay never draws again.
//
// ============================================================================

/// Choose `min(sample_size, ballot_numbers.len())` distinct ballot numbers
/// uniformly at random without replacement, returned in ascending order.
pub fn select_sample<R: Rng + ?Sized>(
    rng: &mut R,
    sample_size: u32,
    ballot_numbers: &[u32],
) -> Vec<u32> {
    let amount = (sample_size as usize).min(ballot_numbers.len());

    let mut sample: Vec<u32> = rand::seq::index::sample(rng, ballot_numbers.len(), amount)
        .into_iter()
        .map(|index| ballot_numbers[index])
        .collect();
    sample.sort_unstable();
    sample
}
