use serde::{Deserialize, Serialize};

use super::errors::TallyError;

// ============================================================================
// Ballot and Bundle Numbering Policy
// ============================================================================
//
// Pure functions. The result aggregate owns the bundle-number sequence, the
// bundle aggregate asks `BallotNumbering` for the number of its next ballot.
//
// ============================================================================

/// Scope in which ballot numbers are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BallotNumberGeneration {
    /// Every bundle numbers its ballots 1, 2, 3, ...
    RestartForEachBundle,
    /// Bundle `n` owns the range `(n - 1) * size + 1 ..= n * size`
    ContinuousForAllBundles,
}

/// How bundle numbers are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleNumberMode {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleNumberRequest {
    Automatic,
    Manual(u32),
}

/// Numbering configuration captured by a bundle when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotNumbering {
    pub generation: BallotNumberGeneration,
    pub bundle_number: u32,
    pub bundle_size: Option<u32>,
}

impl BallotNumbering {
    fn continuous_size(&self) -> Result<u32, TallyError> {
        match self.bundle_size {
            Some(size) if size > 0 => Ok(size),
            _ => Err(TallyError::invalid_argument(
                "continuous ballot numbering requires a positive bundle size",
            )),
        }
    }

    /// Number of the first ballot in this bundle
    pub fn first_number(&self) -> Result<u32, TallyError> {
        match self.generation {
            BallotNumberGeneration::RestartForEachBundle => Ok(1),
            BallotNumberGeneration::ContinuousForAllBundles => {
                let size = self.continuous_size()?;
                self.bundle_number
                    .checked_sub(1)
                    .ok_or_else(|| TallyError::invalid_argument("bundle numbers start at 1"))?
                    .checked_mul(size)
                    .and_then(|offset| offset.checked_add(1))
                    .ok_or(TallyError::NumericOverflow("ballot number"))
            }
        }
    }

    /// Number the next ballot gets, given the highest number currently in the bundle
    pub fn next_ballot_number(&self, current_highest: Option<u32>) -> Result<u32, TallyError> {
        let first = self.first_number()?;
        let next = match current_highest {
            None => first,
            Some(highest) => highest
                .checked_add(1)
                .ok_or(TallyError::NumericOverflow("ballot number"))?,
        };

        if self.generation == BallotNumberGeneration::ContinuousForAllBundles {
            let size = self.continuous_size()?;
            // next - first is the index within the bundle's range
            if next.saturating_sub(first) >= size {
                return Err(TallyError::invalid_argument(format!(
                    "bundle {} is full ({} ballots)",
                    self.bundle_number, size
                )));
            }
        }

        Ok(next)
    }
}

/// Next bundle number for a result
///
/// Automatic numbers continue after the highest number ever issued, so a
/// number that once belonged to a deleted bundle is never handed out again.
/// Manual numbers are taken as given and may repeat.
pub fn next_bundle_number(
    mode: BundleNumberMode,
    highest_issued: u32,
    request: BundleNumberRequest,
) -> Result<u32, TallyError> {
    match (mode, request) {
        (BundleNumberMode::Automatic, BundleNumberRequest::Automatic) => highest_issued
            .checked_add(1)
            .ok_or(TallyError::NumericOverflow("bundle number")),
        (BundleNumberMode::Manual, BundleNumberRequest::Manual(number)) => {
            if number == 0 {
                return Err(TallyError::invalid_argument("bundle number must be positive"));
            }
            Ok(number)
        }
        (BundleNumberMode::Automatic, BundleNumberRequest::Manual(_)) => Err(
            TallyError::invalid_argument("bundle numbers are generated automatically for this result"),
        ),
        (BundleNumberMode::Manual, BundleNumberRequest::Automatic) => Err(
            TallyError::invalid_argument("a bundle number must be supplied for this result"),
        ),
    }
}
