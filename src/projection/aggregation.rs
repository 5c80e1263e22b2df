use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::bundle::{BallotAnswer, BallotContent, BundleState};
use super::read_model::BundleSnapshot;

// ============================================================================
// Candidate Result Aggregation
// ============================================================================
//
// Tallies are a full replacement computed from the reviewed bundles of a
// result. Running it again over the same bundles gives the same numbers, in
// whatever order the bundles became reviewed.
//
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCounts {
    pub yes: u64,
    pub no: u64,
    pub unspecified: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTallies {
    /// Votes per candidate
    pub candidates: BTreeMap<Uuid, u64>,
    pub individual_votes: u64,
    pub empty_votes: u64,
    /// Candidate votes including individual votes
    pub total_candidate_votes: u64,
    /// Answers per question number
    pub questions: BTreeMap<u32, AnswerCounts>,
    pub reviewed_bundles: u32,
    pub reviewed_ballots: u64,
}

impl ResultTallies {
    pub fn candidate_votes(&self, candidate_id: Uuid) -> u64 {
        self.candidates.get(&candidate_id).copied().unwrap_or(0)
    }

    fn add_ballot(&mut self, ballot: &BallotContent) {
        self.reviewed_ballots += 1;
        match ballot {
            BallotContent::Election(election) => {
                for candidate in &election.candidates {
                    *self.candidates.entry(*candidate).or_default() += 1;
                }
                self.individual_votes += u64::from(election.individual_votes);
                self.empty_votes += u64::from(election.empty_votes);
                self.total_candidate_votes +=
                    election.candidates.len() as u64 + u64::from(election.individual_votes);
            }
            BallotContent::Vote(vote) => {
                for answer in &vote.answers {
                    let counts = self.questions.entry(answer.question_number).or_default();
                    match answer.answer {
                        BallotAnswer::Yes => counts.yes += 1,
                        BallotAnswer::No => counts.no += 1,
                        BallotAnswer::Unspecified => counts.unspecified += 1,
                    }
                }
            }
        }
    }
}

/// Sum over every bundle currently in `Reviewed`
pub fn recompute_tallies<'a>(bundles: impl IntoIterator<Item = &'a BundleSnapshot>) -> ResultTallies {
    let mut tallies = ResultTallies::default();

    for bundle in bundles.into_iter().filter(|b| b.state == BundleState::Reviewed) {
        tallies.reviewed_bundles += 1;
        for ballot in bundle.ballots.values() {
            tallies.add_ballot(ballot);
        }
    }

    tallies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bundle::{ElectionBallot, QuestionAnswer, VoteBallot};

    fn bundle(state: BundleState, ballots: Vec<BallotContent>) -> BundleSnapshot {
        let mut snapshot = BundleSnapshot::new(Uuid::new_v4(), 1, "erfasser".to_string(), None);
        snapshot.state = state;
        snapshot.ballots = ballots.into_iter().enumerate().map(|(i, b)| (i as u32 + 1, b)).collect();
        snapshot
    }

    fn election(candidates: &[Uuid], individual_votes: u32, empty_votes: u32) -> BallotContent {
        BallotContent::Election(ElectionBallot { candidates: candidates.to_vec(), individual_votes, empty_votes })
    }

    #[test]
    fn test_only_reviewed_bundles_count() {
        let anna = Uuid::new_v4();
        let bundles = vec![
            bundle(BundleState::Reviewed, vec![election(&[anna], 0, 1)]),
            bundle(BundleState::ReadyForReview, vec![election(&[anna], 0, 0)]),
            bundle(BundleState::Deleted, vec![election(&[anna], 0, 0)]),
        ];

        let tallies = recompute_tallies(&bundles);
        assert_eq!(tallies.candidate_votes(anna), 1);
        assert_eq!(tallies.empty_votes, 1);
        assert_eq!(tallies.reviewed_bundles, 1);
    }

    #[test]
    fn test_accumulated_and_individual_votes() {
        let anna = Uuid::new_v4();
        let ben = Uuid::new_v4();
        let bundles = vec![bundle(
            BundleState::Reviewed,
            vec![election(&[anna, anna, ben], 1, 0), election(&[ben], 0, 2)],
        )];

        let tallies = recompute_tallies(&bundles);
        assert_eq!(tallies.candidate_votes(anna), 2);
        assert_eq!(tallies.candidate_votes(ben), 2);
        assert_eq!(tallies.individual_votes, 1);
        assert_eq!(tallies.total_candidate_votes, 5);
        assert_eq!(tallies.reviewed_ballots, 2);
    }

    #[test]
    fn test_vote_answers_counted_per_question() {
        let ballots = vec![
            BallotContent::Vote(VoteBallot {
                answers: vec![
                    QuestionAnswer { question_number: 1, answer: BallotAnswer::Yes },
                    QuestionAnswer { question_number: 2, answer: BallotAnswer::Unspecified },
                ],
            }),
            BallotContent::Vote(VoteBallot {
                answers: vec![QuestionAnswer { question_number: 1, answer: BallotAnswer::No }],
            }),
        ];

        let tallies = recompute_tallies(&[bundle(BundleState::Reviewed, ballots)]);
        assert_eq!(tallies.questions[&1], AnswerCounts { yes: 1, no: 1, unspecified: 0 });
        assert_eq!(tallies.questions[&2], AnswerCounts { yes: 0, no: 0, unspecified: 1 });
    }

    #[test]
    fn test_order_does_not_matter() {
        let anna = Uuid::new_v4();
        let a = bundle(BundleState::Reviewed, vec![election(&[anna], 1, 0)]);
        let b = bundle(BundleState::Reviewed, vec![election(&[anna, anna], 0, 3)]);

        let forward = recompute_tallies([&a, &b]);
        let backward = recompute_tallies([&b, &a]);
        assert_eq!(forward, backward);
        assert_eq!(forward, recompute_tallies([&a, &b]));
    }
}
