//! Consensus engine.
//!
//! Turns one run's vote set into a single Decision:
//!
//! 1. Drop errored votes. `NO_TRADE` ballots still count.
//! 2. No ballots left → zeroed `NO_TRADE`.
//! 3. `NO_TRADE` holds a plurality (ties included) → `NO_TRADE`.
//! 4. Otherwise YES vs NO by head count, then by summed confidence.
//!    A tie on both goes to YES.
//! 5. Price the majority side, compute EV and edge, size the stake.
//!
//! EV and edge are informational: they size the stake but never flip
//! the directional call.

use tracing::{debug, info};

use super::sizing::EdgeAnalysis;
use crate::types::{round_to, Choice, Decision, Market, Vote};

/// Price assumed for a side the market doesn't quote.
const DEFAULT_PRICE: f64 = 0.5;

/// Ballot counts for one vote set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub yes: usize,
    pub no: usize,
    pub no_trade: usize,
    pub errored: usize,
}

impl Tally {
    pub fn count(votes: &[Vote]) -> Self {
        votes.iter().fold(Self::default(), |mut t, v| {
            match (v.is_ballot(), v.choice) {
                (false, _) => t.errored += 1,
                (true, Choice::Yes) => t.yes += 1,
                (true, Choice::No) => t.no += 1,
                (true, Choice::NoTrade) => t.no_trade += 1,
            }
            t
        })
    }

    /// Ballots counted toward the decision.
    pub fn valid(&self) -> usize {
        self.yes + self.no + self.no_trade
    }

    fn for_choice(&self, choice: Choice) -> usize {
        match choice {
            Choice::Yes => self.yes,
            Choice::No => self.no,
            Choice::NoTrade => self.no_trade,
        }
    }
}

/// Everything the engine worked out, not just what gets stored.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub decision: Decision,
    pub tally: Tally,
    /// Present only for a directional call.
    pub analysis: Option<EdgeAnalysis>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Pick the directional winner. Only called when at least one side has
/// a ballot and `NO_TRADE` does not hold the plurality.
fn directional_winner(tally: &Tally, ballots: &[&Vote]) -> Choice {
    if tally.yes != tally.no {
        return if tally.yes > tally.no { Choice::Yes } else { Choice::No };
    }
    let sum = |c: Choice| -> f64 {
        ballots
            .iter()
            .filter(|v| v.choice == c)
            .map(|v| v.confidence)
            .sum()
    };
    let (yes_sum, no_sum) = (sum(Choice::Yes), sum(Choice::No));
    debug!(yes_sum, no_sum, "Head-count tie, breaking on summed confidence");
    if no_sum > yes_sum {
        Choice::No
    } else {
        Choice::Yes
    }
}

/// Compute the Decision for `market` from one complete vote set.
pub fn decide(market: &Market, votes: &[Vote]) -> ConsensusOutcome {
    let tally = Tally::count(votes);
    let ballots: Vec<&Vote> = votes.iter().filter(|v| v.is_ballot()).collect();
    let mut decision = Decision::no_trade(&market.id);

    if ballots.is_empty() {
        info!(market_id = %market.id, errored = tally.errored, "No valid ballots, NO_TRADE");
        return ConsensusOutcome {
            decision,
            tally,
            analysis: None,
        };
    }

    let total = ballots.len() as f64;

    if tally.no_trade >= tally.yes && tally.no_trade >= tally.no {
        decision.avg_confidence = round_to(mean(ballots.iter().map(|v| v.confidence)), 4);
        decision.agreement_ratio = round_to(tally.no_trade as f64 / total, 4);
        decision.current_odds = round_to(market.yes_price().unwrap_or(0.0), 4);
        info!(
            market_id = %market.id,
            yes = tally.yes,
            no = tally.no,
            no_trade = tally.no_trade,
            "NO_TRADE plurality"
        );
        return ConsensusOutcome {
            decision,
            tally,
            analysis: None,
        };
    }

    let winner = directional_winner(&tally, &ballots);
    let avg_confidence = mean(
        ballots
            .iter()
            .filter(|v| v.choice.is_directional())
            .map(|v| v.confidence),
    );
    let agreement_ratio = tally.for_choice(winner) as f64 / total;
    let ai_probability = mean(
        ballots
            .iter()
            .filter(|v| v.choice == winner)
            .map(|v| v.confidence),
    );

    let yes_price = market.yes_price().unwrap_or(DEFAULT_PRICE);
    let market_price = match winner {
        Choice::No => market.no_price().unwrap_or(DEFAULT_PRICE),
        _ => yes_price,
    };
    let analysis = EdgeAnalysis::new(ai_probability, market_price);

    decision.final_decision = winner;
    decision.avg_confidence = round_to(avg_confidence, 4);
    decision.agreement_ratio = round_to(agreement_ratio, 4);
    decision.bet_amount = analysis.stake();
    decision.bet_odds = round_to(market_price, 4);
    decision.current_odds = round_to(yes_price, 4);

    info!(
        market_id = %market.id,
        decision = %winner,
        ai_probability = round_to(ai_probability, 4),
        market_price = round_to(market_price, 4),
        ev = round_to(analysis.expected_value, 4),
        edge = round_to(analysis.edge, 4),
        bet_amount = decision.bet_amount,
        "Consensus reached"
    );

    ConsensusOutcome {
        decision,
        tally,
        analysis: Some(analysis),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
