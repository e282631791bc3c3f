//! Simulation scenarios.

use rand::Rng;
use serde::Serialize;

use simplebank_common::MinorUnits;

/// How transfers are spread over customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Two customers sending back and forth. Every transfer contends for the
    /// same pair of rows from alternating directions.
    PingPong,
    /// Customer i pays customer i + 1, wrapping around.
    Ring,
    /// Random distinct pairs.
    Random,
}

/// One transfer to run, by customer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub from: usize,
    pub to: usize,
    pub amount: MinorUnits,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "ping-pong" => Ok(Scenario::PingPong),
            "ring" => Ok(Scenario::Ring),
            "random" => Ok(Scenario::Random),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Customers the scenario needs at least.
    pub fn min_customers(&self) -> usize {
        2
    }

    /// Plan `transfers` transfers over `customers` customers with amounts
    /// drawn from `1..=max_amount`.
    pub fn plan<R: Rng>(
        &self,
        rng: &mut R,
        customers: usize,
        transfers: usize,
        max_amount: MinorUnits,
    ) -> Vec<PlannedTransfer> {
        let max_amount = max_amount.max(1);

        (0..transfers)
            .map(|i| {
                let (from, to) = match self {
                    Scenario::PingPong if i % 2 == 0 => (0, 1),
                    Scenario::PingPong => (1, 0),
                    Scenario::Ring => (i % customers, (i + 1) % customers),
                    Scenario::Random => {
                        let from = rng.gen_range(0..customers);
                        // Shift by a non-zero offset so `to` never equals `from`.
                        let to = (from + rng.gen_range(1..customers)) % customers;
                        (from, to)
                    }
                };
                PlannedTransfer {
                    from,
                    to,
                    amount: rng.gen_range(1..=max_amount),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_load_by_name() {
        assert_eq!(Scenario::load("ping-pong").unwrap(), Scenario::PingPong);
        assert_eq!(Scenario::load("ring").unwrap(), Scenario::Ring);
        assert!(Scenario::load("chaos").is_err());
    }

    #[test]
    fn test_ping_pong_alternates() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = Scenario::PingPong.plan(&mut rng, 5, 4, 10);
        let pairs: Vec<_> = plan.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_ring_wraps() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = Scenario::Ring.plan(&mut rng, 3, 4, 10);
        let pairs: Vec<_> = plan.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 0), (0, 1)]);
    }

    #[test]
    fn test_random_never_pairs_an_account_with_itself() {
        let mut rng = StdRng::seed_from_u64(42);
        let plan = Scenario::Random.plan(&mut rng, 4, 500, 25);
        assert!(plan.iter().all(|t| t.from != t.to && t.from < 4 && t.to < 4));
        assert!(plan.iter().all(|t| (1..=25).contains(&t.amount)));
    }

    #[test]
    fn test_same_seed_same_plan() {
        let a = Scenario::Random.plan(&mut StdRng::seed_from_u64(1), 6, 50, 100);
        let b = Scenario::Random.plan(&mut StdRng::seed_from_u64(1), 6, 50, 100);
        assert_eq!(a, b);
    }
}
