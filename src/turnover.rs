/*!
Turnover

In every time step after the first, some individuals leave the population and
others join it. A fraction `r` of the previous population is replaced
regardless of growth; on top of that, a growing population gains and a
shrinking one loses exactly the difference between consecutive trajectory
values.

```rust
use model::population::PopulationTrajectory;
use model::turnover::schedule;

let trajectory = PopulationTrajectory::from(vec![100, 80, 80, 120]);
let turnover = schedule(&trajectory, 0.1).unwrap();
let counts: Vec<(u64, u64)> = turnover.steps().iter().map(|s| (s.remove, s.add)).collect();
assert_eq!(counts, vec![(20, 0), (8, 8), (8, 48)]);
```
 */
use crate::error::DomainError;
use crate::population::PopulationTrajectory;
use crate::rates::RateDistribution;
use crate::Steps;
use rand::Rng;
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turnover {
    pub remove: u64,
    pub add: u64,
}

/// Turnover for steps `2..=T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnoverSchedule {
    steps: Vec<Turnover>,
}

impl TurnoverSchedule {
    /// Turnover of the transition into step `t`, for `t >= 2`.
    pub fn at(&self, t: Steps) -> Turnover {
        self.steps[t as usize - 2]
    }

    pub fn steps(&self) -> &[Turnover] {
        &self.steps
    }
}

pub fn schedule(
    trajectory: &PopulationTrajectory,
    replacement_rate: f64,
) -> Result<TurnoverSchedule, DomainError> {
    if !(0. ..=1.).contains(&replacement_rate) {
        return Err(DomainError::InvalidParameter {
            name: "r".to_string(),
            value: replacement_rate,
            reason: "the replacement rate must lie in [0, 1]",
        });
    }
    let steps = trajectory
        .sizes()
        .windows(2)
        .map(|w| {
            let (before, after) = (w[0], w[1]);
            let churn = (before as f64 * replacement_rate).floor() as u64;
            if after < before {
                let loss = before - after;
                let remove = std::cmp::max(churn, loss);
                Turnover {
                    remove,
                    add: remove - loss,
                }
            } else {
                Turnover {
                    remove: churn,
                    add: churn + (after - before),
                }
            }
        })
        .collect();
    Ok(TurnoverSchedule { steps })
}

/// Draw a replacement rate and build the schedule from it.
pub fn draw_schedule<R: Rng + ?Sized>(
    trajectory: &PopulationTrajectory,
    replacement_rate: &RateDistribution,
    rng: &mut R,
) -> Result<TurnoverSchedule, DomainError> {
    let r = replacement_rate.draw("replacement rate", true, true, rng)?;
    schedule(trajectory, r)
}
