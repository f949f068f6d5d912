/*!
Observed frequencies

A dataset is a table of variant counts, one row per sampling phase, together
with the last time step of each phase and, for every phase after the first,
the number of time steps that contributed to its sample. It is validated once
on construction and never changes afterwards.

```rust
use model::dataset::FrequencyDataset;

let data = FrequencyDataset::new(
    None,
    vec![vec![5, 3, 0], vec![4, 2, 1]],
    vec![1, 10],
    vec![5],
)
.unwrap();
assert_eq!(data.variants_in_first_phase(), 2);
assert_eq!(data.target_frequencies().len(), 2);
```
 */
use crate::error::{InputError, ValidationError};
use crate::Steps;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// The on-disk form of a dataset, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDataset {
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    pub counts: Vec<Vec<i64>>,
    pub timestamps: Vec<i64>,
    pub durations: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyDataset {
    labels: Vec<String>,
    counts: Vec<Vec<u64>>,
    timestamps: Vec<Steps>,
    durations: Vec<Steps>,
    sample_sizes: Vec<u64>,
    /// Column indices of the variants with a positive count in phase 1.
    first_phase_variants: Vec<usize>,
    target: Vec<f64>,
}

impl FrequencyDataset {
    pub fn new(
        labels: Option<Vec<String>>,
        counts: Vec<Vec<i64>>,
        timestamps: Vec<i64>,
        durations: Vec<i64>,
    ) -> Result<Self, ValidationError> {
        let phases = counts.len();
        if phases < 2 {
            return Err(ValidationError::TooFewPhases(phases));
        }
        let width = counts[0].len();

        let mut checked: Vec<Vec<u64>> = Vec::with_capacity(phases);
        for (phase, row) in counts.iter().enumerate() {
            if row.len() != width {
                return Err(ValidationError::RaggedCounts {
                    phase,
                    expected: width,
                    found: row.len(),
                });
            }
            let mut r = Vec::with_capacity(width);
            for (variant, &count) in row.iter().enumerate() {
                if count < 0 {
                    return Err(ValidationError::NegativeCount {
                        phase,
                        variant,
                        count,
                    });
                }
                r.push(count as u64);
            }
            if r.iter().sum::<u64>() == 0 {
                return Err(ValidationError::EmptyPhase { phase });
            }
            checked.push(r);
        }

        if timestamps.len() != phases {
            return Err(ValidationError::TimestampCount {
                expected: phases,
                found: timestamps.len(),
            });
        }
        if timestamps[0] < 1 {
            return Err(ValidationError::TimestampBeforeStart(timestamps[0]));
        }
        for phase in 1..phases {
            if timestamps[phase] <= timestamps[phase - 1] {
                return Err(ValidationError::NonIncreasingTimestamps {
                    phase,
                    previous: timestamps[phase - 1],
                    timestamp: timestamps[phase],
                });
            }
        }

        if durations.len() != phases - 1 {
            return Err(ValidationError::DurationCount {
                expected: phases - 1,
                found: durations.len(),
            });
        }
        for (i, &duration) in durations.iter().enumerate() {
            let phase = i + 1;
            let gap = timestamps[phase] - timestamps[phase - 1];
            if duration < 1 || duration > gap {
                return Err(ValidationError::DurationOutOfRange {
                    phase,
                    duration,
                    gap,
                });
            }
        }

        let labels = match labels {
            None => (1..=width).map(|i| format!("v{}", i)).collect(),
            Some(l) => {
                if l.len() != width {
                    return Err(ValidationError::LabelCount {
                        expected: width,
                        found: l.len(),
                    });
                }
                l
            }
        };

        let sample_sizes: Vec<u64> = checked.iter().map(|row| row.iter().sum()).collect();
        let first_phase_variants: Vec<usize> = checked[0]
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(i, _)| i)
            .collect();

        // Variant-major: all later phases of one variant, then the next variant.
        let mut target = Vec::with_capacity(first_phase_variants.len() * (phases - 1));
        for &v in first_phase_variants.iter() {
            for phase in 1..phases {
                target.push(checked[phase][v] as f64 / sample_sizes[phase] as f64);
            }
        }

        Ok(FrequencyDataset {
            labels,
            counts: checked,
            timestamps: timestamps.iter().map(|&t| t as Steps).collect(),
            durations: durations.iter().map(|&d| d as Steps).collect(),
            sample_sizes,
            first_phase_variants,
            target,
        })
    }

    pub fn from_raw(raw: RawDataset) -> Result<Self, ValidationError> {
        FrequencyDataset::new(raw.labels, raw.counts, raw.timestamps, raw.durations)
    }

    /// Read a [`RawDataset`] from a JSON file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
        let file = File::open(path.as_ref())?;
        let raw: RawDataset = serde_json::from_reader(BufReader::new(file))?;
        Ok(FrequencyDataset::from_raw(raw)?)
    }

    pub fn phases(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn timestamps(&self) -> &[Steps] {
        &self.timestamps
    }

    /// Time-averaging window of phase `phase` (1-based over later phases:
    /// `duration(1)` belongs to the second phase).
    pub fn duration(&self, phase: usize) -> Steps {
        self.durations[phase - 1]
    }

    pub fn durations(&self) -> &[Steps] {
        &self.durations
    }

    /// The last time step of the last phase, which is also the length of a
    /// population trajectory.
    pub fn max_timestamp(&self) -> Steps {
        self.timestamps[self.timestamps.len() - 1]
    }

    pub fn sample_sizes(&self) -> &[u64] {
        &self.sample_sizes
    }

    /// Number of variants present in the first phase, `k`.
    pub fn variants_in_first_phase(&self) -> usize {
        self.first_phase_variants.len()
    }

    pub fn first_phase_variants(&self) -> &[usize] {
        &self.first_phase_variants
    }

    pub fn first_phase_labels(&self) -> Vec<&str> {
        self.first_phase_variants
            .iter()
            .map(|&v| self.labels[v].as_str())
            .collect()
    }

    /// Observed counts of the phase-1 variants in phase 1, in column order.
    pub fn first_phase_counts(&self) -> Vec<u64> {
        self.first_phase_variants
            .iter()
            .map(|&v| self.counts[0][v])
            .collect()
    }

    /// Relative frequencies of the phase-1 variants in phases 2..N,
    /// variant-major. This is the summary statistic simulations are compared
    /// against.
    pub fn target_frequencies(&self) -> &[f64] {
        &self.target
    }

    /// Length of the summary statistic, (phases - 1) × k.
    pub fn statistic_len(&self) -> usize {
        self.target.len()
    }
}
