//! Gradient training regimes.
//!
//! The stochastic regime adapts after every sample and retunes its adapt
//! rate between epochs. The batch regime is experimental: it is kept with
//! its documented formula and does not converge reliably.

use super::network::{cost, error_delta, Network, NetworkError};
use crate::config::TrainingConfig;
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One input vector and the outputs expected for it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub inputs: Vec<f64>,
    pub expected: Vec<f64>,
}

impl Sample {
    pub fn new(inputs: Vec<f64>, expected: Vec<f64>) -> Self {
        Self { inputs, expected }
    }
}

/// Outcome of a training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Epochs actually run
    pub epochs: usize,
    /// Average per-sample cost of the last epoch
    pub average_error: f64,
    /// Adapt rate in effect after the last epoch
    pub adapt_rate: f64,
    /// Error-delta sum of the last epoch
    pub error_delta_sum: f64,
    pub converged: bool,
}

/// Adapt-rate retuning state across epochs.
///
/// A stalled epoch raises the wanted rate by `stall_boost`, bounded by
/// `max_stall_factor`. The rate applied next is the smaller of the new and
/// the previous wanted rate.
struct RateSchedule {
    base: f64,
    wanted: f64,
    rate: f64,
    previous_average: f64,
    stalls: usize,
}

impl RateSchedule {
    fn new(base: f64) -> Self {
        Self {
            base,
            wanted: base,
            rate: base,
            previous_average: f64::INFINITY,
            stalls: 0,
        }
    }

    fn update(&mut self, average: f64, delta_sum: f64, config: &TrainingConfig) {
        let stalled = average > self.previous_average * (1.0 - config.stall_threshold)
            || delta_sum == 0.0;
        if stalled {
            self.stalls += 1;
        } else {
            self.stalls = 0;
        }

        let boost = (1.0 + config.stall_boost * self.stalls as f64).min(config.max_stall_factor);
        let new_wanted = self.base * boost;
        self.rate = new_wanted.min(self.wanted);
        self.wanted = new_wanted;
        self.previous_average = average;
    }
}

impl Network {
    /// Forward a sample and return its error vector
    fn sample_error(&mut self, sample: &Sample) -> Result<Array1<f64>, NetworkError> {
        self.process_slice(&sample.inputs)?;
        self.error_vector(&sample.expected)
    }

    /// Average per-sample cost without touching any parameter
    pub fn average_error(&mut self, samples: &[Sample]) -> Result<f64, NetworkError> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for sample in samples {
            total += cost(&self.sample_error(sample)?);
        }
        Ok(total / samples.len() as f64)
    }

    /// Stochastic regime: backward and adapt after every sample.
    ///
    /// Stops once the epoch average error is at or below
    /// `config.max_error`, or when the epoch budget runs out.
    pub fn train_stochastic<R: Rng + ?Sized>(
        &mut self,
        samples: &[Sample],
        config: &TrainingConfig,
        rng: &mut R,
    ) -> Result<TrainingReport, NetworkError> {
        self.finalize()?;
        let mut schedule = RateSchedule::new(config.learning_rate);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut report = TrainingReport {
            epochs: 0,
            average_error: f64::INFINITY,
            adapt_rate: schedule.rate,
            error_delta_sum: 0.0,
            converged: false,
        };

        if samples.is_empty() {
            report.average_error = 0.0;
            report.converged = true;
            return Ok(report);
        }

        for epoch in 1..=config.epochs {
            if config.shuffle {
                order.shuffle(rng);
            }

            let mut total = 0.0;
            let mut delta_sum = 0.0;
            for &i in &order {
                let error = self.sample_error(&samples[i])?;
                let c = cost(&error);
                total += c;
                if c < config.converged_cost {
                    continue;
                }
                delta_sum += self.backward_signal(&error_delta(&error, c), config.slippy)?;
                self.adapt(schedule.rate, config.momentum);
            }

            let average = total / samples.len() as f64;
            report.epochs = epoch;
            report.average_error = average;
            report.error_delta_sum = delta_sum;

            if average <= config.max_error {
                report.converged = true;
                break;
            }

            schedule.update(average, delta_sum, config);
            report.adapt_rate = schedule.rate;
            log::debug!(
                "epoch {}: average error {:.5}, delta sum {:.5}, adapt rate {:.4}",
                epoch,
                average,
                delta_sum,
                schedule.rate
            );
        }

        if report.converged {
            log::info!(
                "training converged after {} epochs (average error {:.5})",
                report.epochs,
                report.average_error
            );
        } else {
            log::info!(
                "training did not converge in {} epochs (average error {:.5})",
                report.epochs,
                report.average_error
            );
        }
        Ok(report)
    }

    /// Batch regime (experimental).
    ///
    /// Sums the error vectors of every sample into one cost and one delta,
    /// then re-forwards each sample and back-propagates that shared delta,
    /// adapting once per epoch.
    pub fn train_batch(
        &mut self,
        samples: &[Sample],
        config: &TrainingConfig,
    ) -> Result<TrainingReport, NetworkError> {
        self.finalize()?;
        let mut report = TrainingReport {
            epochs: 0,
            average_error: 0.0,
            adapt_rate: config.learning_rate,
            error_delta_sum: 0.0,
            converged: samples.is_empty(),
        };
        if samples.is_empty() {
            return Ok(report);
        }

        for epoch in 1..=config.epochs {
            let mut accumulated = Array1::<f64>::zeros(self.outputs().len());
            let mut total = 0.0;
            for sample in samples {
                let error = self.sample_error(sample)?;
                total += cost(&error);
                accumulated += &error;
            }

            let average = total / samples.len() as f64;
            report.epochs = epoch;
            report.average_error = average;
            if average <= config.max_error {
                report.converged = true;
                break;
            }

            let batch_cost = cost(&accumulated);
            let delta = error_delta(&accumulated, batch_cost);

            self.reset_corrections();
            let mut delta_sum = 0.0;
            for sample in samples {
                self.process_slice(&sample.inputs)?;
                delta_sum += self.accumulate_backward(&delta, config.slippy)?;
            }
            self.adapt(config.learning_rate, config.momentum);
            report.error_delta_sum = delta_sum;

            log::debug!(
                "batch epoch {}: average error {:.5}, batch cost {:.5}",
                epoch,
                average,
                batch_cost
            );
        }

        if !report.converged {
            log::info!(
                "batch training did not converge in {} epochs (average error {:.5})",
                report.epochs,
                report.average_error
            );
        }
        Ok(report)
    }
}
