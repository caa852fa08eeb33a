//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Sequence predictor port and built-in trend predictor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use mgrid_common::types::Channel;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PredictorError {
    #[error("expected a sequence of {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("sequence contains a non-finite value")]
    NonFiniteInput,
    #[error("predictor unavailable: {0}")]
    Unavailable(String),
}

/// One-step-ahead estimator over the last N reported values of a channel.
///
/// Implementations may be slow or remote; callers bound each call with a timeout.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, channel: Channel, sequence: &[f64]) -> Result<f64, PredictorError>;
}

/// Least-squares linear extrapolation to the next sample.
#[derive(Debug, Clone)]
pub struct TrendPredictor {
    window_length: usize,
}

impl TrendPredictor {
    pub fn new(window_length: usize) -> Self {
        Self { window_length }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    fn extrapolate(sequence: &[f64]) -> f64 {
        let n = sequence.len() as f64;
        if sequence.len() == 1 {
            return sequence[0];
        }
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = sequence.iter().sum::<f64>() / n;
        let (mut covariance, mut variance) = (0.0, 0.0);
        for (index, value) in sequence.iter().enumerate() {
            let dx = index as f64 - mean_x;
            covariance += dx * (value - mean_y);
            variance += dx * dx;
        }
        let slope = covariance / variance;
        mean_y + slope * (n - mean_x)
    }
}

#[async_trait]
impl Predictor for TrendPredictor {
    async fn predict(&self, _channel: Channel, sequence: &[f64]) -> Result<f64, PredictorError> {
        if sequence.len() != self.window_length || sequence.is_empty() {
            return Err(PredictorError::LengthMismatch {
                expected: self.window_length,
                actual: sequence.len(),
            });
        }
        if sequence.iter().any(|value| !value.is_finite()) {
            return Err(PredictorError::NonFiniteInput);
        }
        Ok(Self::extrapolate(sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extends_linear_trend() {
        let predictor = TrendPredictor::new(5);
        let rising = [230.0, 231.0, 232.0, 233.0, 234.0];
        let next = predictor.predict(Channel::Voltage, &rising).await.unwrap();
        assert!((next - 235.0).abs() < 1e-9);

        let flat = [50.0; 5];
        let next = predictor.predict(Channel::Frequency, &flat).await.unwrap();
        assert!((next - 50.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn single_value_window_repeats_last_value() {
        let predictor = TrendPredictor::new(1);
        assert_eq!(predictor.predict(Channel::Voltage, &[229.5]).await, Ok(229.5));
    }

    #[tokio::test]
    async fn rejects_wrong_length_and_nan() {
        let predictor = TrendPredictor::new(3);
        assert_eq!(
            predictor.predict(Channel::Voltage, &[1.0, 2.0]).await,
            Err(PredictorError::LengthMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            predictor
                .predict(Channel::Voltage, &[1.0, f64::NAN, 2.0])
                .await,
            Err(PredictorError::NonFiniteInput)
        );
        assert!(TrendPredictor::new(0)
            .predict(Channel::Voltage, &[])
            .await
            .is_err());
    }
}
