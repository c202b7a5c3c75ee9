//! Activation functions and their derivatives.
//!
//! Every neuron carries one [`Activation`], resolved once when the neuron is
//! built. Besides the forward function and its first derivative, each kind
//! provides a *slippy* derivative: it matches the plain derivative wherever
//! that is non-zero, but inside a flat (saturated or dead) region it returns
//! a small slope whenever the requested correction would push the
//! pre-activation back into the active region. Units stuck in a flat region
//! can therefore still recover.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slope handed out by the slippy derivative inside a flat region
pub const SLIP: f64 = 0.01;

/// Negative-side slope of the leaky ReLU
pub const LEAK: f64 = 0.01;

/// Half width of the linear segment of the hard sigmoid
const HARD_SIGMOID_EDGE: f64 = 2.5;

/// Closed set of supported activation functions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Activation {
    Identity,
    #[default]
    Sigmoid,
    /// `clamp(0.2x + 0.5, 0, 1)`
    HardSigmoid,
    Tanh,
    /// `clamp(x, -1, 1)`
    HardTanh,
    Relu,
    LeakyRelu,
    Softsign,
    Gaussian,
}

impl Activation {
    /// All supported kinds, in identifier order
    pub const ALL: [Activation; 9] = [
        Activation::Identity,
        Activation::Sigmoid,
        Activation::HardSigmoid,
        Activation::Tanh,
        Activation::HardTanh,
        Activation::Relu,
        Activation::LeakyRelu,
        Activation::Softsign,
        Activation::Gaussian,
    ];

    /// Stable identifier used in serialized networks
    pub fn identifier(self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Sigmoid => "sigmoid",
            Activation::HardSigmoid => "hardSigmoid",
            Activation::Tanh => "tanh",
            Activation::HardTanh => "hardTanh",
            Activation::Relu => "relu",
            Activation::LeakyRelu => "leakyRelu",
            Activation::Softsign => "softsign",
            Activation::Gaussian => "gaussian",
        }
    }

    /// Forward function
    #[inline]
    pub fn activate(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
            Activation::Tanh => x.tanh(),
            Activation::HardTanh => x.clamp(-1.0, 1.0),
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAK * x
                }
            }
            Activation::Softsign => x / (1.0 + x.abs()),
            Activation::Gaussian => (-x * x).exp(),
        }
    }

    /// First derivative at pre-activation `x`
    #[inline]
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => {
                let s = Activation::Sigmoid.activate(x);
                s * (1.0 - s)
            }
            Activation::HardSigmoid => {
                if x > -HARD_SIGMOID_EDGE && x < HARD_SIGMOID_EDGE {
                    0.2
                } else {
                    0.0
                }
            }
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::HardTanh => {
                if x > -1.0 && x < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAK
                }
            }
            Activation::Softsign => {
                let d = 1.0 + x.abs();
                1.0 / (d * d)
            }
            Activation::Gaussian => -2.0 * x * (-x * x).exp(),
        }
    }

    /// Derivative that keeps a small slope in flat regions.
    ///
    /// `direction` is the correction signal the unit received: positive means
    /// the output should go down, negative means it should go up.
    #[inline]
    pub fn slippy_derivative(self, x: f64, direction: f64) -> f64 {
        let plain = self.derivative(x);
        if plain != 0.0 {
            return plain;
        }

        let escapes = match self {
            Activation::HardSigmoid => {
                (x <= -HARD_SIGMOID_EDGE && direction < 0.0)
                    || (x >= HARD_SIGMOID_EDGE && direction > 0.0)
            }
            Activation::HardTanh => (x <= -1.0 && direction < 0.0) || (x >= 1.0 && direction > 0.0),
            Activation::Relu => x <= 0.0 && direction < 0.0,
            _ => false,
        };

        if escapes {
            SLIP
        } else {
            plain
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Returned when an activation identifier is not in the catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown activation function: {0}")]
pub struct UnknownActivation(pub String);

impl FromStr for Activation {
    type Err = UnknownActivation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Activation::ALL
            .iter()
            .copied()
            .find(|a| a.identifier() == s)
            .ok_or_else(|| UnknownActivation(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_roundtrip() {
        for activation in Activation::ALL {
            let parsed: Activation = activation.identifier().parse().unwrap();
            assert_eq!(parsed, activation);
        }
    }

    #[test]
    fn test_unknown_identifier_fails() {
        let err = "swish".parse::<Activation>().unwrap_err();
        assert_eq!(err, UnknownActivation("swish".to_string()));
    }

    #[test]
    fn test_hard_sigmoid_shape() {
        let a = Activation::HardSigmoid;
        assert_eq!(a.activate(0.0), 0.5);
        assert_eq!(a.activate(-10.0), 0.0);
        assert_eq!(a.activate(10.0), 1.0);
        assert_eq!(a.derivative(0.0), 0.2);
        assert_eq!(a.derivative(3.0), 0.0);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let h = 1e-6;
        for activation in Activation::ALL {
            for &x in &[-1.7, -0.3, 0.4, 1.3] {
                let numeric = (activation.activate(x + h) - activation.activate(x - h)) / (2.0 * h);
                let analytic = activation.derivative(x);
                assert!(
                    (numeric - analytic).abs() < 1e-4,
                    "{} at {}: {} vs {}",
                    activation,
                    x,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_slippy_escapes_flat_region() {
        let relu = Activation::Relu;
        // Output should go up: the dead unit gets a slope
        assert_eq!(relu.slippy_derivative(-2.0, -1.0), SLIP);
        // Output should go down: stays dead
        assert_eq!(relu.slippy_derivative(-2.0, 1.0), 0.0);
        // Active region: plain derivative
        assert_eq!(relu.slippy_derivative(2.0, -1.0), 1.0);

        let hs = Activation::HardSigmoid;
        assert_eq!(hs.slippy_derivative(5.0, 1.0), SLIP);
        assert_eq!(hs.slippy_derivative(5.0, -1.0), 0.0);
    }

    #[test]
    fn test_slippy_hard_tanh_edges() {
        let ht = Activation::HardTanh;
        // Saturated low: only an upward push escapes
        assert_eq!(ht.slippy_derivative(-1.0, -1.0), SLIP);
        assert_eq!(ht.slippy_derivative(-3.0, -0.5), SLIP);
        assert_eq!(ht.slippy_derivative(-3.0, 0.5), 0.0);
        // Saturated high: only a downward push escapes
        assert_eq!(ht.slippy_derivative(1.0, 1.0), SLIP);
        assert_eq!(ht.slippy_derivative(3.0, 0.5), SLIP);
        assert_eq!(ht.slippy_derivative(3.0, -0.5), 0.0);
        // Inside the band the plain slope wins
        assert_eq!(ht.slippy_derivative(0.5, -1.0), 1.0);
    }
}
