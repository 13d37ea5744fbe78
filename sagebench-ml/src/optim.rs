//! Optimizer contract and Adam.

use crate::error::MlError;
use crate::model::ParameterSet;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stateful parameter update rule.
pub trait Optimizer: Send {
    fn zero_grad(&mut self, params: &mut ParameterSet) {
        params.zero_grad();
    }

    fn step(&mut self, params: &mut ParameterSet) -> Result<(), MlError>;

    /// Opaque, serializable optimizer state.
    fn state_dict(&self) -> Result<Value, MlError>;

    fn load_state_dict(&mut self, state: Value) -> Result<(), MlError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Moments {
    m: ArrayD<f32>,
    v: ArrayD<f32>,
}

/// Adam with L2 weight decay added to the gradient.
///
/// θ_t = θ_{t-1} - lr · m̂_t / (√v̂_t + ε), with g_t = ∇θ + λ·θ_{t-1}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    moments: BTreeMap<String, Moments>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            t: 0,
            moments: BTreeMap::new(),
        }
    }

    /// Adam with the usual betas (0.9, 0.999) and ε = 1e-8.
    pub fn with_weight_decay(lr: f32, weight_decay: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, weight_decay)
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut ParameterSet) -> Result<(), MlError> {
        self.t += 1;
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2, eps, lr, wd) =
            (self.beta1, self.beta2, self.epsilon, self.lr, self.weight_decay);

        for (name, param) in params.iter_mut() {
            let moments = self.moments.entry(name.to_string()).or_insert_with(|| Moments {
                m: ArrayD::zeros(param.value.raw_dim()),
                v: ArrayD::zeros(param.value.raw_dim()),
            });
            if moments.m.shape() != param.value.shape() {
                return Err(MlError::training(format!(
                    "optimizer state for '{name}' does not match the parameter shape"
                )));
            }
            Zip::from(&mut param.value)
                .and(&param.grad)
                .and(&mut moments.m)
                .and(&mut moments.v)
                .for_each(|theta, &g, m, v| {
                    let g = g + wd * *theta;
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *theta -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn state_dict(&self) -> Result<Value, MlError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state_dict(&mut self, state: Value) -> Result<(), MlError> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn quadratic() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("x", array![3.0f32, -2.0].into_dyn());
        params
    }

    /// Gradient of 0.5·|x|².
    fn set_grad(params: &mut ParameterSet) {
        let p = params.get_mut("x").unwrap();
        p.grad = p.value.clone();
    }

    #[test]
    fn test_first_step_moves_by_lr() {
        let mut params = quadratic();
        let mut adam = Adam::with_weight_decay(0.1, 0.0);
        set_grad(&mut params);
        adam.step(&mut params).unwrap();
        let x = &params.get("x").unwrap().value;
        // First bias-corrected step is lr · sign(g).
        assert!((x[[0]] - 2.9).abs() < 1e-5);
        assert!((x[[1]] + 1.9).abs() < 1e-5);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut params = quadratic();
        let mut adam = Adam::with_weight_decay(0.05, 0.0);
        for _ in 0..500 {
            adam.zero_grad(&mut params);
            set_grad(&mut params);
            adam.step(&mut params).unwrap();
        }
        assert!(params.get("x").unwrap().value.iter().all(|v| v.abs() < 0.1));
    }

    #[test]
    fn test_state_dict_restores_moments() {
        let mut params = quadratic();
        let mut adam = Adam::with_weight_decay(0.1, 5e-4);
        set_grad(&mut params);
        adam.step(&mut params).unwrap();
        let state = adam.state_dict().unwrap();

        let mut restored = Adam::with_weight_decay(1.0, 0.0);
        restored.load_state_dict(state).unwrap();
        assert_eq!(restored.step_count(), 1);
        assert!((restored.lr() - 0.1).abs() < f32::EPSILON);

        let mut a = params.clone();
        let mut b = params;
        set_grad(&mut a);
        set_grad(&mut b);
        adam.step(&mut a).unwrap();
        restored.step(&mut b).unwrap();
        assert_eq!(a.get("x").unwrap().value, b.get("x").unwrap().value);
    }
}
