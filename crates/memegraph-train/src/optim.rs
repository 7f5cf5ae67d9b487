//! Optimizer over named candle variables, with serialisable state.
//!
//! One [`GraphOptimizer`] drives every trainable component of a bundle.
//! Variables are keyed by their qualified name (`graph.conv1.weight`), which
//! is also how moment buffers are stored on disk:
//!
//! ```text
//! graph.conv1.weight.exp_avg      Adam/AdamW first moment
//! graph.conv1.weight.exp_avg_sq   Adam/AdamW second moment
//! graph.conv1.weight.momentum     SGD momentum buffer
//! step                            update counter
//! ```
//!
//! Reference: Kingma & Ba (2014), "Adam: A Method for Stochastic
//! Optimization"; Loshchilov & Hutter (2019), "Decoupled Weight Decay
//! Regularization".

use std::collections::HashMap;
use std::path::Path;

use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor, Var};

use crate::config::{OptimizerConfig, OptimizerKind};
use crate::error::{Error, Result};

struct ParamState {
    name: String,
    var: Var,
    /// First moment, or the momentum buffer for SGD.
    exp_avg: Option<Tensor>,
    exp_avg_sq: Option<Tensor>,
}

/// SGD / Adam / AdamW over a fixed set of named variables.
pub struct GraphOptimizer {
    config: OptimizerConfig,
    params: Vec<ParamState>,
    step: u64,
}

impl GraphOptimizer {
    pub fn new(vars: Vec<(String, Var)>, config: OptimizerConfig) -> Self {
        let params = vars
            .into_iter()
            .map(|(name, var)| ParamState {
                name,
                var,
                exp_avg: None,
                exp_avg_sq: None,
            })
            .collect();
        Self {
            config,
            params,
            step: 0,
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.config.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    /// Updates applied so far.
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Number of variables being optimised.
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Backpropagate `loss` and apply one update.
    ///
    /// Gradients are computed fresh from `loss`, so there is nothing to zero
    /// between steps.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Apply one update from precomputed gradients. Variables without a
    /// gradient are left untouched.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step += 1;
        let t = self.step as i32;
        let OptimizerConfig {
            kind,
            learning_rate: lr,
            weight_decay: wd,
            momentum,
            beta1,
            beta2,
            eps,
        } = self.config.clone();

        for p in &mut self.params {
            let Some(grad) = grads.get(p.var.as_tensor()) else {
                continue;
            };
            let theta = p.var.as_tensor();

            match kind {
                OptimizerKind::Sgd => {
                    let mut g = grad.clone();
                    if wd > 0.0 {
                        g = (g + theta.affine(wd, 0.0)?)?;
                    }
                    if momentum > 0.0 {
                        g = match &p.exp_avg {
                            Some(buf) => (buf.affine(momentum, 0.0)? + g)?,
                            None => g,
                        };
                        p.exp_avg = Some(g.clone());
                    }
                    p.var.set(&(theta - g.affine(lr, 0.0)?)?)?;
                }
                OptimizerKind::Adam | OptimizerKind::AdamW => {
                    let mut g = grad.clone();
                    let mut theta = theta.clone();
                    if wd > 0.0 {
                        if kind == OptimizerKind::Adam {
                            g = (g + theta.affine(wd, 0.0)?)?;
                        } else {
                            theta = theta.affine(1.0 - lr * wd, 0.0)?;
                        }
                    }

                    let m = match &p.exp_avg {
                        Some(m) => (m.affine(beta1, 0.0)? + g.affine(1.0 - beta1, 0.0)?)?,
                        None => g.affine(1.0 - beta1, 0.0)?,
                    };
                    let v = match &p.exp_avg_sq {
                        Some(v) => (v.affine(beta2, 0.0)? + g.sqr()?.affine(1.0 - beta2, 0.0)?)?,
                        None => g.sqr()?.affine(1.0 - beta2, 0.0)?,
                    };

                    let m_hat = m.affine(1.0 / (1.0 - beta1.powi(t)), 0.0)?;
                    let v_hat = v.affine(1.0 / (1.0 - beta2.powi(t)), 0.0)?;
                    let update = m_hat.div(&(v_hat.sqrt()? + eps)?)?;
                    p.var.set(&(theta - update.affine(lr, 0.0)?)?)?;

                    p.exp_avg = Some(m);
                    p.exp_avg_sq = Some(v);
                }
            }
        }
        Ok(())
    }

    /// Moment buffers and the step counter, keyed as in the module docs.
    pub fn state_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let mut out = HashMap::new();
        out.insert("step".to_string(), Tensor::new(&[self.step as i64], &Device::Cpu)?);
        for p in &self.params {
            let first = match self.config.kind {
                OptimizerKind::Sgd => "momentum",
                _ => "exp_avg",
            };
            if let Some(m) = &p.exp_avg {
                out.insert(format!("{}.{first}", p.name), m.to_device(&Device::Cpu)?);
            }
            if let Some(v) = &p.exp_avg_sq {
                out.insert(format!("{}.exp_avg_sq", p.name), v.to_device(&Device::Cpu)?);
            }
        }
        Ok(out)
    }

    /// Write [`Self::state_tensors`] as safetensors.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        candle_core::safetensors::save(&self.state_tensors()?, path)?;
        Ok(())
    }

    /// Restore state written by [`Self::save`]. Buffers for variables this
    /// optimizer does not know are rejected.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let step = tensors
            .remove("step")
            .ok_or_else(|| Error::Checkpoint("optimizer state has no step counter".into()))?;
        self.step = step.to_vec1::<i64>()?.first().copied().unwrap_or(0).max(0) as u64;

        let first = match self.config.kind {
            OptimizerKind::Sgd => "momentum",
            _ => "exp_avg",
        };
        for p in &mut self.params {
            let device = p.var.device().clone();
            p.exp_avg = tensors
                .remove(&format!("{}.{first}", p.name))
                .map(|t| t.to_device(&device))
                .transpose()?;
            p.exp_avg_sq = tensors
                .remove(&format!("{}.exp_avg_sq", p.name))
                .map(|t| t.to_device(&device))
                .transpose()?;
        }
        if let Some(unknown) = tensors.keys().next() {
            return Err(Error::Checkpoint(format!("unknown optimizer buffer: {unknown}")));
        }
        Ok(())
    }
}
