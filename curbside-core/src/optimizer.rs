//! Second-stage estimation: minimize `Σ min(g, 0)²` over the payoff
//! parameters with a derivative-free Nelder-Mead simplex.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::config::ConfigError;
use crate::numbers::count_to_f64;
use crate::payoff::{LinearPayoff, Parameter};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;
const NONZERO_STEP: f64 = 0.05;
const ZERO_STEP: f64 = 0.000_25;

/// Bounds and tolerances for the simplex search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Defaults to `200 · n` for `n` parameters.
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Defaults to `200 · n` for `n` parameters.
    #[serde(default)]
    pub max_evaluations: Option<usize>,
    #[serde(default = "OptimizerConfig::default_tolerance")]
    pub x_tolerance: f64,
    #[serde(default = "OptimizerConfig::default_tolerance")]
    pub f_tolerance: f64,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub max_duration_secs: Option<f64>,
}

impl OptimizerConfig {
    const fn default_tolerance() -> f64 {
        1e-4
    }

    /// # Errors
    ///
    /// Rejects non-positive tolerances or time budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.x_tolerance > 0.0) {
            return Err(ConfigError::Tolerance {
                field: "optimizer.x_tolerance",
                value: self.x_tolerance,
            });
        }
        if !(self.f_tolerance > 0.0) {
            return Err(ConfigError::Tolerance {
                field: "optimizer.f_tolerance",
                value: self.f_tolerance,
            });
        }
        if let Some(secs) = self.max_duration_secs
            && !(secs > 0.0 && secs.is_finite())
        {
            return Err(ConfigError::Tolerance {
                field: "optimizer.max_duration_secs",
                value: secs,
            });
        }
        Ok(())
    }

    fn iteration_limit(&self, n: usize) -> usize {
        self.max_iterations.unwrap_or(200 * n.max(1))
    }

    fn evaluation_limit(&self, n: usize) -> usize {
        self.max_evaluations.unwrap_or(200 * n.max(1))
    }

    fn time_limit(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs_f64)
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_evaluations: None,
            x_tolerance: Self::default_tolerance(),
            f_tolerance: Self::default_tolerance(),
            max_duration_secs: None,
        }
    }
}

/// Why the simplex search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    MaxIterations,
    MaxEvaluations,
    TimeLimit,
}

impl Termination {
    #[must_use]
    pub const fn converged(self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Outcome of a minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub termination: Termination,
    pub iterations: usize,
    pub evaluations: usize,
}

struct Counted<F> {
    f: F,
    evaluations: usize,
}

impl<F: FnMut(&[f64]) -> f64> Counted<F> {
    fn call(&mut self, x: &[f64]) -> f64 {
        self.evaluations += 1;
        let value = (self.f)(x);
        if value.is_nan() { f64::INFINITY } else { value }
    }
}

/// Nelder-Mead minimization starting from `x0`.
///
/// The initial simplex moves each coordinate by 5% (or 0.00025 when zero).
/// Vertices are kept stably sorted, so equal values never displace an
/// earlier vertex and a flat objective returns `x0` unchanged.
pub fn nelder_mead<F: FnMut(&[f64]) -> f64>(
    f: F,
    x0: &[f64],
    config: &OptimizerConfig,
) -> Minimum {
    let n = x0.len();
    let mut objective = Counted { f, evaluations: 0 };
    if n == 0 {
        let value = objective.call(x0);
        return Minimum {
            x: Vec::new(),
            value,
            termination: Termination::Converged,
            iterations: 0,
            evaluations: objective.evaluations,
        };
    }

    let started = Instant::now();
    let max_iterations = config.iteration_limit(n);
    let max_evaluations = config.evaluation_limit(n);
    let time_limit = config.time_limit();

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    simplex.push((x0.to_vec(), objective.call(x0)));
    for i in 0..n {
        let mut vertex = x0.to_vec();
        vertex[i] = if vertex[i] == 0.0 {
            ZERO_STEP
        } else {
            (1.0 + NONZERO_STEP) * vertex[i]
        };
        let value = objective.call(&vertex);
        simplex.push((vertex, value));
    }
    sort_simplex(&mut simplex);

    let mut iterations = 0;
    let termination = loop {
        if has_converged(&simplex, config) {
            break Termination::Converged;
        }
        if iterations >= max_iterations {
            break Termination::MaxIterations;
        }
        if objective.evaluations >= max_evaluations {
            break Termination::MaxEvaluations;
        }
        if time_limit.is_some_and(|limit| started.elapsed() >= limit) {
            break Termination::TimeLimit;
        }

        let centroid = centroid(&simplex[..n]);
        let (worst, worst_value) = simplex[n].clone();
        let best_value = simplex[0].1;
        let second_worst_value = simplex[n - 1].1;

        let reflected = affine(&centroid, &worst, REFLECTION);
        let reflected_value = objective.call(&reflected);

        let mut shrink = false;
        if reflected_value < best_value {
            let expanded = affine(&centroid, &worst, REFLECTION * EXPANSION);
            let expanded_value = objective.call(&expanded);
            simplex[n] = if expanded_value < reflected_value {
                (expanded, expanded_value)
            } else {
                (reflected, reflected_value)
            };
        } else if reflected_value < second_worst_value {
            simplex[n] = (reflected, reflected_value);
        } else if reflected_value < worst_value {
            let outside = affine(&centroid, &worst, REFLECTION * CONTRACTION);
            let outside_value = objective.call(&outside);
            if outside_value <= reflected_value {
                simplex[n] = (outside, outside_value);
            } else {
                shrink = true;
            }
        } else {
            let inside = affine(&centroid, &worst, -CONTRACTION);
            let inside_value = objective.call(&inside);
            if inside_value < worst_value {
                simplex[n] = (inside, inside_value);
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = simplex[0].0.clone();
            for vertex in simplex.iter_mut().skip(1) {
                let moved: Vec<f64> = best
                    .iter()
                    .zip(&vertex.0)
                    .map(|(b, v)| b + SHRINK * (v - b))
                    .collect();
                let value = objective.call(&moved);
                *vertex = (moved, value);
            }
        }

        sort_simplex(&mut simplex);
        iterations += 1;
    };

    let (x, value) = simplex.swap_remove(0);
    Minimum {
        x,
        value,
        termination,
        iterations,
        evaluations: objective.evaluations,
    }
}

fn sort_simplex(simplex: &mut [(Vec<f64>, f64)]) {
    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
}

fn has_converged(simplex: &[(Vec<f64>, f64)], config: &OptimizerConfig) -> bool {
    let (best, best_value) = &simplex[0];
    let x_spread = simplex[1..]
        .iter()
        .flat_map(|(v, _)| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
        .fold(0.0_f64, f64::max);
    let f_spread = simplex[1..]
        .iter()
        .map(|(_, value)| (value - best_value).abs())
        .fold(0.0_f64, f64::max);
    x_spread <= config.x_tolerance && f_spread <= config.f_tolerance
}

fn centroid(vertices: &[(Vec<f64>, f64)]) -> Vec<f64> {
    let weight = 1.0 / count_to_f64(vertices.len());
    let mut out = vec![0.0; vertices[0].0.len()];
    for (vertex, _) in vertices {
        for (acc, value) in out.iter_mut().zip(vertex) {
            *acc += value * weight;
        }
    }
    out
}

/// `centroid + coefficient · (centroid - worst)`.
fn affine(centroid: &[f64], worst: &[f64], coefficient: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(worst)
        .map(|(c, w)| c + coefficient * (c - w))
        .collect()
}

/// Compiled `Σ min(g, 0)²` over a fixed parameter order.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentObjective {
    parameters: Vec<Parameter>,
    moments: Vec<(f64, Vec<(usize, f64)>)>,
}

impl MomentObjective {
    /// Collect every parameter appearing in any moment, in ascending order.
    #[must_use]
    pub fn new<'g, I>(moments: I) -> Self
    where
        I: IntoIterator<Item = &'g LinearPayoff>,
    {
        let moments: Vec<&LinearPayoff> = moments.into_iter().collect();
        let parameters: Vec<Parameter> = moments
            .iter()
            .flat_map(|g| g.parameters())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let compiled = moments
            .iter()
            .map(|g| {
                let terms = g
                    .terms()
                    .filter_map(|(p, c)| parameters.binary_search(&p).ok().map(|idx| (idx, c)))
                    .collect();
                (g.constant_term(), terms)
            })
            .collect();
        Self {
            parameters,
            moments: compiled,
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    #[must_use]
    pub fn moment_count(&self) -> usize {
        self.moments.len()
    }

    /// Objective value at `x`, ordered like [`Self::parameters`].
    #[must_use]
    pub fn value(&self, x: &[f64]) -> f64 {
        self.moments
            .iter()
            .map(|(constant, terms)| {
                let g = terms
                    .iter()
                    .fold(*constant, |acc, (idx, c)| acc + c * x[*idx]);
                let violation = g.min(0.0);
                violation * violation
            })
            .sum()
    }
}

/// Fitted parameters of one replicate.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub parameters: Vec<Parameter>,
    pub values: Vec<f64>,
    pub objective: f64,
    pub converged: bool,
    pub termination: Termination,
    pub iterations: usize,
    pub evaluations: usize,
}

impl OptimizationResult {
    /// Fitted value of `parameter`, if it appeared in the objective.
    #[must_use]
    pub fn value_of(&self, parameter: Parameter) -> Option<f64> {
        self.parameters
            .iter()
            .position(|p| *p == parameter)
            .map(|idx| self.values[idx])
    }
}

/// Minimize the moment objective from the all-ones vector.
#[must_use]
pub fn optimize<'g, I>(moments: I, config: &OptimizerConfig) -> OptimizationResult
where
    I: IntoIterator<Item = &'g LinearPayoff>,
{
    let objective = MomentObjective::new(moments);
    let x0 = vec![1.0; objective.parameters().len()];
    let minimum = nelder_mead(|x| objective.value(x), &x0, config);
    if !minimum.termination.converged() {
        log::warn!(
            "optimizer stopped without converging ({:?}) after {} iterations",
            minimum.termination,
            minimum.iterations
        );
    }
    OptimizationResult {
        parameters: objective.parameters().to_vec(),
        values: minimum.x,
        objective: minimum.value,
        converged: minimum.termination.converged(),
        termination: minimum.termination,
        iterations: minimum.iterations,
        evaluations: minimum.evaluations,
    }
}
