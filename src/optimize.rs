//! Nonlinear least-squares and derivative-free minimizers
//!
//! [`levenberg_marquardt`] fits smooth models (the power-duration curves);
//! [`nelder_mead`] handles objectives with kinks such as the heart rate
//! recurrence. Both run under an explicit evaluation budget taken from
//! [`SolverConfig`].

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Solver limits and tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Levenberg–Marquardt iteration cap (default `200 * (n + 1)`)
    pub max_iterations: Option<usize>,

    /// Relative cost reduction below which LM stops
    pub ftol: f64,

    /// Relative step size below which LM stops
    pub xtol: f64,

    /// Gradient infinity norm below which LM stops
    pub gtol: f64,

    /// Nelder–Mead function evaluation cap (default `2000 * (n + 1)`)
    pub max_evaluations: Option<usize>,

    /// Nelder–Mead absolute simplex size tolerance
    pub xatol: f64,

    /// Nelder–Mead absolute objective spread tolerance
    pub fatol: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            max_evaluations: None,
            xatol: 1e-4,
            fatol: 1e-4,
        }
    }
}

/// A converged solution
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub params: Vec<f64>,

    /// Sum of squared residuals (LM) or objective value (Nelder–Mead)
    pub cost: f64,

    pub iterations: usize,

    pub evaluations: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverFailure {
    #[error("residuals are not finite at the starting point")]
    NonFiniteResiduals,

    #[error("{samples} samples cannot determine {parameters} parameters")]
    Underdetermined { samples: usize, parameters: usize },

    #[error("no convergence after {0} iterations")]
    BudgetExhausted(usize),

    #[error("normal equations are singular")]
    Singular,

    #[error("stalled away from a minimum (scaled gradient {0:.3e})")]
    Stalled(f64),
}

const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e16;
const DIAGONAL_FLOOR: f64 = 1e-12;
/// Largest cosine between a Jacobian column and the residuals at a stall
const STALL_GRADIENT: f64 = 1e-6;

fn sum_of_squares(residuals: &DVector<f64>) -> f64 {
    residuals.norm_squared()
}

fn all_finite(residuals: &DVector<f64>) -> bool {
    residuals.iter().all(|r| r.is_finite())
}

/// Largest `|Jⱼᵀr| / (‖Jⱼ‖·‖r‖)` over the columns; zero at a stationary point
fn scaled_gradient(gradient: &DVector<f64>, normal: &DMatrix<f64>, cost: f64) -> f64 {
    let residual_norm = cost.sqrt();
    gradient
        .iter()
        .enumerate()
        .map(|(j, g)| {
            let column_norm = normal[(j, j)].sqrt();
            if column_norm > 0.0 && residual_norm > 0.0 {
                g.abs() / (column_norm * residual_norm)
            } else {
                0.0
            }
        })
        .fold(0.0, f64::max)
}

/// Forward-difference Jacobian of the residual vector
fn jacobian<F>(residual_fn: &mut F, params: &[f64], residuals: &DVector<f64>) -> DMatrix<f64>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let m = residuals.len();
    let n = params.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut shifted = params.to_vec();

    for j in 0..n {
        let h = f64::EPSILON.sqrt() * params[j].abs().max(1.0);
        shifted[j] = params[j] + h;
        let perturbed = residual_fn(&shifted);
        shifted[j] = params[j];

        for i in 0..m {
            let derivative = (perturbed[i] - residuals[i]) / h;
            jac[(i, j)] = if derivative.is_finite() { derivative } else { 0.0 };
        }
    }

    jac
}

/// Minimize `sum(residual_fn(p)^2)` starting from `initial`
///
/// Marquardt-scaled damping: each step solves
/// `(JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr`, shrinking λ tenfold after an accepted
/// step and growing it tenfold after a rejected one.
pub fn levenberg_marquardt<F>(
    mut residual_fn: F,
    initial: &[f64],
    config: &SolverConfig,
) -> Result<Minimum, SolverFailure>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let n = initial.len();
    let mut params = initial.to_vec();
    let mut residuals = DVector::from_vec(residual_fn(&params));
    let mut evaluations = 1;

    if residuals.len() < n {
        return Err(SolverFailure::Underdetermined {
            samples: residuals.len(),
            parameters: n,
        });
    }
    if !all_finite(&residuals) {
        return Err(SolverFailure::NonFiniteResiduals);
    }

    let mut cost = sum_of_squares(&residuals);
    let initial_cost = cost;
    let max_iterations = config.max_iterations.unwrap_or(200 * (n + 1));
    let mut damping = INITIAL_DAMPING;

    for iteration in 0..max_iterations {
        if cost == 0.0 {
            return Ok(Minimum { params, cost, iterations: iteration, evaluations });
        }

        let jac = jacobian(&mut residual_fn, &params, &residuals);
        evaluations += n;

        let jt = jac.transpose();
        let normal = &jt * &jac;
        let gradient = &jt * &residuals;

        if gradient.amax() <= config.gtol {
            tracing::trace!(iteration, cost, "gradient below tolerance");
            return Ok(Minimum { params, cost, iterations: iteration, evaluations });
        }

        // Inner loop: raise damping until a step lowers the cost
        loop {
            let mut damped = normal.clone();
            for j in 0..n {
                damped[(j, j)] += damping * normal[(j, j)].max(DIAGONAL_FLOOR);
            }

            let rhs = -&gradient;
            let step = match damped.clone().cholesky() {
                Some(cholesky) => Some(cholesky.solve(&rhs)),
                None => damped.lu().solve(&rhs),
            };

            let Some(step) = step.filter(|s| s.iter().all(|v| v.is_finite())) else {
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    return Err(SolverFailure::Singular);
                }
                continue;
            };

            let trial: Vec<f64> = params.iter().zip(step.iter()).map(|(p, s)| p + s).collect();
            let trial_residuals = DVector::from_vec(residual_fn(&trial));
            evaluations += 1;

            let trial_cost = if all_finite(&trial_residuals) {
                sum_of_squares(&trial_residuals)
            } else {
                f64::INFINITY
            };

            if trial_cost < cost {
                let reduction = (cost - trial_cost) / cost;
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                let small_step = step.norm() <= config.xtol * (param_norm + config.xtol);

                params = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                damping = (damping / 10.0).max(1e-12);

                if reduction <= config.ftol || small_step {
                    tracing::trace!(iteration, cost, "converged");
                    return Ok(Minimum { params, cost, iterations: iteration + 1, evaluations });
                }
                break;
            }

            damping *= 10.0;
            if damping > MAX_DAMPING {
                // Even tiny steps fail: either a minimum at rounding level or a stall
                let scaled = scaled_gradient(&gradient, &normal, cost);
                if scaled <= STALL_GRADIENT || cost <= f64::EPSILON * initial_cost {
                    tracing::trace!(iteration, cost, scaled, "stationary point");
                    return Ok(Minimum { params, cost, iterations: iteration + 1, evaluations });
                }
                return Err(SolverFailure::Stalled(scaled));
            }
        }
    }

    Err(SolverFailure::BudgetExhausted(max_iterations))
}

// Simplex coefficients: reflection, expansion, contraction, shrink
const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

/// Minimize `objective` with the Nelder–Mead downhill simplex method
///
/// The starting simplex perturbs each coordinate by 5% (or 0.00025 when it
/// is zero). Stops once both the simplex extent and the spread of objective
/// values are within `xatol` and `fatol`.
pub fn nelder_mead<F>(
    mut objective: F,
    initial: &[f64],
    config: &SolverConfig,
) -> Result<Minimum, SolverFailure>
where
    F: FnMut(&[f64]) -> f64,
{
    let n = initial.len();
    let max_evaluations = config.max_evaluations.unwrap_or(2000 * (n + 1));
    let mut evaluations = 0usize;

    let mut evaluate = |x: &[f64], evaluations: &mut usize| {
        *evaluations += 1;
        let value = objective(x);
        if value.is_nan() {
            f64::INFINITY
        } else {
            value
        }
    };

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(initial.to_vec());
    for k in 0..n {
        let mut vertex = initial.to_vec();
        vertex[k] = if vertex[k] != 0.0 {
            (1.0 + NONZERO_DELTA) * vertex[k]
        } else {
            ZERO_DELTA
        };
        simplex.push(vertex);
    }

    let mut values: Vec<f64> = simplex.iter().map(|x| evaluate(x, &mut evaluations)).collect();
    if !values[0].is_finite() {
        return Err(SolverFailure::NonFiniteResiduals);
    }

    let mut iterations = 0usize;

    loop {
        // Order vertices best to worst
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let extent = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let spread = values[1..]
            .iter()
            .map(|f| (f - values[0]).abs())
            .fold(0.0, f64::max);

        if extent <= config.xatol && spread <= config.fatol {
            tracing::trace!(iterations, evaluations, cost = values[0], "simplex converged");
            return Ok(Minimum {
                params: simplex.swap_remove(0),
                cost: values[0],
                iterations,
                evaluations,
            });
        }

        if evaluations >= max_evaluations {
            return Err(SolverFailure::BudgetExhausted(iterations));
        }

        iterations += 1;

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();
        let blend = |a: f64, b: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| a * c + b * w)
                .collect()
        };

        let reflected = blend(1.0 + RHO, -RHO);
        let f_reflected = evaluate(&reflected, &mut evaluations);

        let mut shrink = false;

        if f_reflected < values[0] {
            let expanded = blend(1.0 + RHO * CHI, -RHO * CHI);
            let f_expanded = evaluate(&expanded, &mut evaluations);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
        } else if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
        } else if f_reflected < values[n] {
            let contracted = blend(1.0 + PSI * RHO, -PSI * RHO);
            let f_contracted = evaluate(&contracted, &mut evaluations);
            if f_contracted <= f_reflected {
                simplex[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        } else {
            let contracted = blend(1.0 - PSI, PSI);
            let f_contracted = evaluate(&contracted, &mut evaluations);
            if f_contracted < values[n] {
                simplex[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = simplex[0].clone();
            for j in 1..=n {
                for (x, b) in simplex[j].iter_mut().zip(&best) {
                    *x = b + SIGMA * (*x - b);
                }
                values[j] = evaluate(&simplex[j], &mut evaluations);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenberg_marquardt_linear() {
        // y = 3x + 2
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x + 2.0).collect();

        let minimum = levenberg_marquardt(
            |p: &[f64]| xs.iter().zip(&ys).map(|(x, y)| p[0] * x + p[1] - y).collect(),
            &[1.0, 0.0],
            &SolverConfig::default(),
        )
        .unwrap();

        assert!((minimum.params[0] - 3.0).abs() < 1e-6);
        assert!((minimum.params[1] - 2.0).abs() < 1e-6);
        assert!(minimum.cost < 1e-9);
    }

    #[test]
    fn test_levenberg_marquardt_exponential_decay() {
        let xs: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 * (-0.7 * x).exp()).collect();

        let minimum = levenberg_marquardt(
            |p: &[f64]| xs.iter().zip(&ys).map(|(x, y)| p[0] * (-p[1] * x).exp() - y).collect(),
            &[1.0, 0.1],
            &SolverConfig::default(),
        )
        .unwrap();

        assert!((minimum.params[0] - 5.0).abs() < 1e-5);
        assert!((minimum.params[1] - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_levenberg_marquardt_failures() {
        let config = SolverConfig::default();

        let result = levenberg_marquardt(|_p: &[f64]| vec![1.0], &[1.0, 2.0], &config);
        assert!(matches!(result, Err(SolverFailure::Underdetermined { samples: 1, parameters: 2 })));

        let result = levenberg_marquardt(|p: &[f64]| vec![p[0] / 0.0 - f64::INFINITY, 1.0], &[1.0], &config);
        assert_eq!(result, Err(SolverFailure::NonFiniteResiduals));
    }

    #[test]
    fn test_levenberg_marquardt_stall_is_an_error() {
        // Kinked residual: every damped step raises the cost but the gradient stays large
        let result = levenberg_marquardt(
            |p: &[f64]| vec![p[0].abs() + 1.0, p[0].abs() + 1.0],
            &[0.0],
            &SolverConfig::default(),
        );
        assert!(matches!(result, Err(SolverFailure::Stalled(g)) if g > 0.5));
    }

    #[test]
    fn test_levenberg_marquardt_budget() {
        let config = SolverConfig {
            max_iterations: Some(1),
            ..SolverConfig::default()
        };
        let xs: Vec<f64> = (1..30).map(|i| i as f64).collect();
        let result = levenberg_marquardt(
            |p: &[f64]| xs.iter().map(|x| p[0] * (-p[1] * x).exp() - 10.0 / x).collect(),
            &[1.0, 1.0],
            &config,
        );
        assert_eq!(result, Err(SolverFailure::BudgetExhausted(1)));
    }

    #[test]
    fn test_nelder_mead_rosenbrock() {
        let rosenbrock = |p: &[f64]| (1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0] * p[0]).powi(2);
        let config = SolverConfig {
            xatol: 1e-8,
            fatol: 1e-8,
            ..SolverConfig::default()
        };

        let minimum = nelder_mead(rosenbrock, &[-1.2, 1.0], &config).unwrap();

        assert!((minimum.params[0] - 1.0).abs() < 1e-3);
        assert!((minimum.params[1] - 1.0).abs() < 1e-3);
        assert!(minimum.evaluations <= 2000 * 3);
    }

    #[test]
    fn test_nelder_mead_zero_start() {
        let minimum = nelder_mead(
            |p: &[f64]| (p[0] - 0.5).powi(2) + p[1].powi(2),
            &[0.0, 0.0],
            &SolverConfig::default(),
        )
        .unwrap();

        assert!((minimum.params[0] - 0.5).abs() < 1e-2);
        assert!(minimum.params[1].abs() < 1e-2);
    }

    #[test]
    fn test_nelder_mead_budget() {
        let config = SolverConfig {
            max_evaluations: Some(10),
            xatol: 1e-12,
            fatol: 1e-12,
            ..SolverConfig::default()
        };
        let result = nelder_mead(|p: &[f64]| (p[0] - 100.0).powi(2), &[1.0], &config);
        assert!(matches!(result, Err(SolverFailure::BudgetExhausted(_))));
    }
}
