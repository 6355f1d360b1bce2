use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{
    CostFunction, Error, Executor, IterState, Problem, Solver, State, TerminationReason,
    TerminationStatus, KV,
};
use argmin::solver::brent::BrentOpt;
use serde::{Deserialize, Serialize};

use crate::config::SolverSettings;

/// Where a scalar search ended up
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchOutcome {
    /// Best parameter seen by the solver, `NaN` if it never evaluated a cost
    pub argmin: f64,
    /// Best cost seen by the solver
    pub cost: f64,
    /// Whether the solver stopped because it met its tolerance
    pub converged: bool,
    pub iterations: u64,
}

/// A one-dimensional minimiser
pub trait Minimiser {
    /// Minimise `problem`
    ///
    /// # Errors
    /// Any error raised by `problem` while computing a cost aborts the search and is returned
    /// unchanged.
    fn minimise<O>(&self, problem: O) -> Result<SearchOutcome, argmin::core::Error>
    where
        O: CostFunction<Param = f64, Output = f64>;
}

/// Brent's method restricted to the closed interval `[lower, upper]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundedSearch {
    pub lower: f64,
    pub upper: f64,
    tolerance: f64,
    max_iters: u64,
    trace: bool,
}

impl BoundedSearch {
    #[must_use]
    pub const fn new(lower: f64, upper: f64, settings: &SolverSettings) -> Self {
        Self {
            lower,
            upper,
            tolerance: settings.bounded_tolerance,
            max_iters: settings.bounded_max_iters,
            trace: settings.trace_solver,
        }
    }
}

impl Minimiser for BoundedSearch {
    fn minimise<O>(&self, problem: O) -> Result<SearchOutcome, argmin::core::Error>
    where
        O: CostFunction<Param = f64, Output = f64>,
    {
        let solver =
            BrentOpt::new(self.lower, self.upper).set_tolerance(f64::EPSILON.sqrt(), self.tolerance);

        let executor =
            Executor::new(problem, solver).configure(|state| state.max_iters(self.max_iters));
        let res = if self.trace {
            executor
                .add_observer(SlogLogger::term(), ObserverMode::Always)
                .run()?
        } else {
            executor.run()?
        };

        let state = res.state();
        Ok(SearchOutcome {
            argmin: state.get_best_param().copied().unwrap_or(f64::NAN),
            cost: state.get_best_cost(),
            converged: converged(state.get_termination_reason()),
            iterations: state.get_iter(),
        })
    }
}

type SimplexState = IterState<f64, (), (), (), f64>;

/// Nelder-Mead on the real line
///
/// The simplex is a pair of `(param, cost)` vertices kept best first. The search stops once the
/// vertices are within `param_tolerance` of each other and their costs within `cost_tolerance`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Simplex {
    start: [f64; 2],
    vertices: [(f64, f64); 2],
    param_tolerance: f64,
    cost_tolerance: f64,
}

impl Simplex {
    #[must_use]
    pub const fn new(start: [f64; 2], param_tolerance: f64, cost_tolerance: f64) -> Self {
        Self {
            start,
            vertices: [(f64::NAN, f64::NAN); 2],
            param_tolerance,
            cost_tolerance,
        }
    }

    fn order(a: (f64, f64), b: (f64, f64)) -> [(f64, f64); 2] {
        if b.1.total_cmp(&a.1).is_lt() {
            [b, a]
        } else {
            [a, b]
        }
    }
}

impl<O> Solver<O, SimplexState> for Simplex
where
    O: CostFunction<Param = f64, Output = f64>,
{
    const NAME: &'static str = "Nelder-Mead (1-D)";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: SimplexState,
    ) -> Result<(SimplexState, Option<KV>), Error> {
        let [a, b] = self.start;
        self.vertices = Self::order((a, problem.cost(&a)?), (b, problem.cost(&b)?));
        let (best, cost) = self.vertices[0];
        Ok((state.param(best).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: SimplexState,
    ) -> Result<(SimplexState, Option<KV>), Error> {
        let [(best, best_cost), (worst, worst_cost)] = self.vertices;

        let reflected = 2f64.mul_add(best, -worst);
        let reflected_cost = problem.cost(&reflected)?;

        let replacement = if reflected_cost < best_cost {
            let expanded = 3f64.mul_add(best, -2. * worst);
            let expanded_cost = problem.cost(&expanded)?;
            if expanded_cost < reflected_cost {
                (expanded, expanded_cost)
            } else {
                (reflected, reflected_cost)
            }
        } else if reflected_cost < worst_cost {
            let contracted = 1.5f64.mul_add(best, -0.5 * worst);
            let contracted_cost = problem.cost(&contracted)?;
            if contracted_cost <= reflected_cost {
                (contracted, contracted_cost)
            } else {
                let shrunk = 0.5f64.mul_add(worst - best, best);
                (shrunk, problem.cost(&shrunk)?)
            }
        } else {
            // With two vertices the inside contraction and the shrink step coincide
            let contracted = 0.5f64.mul_add(worst - best, best);
            (contracted, problem.cost(&contracted)?)
        };

        self.vertices = Self::order((best, best_cost), replacement);
        let (best, cost) = self.vertices[0];
        Ok((state.param(best).cost(cost), None))
    }

    fn terminate(&mut self, _state: &SimplexState) -> TerminationStatus {
        let [(best, best_cost), (worst, worst_cost)] = self.vertices;
        if (worst - best).abs() <= self.param_tolerance
            && (worst_cost - best_cost).abs() <= self.cost_tolerance
        {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}

/// Derivative-free Nelder-Mead simplex search seeded at `guess`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnboundedSearch {
    pub guess: f64,
    param_tolerance: f64,
    cost_tolerance: f64,
    max_iters: u64,
    trace: bool,
}

impl UnboundedSearch {
    #[must_use]
    pub const fn new(guess: f64, settings: &SolverSettings) -> Self {
        Self {
            guess,
            param_tolerance: settings.unbounded_param_tolerance,
            cost_tolerance: settings.unbounded_tolerance,
            max_iters: settings.unbounded_max_iters,
            trace: settings.trace_solver,
        }
    }

    /// The two vertices of the starting simplex
    ///
    /// The second vertex sits 5 % away from the guess, or at 0.00025 when the guess is zero.
    #[must_use]
    pub fn initial_simplex(&self) -> [f64; 2] {
        let second = if self.guess == 0. {
            0.000_25
        } else {
            self.guess * 1.05
        };
        [self.guess, second]
    }
}

impl Minimiser for UnboundedSearch {
    fn minimise<O>(&self, problem: O) -> Result<SearchOutcome, argmin::core::Error>
    where
        O: CostFunction<Param = f64, Output = f64>,
    {
        let solver = Simplex::new(
            self.initial_simplex(),
            self.param_tolerance,
            self.cost_tolerance,
        );

        let executor =
            Executor::new(problem, solver).configure(|state| state.max_iters(self.max_iters));
        let res = if self.trace {
            executor
                .add_observer(SlogLogger::term(), ObserverMode::Always)
                .run()?
        } else {
            executor.run()?
        };

        let state = res.state();
        Ok(SearchOutcome {
            argmin: state.get_best_param().copied().unwrap_or(f64::NAN),
            cost: state.get_best_cost(),
            converged: converged(state.get_termination_reason()),
            iterations: state.get_iter(),
        })
    }
}

/// The two interchangeable search strategies
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Strategy {
    Bounded(BoundedSearch),
    Unbounded(UnboundedSearch),
}

impl Minimiser for Strategy {
    fn minimise<O>(&self, problem: O) -> Result<SearchOutcome, argmin::core::Error>
    where
        O: CostFunction<Param = f64, Output = f64>,
    {
        match self {
            Self::Bounded(search) => search.minimise(problem),
            Self::Unbounded(search) => search.minimise(problem),
        }
    }
}

fn converged(reason: Option<&TerminationReason>) -> bool {
    matches!(reason, Some(TerminationReason::SolverConverged))
}

#[cfg(test)]
mod tests {
    use argmin::core::CostFunction;

    use super::{BoundedSearch, Minimiser, Strategy, UnboundedSearch};
    use crate::config::SolverSettings;

    struct Parabola {
        centre: f64,
    }

    impl CostFunction for Parabola {
        type Param = f64;
        type Output = f64;

        fn cost(&self, p: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
            Ok(1e3 * (p - self.centre).powi(2) + 2.)
        }
    }

    struct Undefined;

    impl CostFunction for Undefined {
        type Param = f64;
        type Output = f64;

        fn cost(&self, _p: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
            Err(argmin::core::Error::msg("no data"))
        }
    }

    #[test]
    fn bounded_search_finds_interior_minimum() {
        let settings = SolverSettings::default();
        let outcome = BoundedSearch::new(-4., 10., &settings)
            .minimise(Parabola { centre: 3.3 })
            .unwrap();
        assert!(outcome.converged);
        approx::assert_abs_diff_eq!(outcome.argmin, 3.3, epsilon = 1e-4);
        approx::assert_abs_diff_eq!(outcome.cost, 2., epsilon = 1e-4);
    }

    #[test]
    fn bounded_search_stops_at_the_nearest_bound() {
        let settings = SolverSettings::default();
        let outcome = BoundedSearch::new(5., 10., &settings)
            .minimise(Parabola { centre: 3.3 })
            .unwrap();
        approx::assert_abs_diff_eq!(outcome.argmin, 5., epsilon = 1e-4);
    }

    #[test]
    fn unbounded_search_finds_minimum_from_a_distant_guess() {
        let settings = SolverSettings::default();
        let outcome = UnboundedSearch::new(12., &settings)
            .minimise(Parabola { centre: -3.3 })
            .unwrap();
        assert!(outcome.converged);
        approx::assert_abs_diff_eq!(outcome.argmin, -3.3, epsilon = 1e-3);
    }

    #[test]
    fn simplex_collapses_onto_the_minimum_from_a_small_first_step() {
        let settings = SolverSettings::default();
        let outcome = UnboundedSearch::new(0., &settings)
            .minimise(Parabola { centre: 10.25 })
            .unwrap();
        assert!(outcome.converged);
        approx::assert_abs_diff_eq!(outcome.argmin, 10.25, epsilon = 1e-5);
    }

    #[test]
    fn simplex_reports_running_out_of_iterations() {
        let settings = SolverSettings {
            unbounded_max_iters: 5,
            ..SolverSettings::default()
        };
        let outcome = UnboundedSearch::new(0., &settings)
            .minimise(Parabola { centre: 10.25 })
            .unwrap();
        assert!(!outcome.converged);
        assert!(outcome.iterations <= 5);
    }

    #[test]
    fn zero_guess_gets_a_small_second_vertex() {
        let settings = SolverSettings::default();
        assert_eq!(
            UnboundedSearch::new(0., &settings).initial_simplex(),
            [0., 0.000_25]
        );
        let simplex = UnboundedSearch::new(20., &settings).initial_simplex();
        approx::assert_relative_eq!(simplex[1], 21.);
    }

    #[test]
    fn cost_errors_abort_either_strategy() {
        let settings = SolverSettings::default();
        for strategy in [
            Strategy::Bounded(BoundedSearch::new(0., 1., &settings)),
            Strategy::Unbounded(UnboundedSearch::new(0., &settings)),
        ] {
            assert!(strategy.minimise(Undefined).is_err());
        }
    }
}
