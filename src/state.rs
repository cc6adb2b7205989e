/*!
The parameter vector sampled by the MCMC loops, and its curvature matrix.

[`State`] wraps a [`nalgebra::DVector`] of `f64` together with a set of named
string-valued "extended properties" that travel with a sample but are not part
of the numeric vector (the sinks in [`crate::io`] carry them through to the
output). [`Tensor`] is the D×D curvature/Fisher-information matrix associated
with a state; the Riemannian sampler factorises it with a Cholesky
decomposition on every leapfrog step.

# Examples

```rust
use geodesic_mcmc::state::State;

let a = State::from_slice(&[1.0, 2.0]);
let b = State::from_slice(&[0.5, 0.5]);
let sum = &a + &b;
assert_eq!(sum[0], 1.5);
assert_eq!(a.norm2(), 5.0);
```
*/

use std::collections::BTreeMap;
use std::ops::{Add, Div, Index, IndexMut, Mul, Neg, Sub};

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::error::McmcError;

/// Cholesky factorisation of a [`Tensor`], used for solves against the Fisher
/// metric without ever forming an explicit inverse.
pub type TensorCholesky = Cholesky<f64, Dyn>;

/// An ordered vector of free parameters, of fixed dimension for a run.
///
/// Arithmetic is elementwise; binary operators carry the left-hand side's
/// extended properties, matching assignment semantics (a proposal copied from
/// the current state keeps its metadata until overwritten).
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    values: DVector<f64>,
    properties: BTreeMap<String, String>,
}

impl State {
    /// Creates a state from an owned coefficient vector.
    pub fn new(values: DVector<f64>) -> Self {
        Self {
            values,
            properties: BTreeMap::new(),
        }
    }

    /// Creates a state by copying a slice of coefficients.
    pub fn from_slice(values: &[f64]) -> Self {
        Self::new(DVector::from_column_slice(values))
    }

    /// A state of dimension `dim` with every coefficient zero.
    pub fn zeros(dim: usize) -> Self {
        Self::new(DVector::zeros(dim))
    }

    /// A zeroed state with the same dimension as `self` (no properties).
    pub fn zero_like(&self) -> Self {
        Self::zeros(self.len())
    }

    /// Sets every coefficient to zero, keeping dimension and properties.
    pub fn zero(&mut self) {
        self.values.fill(0.0);
    }

    /// Number of free parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.len() == 0
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        self.values.norm()
    }

    /// Squared Euclidean norm.
    pub fn norm2(&self) -> f64 {
        self.values.norm_squared()
    }

    /// Inner product with another state.
    pub fn dot(&self, other: &State) -> f64 {
        self.values.dot(&other.values)
    }

    /// True when every coefficient is finite.
    pub fn all_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// The underlying coefficient vector.
    pub fn vector(&self) -> &DVector<f64> {
        &self.values
    }

    /// Mutable access to the underlying coefficient vector.
    pub fn vector_mut(&mut self) -> &mut DVector<f64> {
        &mut self.values
    }

    /// Attaches (or overwrites) a named string-valued property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Looks up an extended property by name.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// All extended properties, in key order.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

macro_rules! state_binop {
    ($trait:ident, $method:ident, $apply:expr) => {
        impl $trait<&State> for &State {
            type Output = State;
            fn $method(self, rhs: &State) -> State {
                let apply: fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> = $apply;
                State {
                    values: apply(&self.values, &rhs.values),
                    properties: self.properties.clone(),
                }
            }
        }

        impl $trait<State> for State {
            type Output = State;
            fn $method(self, rhs: State) -> State {
                (&self).$method(&rhs)
            }
        }
    };
}

state_binop!(Add, add, |a, b| a + b);
state_binop!(Sub, sub, |a, b| a - b);
state_binop!(Mul, mul, |a, b| a.component_mul(b));
state_binop!(Div, div, |a, b| a.component_div(b));

impl Mul<f64> for &State {
    type Output = State;
    fn mul(self, scalar: f64) -> State {
        State {
            values: &self.values * scalar,
            properties: self.properties.clone(),
        }
    }
}

impl Div<f64> for &State {
    type Output = State;
    fn div(self, scalar: f64) -> State {
        State {
            values: &self.values / scalar,
            properties: self.properties.clone(),
        }
    }
}

impl Neg for &State {
    type Output = State;
    fn neg(self) -> State {
        self * -1.0
    }
}

impl Index<usize> for State {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.values[i]
    }
}

impl IndexMut<usize> for State {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.values[i]
    }
}

/// A D×D real matrix holding curvature (Fisher information) for a state.
///
/// Symmetric for true Fisher information. May be singular for degenerate
/// probability models, in which case [`Tensor::cholesky`] reports
/// [`McmcError::NotPositiveDefinite`] and the run is aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    matrix: DMatrix<f64>,
}

impl Tensor {
    /// A zeroed `dim` × `dim` tensor.
    pub fn zeros(dim: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(dim, dim),
        }
    }

    pub fn from_matrix(matrix: DMatrix<f64>) -> Self {
        assert_eq!(matrix.nrows(), matrix.ncols(), "curvature tensor must be square");
        Self { matrix }
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.matrix
    }

    /// Sets every entry to zero.
    pub fn zero(&mut self) {
        self.matrix.fill(0.0);
    }

    /// Adds another tensor elementwise.
    pub fn add_assign(&mut self, other: &Tensor) {
        self.matrix += &other.matrix;
    }

    /// Adds a constant to the diagonal (preconditioning for small or
    /// degenerate Fisher estimates).
    pub fn add_diagonal(&mut self, value: f64) {
        let dim = self.dim();
        for i in 0..dim {
            self.matrix[(i, i)] += value;
        }
    }

    pub fn trace(&self) -> f64 {
        self.matrix.trace()
    }

    /// Cholesky factorisation, failing for non-positive-definite curvature.
    pub fn cholesky(&self) -> Result<TensorCholesky, McmcError> {
        Cholesky::new(self.matrix.clone()).ok_or(McmcError::NotPositiveDefinite)
    }
}

impl Index<(usize, usize)> for Tensor {
    type Output = f64;
    fn index(&self, ij: (usize, usize)) -> &f64 {
        &self.matrix[ij]
    }
}

impl IndexMut<(usize, usize)> for Tensor {
    fn index_mut(&mut self, ij: (usize, usize)) -> &mut f64 {
        &mut self.matrix[ij]
    }
}

/// Natural log of the determinant of the factorised matrix, computed from the
/// Cholesky diagonal.
pub fn ln_determinant(chol: &TensorCholesky) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
}
