//! Derived-quantity engine.
//!
//! Computes figures of merit from parsed records:
//!
//! | Metric | Input | Rule |
//! |--------|-------|------|
//! | `breakdown_voltage` | I-V curve | |I| reaches the breakdown current (log-linear) |
//! | `leakage_current` | I-V curve | |I| at the reference bias |
//! | `full_depletion_voltage` | C-V curve | rising 1/C² line meets the plateau |
//! | `peak_field` | electric field | max |E| and its depth |
//! | `depletion_depth` | electric field | deepest |E| above a fraction of the peak on a cutline |
//! | `sheet_doping` | doping | integral of |N| along a cutline |
//!
//! Every metric is a pure function of its input records and a
//! [`MetricParams`](tcadana_core::MetricParams) value: identical inputs give
//! bit-identical results regardless of thread count.

pub mod cutline;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod metric;
pub mod rules;

pub use cutline::{Cutline, crop_field, crop_triangles, cutline};
pub use engine::{MetricEngine, MetricFailure, RunInputs, RunOutcome, evaluate_batch};
pub use error::{ComputationError, Result};
pub use metric::{MetricInput, MetricKind};
