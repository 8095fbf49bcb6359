//! Billing module
//!
//! Turns normalized usage into cost line items:
//! - CostAssembler: keyed usage items and provider billing items
//! - PostProcessor: split, overlap, allowance and pruning passes

pub mod assembler;
pub mod postprocess;

pub use assembler::CostAssembler;
pub use postprocess::{AllowanceRule, LeftoverRule, PostProcessConfig, PostProcessor, SplitRule};
