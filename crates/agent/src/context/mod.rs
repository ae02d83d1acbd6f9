//! Token-budgeted context window assembly.
//!
//! | Part | Source | Trim strategy |
//! |------|--------|---------------|
//! | System | configured persona | never trimmed |
//! | History | history store | oldest units dropped first |
//! | Current message | the request | never trimmed |

pub mod builder;
pub mod token;

pub use builder::ContextWindowBuilder;
pub use token::{RatioEstimator, TokenEstimator, shared_estimator};

#[cfg(feature = "exact-tokenizer")]
pub use token::TokenizerEstimator;
