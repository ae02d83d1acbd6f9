//! Token estimation.
//!
//! The default is a character-ratio heuristic: `ceil(chars / 3) + 4`, and 0
//! for empty text. English BPE tokenizers average ~4 characters per token,
//! so this over-counts prose; CJK and emoji-heavy text can reach one token
//! per character and is under-counted. Build with `exact-tokenizer` and set
//! `context.tokenizer_path` for exact counts.

use banter_config::ContextConfig;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Estimates the token cost of a piece of text.
///
/// Implementations must be monotone: appending text never lowers the cost.
pub trait TokenEstimator: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(&self, text: &str) -> usize;
}

/// `ceil(chars / chars_per_token) + margin`; empty text costs nothing.
#[derive(Debug, Clone, Copy)]
pub struct RatioEstimator {
    chars_per_token: usize,
    margin: usize,
}

impl RatioEstimator {
    pub fn new(chars_per_token: usize, margin: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            margin,
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.chars_per_token, config.token_margin)
    }
}

impl Default for RatioEstimator {
    fn default() -> Self {
        Self::new(3, 4)
    }
}

impl TokenEstimator for RatioEstimator {
    fn name(&self) -> &str {
        "ratio"
    }

    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.chars().count().div_ceil(self.chars_per_token) + self.margin
    }
}

/// Exact counts from a HuggingFace `tokenizer.json`.
#[cfg(feature = "exact-tokenizer")]
pub struct TokenizerEstimator {
    tokenizer: tokenizers::Tokenizer,
    fallback: RatioEstimator,
}

#[cfg(feature = "exact-tokenizer")]
impl TokenizerEstimator {
    pub fn from_file(path: &std::path::Path) -> Result<Self, String> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| format!("load tokenizer {}: {e}", path.display()))?;
        Ok(Self {
            tokenizer,
            fallback: RatioEstimator::default(),
        })
    }
}

#[cfg(feature = "exact-tokenizer")]
impl TokenEstimator for TokenizerEstimator {
    fn name(&self) -> &str {
        "tokenizer"
    }

    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(_) => self.fallback.estimate(text),
        }
    }
}

static SHARED: OnceLock<Arc<dyn TokenEstimator>> = OnceLock::new();

/// The process-wide estimator, chosen on first use.
///
/// An exact tokenizer wins when one is configured and loads; otherwise the
/// ratio estimator from `config` is used. Later calls return the first choice
/// regardless of their argument.
pub fn shared_estimator(config: &ContextConfig) -> Arc<dyn TokenEstimator> {
    SHARED.get_or_init(|| select_estimator(config)).clone()
}

fn select_estimator(config: &ContextConfig) -> Arc<dyn TokenEstimator> {
    if let Some(exact) = config.tokenizer_path.as_deref().and_then(load_exact) {
        return exact;
    }
    let ratio = RatioEstimator::from_config(config);
    info!(
        chars_per_token = ratio.chars_per_token,
        margin = ratio.margin,
        "Using ratio token estimate"
    );
    Arc::new(ratio)
}

#[cfg(feature = "exact-tokenizer")]
fn load_exact(path: &std::path::Path) -> Option<Arc<dyn TokenEstimator>> {
    match TokenizerEstimator::from_file(path) {
        Ok(estimator) => {
            info!(path = %path.display(), "Using exact tokenizer for token estimates");
            Some(Arc::new(estimator))
        }
        Err(e) => {
            warn!(error = %e, "Falling back to ratio token estimate");
            None
        }
    }
}

#[cfg(not(feature = "exact-tokenizer"))]
fn load_exact(path: &std::path::Path) -> Option<Arc<dyn TokenEstimator>> {
    warn!(
        path = %path.display(),
        "tokenizer_path ignored: built without the `exact-tokenizer` feature"
    );
    None
}
