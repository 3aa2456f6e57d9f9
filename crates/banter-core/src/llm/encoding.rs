//! Text encodings used to measure token cost.
//!
//! The exact byte-pair encoding is swappable behind [`TextEncoder`]; the
//! bundled [`HeuristicEncoder`] approximates BPE piece counts without
//! shipping vocabulary files.

/// Encoding families of OpenAI-style models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
        }
    }

    /// Encoding for a model identifier. Unrecognized models use `cl100k_base`.
    pub fn for_model(model: &str) -> Self {
        const O200K_PREFIXES: [&str; 4] = ["gpt-4o", "gpt-4.1", "o1", "o3"];
        if O200K_PREFIXES.iter().any(|p| model.starts_with(p)) {
            Encoding::O200kBase
        } else {
            Encoding::Cl100kBase
        }
    }

    fn chars_per_piece(&self) -> usize {
        match self {
            Encoding::Cl100kBase => 4,
            Encoding::O200kBase => 5,
        }
    }
}

/// Measures how many tokens a text encodes to.
pub trait TextEncoder: Send + Sync {
    fn encode_len(&self, encoding: Encoding, text: &str) -> usize;
}

/// Approximate encoder.
///
/// ASCII letter/digit runs cost one token per `chars_per_piece` characters
/// (rounded up), every other non-whitespace character costs one token, and
/// whitespace folds into the following piece.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEncoder;

impl TextEncoder for HeuristicEncoder {
    fn encode_len(&self, encoding: Encoding, text: &str) -> usize {
        let per_piece = encoding.chars_per_piece();
        let mut tokens: usize = 0;
        let mut run: usize = 0;

        for ch in text.chars() {
            if ch.is_ascii_alphanumeric() {
                run += 1;
                continue;
            }
            tokens += run.div_ceil(per_piece);
            run = 0;
            if !ch.is_whitespace() {
                tokens += 1;
            }
        }
        tokens + run.div_ceil(per_piece)
    }
}
