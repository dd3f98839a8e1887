//! Lexical sentiment classification for article text.
//!
//! A [`Classifier`] wraps a pluggable [`Scorer`] and turns its compound
//! polarity into a [`SentimentLabel`]:
//!
//! | compound score | label |
//! |----------------|-------|
//! | `>= 0.05` | positive |
//! | `<= -0.05` | negative |
//! | otherwise | neutral |
//!
//! Empty input is neutral with a score of exactly `0.0` and never reaches
//! the scorer. Scorer failures also degrade to neutral, so classification
//! cannot abort a batch.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::error::{ClassificationError, PipelineError};
use crate::models::{Sentiment, SentimentLabel, round4};

pub const POSITIVE_THRESHOLD: f64 = 0.05;
pub const NEGATIVE_THRESHOLD: f64 = -0.05;

/// Normalization constant for the compound score.
const ALPHA: f64 = 15.0;
const NEGATION_SCALAR: f64 = -0.74;
const BOOSTER_INCR: f64 = 0.293;
const EXCLAMATION_INCR: f64 = 0.292;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").unwrap());

/// Maps text to a compound polarity in `[-1.0, 1.0]`.
pub trait Scorer: Send + Sync {
    fn score(&self, text: &str) -> Result<f64, ClassificationError>;
}

/// Valence-lexicon scorer with negation, booster and emphasis handling.
///
/// Stateless: every call only reads the lexicon tables built in [`LexiconScorer::new`].
#[derive(Debug)]
pub struct LexiconScorer {
    valence: HashMap<&'static str, f64>,
    boosters: HashMap<&'static str, f64>,
    negators: HashSet<&'static str>,
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl LexiconScorer {
    pub fn new() -> Self {
        Self {
            valence: Self::build_valence(),
            boosters: Self::build_boosters(),
            negators: Self::build_negators(),
        }
    }

    fn build_valence() -> HashMap<&'static str, f64> {
        [
            // Performance
            ("profit", 1.9), ("profits", 1.9), ("profitable", 1.9), ("growth", 1.6),
            ("grow", 1.3), ("grew", 1.3), ("gain", 1.6), ("gains", 1.6),
            ("record", 1.2), ("beat", 1.3), ("beats", 1.3), ("surge", 1.7),
            ("surged", 1.7), ("soar", 1.9), ("soared", 1.9), ("rally", 1.5),
            ("rallied", 1.5), ("strong", 1.8), ("stronger", 1.8), ("robust", 1.6),
            ("boost", 1.5), ("boosted", 1.5), ("improve", 1.5), ("improved", 1.5),
            ("upgrade", 1.4), ("upgraded", 1.4), ("outperform", 1.7), ("exceeded", 1.4),
            // General positive
            ("good", 1.9), ("great", 3.1), ("excellent", 2.7), ("outstanding", 3.0),
            ("success", 2.7), ("successful", 2.8), ("positive", 2.6), ("optimistic", 2.3),
            ("confident", 2.2), ("win", 2.8), ("wins", 2.8), ("benefit", 2.0),
            ("opportunity", 1.8), ("innovative", 2.0), ("best", 3.2), ("happy", 2.7),
            // Performance, negative
            ("loss", -1.3), ("losses", -1.6), ("decline", -1.3), ("declined", -1.3),
            ("drop", -1.1), ("dropped", -1.1), ("fall", -1.0), ("fell", -1.0),
            ("plunge", -2.0), ("plunged", -2.0), ("slump", -1.9), ("tumble", -1.7),
            ("tumbled", -1.7), ("weak", -1.9), ("weaker", -1.9), ("miss", -1.2),
            ("missed", -1.2), ("downgrade", -1.5), ("downgraded", -1.5), ("recall", -1.3),
            ("lawsuit", -1.6), ("layoffs", -1.9), ("debt", -1.5), ("default", -1.8),
            // General negative
            ("bad", -2.5), ("terrible", -2.5), ("awful", -2.0), ("worst", -3.1),
            ("failure", -2.3), ("fail", -2.5), ("failed", -2.3), ("crisis", -3.1),
            ("bankruptcy", -2.6), ("bankrupt", -2.6), ("fraud", -2.8), ("risk", -1.1),
            ("risks", -1.1), ("concern", -1.0), ("concerns", -1.0), ("fear", -2.2),
            ("fears", -2.2), ("warning", -1.4), ("volatile", -1.0), ("uncertainty", -1.4),
            ("negative", -2.7), ("problem", -1.7), ("problems", -1.7), ("scandal", -2.8),
        ]
        .into_iter()
        .collect()
    }

    fn build_boosters() -> HashMap<&'static str, f64> {
        [
            ("very", BOOSTER_INCR), ("extremely", BOOSTER_INCR), ("sharply", BOOSTER_INCR),
            ("significantly", BOOSTER_INCR), ("hugely", BOOSTER_INCR), ("highly", BOOSTER_INCR),
            ("strongly", BOOSTER_INCR), ("really", BOOSTER_INCR), ("most", BOOSTER_INCR),
            ("slightly", -BOOSTER_INCR), ("somewhat", -BOOSTER_INCR), ("marginally", -BOOSTER_INCR),
            ("barely", -BOOSTER_INCR), ("little", -BOOSTER_INCR),
        ]
        .into_iter()
        .collect()
    }

    fn build_negators() -> HashSet<&'static str> {
        [
            "not", "no", "never", "none", "nor", "neither", "without", "cannot",
            "isn't", "wasn't", "aren't", "weren't", "don't", "doesn't", "didn't",
            "won't", "wouldn't", "can't", "couldn't", "shouldn't", "hasn't", "haven't",
        ]
        .into_iter()
        .collect()
    }

    fn token_valence(&self, tokens: &[String], i: usize, base: f64) -> f64 {
        let mut v = base;
        let window = tokens[i.saturating_sub(3)..i].iter().rev();
        for (distance, prev) in window.enumerate() {
            if let Some(b) = self.boosters.get(prev.as_str()) {
                let decay = 1.0 - 0.05 * distance as f64;
                v += b * decay * base.signum();
            }
        }
        if tokens[i.saturating_sub(3)..i]
            .iter()
            .any(|t| self.negators.contains(t.as_str()))
        {
            v *= NEGATION_SCALAR;
        }
        v
    }
}

impl Scorer for LexiconScorer {
    fn score(&self, text: &str) -> Result<f64, ClassificationError> {
        let lowered = text.to_lowercase();
        let tokens: Vec<String> = TOKEN
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect();

        let mut sum: f64 = tokens
            .iter()
            .enumerate()
            .filter_map(|(i, t)| self.valence.get(t.as_str()).map(|&base| self.token_valence(&tokens, i, base)))
            .sum();

        if sum != 0.0 {
            let exclamations = text.matches('!').count().min(4) as f64;
            sum += exclamations * EXCLAMATION_INCR * sum.signum();
        }

        let compound = sum / (sum * sum + ALPHA).sqrt();
        if !compound.is_finite() {
            return Err(ClassificationError::NonFinite(compound));
        }
        Ok(round4(compound.clamp(-1.0, 1.0)))
    }
}

/// Label for a compound score.
pub fn label_for(score: f64) -> SentimentLabel {
    if score >= POSITIVE_THRESHOLD {
        SentimentLabel::Positive
    } else if score <= NEGATIVE_THRESHOLD {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    }
}

/// Per-label totals of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentimentCounts {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl SentimentCounts {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
        }
    }
}

/// Sentiment classifier built once per run and shared immutably.
pub struct Classifier {
    scorer: Box<dyn Scorer>,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").finish_non_exhaustive()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Box::new(LexiconScorer::new()))
    }
}

impl Classifier {
    pub fn new(scorer: Box<dyn Scorer>) -> Self {
        Self { scorer }
    }

    /// Classify one text. Never fails.
    pub fn classify(&self, text: &str) -> Sentiment {
        if text.trim().is_empty() {
            return Sentiment::NEUTRAL;
        }
        match self.scorer.score(text) {
            Ok(score) if score.is_finite() => {
                let score = score.clamp(-1.0, 1.0);
                Sentiment {
                    label: label_for(score),
                    score,
                }
            }
            Ok(score) => {
                let err = PipelineError::Classification(ClassificationError::NonFinite(score));
                warn!(error = %err, "Sentiment scoring failed; using neutral");
                Sentiment::NEUTRAL
            }
            Err(e) => {
                warn!(error = %PipelineError::Classification(e), "Sentiment scoring failed; using neutral");
                Sentiment::NEUTRAL
            }
        }
    }

    /// Classify every text and report label totals.
    pub fn classify_batch<'a, I>(&self, texts: I) -> (Vec<Sentiment>, SentimentCounts)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = SentimentCounts::default();
        let results: Vec<Sentiment> = texts
            .into_iter()
            .map(|t| {
                let s = self.classify(t);
                counts.record(s.label);
                s
            })
            .collect();
        info!(
            positive = counts.positive,
            negative = counts.negative,
            neutral = counts.neutral,
            "Sentiment analysis complete"
        );
        (results, counts)
    }
}
