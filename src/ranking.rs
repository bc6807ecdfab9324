//! Pure hybrid-scoring arithmetic shared by the store backends.
//!
//! The Postgres backend evaluates these rules in SQL; the in-memory backend
//! evaluates them in process. Keeping the keyword lists, the noise pattern,
//! and the composite weights in one place stops the two from drifting apart.
//!
//! # Composite Score
//!
//! ```text
//! score = 0.80·sem_n + 0.15·lex_n + 0.05·tri_n + 0.10·bias − 0.07·noise
//! ```
//!
//! where `sem`, `lex`, and `tri` are max-normalized per query over the
//! candidate set, `bias ∈ {−1, 0, +1}` rewards scripts (and punishes plain
//! configuration) when the query asks for one, and `noise ∈ {0, 1}` marks
//! paths that live under sample/test/fixture-style directories.

use std::sync::OnceLock;

use regex::Regex;

/// Weight of the normalized summary-embedding similarity.
pub const W_SEM: f64 = 0.80;
/// Weight of the normalized weighted full-text relevance.
pub const W_LEX: f64 = 0.15;
/// Weight of the normalized path trigram similarity.
pub const W_TRI: f64 = 0.05;
/// Weight of the script bias term.
pub const W_BIAS: f64 = 0.10;
/// Weight of the noise penalty term.
pub const W_NOISE: f64 = 0.07;

/// Query substrings that signal the user is asking for runnable code.
pub const SCRIPT_KEYWORDS: &[&str] = &[
    "script", "scripts", "bash", "shell", "code", "program", "programs", "python", "cli",
];

/// Languages that count as runnable scripts for the bias term.
pub const SCRIPT_LANGUAGES: &[&str] = &["shell", "bash", "sh", "python", "py", "go"];

/// Languages that count as plain configuration for the bias term.
pub const CONFIG_LANGUAGES: &[&str] = &["yaml", "terraform", "tf", "json"];

/// Path segments (singular or plural) that mark a chunk as noise.
pub const NOISE_PATTERN: &str =
    r"(^|/)(sample|example|test|mock|fixture|tmp|temp|sandbox)s?(/|\.|$)";

/// True when the lowercased query contains any script keyword.
pub fn wants_script(query: &str) -> bool {
    let lq = query.to_lowercase();
    SCRIPT_KEYWORDS.iter().any(|kw| lq.contains(kw))
}

/// Script bias for a candidate: +1 for script languages, −1 for plain
/// configuration, 0 otherwise. Always 0 when the query did not ask for a
/// script.
pub fn script_bias(asked_script: bool, language: &str) -> f64 {
    if !asked_script {
        return 0.0;
    }
    if SCRIPT_LANGUAGES.contains(&language) {
        1.0
    } else if CONFIG_LANGUAGES.contains(&language) {
        -1.0
    } else {
        0.0
    }
}

fn noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NOISE_PATTERN).expect("noise pattern is valid"))
}

/// 1 when a path segment names the chunk as sample/example/test/mock/
/// fixture/tmp/temp/sandbox content, else 0.
pub fn noise_penalty(path: &str) -> f64 {
    if noise_regex().is_match(&path.to_lowercase()) {
        1.0
    } else {
        0.0
    }
}

/// The longest `[a-z0-9._-]+` token of the lowercased query (first wins on
/// ties); used as the trigram probe against candidate paths. Empty when the
/// query has no such token.
pub fn longest_token(query: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[a-z0-9._-]+").expect("token pattern is valid"));
    let mut longest = "";
    let lower = query.to_lowercase();
    for m in re.find_iter(&lower) {
        if m.as_str().len() > longest.len() {
            longest = m.as_str();
        }
    }
    longest.to_string()
}

/// Cosine similarity in `[-1, 1]`; 0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Semantic similarity signal: cosine similarity clamped to `[0, 1]`, or 0
/// when either vector is absent.
pub fn sem_sim(candidate_vec: Option<&[f32]>, query_vec: Option<&[f32]>) -> f64 {
    match (candidate_vec, query_vec) {
        (Some(c), Some(q)) => cosine_similarity(c, q).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Trigram similarity of two strings, following the pg_trgm recipe: each
/// alphanumeric word is padded with two leading and one trailing space, the
/// distinct 3-grams are collected, and the result is `|A∩B| / |A∪B|`.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.iter().filter(|t| tb.contains(*t)).count();
    let union = ta.len() + tb.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f64 / union as f64
    }
}

fn trigrams(s: &str) -> std::collections::BTreeSet<[char; 3]> {
    let mut out = std::collections::BTreeSet::new();
    let lower = s.to_lowercase();
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let padded: Vec<char> = std::iter::repeat(' ')
            .take(2)
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for w in padded.windows(3) {
            out.insert([w[0], w[1], w[2]]);
        }
    }
    out
}

/// Max-normalize a signal: `v / max`, or 0 when the per-query max is 0.
pub fn normalized(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        0.0
    }
}

/// The composite hybrid score over already-normalized signals.
pub fn composite(sem_n: f64, lex_n: f64, tri_n: f64, bias: f64, noise: f64) -> f64 {
    W_SEM * sem_n + W_LEX * lex_n + W_TRI * tri_n + W_BIAS * bias - W_NOISE * noise
}
