//! Heuristic cost scoring for GraphQL documents.
//!
//! The analyzer tokenizes the document just enough to follow selection-set
//! nesting, count fields, and spot list fields. It never rejects input: empty,
//! malformed, or unbalanced documents still yield metrics with a score of at
//! least 1.

mod lexer;

use serde::{Deserialize, Serialize};

use lexer::{tokenize, Token};

/// Arguments that mark a field as a paginated list.
const PAGINATION_ARGS: &[&str] = &[
    "first", "last", "limit", "offset", "after", "before", "page", "pageSize", "take", "skip",
];

/// Depth above which fragments are recommended.
const FRAGMENT_DEPTH_THRESHOLD: usize = 4;

/// Field count above which selective field lists are recommended.
const FIELD_COUNT_THRESHOLD: usize = 15;

/// Complexity level derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ComplexityLevel {
    /// Level for a score: <20 LOW, <50 MEDIUM, <100 HIGH, else VERY_HIGH.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=19 => ComplexityLevel::Low,
            20..=49 => ComplexityLevel::Medium,
            50..=99 => ComplexityLevel::High,
            _ => ComplexityLevel::VeryHigh,
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityLevel::Low => write!(f, "LOW"),
            ComplexityLevel::Medium => write!(f, "MEDIUM"),
            ComplexityLevel::High => write!(f, "HIGH"),
            ComplexityLevel::VeryHigh => write!(f, "VERY_HIGH"),
        }
    }
}

/// Result of analyzing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    /// Maximum selection-set nesting.
    pub depth: usize,
    pub field_count: usize,
    /// Fields carrying pagination arguments.
    pub list_fields: usize,
    /// Fields that look like lists and select sub-fields without pagination arguments.
    pub unpaginated_lists: usize,
    pub complexity_score: u32,
    pub complexity_level: ComplexityLevel,
    pub recommendations: Vec<String>,
}

/// Tunable score weights.
///
/// The score is non-decreasing in depth, field count, and list fields for any
/// non-negative weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityWeights {
    pub depth_weight: u32,
    pub field_weight: u32,
    pub list_weight: u32,
    /// Nesting beyond this depth adds `deep_nesting_penalty` per level.
    pub deep_nesting_threshold: usize,
    pub deep_nesting_penalty: u32,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            depth_weight: 3,
            field_weight: 1,
            list_weight: 5,
            deep_nesting_threshold: 4,
            deep_nesting_penalty: 5,
        }
    }
}

/// Scores GraphQL documents.
#[derive(Debug, Clone, Default)]
pub struct ComplexityAnalyzer {
    weights: ComplexityWeights,
}

impl ComplexityAnalyzer {
    /// Create an analyzer with default weights.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an analyzer with custom weights.
    pub fn with_weights(weights: ComplexityWeights) -> Self {
        Self { weights }
    }

    /// Analyze a document. Never fails.
    pub fn analyze(&self, query_text: &str) -> ComplexityMetrics {
        let tokens = tokenize(query_text);
        let shape = scan(&tokens);
        let complexity_score = self.score(&shape);
        let complexity_level = ComplexityLevel::from_score(complexity_score);

        let mut metrics = ComplexityMetrics {
            depth: shape.depth,
            field_count: shape.field_count,
            list_fields: shape.list_fields,
            unpaginated_lists: shape.unpaginated_lists,
            complexity_score,
            complexity_level,
            recommendations: Vec::new(),
        };
        metrics.recommendations = recommendations(&metrics);
        metrics
    }

    fn score(&self, shape: &Shape) -> u32 {
        let w = &self.weights;
        let to_u32 = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);

        let mut score = to_u32(shape.depth)
            .saturating_mul(w.depth_weight)
            .saturating_add(to_u32(shape.field_count).saturating_mul(w.field_weight))
            .saturating_add(to_u32(shape.list_fields).saturating_mul(w.list_weight));

        if shape.depth > w.deep_nesting_threshold {
            let excess = to_u32(shape.depth - w.deep_nesting_threshold);
            score = score.saturating_add(excess.saturating_mul(w.deep_nesting_penalty));
        }

        score.max(1)
    }

    /// Collapse comments and insignificant whitespace into a canonical form.
    pub fn normalize(query_text: &str) -> String {
        tokenize(query_text)
            .iter()
            .map(Token::as_source)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Rough execution time bounds in milliseconds; non-decreasing in `score`.
    pub fn estimate_execution_time(score: u32) -> (u64, u64) {
        let score = u64::from(score);
        let min_ms = 10 + score * 2;
        let max_ms = match score {
            0..=19 => 100 + score * 5,
            20..=49 => 200 + score * 10,
            50..=99 => 700 + score * 20,
            _ => 2_700 + score * 40,
        };
        (min_ms, max_ms)
    }

    /// Optimization techniques suited to the metrics' level.
    pub fn suggest_optimizations(metrics: &ComplexityMetrics) -> Vec<String> {
        let mut suggestions = vec![
            "Cache responses for repeated polling of identical queries".to_string(),
        ];

        if metrics.complexity_level >= ComplexityLevel::Medium {
            suggestions.push("Extract shared selections into fragments".to_string());
        }
        if metrics.complexity_level >= ComplexityLevel::High {
            suggestions.push(
                "Batch nested lookups with a DataLoader-style loader to reduce fan-out"
                    .to_string(),
            );
            suggestions.push("Enforce a maximum query depth on the server".to_string());
        }
        if metrics.complexity_level == ComplexityLevel::VeryHigh {
            suggestions.push("Split the document into several smaller queries".to_string());
        }

        suggestions
    }
}

fn recommendations(metrics: &ComplexityMetrics) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.depth > FRAGMENT_DEPTH_THRESHOLD {
        out.push(format!(
            "Nesting depth {} exceeds {}; use fragments to flatten repeated selections",
            metrics.depth, FRAGMENT_DEPTH_THRESHOLD
        ));
    }
    if metrics.field_count > FIELD_COUNT_THRESHOLD {
        out.push(format!(
            "{} fields selected; request only the fields you need",
            metrics.field_count
        ));
    }
    if metrics.unpaginated_lists > 0 {
        out.push(format!(
            "{} list field(s) without pagination arguments; add first/limit to bound results",
            metrics.unpaginated_lists
        ));
    }
    if metrics.complexity_level == ComplexityLevel::VeryHigh {
        out.push("Very high complexity; consider splitting into smaller queries".to_string());
    }

    out
}

#[derive(Debug, Default)]
struct Shape {
    depth: usize,
    field_count: usize,
    list_fields: usize,
    unpaginated_lists: usize,
}

/// Field seen most recently at the current level, awaiting its selection set.
struct PendingField<'a> {
    name: &'a str,
    paginated: bool,
}

fn scan(tokens: &[Token]) -> Shape {
    let mut shape = Shape::default();
    let mut depth: usize = 0;
    let mut pending: Option<PendingField<'_>> = None;
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::LBrace => {
                depth += 1;
                shape.depth = shape.depth.max(depth);
                if let Some(field) = pending.take() {
                    if !field.paginated && looks_like_list(field.name) {
                        shape.unpaginated_lists += 1;
                    }
                }
            }
            Token::RBrace => {
                depth = depth.saturating_sub(1);
                pending = None;
            }
            Token::LParen => {
                let (end, paginated) = scan_arguments(tokens, i);
                if paginated {
                    if let Some(field) = pending.as_mut() {
                        if !field.paginated {
                            field.paginated = true;
                            shape.list_fields += 1;
                        }
                    }
                }
                i = end;
                continue;
            }
            Token::Spread => {
                // `...Name` or `... on Type`
                i += 1;
                if matches!(tokens.get(i), Some(Token::Ident(n)) if *n == "on") {
                    i += 1;
                }
                if matches!(tokens.get(i), Some(Token::Ident(_))) {
                    i += 1;
                }
                pending = None;
                continue;
            }
            Token::At | Token::Dollar => {
                i += 1;
                if matches!(tokens.get(i), Some(Token::Ident(_))) {
                    i += 1;
                }
                continue;
            }
            Token::Ident(name) if depth > 0 => {
                if matches!(tokens.get(i + 1), Some(Token::Colon)) {
                    // alias; the field name follows the colon
                    i += 2;
                    continue;
                }
                shape.field_count += 1;
                pending = Some(PendingField {
                    name: *name,
                    paginated: false,
                });
            }
            _ => {}
        }
        i += 1;
    }

    shape
}

/// Skip a parenthesized argument list starting at `start`.
///
/// Returns the index after the closing paren (or the end of input) and whether
/// a pagination argument appeared at the top level of the list.
fn scan_arguments(tokens: &[Token], start: usize) -> (usize, bool) {
    let mut level = 0usize;
    let mut paginated = false;
    let mut i = start;

    while i < tokens.len() {
        match &tokens[i] {
            Token::LParen => level += 1,
            Token::RParen => {
                level = level.saturating_sub(1);
                if level == 0 {
                    return (i + 1, paginated);
                }
            }
            Token::Ident(name) if level == 1 => {
                if matches!(tokens.get(i + 1), Some(Token::Colon))
                    && PAGINATION_ARGS.contains(name)
                {
                    paginated = true;
                }
            }
            _ => {}
        }
        i += 1;
    }

    (tokens.len(), paginated)
}

fn looks_like_list(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    name.ends_with("List")
        || name.ends_with("Connection")
        || name == "edges"
        || (name.len() > 3 && name.ends_with('s') && !name.ends_with("ss"))
}
