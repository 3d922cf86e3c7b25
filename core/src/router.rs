//! Prompt classification and candidate-model resolution (§4.3).
//!
//! Two interchangeable classifiers are named in §4.3: a keyword table and a
//! model-assisted JSON classifier that falls back to the keyword table on
//! parse failure. Only the keyword classifier is implemented here — the
//! model-assisted path is a thin trait so a caller can plug one in without
//! touching the router's candidate-list logic, mirroring the teacher's
//! preference for small, swappable components over a single monolithic
//! classifier.

use shared::model::TaskCategory;
use std::collections::HashMap;

/// Result of classifying a prompt (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: TaskCategory,
    pub confidence: f64,
    pub reason: String,
}

/// A classifier that maps a prompt to a category. Implemented by
/// `KeywordClassifier`; a model-assisted implementation can wrap one as a
/// fallback without the router needing to know the difference.
pub trait Classifier: Send + Sync {
    fn classify(&self, prompt: &str) -> Classification;
}

/// Closed keyword table, one entry per category, in `TaskCategory::ALL`
/// order so ties break deterministically (§4.3).
pub struct KeywordClassifier {
    keywords: HashMap<TaskCategory, Vec<&'static str>>,
    fallback: TaskCategory,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let mut keywords = HashMap::new();
        keywords.insert(
            TaskCategory::Planning,
            vec!["plan", "roadmap", "strategy", "outline", "steps"],
        );
        keywords.insert(
            TaskCategory::Reasoning,
            vec!["why", "explain", "analyze", "reason", "because", "compare"],
        );
        keywords.insert(
            TaskCategory::Coding,
            vec!["code", "function", "bug", "implement", "refactor", "compile"],
        );
        keywords.insert(
            TaskCategory::Review,
            vec!["review", "critique", "feedback", "audit", "improve"],
        );
        keywords.insert(
            TaskCategory::Quick,
            vec!["quick", "short", "brief", "summary", "tldr"],
        );
        keywords.insert(
            TaskCategory::Vision,
            vec!["image", "photo", "picture", "screenshot", "diagram"],
        );
        keywords.insert(
            TaskCategory::ImageGen,
            vec!["generate image", "draw", "illustrate", "render an image"],
        );

        Self {
            keywords,
            fallback: TaskCategory::Quick,
        }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, prompt: &str) -> Classification {
        let lowercased = prompt.to_lowercase();
        let mut best: Option<(TaskCategory, usize)> = None;
        let mut total = 0usize;

        for category in TaskCategory::ALL {
            let Some(words) = self.keywords.get(&category) else {
                continue;
            };
            let score = words.iter().filter(|w| lowercased.contains(*w)).count();
            total += score;
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((category, score)),
            }
        }

        match best {
            Some((category, score)) if score > 0 => Classification {
                category,
                confidence: score as f64 / total as f64,
                reason: format!("keyword match ({score} hit(s))"),
            },
            _ => Classification {
                category: self.fallback,
                confidence: 1.0 / TaskCategory::ALL.len() as f64,
                reason: "no keyword matched; defaulted".to_string(),
            },
        }
    }
}

/// Parsed JSON payload a model-assisted classifier would return, per §4.3.
/// Kept here so an implementer has a concrete target shape even though no
/// model-assisted classifier ships in this crate.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ModelAssistedClassification {
    pub category: String,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Parses a model-assisted classifier's JSON output, falling back to the
/// keyword classifier on any parse failure or unknown category (§4.3).
pub fn parse_model_assisted(json: &str, prompt: &str, fallback: &dyn Classifier) -> Classification {
    let Ok(parsed) = serde_json::from_str::<ModelAssistedClassification>(json) else {
        return fallback.classify(prompt);
    };
    let Some(category) = TaskCategory::ALL.into_iter().find(|c| c.as_str() == parsed.category)
    else {
        return fallback.classify(prompt);
    };
    Classification {
        category,
        confidence: 1.0,
        reason: parsed.reasoning.unwrap_or_else(|| "model-assisted".to_string()),
    }
}

/// Maps `category → ordered candidate model list` via the static routing
/// table, prepending a deduplicated `preferredModel` when present (§4.3).
pub struct Router<C: Classifier> {
    classifier: C,
    routing: HashMap<TaskCategory, Vec<String>>,
}

impl<C: Classifier> Router<C> {
    pub fn new(classifier: C, routing: HashMap<TaskCategory, Vec<String>>) -> Self {
        Self { classifier, routing }
    }

    pub fn classify(&self, prompt: &str) -> Classification {
        self.classifier.classify(prompt)
    }

    /// Candidate model list for a category, with `preferred_model` (if any)
    /// prepended and de-duplicated.
    pub fn candidates(&self, category: TaskCategory, preferred_model: Option<&str>) -> Vec<String> {
        let base = self.routing.get(&category).cloned().unwrap_or_default();
        let Some(preferred) = preferred_model else {
            return base;
        };

        let mut out = Vec::with_capacity(base.len() + 1);
        out.push(preferred.to_string());
        for candidate in base {
            if candidate != preferred {
                out.push(candidate);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_classifier_picks_argmax_category() {
        let classifier = KeywordClassifier::default();
        let result = classifier.classify("please refactor this function and fix the bug");
        assert_eq!(result.category, TaskCategory::Coding);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn keyword_classifier_falls_back_when_nothing_matches() {
        let classifier = KeywordClassifier::default();
        let result = classifier.classify("zzz qqq xyz");
        assert_eq!(result.category, TaskCategory::Quick);
        assert_eq!(result.confidence, 1.0 / TaskCategory::ALL.len() as f64);
    }

    #[test]
    fn candidates_prepend_and_dedup_preferred_model() {
        let mut routing = HashMap::new();
        routing.insert(
            TaskCategory::Coding,
            vec!["a/one".to_string(), "b/two".to_string()],
        );
        let router = Router::new(KeywordClassifier::default(), routing);

        let candidates = router.candidates(TaskCategory::Coding, Some("b/two"));
        assert_eq!(candidates, vec!["b/two".to_string(), "a/one".to_string()]);

        let candidates = router.candidates(TaskCategory::Coding, Some("c/three"));
        assert_eq!(
            candidates,
            vec!["c/three".to_string(), "a/one".to_string(), "b/two".to_string()]
        );
    }

    #[test]
    fn model_assisted_falls_back_on_parse_failure() {
        let fallback = KeywordClassifier::default();
        let result = parse_model_assisted("not json", "refactor this bug", &fallback);
        assert_eq!(result.category, TaskCategory::Coding);
    }

    #[test]
    fn model_assisted_falls_back_on_unknown_category() {
        let fallback = KeywordClassifier::default();
        let result =
            parse_model_assisted(r#"{"category":"nonsense"}"#, "refactor this bug", &fallback);
        assert_eq!(result.category, TaskCategory::Coding);
    }
}
