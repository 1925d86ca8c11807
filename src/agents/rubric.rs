//! Weighted evaluation rubric used by the Critic.
//!
//! Each criterion is scored 0–5 by the model; the overall score is the
//! weighted sum scaled to 0–100.

use crate::models::CriterionScore;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Highest raw score a criterion can receive.
pub const MAX_CRITERION_SCORE: f64 = 5.0;

/// One rubric criterion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Criterion {
    /// Lowercase criterion name.
    pub name: String,
    /// Weight, normalized so a rubric's weights sum to 1.
    pub weight: f64,
    /// Question the criterion answers.
    #[serde(default)]
    pub description: String,
}

impl Criterion {
    /// Creates a criterion.
    #[must_use]
    pub fn new(name: &str, weight: f64, description: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            weight,
            description: description.to_string(),
        }
    }
}

/// An ordered, weighted set of criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    criteria: Vec<Criterion>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RubricFile {
    List(Vec<Criterion>),
    Map(BTreeMap<String, CriterionBody>),
}

#[derive(Deserialize)]
struct CriterionBody {
    weight: f64,
    #[serde(default)]
    description: String,
}

impl Rubric {
    /// Creates a rubric, normalizing the weights to sum to 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if there are no criteria, a name is
    /// blank or repeated, a weight is negative or non-finite, or all weights
    /// are zero.
    pub fn new(criteria: Vec<Criterion>) -> Result<Self> {
        if criteria.is_empty() {
            return Err(Error::InvalidInput(
                "rubric must have at least one criterion".to_string(),
            ));
        }
        for (i, c) in criteria.iter().enumerate() {
            if c.name.trim().is_empty() {
                return Err(Error::InvalidInput("criterion name must not be empty".to_string()));
            }
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "criterion '{}' has invalid weight {}",
                    c.name, c.weight
                )));
            }
            if criteria[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&c.name))
            {
                return Err(Error::InvalidInput(format!(
                    "criterion '{}' appears twice",
                    c.name
                )));
            }
        }

        let total: f64 = criteria.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return Err(Error::InvalidInput(
                "rubric weights must not all be zero".to_string(),
            ));
        }

        let criteria = criteria
            .into_iter()
            .map(|c| Criterion {
                name: c.name.trim().to_lowercase(),
                weight: c.weight / total,
                description: c.description,
            })
            .collect();
        Ok(Self { criteria })
    }

    /// Loads a rubric from a JSON file.
    ///
    /// Accepts a list of `{"name", "weight", "description"}` objects or a
    /// map of name to `{"weight", "description"}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, decoded or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_rubric".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let file: RubricFile = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidInput(format!("invalid rubric file: {e}")))?;
        let criteria = match file {
            RubricFile::List(list) => list,
            RubricFile::Map(map) => map
                .into_iter()
                .map(|(name, body)| Criterion::new(&name, body.weight, &body.description))
                .collect(),
        };
        Self::new(criteria)
    }

    /// Criteria in order.
    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Criterion names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|c| c.name.as_str())
    }

    /// Builds the per-criterion breakdown from raw scores keyed by name.
    ///
    /// Raw scores are clamped to 0–5.
    ///
    /// # Errors
    ///
    /// Returns the names of criteria with no score.
    pub fn breakdown(
        &self,
        raw: &BTreeMap<String, f64>,
    ) -> std::result::Result<Vec<CriterionScore>, Vec<String>> {
        let mut missing = Vec::new();
        let mut scores = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let value = raw
                .iter()
                .find(|(name, _)| name.trim().eq_ignore_ascii_case(&criterion.name))
                .map(|(_, v)| *v)
                .filter(|v| v.is_finite());
            match value {
                Some(v) => scores.push(CriterionScore {
                    name: criterion.name.clone(),
                    score: v.clamp(0.0, MAX_CRITERION_SCORE),
                    weight: criterion.weight,
                }),
                None => missing.push(criterion.name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(scores)
        } else {
            Err(missing)
        }
    }

    /// Overall score in 0–100: the weighted sum of raw scores times 20.
    #[must_use]
    pub fn score(scores: &[CriterionScore]) -> f64 {
        let weighted: f64 = scores.iter().map(|s| s.weight * s.score).sum();
        weighted * (100.0 / MAX_CRITERION_SCORE)
    }

    /// Renders the rubric for inclusion in a prompt.
    #[must_use]
    pub fn render(&self) -> String {
        self.criteria
            .iter()
            .map(|c| format!("- {} (weight {:.2}): {}", c.name, c.weight, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            criteria: vec![
                Criterion::new("clarity", 0.25, "Is the prompt clear and unambiguous?"),
                Criterion::new(
                    "specificity",
                    0.20,
                    "Is the prompt specific enough to generate the desired response?",
                ),
                Criterion::new("context", 0.15, "Does the prompt provide adequate context?"),
                Criterion::new(
                    "structure",
                    0.15,
                    "Is the prompt well-structured and organized?",
                ),
                Criterion::new(
                    "completeness",
                    0.15,
                    "Is the prompt complete with all necessary elements?",
                ),
                Criterion::new(
                    "effectiveness",
                    0.10,
                    "Is the prompt likely to be effective for its intended purpose?",
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn raw(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let rubric = Rubric::default();
        let total: f64 = rubric.criteria().iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(rubric.criteria().len(), 6);
    }

    #[test]
    fn test_perfect_scores_give_hundred() {
        let rubric = Rubric::default();
        let all: Vec<(&str, f64)> = rubric.names().map(|n| (n, 5.0)).collect();
        let scores = rubric.breakdown(&raw(&all)).unwrap();
        assert!((Rubric::score(&scores) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score() {
        let rubric = Rubric::default();
        let scores = rubric
            .breakdown(&raw(&[
                ("Clarity", 4.0),
                ("specificity", 3.0),
                ("context", 2.0),
                ("structure", 5.0),
                ("completeness", 1.0),
                ("effectiveness", 0.0),
            ]))
            .unwrap();
        // 0.25*4 + 0.2*3 + 0.15*2 + 0.15*5 + 0.15*1 = 2.8 -> 56
        assert!((Rubric::score(&scores) - 56.0).abs() < 1e-9);
    }

    #[test]
    fn test_breakdown_reports_missing() {
        let rubric = Rubric::default();
        let missing = rubric.breakdown(&raw(&[("clarity", 3.0)])).unwrap_err();
        assert_eq!(missing.len(), 5);
        assert!(missing.contains(&"effectiveness".to_string()));
    }

    #[test]
    fn test_breakdown_clamps() {
        let rubric = Rubric::new(vec![Criterion::new("only", 2.0, "")]).unwrap();
        let scores = rubric.breakdown(&raw(&[("only", 9.0)])).unwrap();
        assert!((scores[0].score - 5.0).abs() < f64::EPSILON);
        assert!((scores[0].weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_new_rejects_invalid() {
        assert!(Rubric::new(Vec::new()).is_err());
        assert!(Rubric::new(vec![Criterion::new("a", -1.0, "")]).is_err());
        assert!(Rubric::new(vec![Criterion::new("a", 0.0, "")]).is_err());
        assert!(
            Rubric::new(vec![Criterion::new("a", 1.0, ""), Criterion::new("A", 1.0, "")])
                .is_err()
        );
    }

    #[test]
    fn test_load_map_form() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"clarity": {{"weight": 3, "description": "clear?"}}, "tone": {{"weight": 1}}}}"#
        )
        .unwrap();
        let rubric = Rubric::load(file.path()).unwrap();
        let names: Vec<_> = rubric.names().collect();
        assert_eq!(names, ["clarity", "tone"]);
        assert!((rubric.criteria()[0].weight - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_load_list_form() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "Brevity", "weight": 1.0}}]"#).unwrap();
        let rubric = Rubric::load(file.path()).unwrap();
        assert_eq!(rubric.criteria()[0].name, "brevity");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Rubric::load(Path::new("/nonexistent/rubric.json")).is_err());
    }
}
