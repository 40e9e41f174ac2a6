//! Structured prompt document IR.
//!
//! A [`Document`] is the unit the transform engine operates on: named
//! sections (goal, inputs, constraints, steps, acceptance criteria, output
//! format, examples) plus a metadata sidecar (assumptions, rationales,
//! quality score and signals).
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON deserializes with defaults for missing fields. A document is owned
//! exclusively by a single transform call; `Clone` gives callers snapshot
//! isolation when they want to keep the pre-transform input around.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Named sections of a prompt document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sections {
    /// What the prompt is asking for.
    pub goal: Option<String>,
    /// Inputs the task depends on.
    pub inputs: Vec<String>,
    /// Constraint lines the answer must honour.
    pub constraints: Vec<String>,
    /// Suggested solution steps.
    pub steps: Vec<String>,
    /// Acceptance criteria for the answer.
    pub acceptance_criteria: Vec<String>,
    /// Desired output format (e.g. `Markdown`).
    pub output_format: Option<String>,
    /// Few-shot examples.
    pub examples: Vec<Example>,
}

/// A single input/output example pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Example {
    /// Example input text.
    pub input: String,
    /// Expected output text.
    pub output: String,
}

/// Quality score and the signals it was derived from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quality {
    /// Composite score in `[0, 1]`, set by the scoring operator.
    pub score: Option<f64>,
    /// Individual quality signals (sorted map for deterministic output).
    pub signals: BTreeMap<String, Value>,
}

/// Metadata sidecar carried alongside the sections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Meta {
    /// Assumptions the transform made about the task.
    pub assumptions: Vec<String>,
    /// Rationales recorded by operators.
    pub rationales: Vec<String>,
    /// Quality score and signals.
    pub quality: Quality,
}

/// A structured prompt document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    /// Target model, when known.
    pub model: Option<String>,
    /// Domain category, when known.
    pub category: Option<String>,
    /// Ids of the packs that contributed to the plan this document ran under.
    pub packs_applied: Vec<String>,
    /// Named sections.
    pub sections: Sections,
    /// Metadata sidecar.
    pub meta: Meta,
}

impl Document {
    /// Create a document carrying only a goal.
    pub fn from_goal(goal: impl Into<String>) -> Self {
        Self {
            sections: Sections {
                goal: Some(goal.into()),
                ..Sections::default()
            },
            ..Self::default()
        }
    }

    /// Render the document as flat prompt text.
    ///
    /// Sections appear in a fixed order; empty sections are omitted; list
    /// sections are bulleted. Rendering the same document twice yields
    /// identical text.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(goal) = &self.sections.goal {
            parts.push(format!("Goal:\n{goal}"));
        }
        push_list(&mut parts, "Inputs", &self.sections.inputs);
        push_list(&mut parts, "Constraints", &self.sections.constraints);
        push_list(&mut parts, "Steps", &self.sections.steps);
        push_list(
            &mut parts,
            "Acceptance Criteria",
            &self.sections.acceptance_criteria,
        );
        if let Some(format) = &self.sections.output_format {
            parts.push(format!("Output Format:\n{format}"));
        }
        if !self.sections.examples.is_empty() {
            let rendered: Vec<String> = self
                .sections
                .examples
                .iter()
                .map(|e| format!("Input: {}\nOutput: {}", e.input, e.output))
                .collect();
            parts.push(format!("Examples:\n{}", rendered.join("\n\n")));
        }

        parts.join("\n\n")
    }
}

fn push_list(parts: &mut Vec<String>, header: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let bulleted: Vec<String> = items.iter().map(|i| format!("- {i}")).collect();
    parts.push(format!("{header}:\n{}", bulleted.join("\n")));
}
