//! Natural-language description synthesis from extracted garment facts.

use std::fmt;

use crate::specification::SpecificationRecord;

/// A fact line handed to the synthesizer did not split as
/// `"field = value"`. The extractor cannot produce such a line, so seeing
/// this error means a caller bypassed it with malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFactError {
    fact: String,
}

impl MalformedFactError {
    /// The offending fact line.
    pub fn fact(&self) -> &str {
        &self.fact
    }
}

impl fmt::Display for MalformedFactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fact line {:?} is not of the form \"field = value\"", self.fact)
    }
}

impl std::error::Error for MalformedFactError {}

/// Renders the design-attribute sentence:
/// `"This garment includes: <label: value, ...>."`
///
/// Each fragment uses the final dotted-path segment with underscores
/// replaced by spaces, then `": value"`, capitalized as a whole.
pub fn compose_design_sentence(facts: &[String]) -> Result<String, MalformedFactError> {
    let mut fragments = Vec::with_capacity(facts.len());
    for fact in facts {
        let (field, value) = fact.split_once(" = ").ok_or_else(|| MalformedFactError {
            fact: fact.clone(),
        })?;
        let label = field.rsplit('.').next().unwrap_or(field).replace('_', " ");
        fragments.push(capitalize(&format!("{label}: {value}")));
    }
    Ok(format!("This garment includes: {}.", fragments.join(", ")))
}

/// Renders the construction sentence from panel names and stitch count.
pub fn compose_structure_sentence(spec: &SpecificationRecord) -> String {
    format!(
        "It consists of {} panels: {}. It includes {} stitched connections between panels.",
        spec.panel_count(),
        spec.panel_names().join(", "),
        spec.stitch_count()
    )
}

/// Full document description: design sentence, one space, construction
/// sentence.
pub fn synthesize_description(
    facts: &[String],
    spec: &SpecificationRecord,
) -> Result<String, MalformedFactError> {
    let design = compose_design_sentence(facts)?;
    let structure = compose_structure_sentence(spec);
    Ok(format!("{design} {structure}"))
}

/// Uppercases the first character and lowercases the rest, matching the
/// sentence-case convention the corpus was built with.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
