//! Context-text extraction for form controls.
//!
//! Each control gets a ranked list of context candidates. Explicit labels
//! outrank table headers, which outrank adjacent text, placeholders and
//! generic nearby text. The index is built once per form so scoring stays
//! linear in the element count.

use crate::analyzer::structure::ElementInfo;
use serde::{Deserialize, Serialize};

/// Where a context text came from, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Label,
    TableHeader,
    AdjacentText,
    Placeholder,
    NearbyText,
}

impl ContextSource {
    /// Base confidence weight per source.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Label => 1.0,
            Self::TableHeader => 0.9,
            Self::AdjacentText => 0.6,
            Self::Placeholder => 0.7,
            Self::NearbyText => 0.4,
        }
    }
}

/// One ranked context candidate for a control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCandidate {
    pub text: String,
    pub source: ContextSource,
    pub confidence: f64,
}

/// Form-scoped context index.
#[derive(Debug, Clone, Default)]
pub struct ContextIndex {
    /// Candidates per element index, ranked best-first
    per_element: Vec<Vec<ContextCandidate>>,
}

const MAX_CONTEXT_LEN: usize = 120;

fn trimmed(text: &str) -> Option<String> {
    let t = text.trim();
    if t.is_empty() || t.chars().count() > MAX_CONTEXT_LEN {
        return None;
    }
    Some(t.to_string())
}

impl ContextIndex {
    /// Build the index for a form's controls.
    pub fn build(elements: &[ElementInfo]) -> Self {
        let per_element = elements.iter().map(Self::candidates_for).collect();
        Self { per_element }
    }

    fn candidates_for(el: &ElementInfo) -> Vec<ContextCandidate> {
        let mut out = Vec::new();
        if let Some(text) = trimmed(&el.label_text) {
            out.push(ContextCandidate {
                text,
                source: ContextSource::Label,
                confidence: ContextSource::Label.weight(),
            });
        }
        if let Some(text) = trimmed(&el.table_header) {
            out.push(ContextCandidate {
                text,
                source: ContextSource::TableHeader,
                confidence: ContextSource::TableHeader.weight(),
            });
        }
        if let Some(text) = trimmed(&el.placeholder) {
            out.push(ContextCandidate {
                text,
                source: ContextSource::Placeholder,
                confidence: ContextSource::Placeholder.weight(),
            });
        }
        if let Some(text) = trimmed(&el.associated_text) {
            out.push(ContextCandidate {
                text,
                source: ContextSource::AdjacentText,
                confidence: ContextSource::AdjacentText.weight(),
            });
        }
        // Nearby siblings lose confidence with distance.
        for (i, near) in el.nearby_text.iter().enumerate() {
            if let Some(text) = trimmed(near) {
                let decay = 1.0 - (i as f64 * 0.1).min(0.5);
                out.push(ContextCandidate {
                    text,
                    source: ContextSource::NearbyText,
                    confidence: ContextSource::NearbyText.weight() * decay,
                });
            }
        }
        out.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        out
    }

    /// Ranked candidates for an element index.
    pub fn contexts(&self, element_index: usize) -> &[ContextCandidate] {
        self.per_element
            .get(element_index)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The single best context text, if any.
    pub fn best_context(&self, element_index: usize) -> Option<&str> {
        self.contexts(element_index).first().map(|c| c.text.as_str())
    }

    /// All context texts joined and lowercased, for token matching.
    pub fn context_blob(&self, element_index: usize) -> String {
        self.contexts(element_index)
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn element() -> ElementInfo {
        ElementInfo {
            label_text: "メールアドレス".into(),
            placeholder: "taro@example.com".into(),
            associated_text: "ご連絡先のメールアドレスをご入力ください".into(),
            nearby_text: vec!["必須".into(), "半角英数".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_label_ranks_first() {
        let index = ContextIndex::build(&[element()]);
        assert_eq!(index.best_context(0), Some("メールアドレス"));
        let contexts = index.contexts(0);
        assert_eq!(contexts[0].source, ContextSource::Label);
    }

    #[test]
    fn test_table_header_outranks_placeholder() {
        let mut el = element();
        el.label_text.clear();
        el.table_header = "お名前".into();
        let index = ContextIndex::build(&[el]);
        assert_eq!(index.contexts(0)[0].source, ContextSource::TableHeader);
    }

    #[test]
    fn test_nearby_text_decays_with_distance() {
        let mut el = ElementInfo::default();
        el.nearby_text = vec!["first".into(), "second".into(), "third".into()];
        let index = ContextIndex::build(&[el]);
        let contexts = index.contexts(0);
        assert!(contexts[0].confidence > contexts[1].confidence);
        assert!(contexts[1].confidence > contexts[2].confidence);
    }

    #[test]
    fn test_overlong_text_is_dropped() {
        let mut el = ElementInfo::default();
        el.associated_text = "あ".repeat(500);
        let index = ContextIndex::build(&[el]);
        assert!(index.contexts(0).is_empty());
    }

    #[test]
    fn test_context_blob_is_lowercased() {
        let mut el = ElementInfo::default();
        el.label_text = "Email Address".into();
        let index = ContextIndex::build(&[el]);
        assert!(index.context_blob(0).contains("email address"));
    }
}
