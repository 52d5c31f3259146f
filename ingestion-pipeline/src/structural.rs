use serde::{Deserialize, Serialize};

use common::storage::types::document_chunk::ChunkMetadata;

/// Parsed hierarchy handed over by the ingestion collaborator for
/// formats with known structure (e.g. chapter / section / article).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralTree {
    pub sections: Vec<StructuralSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralSection {
    /// Section heading, e.g. "Chapter 4. Fire safety".
    pub label: String,
    #[serde(default)]
    pub subsections: Vec<StructuralSection>,
    #[serde(default)]
    pub units: Vec<StructuralUnit>,
}

/// Leaf unit of the hierarchy; becomes exactly one chunk regardless of
/// length, preserving citation fidelity over compression ratio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralUnit {
    /// Numeric identifier, e.g. "4.101".
    #[serde(default)]
    pub section_ref: Option<String>,
    /// Display label, e.g. "Article 4.101".
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub doc_subtype: Option<String>,
}

/// One structural chunk: full text plus the metadata it carries into
/// both indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Flattens the tree into one chunk per leaf unit, depth-first, so
/// chunk order follows document order.
pub fn chunk_structural_tree(tree: &StructuralTree) -> Vec<StructuralChunk> {
    let mut chunks = Vec::new();
    let mut path = Vec::new();

    for section in &tree.sections {
        walk_section(section, &mut path, &mut chunks);
    }

    chunks
}

fn walk_section<'a>(
    section: &'a StructuralSection,
    path: &mut Vec<&'a str>,
    chunks: &mut Vec<StructuralChunk>,
) {
    path.push(section.label.as_str());

    for unit in &section.units {
        chunks.push(unit_to_chunk(unit, path));
    }
    for subsection in &section.subsections {
        walk_section(subsection, path, chunks);
    }

    path.pop();
}

fn unit_to_chunk(unit: &StructuralUnit, path: &[&str]) -> StructuralChunk {
    let mut text = String::new();

    if let Some(label) = &unit.label {
        text.push_str(label);
        if let Some(title) = &unit.title {
            text.push(' ');
            text.push_str(title);
        }
        text.push('\n');
    }
    if !path.is_empty() {
        text.push_str(&format!("(Source: {})\n\n", path.join(" > ")));
    }
    text.push_str(unit.body.trim());

    let mut metadata = ChunkMetadata {
        categories: unit.categories.clone(),
        doc_subtype: unit.doc_subtype.clone(),
        themes: unit.themes.clone(),
        section_ref: unit.section_ref.clone(),
        section_label: unit.label.clone(),
        ..ChunkMetadata::default()
    };
    if !path.is_empty() {
        metadata
            .extra
            .insert("heading_path".to_owned(), path.join(" > "));
    }

    StructuralChunk {
        text: text.trim().to_owned(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(reference: &str, body: &str) -> StructuralUnit {
        StructuralUnit {
            section_ref: Some(reference.to_owned()),
            label: Some(format!("Article {reference}")),
            title: Some("Requirements".to_owned()),
            body: body.to_owned(),
            categories: vec!["residential".to_owned()],
            themes: vec!["fire-safety".to_owned()],
            doc_subtype: Some("new-build".to_owned()),
        }
    }

    fn sample_tree() -> StructuralTree {
        StructuralTree {
            sections: vec![StructuralSection {
                label: "Chapter 4. Fire safety".to_owned(),
                subsections: vec![StructuralSection {
                    label: "Section 4.1. Escape routes".to_owned(),
                    subsections: Vec::new(),
                    units: vec![unit("4.101", "Every dwelling needs an escape route.")],
                }],
                units: vec![unit("4.1", "General fire safety provisions apply.")],
            }],
        }
    }

    #[test]
    fn each_leaf_unit_becomes_exactly_one_chunk() {
        let chunks = chunk_structural_tree(&sample_tree());
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn chunks_follow_document_order() {
        let chunks = chunk_structural_tree(&sample_tree());
        assert_eq!(chunks[0].metadata.section_ref.as_deref(), Some("4.1"));
        assert_eq!(chunks[1].metadata.section_ref.as_deref(), Some("4.101"));
    }

    #[test]
    fn structural_labels_are_carried_as_metadata() {
        let chunks = chunk_structural_tree(&sample_tree());
        let leaf = &chunks[1];

        assert_eq!(leaf.metadata.section_label.as_deref(), Some("Article 4.101"));
        assert_eq!(leaf.metadata.categories, vec!["residential".to_owned()]);
        assert_eq!(leaf.metadata.doc_subtype.as_deref(), Some("new-build"));
        assert_eq!(
            leaf.metadata.extra.get("heading_path").map(String::as_str),
            Some("Chapter 4. Fire safety > Section 4.1. Escape routes")
        );
    }

    #[test]
    fn chunk_text_contains_label_context_and_body() {
        let chunks = chunk_structural_tree(&sample_tree());
        let leaf = &chunks[1];

        assert!(leaf.text.starts_with("Article 4.101 Requirements"));
        assert!(leaf.text.contains("(Source: Chapter 4. Fire safety > Section 4.1. Escape routes)"));
        assert!(leaf.text.ends_with("Every dwelling needs an escape route."));
    }

    #[test]
    fn long_units_are_not_split() {
        let long_body = "word ".repeat(2000);
        let tree = StructuralTree {
            sections: vec![StructuralSection {
                label: "Chapter 1".to_owned(),
                subsections: Vec::new(),
                units: vec![unit("1.1", &long_body)],
            }],
        };

        let chunks = chunk_structural_tree(&tree);
        assert_eq!(chunks.len(), 1, "structural units never split on length");
    }
}
