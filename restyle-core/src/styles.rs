//! Predefined room styles.
//!
//! The catalog is fixed at compile time. Each entry carries the prompt that replaces any free
//! text the user typed, and the hosted model that renders it.

use serde::Serialize;

/// Models the hosted backend can route a request to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostedModel {
    /// Mask-driven edit. Runs on the whole image when no mask is given.
    #[default]
    IdeogramEdit,
    /// Whole-image restyle. A mask is never sent.
    FluxImageToImage,
}

impl HostedModel {
    pub fn id(&self) -> &'static str {
        match self {
            HostedModel::IdeogramEdit => "fal-ai/ideogram/v3/edit",
            HostedModel::FluxImageToImage => "fal-ai/flux/dev/image-to-image",
        }
    }

    pub fn accepts_mask(&self) -> bool {
        matches!(self, HostedModel::IdeogramEdit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub prompt: &'static str,
    pub model: HostedModel,
}

/// What the front-end needs to render the style picker.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StyleSummary {
    pub id: &'static str,
    pub name: &'static str,
}

pub static STYLES: &[StyleDefinition] = &[
    StyleDefinition {
        id: "modern",
        name: "Modern",
        prompt: "Transform this area into a sleek modern design with clean lines, neutral colors, \
                 minimalist furniture, and subtle lighting. Use contemporary materials like glass, \
                 metal, and polished surfaces. Maintain a spacious and uncluttered look.",
        model: HostedModel::IdeogramEdit,
    },
    StyleDefinition {
        id: "scandinavian",
        name: "Scandinavian",
        prompt: "Convert this space into a bright Scandinavian style with white walls, light wooden \
                 floors, simple functional furniture, and plenty of natural light. Include cozy \
                 textiles, muted colors, and touches of greenery for warmth.",
        model: HostedModel::IdeogramEdit,
    },
    StyleDefinition {
        id: "industrial",
        name: "Industrial",
        prompt: "Redesign this area with industrial aesthetics featuring exposed brick walls, metal \
                 fixtures, weathered wood, and vintage furniture. Add Edison bulbs, open shelving, \
                 and raw materials like concrete and steel to create an urban warehouse feel.",
        model: HostedModel::IdeogramEdit,
    },
    StyleDefinition {
        id: "mid_century",
        name: "Mid-Century Modern",
        prompt: "Transform this space into a mid-century modern design with iconic furniture \
                 shapes, warm wood tones, bold geometric patterns, and pops of color. Include \
                 tapered legs, functional forms, and retro-inspired decor from the 1950s-60s era.",
        model: HostedModel::IdeogramEdit,
    },
    StyleDefinition {
        id: "indian",
        name: "Indian Traditional",
        prompt: "Redesign this space with rich Indian traditional decor featuring vibrant textiles, \
                 intricate patterns, wooden carved furniture, and warm colors like deep reds, \
                 oranges, and golds. Add brass accents, decorative pillows, ornate details, \
                 archways, and traditional Indian artwork or tapestries.",
        model: HostedModel::FluxImageToImage,
    },
    StyleDefinition {
        id: "bohemian",
        name: "Bohemian",
        prompt: "Transform this area with bohemian style featuring layered textiles, eclectic \
                 patterns, mixed furniture, macramé, and plenty of plants. Include global-inspired \
                 elements, vibrant colors, natural materials, and artistic touches for a \
                 free-spirited atmosphere.",
        model: HostedModel::FluxImageToImage,
    },
    StyleDefinition {
        id: "luxury",
        name: "Luxury",
        prompt: "Redesign this space with opulent luxury featuring plush velvet furniture, crystal \
                 chandeliers, marble surfaces, and gold accents. Create a sophisticated palette \
                 with rich colors, symmetrical arrangements, and high-end finishes for an elegant, \
                 refined ambiance.",
        model: HostedModel::FluxImageToImage,
    },
];

pub fn lookup(id: &str) -> Option<&'static StyleDefinition> {
    STYLES.iter().find(|style| style.id == id)
}

/// Styles in catalog order, stripped down to id and display name.
pub fn list() -> Vec<StyleSummary> {
    STYLES
        .iter()
        .map(|style| StyleSummary {
            id: style.id,
            name: style.name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_style_resolves_to_a_non_empty_prompt() {
        for style in STYLES {
            let found = lookup(style.id).expect("catalog entry should be found by its own id");
            assert_eq!(found, style);
            assert!(!found.prompt.trim().is_empty(), "{} has an empty prompt", style.id);
        }
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<_> = STYLES.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), STYLES.len());
    }

    #[test]
    fn unknown_ids_are_absent() {
        assert!(lookup("nonexistent").is_none());
        assert!(lookup("").is_none());
        assert!(lookup("Modern").is_none());
    }

    #[test]
    fn list_keeps_catalog_order() {
        let ids: Vec<_> = list().into_iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            [
                "modern",
                "scandinavian",
                "industrial",
                "mid_century",
                "indian",
                "bohemian",
                "luxury"
            ]
        );
    }

    #[test]
    fn summaries_serialize_as_id_and_name() {
        let json = serde_json::to_value(&list()[3]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "mid_century", "name": "Mid-Century Modern" })
        );
    }

    #[test]
    fn mask_acceptance_follows_target_model() {
        assert!(lookup("modern").unwrap().model.accepts_mask());
        assert!(!lookup("luxury").unwrap().model.accepts_mask());
        assert_eq!(lookup("bohemian").unwrap().model.id(), "fal-ai/flux/dev/image-to-image");
    }
}
