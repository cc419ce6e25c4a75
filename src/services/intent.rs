//! Image-intent classification for agent steps
//!
//! The orchestrator asks the classifier whether a step needs image work both
//! at queue time (to price the run) and again per step while processing. The
//! trait keeps the heuristic swappable for a model-based classifier without
//! touching the orchestrator.

/// Decides whether a step's instructions call for image generation, given the
/// owning agent's instructions as context.
pub trait StepClassifier: Send + Sync {
    fn needs_image(&self, instructions: &str, agent_context: &str, step_index: i32) -> bool;
}

/// Curated keyword/heuristic classifier.
#[derive(Debug, Default, Clone)]
pub struct KeywordIntentClassifier;

// Visual-format agents are assumed to want images for their leading steps.
const VISUAL_AGENT_STEP_WINDOW: i32 = 10;

const IMAGE_KEYWORDS: &[&str] = &[
    // Direct image generation terms
    "generate image",
    "create image",
    "make image",
    "produce image",
    "generate photo",
    "create photo",
    "make photo",
    "produce photo",
    "generate picture",
    "create picture",
    "make picture",
    "produce picture",
    "generate visual",
    "create visual",
    "make visual",
    "produce visual",
    "design image",
    "design photo",
    "design picture",
    "design visual",
    // Content creation terms
    "image of",
    "photo of",
    "picture of",
    "visual of",
    "show",
    "display",
    "illustrate",
    "depict",
    "render",
    // Social media specific
    "slideshow",
    "slide",
    "instagram post",
    "social media",
    "post",
    "instagram",
    "facebook",
    "twitter",
    "tiktok",
    "story",
    // Content types that typically need images
    "hook image",
    "hook",
    "background",
    "banner",
    "header",
    "thumbnail",
    "cover",
    "poster",
    "graphic",
    "artwork",
    "call to action",
    "cta",
    "button",
    "promo",
    // Food/content specific
    "food",
    "recipe",
    "cooking",
    "kitchen",
    "meal",
    "dish",
    "app",
    "download",
    "pantry",
    "ingredient",
];

const VISUAL_INDICATORS: &[&str] = &[
    "with",
    "showing",
    "featuring",
    "containing",
    "including",
    "background",
    "scene",
    "setting",
    "environment",
];

const VISUAL_AGENT_MARKERS: &[&str] = &["slideshow", "instagram", "visual", "image"];

impl StepClassifier for KeywordIntentClassifier {
    fn needs_image(&self, instructions: &str, agent_context: &str, step_index: i32) -> bool {
        let text = instructions.to_lowercase();
        if matches_image_intent(&text) {
            return true;
        }

        let agent = agent_context.to_lowercase();
        let visual_agent = VISUAL_AGENT_MARKERS.iter().any(|m| agent.contains(m));
        visual_agent && step_index < VISUAL_AGENT_STEP_WINDOW
    }
}

fn matches_image_intent(text: &str) -> bool {
    let has_keyword = IMAGE_KEYWORDS.iter().any(|k| text.contains(k));
    let has_indicator = VISUAL_INDICATORS.iter().any(|k| text.contains(k));

    // Indicator words plus a mention of visual content (or just a long
    // description) usually means the step is describing something to draw.
    let looks_like_description = has_indicator
        && (text.contains("image")
            || text.contains("visual")
            || text.contains("show")
            || text.len() > 20);

    has_keyword || looks_like_description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(instructions: &str, agent: &str, index: i32) -> bool {
        KeywordIntentClassifier.needs_image(instructions, agent, index)
    }

    #[test]
    fn direct_generation_verbs_are_image_steps() {
        assert!(classify("Generate image of a sunset over the ocean", "", 0));
        assert!(classify("CREATE PICTURE of our new logo", "", 3));
    }

    #[test]
    fn social_media_terms_are_image_steps() {
        assert!(classify("Write the instagram post caption", "", 2));
        assert!(classify("Design the hook for the slideshow", "", 0));
    }

    #[test]
    fn visual_agents_imply_images_for_leading_steps() {
        let agent = "You build Instagram slideshow carousels about cooking";
        assert!(classify("Summarize the key point", agent, 0));
        assert!(classify("Summarize the key point", agent, 9));
        assert!(!classify("Summarize the key point", agent, 10));
    }

    #[test]
    fn plain_short_text_steps_are_not_image_steps() {
        assert!(!classify("Draft an outline", "", 1));
        assert!(!classify("Review the copy", "Plain text assistant", 0));
    }

    #[test]
    fn descriptive_text_counts_as_visual_content() {
        // indicator word + length over the description threshold
        assert!(classify(
            "A cozy kitchen scene featuring fresh ingredients on a wooden table",
            "",
            4
        ));
    }
}
