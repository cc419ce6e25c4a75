//! Typed step output stored in the agent_run_steps.artifacts json column.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Artifact {
    Text {
        content: String,
    },
    Image {
        url: String,
        width: i32,
        height: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        seed: Option<i64>,
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference_image: Option<String>,
    },
}

impl Artifact {
    pub fn is_image(&self) -> bool {
        matches!(self, Artifact::Image { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_artifact_round_trips_with_tag() {
        let artifact = Artifact::Text {
            content: "Step completed".to_string(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "Step completed");

        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn image_artifact_omits_empty_optionals() {
        let artifact = Artifact::Image {
            url: "https://img.example/a.png".to_string(),
            width: 1024,
            height: 1024,
            seed: None,
            prompt: "a red door".to_string(),
            reference_image: None,
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "image");
        assert!(json.get("seed").is_none());
        assert!(json.get("reference_image").is_none());
    }
}
