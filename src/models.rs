use serde::{Deserialize, Serialize};

// ── Page scan ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub url: String,
}

/// One `<img>` from the page scan. `index` is the image's position in the
/// document's full image list, so it stays valid as a locator even though
/// images without a source URL are filtered out of the listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedImage {
    pub index: usize,
    pub src: String,
    pub alt: String,
    pub has_alt: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub source_url: String,
    pub total_images: usize,
    pub missing_alt_percent: u32,
    pub score: ScoreBand,
    pub summary: String,
    pub images: Vec<ScannedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreBand {
    Good,
    NeedsImprovement,
    AccessibilityIssue,
}

impl ScoreBand {
    pub fn classify(missing_percent: u32) -> Self {
        if missing_percent < 5 {
            ScoreBand::Good
        } else if missing_percent < 15 {
            ScoreBand::NeedsImprovement
        } else {
            ScoreBand::AccessibilityIssue
        }
    }

    pub fn summary(self, missing_percent: u32) -> String {
        match self {
            ScoreBand::Good => format!(
                "Great job! Only {}% of images are missing alt text.",
                missing_percent
            ),
            ScoreBand::NeedsImprovement => format!(
                "Needs improvement. {}% of images are missing alt text.",
                missing_percent
            ),
            ScoreBand::AccessibilityIssue => format!(
                "Accessibility issue! {}% of images are missing alt text.",
                missing_percent
            ),
        }
    }
}

/// Percentage of scanned images lacking alt text, rounded to the nearest
/// whole percent. An empty scan scores 0.
pub fn missing_alt_percent(images: &[ScannedImage]) -> u32 {
    if images.is_empty() {
        return 0;
    }
    let missing = images.iter().filter(|img| !img.has_alt).count();
    ((missing as f64 / images.len() as f64) * 100.0).round() as u32
}

// ── Context bundle ───────────────────────────────────────────────────────────

/// Page-derived signals for one image. Every field is best-effort; absence is
/// an empty string (or empty list), never an error. A bundle is always built
/// from a live document in one pass — callers either get the whole thing or
/// pass `None` when context use is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextBundle {
    pub page_title: String,
    pub meta_description: String,
    pub relevant_headings: Vec<String>,
    pub figcaption: String,
    pub surrounding_text: String,
    pub img_title: String,
    pub img_aria_label: String,
    pub existing_alt: String,
    pub url: String,
}

// ── Action protocol ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// The extension-style message protocol: one variant per action, dispatched
/// on the `action` tag. `useContext` is threaded per request rather than read
/// from any ambient preference store; it defaults to true.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ActionRequest {
    GetImageContext {
        url: String,
        index: usize,
    },
    ScrollToImage {
        url: String,
        index: usize,
    },
    GenerateAltText {
        image_src: String,
        #[serde(default)]
        context_data: Option<ContextBundle>,
        #[serde(default = "default_true")]
        use_context: bool,
    },
    RefineAltText {
        image_src: String,
        original_alt_text: String,
        feedback: String,
        #[serde(default)]
        context_data: Option<ContextBundle>,
        #[serde(default = "default_true")]
        use_context: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ActionResponse {
    Context { context_data: ContextBundle },
    Location { index: usize, src: String },
    Generated { alt_text: String, context_used: bool },
    Refined { refined_alt_text: String },
}

// ── End-to-end describe ──────────────────────────────────────────────────────

/// One per-image action, end to end: fetch the page, extract context when
/// enabled, then generate — or refine when `feedback` is present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRequest {
    pub url: String,
    pub index: usize,
    #[serde(default = "default_true")]
    pub use_context: bool,
    #[serde(default)]
    pub original_alt_text: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeResponse {
    pub alt_text: String,
    pub context_used: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image(index: usize, alt: &str) -> ScannedImage {
        ScannedImage {
            index,
            src: format!("https://example.com/{}.png", index),
            alt: alt.to_string(),
            has_alt: !alt.is_empty(),
        }
    }

    #[test]
    fn empty_scan_scores_zero() {
        assert_eq!(missing_alt_percent(&[]), 0);
    }

    #[test]
    fn two_of_ten_missing_is_twenty_percent() {
        let mut images: Vec<ScannedImage> = (0..8).map(|i| image(i, "described")).collect();
        images.push(image(8, ""));
        images.push(image(9, ""));
        let percent = missing_alt_percent(&images);
        assert_eq!(percent, 20);
        assert_eq!(ScoreBand::classify(percent), ScoreBand::AccessibilityIssue);
    }

    #[test]
    fn percentage_is_rounded() {
        let images = vec![image(0, ""), image(1, "a"), image(2, "b")];
        assert_eq!(missing_alt_percent(&images), 33);
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(ScoreBand::classify(0), ScoreBand::Good);
        assert_eq!(ScoreBand::classify(4), ScoreBand::Good);
        assert_eq!(ScoreBand::classify(5), ScoreBand::NeedsImprovement);
        assert_eq!(ScoreBand::classify(14), ScoreBand::NeedsImprovement);
        assert_eq!(ScoreBand::classify(15), ScoreBand::AccessibilityIssue);
    }

    #[test]
    fn band_serializes_kebab_case() {
        let value = serde_json::to_value(ScoreBand::NeedsImprovement).unwrap();
        assert_eq!(value, json!("needs-improvement"));
    }

    #[test]
    fn generate_action_defaults_use_context_to_true() {
        let request: ActionRequest = serde_json::from_value(json!({
            "action": "generateAltText",
            "imageSrc": "https://example.com/fox.png",
            "contextData": null
        }))
        .unwrap();
        match request {
            ActionRequest::GenerateAltText {
                image_src,
                context_data,
                use_context,
            } => {
                assert_eq!(image_src, "https://example.com/fox.png");
                assert!(context_data.is_none());
                assert!(use_context);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn refine_action_carries_feedback_fields() {
        let request: ActionRequest = serde_json::from_value(json!({
            "action": "refineAltText",
            "imageSrc": "https://example.com/fox.png",
            "originalAltText": "A fox",
            "feedback": "mention the snow",
            "useContext": false
        }))
        .unwrap();
        match request {
            ActionRequest::RefineAltText {
                original_alt_text,
                feedback,
                use_context,
                ..
            } => {
                assert_eq!(original_alt_text, "A fox");
                assert_eq!(feedback, "mention the snow");
                assert!(!use_context);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn context_action_dispatches_on_tag() {
        let request: ActionRequest = serde_json::from_value(json!({
            "action": "getImageContext",
            "url": "https://example.com/post",
            "index": 3
        }))
        .unwrap();
        assert!(matches!(
            request,
            ActionRequest::GetImageContext { index: 3, .. }
        ));
    }

    #[test]
    fn generated_response_uses_extension_field_names() {
        let response = ActionResponse::Generated {
            alt_text: "A fox in the snow".to_string(),
            context_used: false,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"altText": "A fox in the snow", "contextUsed": false})
        );
    }

    #[test]
    fn context_bundle_round_trips_camel_case() {
        let bundle = ContextBundle {
            page_title: "Foxes".to_string(),
            relevant_headings: vec!["Arctic foxes".to_string()],
            url: "https://example.com/foxes".to_string(),
            ..ContextBundle::default()
        };
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["pageTitle"], "Foxes");
        assert_eq!(value["relevantHeadings"][0], "Arctic foxes");
        assert_eq!(value["metaDescription"], "");
        let back: ContextBundle = serde_json::from_value(value).unwrap();
        assert_eq!(back, bundle);
    }
}
