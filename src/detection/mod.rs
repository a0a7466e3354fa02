use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tera::{Context as TeraContext, Tera};
use tracing::info;

use crate::data::ImageAttachment;
use crate::error::CardError;
use crate::geometry::BoxScale;
use crate::providers::{Provider, ProviderUsage, ToolSpec};
use crate::regions::{BuiltRegions, DetectionRecord, build_regions};

pub const TOOL_NAME: &str = "report_text_regions";

const SYSTEM_PROMPT: &str = include_str!("prompts/system_prompt.tera");

#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub source_script: String,
    pub target_script: String,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            source_script: "Simplified Chinese".to_string(),
            target_script: "Traditional Chinese".to_string(),
        }
    }
}

pub struct Detection {
    pub records: Vec<DetectionRecord>,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

impl Detection {
    /// Maps the raw records onto pixel regions of an image of the given size.
    pub fn into_regions(
        self,
        scale: BoxScale,
        width: u32,
        height: u32,
    ) -> Result<BuiltRegions, CardError> {
        build_regions(&self.records, scale, width, height)
    }
}

pub fn tool_spec() -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.to_string(),
        description: "Report every detected text region with its translation, box and color."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "regions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "original_text": {"type": "string"},
                            "translated_text": {"type": "string"},
                            "box_normalized": {
                                "type": "array",
                                "items": {"type": "integer"}
                            },
                            "hex_color": {"type": "string"},
                            "font_style": {"type": "string"}
                        },
                        "required": ["translated_text", "box_normalized"]
                    }
                }
            },
            "required": ["regions"]
        }),
    }
}

pub fn render_system_prompt(options: &DetectOptions) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("source_script", options.source_script.as_str());
    context.insert("target_script", options.target_script.as_str());
    context.insert("box_scale_max", &1000);
    context.insert("tool_name", TOOL_NAME);
    Tera::one_off(SYSTEM_PROMPT, &context, false).with_context(|| "failed to render system prompt")
}

pub async fn detect_regions<P: Provider>(
    provider: P,
    image: &ImageAttachment,
    options: &DetectOptions,
) -> Result<Detection, CardError> {
    let prompt =
        render_system_prompt(options).map_err(|err| CardError::Detection(format!("{:#}", err)))?;
    let response = provider
        .append_system_input(prompt)
        .append_user_image(image.clone())
        .append_user_input("Detect and translate the text on this card.".to_string())
        .register_tool(tool_spec())
        .call_tool(TOOL_NAME)
        .await
        .map_err(|err| CardError::Detection(format!("{:#}", err)))?;
    let records = parse_tool_args(response.args)?;
    info!(
        regions = records.len(),
        model = response.model.as_deref().unwrap_or("unknown"),
        "detected text regions"
    );
    Ok(Detection {
        records,
        model: response.model,
        usage: response.usage,
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolArgs {
    Wrapped { regions: Vec<DetectionRecord> },
    Bare(Vec<DetectionRecord>),
}

fn parse_tool_args(value: serde_json::Value) -> Result<Vec<DetectionRecord>, CardError> {
    let args: ToolArgs = serde_json::from_value(value)
        .map_err(|err| CardError::Detection(format!("unexpected tool arguments: {}", err)))?;
    Ok(match args {
        ToolArgs::Wrapped { regions } => regions,
        ToolArgs::Bare(regions) => regions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderFuture, ProviderResponse};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ScriptedProvider {
        args: serde_json::Value,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Provider for ScriptedProvider {
        fn append_system_input(self, input: String) -> Self {
            self.seen.lock().unwrap().push(format!("system:{}", input.len()));
            self
        }

        fn append_user_input(self, input: String) -> Self {
            self.seen.lock().unwrap().push(format!("user:{}", input));
            self
        }

        fn append_user_image(self, image: ImageAttachment) -> Self {
            self.seen.lock().unwrap().push(format!("image:{}", image.mime));
            self
        }

        fn register_tool(self, tool: ToolSpec) -> Self {
            self.seen.lock().unwrap().push(format!("tool:{}", tool.name));
            self
        }

        fn call_tool(self, tool_name: &str) -> ProviderFuture {
            let args = self.args.clone();
            let tool_name = tool_name.to_string();
            Box::pin(async move {
                assert_eq!(tool_name, TOOL_NAME);
                Ok(ProviderResponse {
                    args,
                    model: Some("scripted".to_string()),
                    usage: None,
                })
            })
        }
    }

    fn card_image() -> ImageAttachment {
        let image = image::RgbaImage::from_pixel(10, 10, image::Rgba([255, 255, 255, 255]));
        ImageAttachment::from_bytes(crate::data::encode_png(&image).unwrap(), None).unwrap()
    }

    #[test]
    fn prompt_mentions_scripts_and_tool() {
        let prompt = render_system_prompt(&DetectOptions::default()).unwrap();
        assert!(prompt.contains("Simplified Chinese"));
        assert!(prompt.contains("Traditional Chinese"));
        assert!(prompt.contains("0 to 1000"));
        assert!(prompt.contains(TOOL_NAME));
    }

    #[tokio::test]
    async fn detection_parses_records_in_order() {
        let provider = ScriptedProvider {
            args: json!({
                "regions": [
                    {"translated_text": "甲", "box_normalized": [0, 0, 500, 500]},
                    {"translated_text": "乙", "box_normalized": [500, 500, 1000, 1000], "hex_color": "#fff"}
                ]
            }),
            ..Default::default()
        };
        let seen = provider.seen.clone();
        let detection = detect_regions(provider, &card_image(), &DetectOptions::default())
            .await
            .unwrap();
        assert_eq!(detection.model.as_deref(), Some("scripted"));
        let built = detection.into_regions(BoxScale::PerMille, 200, 100).unwrap();
        let texts: Vec<_> = built
            .regions
            .iter()
            .map(|region| region.translated_text.as_str())
            .collect();
        assert_eq!(texts, vec!["甲", "乙"]);
        assert_eq!(built.regions[1].rect.to_array(), [100, 50, 200, 100]);

        let seen = seen.lock().unwrap();
        assert!(seen[0].starts_with("system:"));
        assert_eq!(seen[1], "image:image/png");
        assert_eq!(seen[3], format!("tool:{}", TOOL_NAME));
    }

    #[tokio::test]
    async fn bare_array_arguments_are_accepted() {
        let provider = ScriptedProvider {
            args: json!([{"text": "丙", "box": [1, 2, 3, 4]}]),
            ..Default::default()
        };
        let detection = detect_regions(provider, &card_image(), &DetectOptions::default())
            .await
            .unwrap();
        assert_eq!(detection.records.len(), 1);
    }

    #[tokio::test]
    async fn malformed_arguments_are_detection_errors() {
        let provider = ScriptedProvider {
            args: json!({"regions": "nope"}),
            ..Default::default()
        };
        let result = detect_regions(provider, &card_image(), &DetectOptions::default()).await;
        assert!(matches!(result, Err(CardError::Detection(_))));
    }
}
