use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Input-builder family for a provider route. The jobs API takes a
/// per-model `input` object; every model we expose builds it in one of
/// these two shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    Image,
    Video,
}

/// Resolved pieces an input builder may draw from. Fields that do not
/// apply to a shape are ignored by its builder.
#[derive(Debug, Clone, Default)]
pub struct InputSpec {
    pub prompt: String,
    pub duration_seconds: u64,
    pub aspect_ratio: String,
    pub image_url: Option<String>,
    pub remove_watermark: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub provider_model_id: String,
    pub shape: InputShape,
}

impl ProviderRoute {
    pub fn build_input(&self, spec: &InputSpec) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("prompt".to_string(), Value::String(spec.prompt.clone()));
        input.insert(
            "aspect_ratio".to_string(),
            Value::String(spec.aspect_ratio.clone()),
        );
        match self.shape {
            InputShape::Image => {
                input.insert(
                    "output_format".to_string(),
                    Value::String("png".to_string()),
                );
            }
            InputShape::Video => {
                input.insert(
                    "duration".to_string(),
                    Value::Number(spec.duration_seconds.into()),
                );
                if let Some(url) = spec.image_url.as_deref() {
                    input.insert("image_url".to_string(), Value::String(url.to_string()));
                }
                if spec.remove_watermark {
                    input.insert("remove_watermark".to_string(), Value::Bool(true));
                }
            }
        }
        input
    }
}

/// Static UI-label → canonical-id → provider-route tables.
///
/// Unknown labels never fail resolution: the per-shape default route is
/// used instead (see `ModelResolver`). Exactly one fallback route
/// exists process-wide, used when a primary image submission fails.
#[derive(Debug, Clone)]
pub struct RouteTable {
    aliases: IndexMap<String, String>,
    routes: IndexMap<String, ProviderRoute>,
}

pub const DEFAULT_IMAGE_MODEL: &str = "nano-banana";
pub const DEFAULT_VIDEO_MODEL: &str = "kling-2-1";
pub const FALLBACK_IMAGE_MODEL: &str = "flux-kontext";

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            aliases: default_aliases(),
            routes: default_routes(),
        }
    }

    pub fn alias_target(&self, label: &str) -> Option<&str> {
        self.aliases.get(label).map(String::as_str)
    }

    pub fn alias_target_ignore_case(&self, label: &str) -> Option<&str> {
        let lowered = label.to_lowercase();
        self.aliases
            .iter()
            .find(|(alias, _)| alias.to_lowercase() == lowered)
            .map(|(_, canonical)| canonical.as_str())
    }

    pub fn route(&self, canonical: &str) -> Option<&ProviderRoute> {
        self.routes.get(canonical)
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(alias, canonical)| (alias.as_str(), canonical.as_str()))
    }

    pub fn canonical_ids(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn default_model(&self, shape: InputShape) -> &str {
        match shape {
            InputShape::Image => DEFAULT_IMAGE_MODEL,
            InputShape::Video => DEFAULT_VIDEO_MODEL,
        }
    }

    /// The single known-good secondary route for failed image
    /// submissions.
    pub fn fallback_route(&self) -> &ProviderRoute {
        self.routes
            .get(FALLBACK_IMAGE_MODEL)
            .unwrap_or_else(|| panic!("route table missing {FALLBACK_IMAGE_MODEL}"))
    }
}

fn default_aliases() -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    let mut insert = |alias: &str, canonical: &str| {
        map.insert(alias.to_string(), canonical.to_string());
    };

    insert("Nano Banana", "nano-banana");
    insert("Nano Banana Pro", "nano-banana-pro");
    insert("Flux Kontext", "flux-kontext");
    insert("Flux Kontext Max", "flux-kontext-max");
    insert("Seedream 4.0", "seedream-4");
    insert("GPT Image 1", "gpt-image-1");
    insert("Kling 2.1", "kling-2-1");
    insert("Kling 2.1 Pro", "kling-2-1-pro");
    insert("Veo 3", "veo-3");
    insert("Veo 3 Fast", "veo-3-fast");
    insert("Wan 2.2", "wan-2-2");

    map
}

fn default_routes() -> IndexMap<String, ProviderRoute> {
    let mut map = IndexMap::new();
    let mut insert = |canonical: &str, provider_model_id: &str, shape: InputShape| {
        map.insert(
            canonical.to_string(),
            ProviderRoute {
                provider_model_id: provider_model_id.to_string(),
                shape,
            },
        );
    };

    insert("nano-banana", "google/nano-banana", InputShape::Image);
    insert("nano-banana-pro", "google/nano-banana-pro", InputShape::Image);
    insert("flux-kontext", "flux/kontext-pro", InputShape::Image);
    insert("flux-kontext-max", "flux/kontext-max", InputShape::Image);
    insert("seedream-4", "bytedance/seedream-v4", InputShape::Image);
    insert("gpt-image-1", "openai/gpt-image-1", InputShape::Image);
    insert("kling-2-1", "kling/v2-1-standard", InputShape::Video);
    insert("kling-2-1-pro", "kling/v2-1-pro", InputShape::Video);
    insert("veo-3", "google/veo-3", InputShape::Video);
    insert("veo-3-fast", "google/veo-3-fast", InputShape::Video);
    insert("wan-2-2", "alibaba/wan-2-2", InputShape::Video);

    map
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn every_alias_targets_an_existing_route() {
        let table = RouteTable::new();
        for (alias, canonical) in table.aliases() {
            assert!(
                table.route(canonical).is_some(),
                "alias '{alias}' targets missing route '{canonical}'"
            );
        }
    }

    #[test]
    fn defaults_and_fallback_exist_with_expected_shapes() {
        let table = RouteTable::new();
        assert_eq!(
            table.route(DEFAULT_IMAGE_MODEL).map(|route| route.shape),
            Some(InputShape::Image)
        );
        assert_eq!(
            table.route(DEFAULT_VIDEO_MODEL).map(|route| route.shape),
            Some(InputShape::Video)
        );
        assert_eq!(table.fallback_route().shape, InputShape::Image);
        assert_eq!(table.fallback_route().provider_model_id, "flux/kontext-pro");
    }

    #[test]
    fn image_input_carries_prompt_and_aspect_ratio() {
        let route = ProviderRoute {
            provider_model_id: "google/nano-banana".to_string(),
            shape: InputShape::Image,
        };
        let input = route.build_input(&InputSpec {
            prompt: "a red fox".to_string(),
            aspect_ratio: "1:1".to_string(),
            ..InputSpec::default()
        });
        assert_eq!(Value::Object(input.clone()), json!({
            "prompt": "a red fox",
            "aspect_ratio": "1:1",
            "output_format": "png",
        }));
        assert!(!input.contains_key("duration"));
    }

    #[test]
    fn video_input_includes_duration_and_optional_asset() {
        let route = ProviderRoute {
            provider_model_id: "kling/v2-1-standard".to_string(),
            shape: InputShape::Video,
        };
        let bare = route.build_input(&InputSpec {
            prompt: "waves at dusk".to_string(),
            duration_seconds: 5,
            aspect_ratio: "16:9".to_string(),
            ..InputSpec::default()
        });
        assert_eq!(bare["duration"], json!(5));
        assert!(!bare.contains_key("image_url"));
        assert!(!bare.contains_key("remove_watermark"));

        let with_asset = route.build_input(&InputSpec {
            prompt: "waves at dusk".to_string(),
            duration_seconds: 10,
            aspect_ratio: "9:16".to_string(),
            image_url: Some("https://cdn.example/ref.png".to_string()),
            remove_watermark: true,
        });
        assert_eq!(
            with_asset["image_url"],
            json!("https://cdn.example/ref.png")
        );
        assert_eq!(with_asset["remove_watermark"], json!(true));
    }
}
