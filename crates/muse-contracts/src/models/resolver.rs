use super::registry::{InputShape, ProviderRoute, RouteTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub canonical: String,
    pub route: ProviderRoute,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Maps free-form UI labels to a provider route. Resolution is total:
/// unknown labels land on the per-shape default route with a recorded
/// reason instead of an error, so a mistyped model id still generates.
#[derive(Debug, Clone, Default)]
pub struct ModelResolver {
    table: RouteTable,
}

impl ModelResolver {
    pub fn new(table: RouteTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn resolve(&self, ui_label: &str, shape: InputShape) -> ResolvedModel {
        let label = ui_label.trim();
        let requested = (!label.is_empty()).then(|| label.to_string());

        if !label.is_empty() {
            if let Some(found) = self
                .table
                .alias_target(label)
                .or_else(|| self.table.alias_target_ignore_case(label))
                .map(str::to_string)
            {
                if let Some(resolved) = self.routed(&found, &requested, shape) {
                    return resolved;
                }
            }
            let slug = slugify(label);
            if let Some(resolved) = self.routed(&slug, &requested, shape) {
                return resolved;
            }
        }

        let reason = if let Some(label) = requested.as_deref() {
            format!("Requested model '{label}' has no {} route; using default.", shape_name(shape))
        } else {
            "No model specified; using default.".to_string()
        };
        let canonical = self.table.default_model(shape).to_string();
        let route = self
            .table
            .route(&canonical)
            .cloned()
            .unwrap_or_else(|| panic!("route table missing default '{canonical}'"));
        ResolvedModel {
            canonical,
            route,
            requested,
            fallback_reason: Some(reason),
        }
    }

    fn routed(
        &self,
        canonical: &str,
        requested: &Option<String>,
        shape: InputShape,
    ) -> Option<ResolvedModel> {
        let route = self.table.route(canonical)?;
        if route.shape != shape {
            return None;
        }
        Some(ResolvedModel {
            canonical: canonical.to_string(),
            route: route.clone(),
            requested: requested.clone(),
            fallback_reason: None,
        })
    }
}

/// Lower-case and collapse whitespace runs into hyphens, so display
/// names like "Nano Banana" line up with canonical ids.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut pending_hyphen = false;
    for ch in label.trim().chars() {
        if ch.is_whitespace() {
            pending_hyphen = !slug.is_empty();
            continue;
        }
        if pending_hyphen {
            slug.push('-');
            pending_hyphen = false;
        }
        for lowered in ch.to_lowercase() {
            slug.push(lowered);
        }
    }
    slug
}

fn shape_name(shape: InputShape) -> &'static str {
    match shape {
        InputShape::Image => "image",
        InputShape::Video => "video",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias_resolves_without_fallback_reason() {
        let resolver = ModelResolver::default();
        let resolved = resolver.resolve("Nano Banana Pro", InputShape::Image);
        assert_eq!(resolved.canonical, "nano-banana-pro");
        assert_eq!(resolved.route.provider_model_id, "google/nano-banana-pro");
        assert_eq!(resolved.requested.as_deref(), Some("Nano Banana Pro"));
        assert!(resolved.fallback_reason.is_none());
    }

    #[test]
    fn alias_match_falls_back_to_lowercase_comparison() {
        let resolver = ModelResolver::default();
        let resolved = resolver.resolve("seedream 4.0", InputShape::Image);
        assert_eq!(resolved.canonical, "seedream-4");
        assert!(resolved.fallback_reason.is_none());
    }

    #[test]
    fn slug_derivation_reaches_the_route_table() {
        let resolver = ModelResolver::default();
        let resolved = resolver.resolve("FLUX   KONTEXT", InputShape::Image);
        assert_eq!(resolved.canonical, "flux-kontext");
        assert!(resolved.fallback_reason.is_none());
    }

    #[test]
    fn canonical_id_passes_straight_through() {
        let resolver = ModelResolver::default();
        let resolved = resolver.resolve("veo-3-fast", InputShape::Video);
        assert_eq!(resolved.route.provider_model_id, "google/veo-3-fast");
        assert!(resolved.fallback_reason.is_none());
    }

    #[test]
    fn unknown_label_resolves_to_default_with_reason() {
        let resolver = ModelResolver::default();
        let resolved = resolver.resolve("totally made up", InputShape::Image);
        assert_eq!(resolved.canonical, "nano-banana");
        assert_eq!(resolved.requested.as_deref(), Some("totally made up"));
        assert!(resolved
            .fallback_reason
            .as_deref()
            .unwrap_or_default()
            .contains("totally made up"));
    }

    #[test]
    fn empty_label_uses_per_shape_default() {
        let resolver = ModelResolver::default();
        let image = resolver.resolve("", InputShape::Image);
        assert_eq!(image.canonical, "nano-banana");
        assert!(image.requested.is_none());

        let video = resolver.resolve("   ", InputShape::Video);
        assert_eq!(video.canonical, "kling-2-1");
        assert_eq!(
            video.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn image_label_does_not_resolve_to_a_video_route() {
        let resolver = ModelResolver::default();
        let resolved = resolver.resolve("Kling 2.1", InputShape::Image);
        assert_eq!(resolved.canonical, "nano-banana");
        assert!(resolved.fallback_reason.is_some());
    }

    #[test]
    fn resolution_is_total_over_every_alias_and_canonical_id() {
        let resolver = ModelResolver::default();
        let labels: Vec<String> = resolver
            .table()
            .aliases()
            .map(|(alias, _)| alias.to_string())
            .chain(resolver.table().canonical_ids().map(str::to_string))
            .collect();
        for label in labels {
            for shape in [InputShape::Image, InputShape::Video] {
                let resolved = resolver.resolve(&label, shape);
                assert_eq!(resolved.route.shape, shape, "label '{label}'");
            }
        }
    }

    #[test]
    fn slugify_collapses_whitespace_runs() {
        assert_eq!(slugify("Nano  \t Banana"), "nano-banana");
        assert_eq!(slugify("  Veo 3 Fast  "), "veo-3-fast");
        assert_eq!(slugify("plain"), "plain");
    }
}
