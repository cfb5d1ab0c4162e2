use indexmap::IndexMap;

/// Accepts inline images and search/maps tool grounding.
pub const CAPABILITY_GROUNDING: &str = "grounding";
/// Accepts inline video parts.
pub const CAPABILITY_VIDEO: &str = "video";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

// Insertion order is the fallback order.
fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], context_window: u64| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window: Some(context_window),
            },
        );
    };

    insert(
        "gemini-2.5-flash",
        "gemini",
        &[CAPABILITY_GROUNDING, CAPABILITY_VIDEO],
        1_048_576,
    );
    insert(
        "gemini-2.5-pro",
        "gemini",
        &[CAPABILITY_GROUNDING, CAPABILITY_VIDEO],
        1_048_576,
    );
    insert(
        "gemini-2.5-flash-lite",
        "gemini",
        &[CAPABILITY_GROUNDING],
        1_048_576,
    );
    insert(
        "gemini-3-pro-preview",
        "gemini",
        &[CAPABILITY_GROUNDING, CAPABILITY_VIDEO],
        1_048_576,
    );
    insert(
        "dryrun-vision-1",
        "dryrun",
        &[CAPABILITY_GROUNDING, CAPABILITY_VIDEO],
        8192,
    );

    map
}
