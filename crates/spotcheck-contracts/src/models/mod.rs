mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAPABILITY_GROUNDING, CAPABILITY_VIDEO};
pub use selectors::{required_capability, ModelSelection, ModelSelector};
