mod registry;
mod resolver;

pub use registry::{InputShape, InputSpec, ProviderRoute, RouteTable};
pub use resolver::{ModelResolver, ResolvedModel};
