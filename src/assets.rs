use rust_embed::RustEmbed;

/// Embedded sidecar sources shipped inside the library binary.
#[derive(RustEmbed)]
#[folder = "sidecar"]
#[include = "*.js"]
pub struct EmbeddedAssets;
