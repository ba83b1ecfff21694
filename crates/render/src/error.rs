use strata_assets::AssetError;
use strata_gfx::GfxError;

use crate::config::ConfigError;

/// Fatal renderer failures. Missing shaders, materials or textures are not
/// errors: the affected draw is skipped and logged.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Gfx(#[from] GfxError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
