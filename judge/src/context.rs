use std::sync::Arc;

use crate::assets::AssetProvider;
use crate::lang::LanguageRegistry;
use crate::store::ResultStore;
use crate::toolchain::Toolchain;

/// Shared, read-only dependencies of the judging pipelines.
pub struct JudgeContext {
    pub toolchain: Toolchain,
    pub languages: Arc<LanguageRegistry>,
    pub store: Arc<dyn ResultStore>,
    pub assets: Arc<dyn AssetProvider>,
}
