use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::spec::{TaskSpec, VolumeMount};

/// Image of the throwaway container used to reach into a volume.
pub const HELPER_IMAGE: &str = "ubuntu";
/// Where the helper container mounts the volume.
pub const HELPER_MOUNT: &str = "/workdir";

/// An engine-managed named volume.
///
/// Not `Clone`: exactly one owner releases it through
/// [`VolumeManager::remove`].
#[derive(Debug, PartialEq, Eq)]
pub struct Volume {
    name: String,
}

impl Volume {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct VolumeManager {
    engine: Arc<dyn ContainerEngine>,
    helper_image: String,
}

impl VolumeManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, helper_image: impl Into<String>) -> Self {
        Self {
            engine,
            helper_image: helper_image.into(),
        }
    }

    pub async fn create(&self) -> Result<Volume> {
        let name = format!("volume-{}", Uuid::new_v4());
        self.engine.create_volume(&name).await?;
        debug!(volume = %name, "volume created");
        Ok(Volume { name })
    }

    /// Copy a host file to `dst`, a path relative to the volume root.
    ///
    /// Goes through a helper container that mounts the volume; the helper
    /// is never started.
    pub async fn copy_file(&self, volume: &Volume, src: &Path, dst: &str) -> Result<()> {
        let mut spec = TaskSpec::new(&self.helper_image, Vec::<String>::new());
        spec.volumes.push(VolumeMount::new(volume, HELPER_MOUNT));
        let helper = self.engine.create_container(&spec).await?;

        let target = format!("{HELPER_MOUNT}/{}", dst.trim_start_matches('/'));
        let copied = self.engine.copy_into(&helper, src, &target).await;

        if let Err(e) = self.engine.remove_container(&helper).await {
            warn!(container = %helper.id, error = %e, "failed to remove volume helper");
        }
        copied?;
        debug!(volume = %volume.name, src = %src.display(), dst, "file copied");
        Ok(())
    }

    pub async fn remove(&self, volume: Volume) -> Result<()> {
        self.engine.remove_volume(&volume.name).await?;
        debug!(volume = %volume.name, "volume removed");
        Ok(())
    }
}
