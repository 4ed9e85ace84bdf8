use std::path::{Path, PathBuf};

use shared::{domain::InstanceId, error::ApiError};
use tracing::{debug, error};

/// Makes sure `<media_root>/<instance>` exists. Two requests for a new
/// instance may race to create it; losing that race is not an error.
pub(crate) async fn ensure_instance_dir(
    media_root: &Path,
    instance: &InstanceId,
) -> Result<PathBuf, ApiError> {
    if !instance.is_valid() {
        return Err(ApiError::validation("invalid instance id"));
    }

    let dir = media_root.join(instance.as_str());
    if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        return Ok(dir);
    }

    match tokio::fs::create_dir_all(&dir).await {
        Ok(()) => {
            debug!(%instance, dir = %dir.display(), "created instance media directory");
            Ok(dir)
        }
        Err(_) if tokio::fs::try_exists(&dir).await.unwrap_or(false) => Ok(dir),
        Err(e) => {
            error!(%instance, dir = %dir.display(), error = %e, "could not create instance media directory");
            Err(ApiError::storage("could not create instance media directory"))
        }
    }
}
