//! The packaged `/etc/nginx` base tree (nginx.conf, mime.types, ssl defaults),
//! embedded into the binary so extraction does not depend on the launch CWD.

use rust_embed::RustEmbed;
use std::path::Path;

#[derive(RustEmbed)]
#[folder = "src/nginxgen/templates/"]
pub struct Templates;

/// Extract every embedded file under `dest` (Phase 0, step 2 of the
/// reconciler). Directories are created as needed; the `.gitkeep`
/// placeholder that keeps the otherwise-empty `conf.d/` tracked is skipped.
pub async fn extract_to(dest: &Path) -> std::io::Result<()> {
    for file_path in Templates::iter() {
        if file_path.ends_with(".gitkeep") {
            continue;
        }
        let Some(embedded) = Templates::get(&file_path) else {
            continue;
        };
        let target = dest.join(file_path.as_ref());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, embedded.data.as_ref()).await?;
    }
    tokio::fs::create_dir_all(dest.join("conf.d")).await?;
    Ok(())
}
