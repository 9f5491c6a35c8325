//! Bind mounts for resource dirs, template mounts and space views.

use std::io;
use std::path::{Path, PathBuf};

use sprout_spec::{SpaceView, SpawnResolution};

use crate::config::DriverConfig;
use crate::error::ProvisionError;
use crate::runtime::BindMount;

/// Locate a resource dir by content hash: primary root first, then each
/// fallback root. When no root has it the primary path is returned anyway and
/// the runtime reports the missing source at create time.
pub async fn find_resource_dir(config: &DriverConfig, sha256: &str) -> Result<PathBuf, (PathBuf, io::Error)> {
    let primary = config.resource_dirs_root.join(sha256);
    if exists(&primary).await.map_err(|err| (primary.clone(), err))? {
        return Ok(primary);
    }
    for root in &config.resource_dirs_path {
        let candidate = root.join(sha256);
        if exists(&candidate).await.map_err(|err| (candidate.clone(), err))? {
            return Ok(candidate);
        }
    }
    Ok(primary)
}

async fn exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub async fn resource_dir_mounts(
    config: &DriverConfig,
    resolution: &SpawnResolution,
) -> Result<Vec<BindMount>, ProvisionError> {
    let mut mounts = Vec::with_capacity(resolution.spawn.resource_dirs.len());
    for (alias, dir) in &resolution.spawn.resource_dirs {
        let source = find_resource_dir(config, &dir.sha256)
            .await
            .map_err(|(path, source)| ProvisionError::ResourceDir {
                alias: alias.clone(),
                path,
                source,
            })?;
        mounts.push(BindMount::new(
            source.display().to_string(),
            join_container_path(&config.container_resource_dir, alias),
            true,
        ));
    }
    Ok(mounts)
}

pub fn template_mounts(resolution: &SpawnResolution) -> Vec<BindMount> {
    resolution
        .spawn
        .mounts
        .iter()
        .map(|m| BindMount::new(&m.source, &m.destination, m.is_read_only()))
        .collect()
}

/// Tree, owner and alias mounts for one view. Views of a multi-valued
/// parameter are namespaced by their own space id.
pub fn view_mounts(config: &DriverConfig, parameter: &str, multi: bool, view: &SpaceView) -> [BindMount; 3] {
    let mut prefix = join_container_path(&config.container_spaces_dir, parameter);
    if multi {
        prefix = join_container_path(&prefix, view.space_id());
    }
    [
        BindMount::new(
            view.tree_path.display().to_string(),
            format!("{prefix}/tree"),
            view.read_only,
        ),
        BindMount::new(
            view.owner_file_path.display().to_string(),
            format!("{prefix}/owner"),
            true,
        ),
        BindMount::new(
            view.alias_file_path.display().to_string(),
            format!("{prefix}/alias"),
            true,
        ),
    ]
}

fn join_container_path(base: &str, child: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), child.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(tip: &str, read_only: bool) -> SpaceView {
        SpaceView {
            tip: tip.into(),
            base: None,
            read_only,
            tree_path: PathBuf::from(format!("/host/{tip}/tree")),
            owner_file_path: PathBuf::from(format!("/host/{tip}/owner")),
            alias_file_path: PathBuf::from(format!("/host/{tip}/alias")),
            created: false,
        }
    }

    #[test]
    fn single_view_mounts() {
        let config = DriverConfig::default();
        let [tree, owner, alias] = view_mounts(&config, "data", false, &view("sp-1", false));
        assert_eq!(tree.destination, "/spaces/data/tree");
        assert!(!tree.read_only);
        assert_eq!(owner.destination, "/spaces/data/owner");
        assert!(owner.read_only);
        assert!(alias.read_only);
    }

    #[test]
    fn multi_view_mounts_are_namespaced() {
        let config = DriverConfig::default();
        let [tree, _, alias] = view_mounts(&config, "refs", true, &view("sp-2@3", true));
        assert_eq!(tree.destination, "/spaces/refs/sp-2/tree");
        assert!(tree.read_only);
        assert_eq!(alias.destination, "/spaces/refs/sp-2/alias");
    }

    #[tokio::test]
    async fn resource_dir_search_order() {
        let primary = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        std::fs::create_dir(fallback.path().join("abc")).unwrap();
        std::fs::create_dir(primary.path().join("def")).unwrap();
        std::fs::create_dir(fallback.path().join("def")).unwrap();

        let config = DriverConfig {
            resource_dirs_root: primary.path().to_path_buf(),
            resource_dirs_path: vec![fallback.path().to_path_buf()],
            ..DriverConfig::default()
        };

        assert_eq!(
            find_resource_dir(&config, "abc").await.unwrap(),
            fallback.path().join("abc")
        );
        assert_eq!(
            find_resource_dir(&config, "def").await.unwrap(),
            primary.path().join("def")
        );
        assert_eq!(
            find_resource_dir(&config, "missing").await.unwrap(),
            primary.path().join("missing")
        );
    }
}
