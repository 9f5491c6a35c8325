use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Label value shared by every instance this driver (and its predecessors) spawned.
    pub namespace: String,
    pub internal_network: Option<String>,
    pub external_network: Option<String>,
    /// Primary host root holding resource dirs by content hash.
    pub resource_dirs_root: PathBuf,
    /// Fallback roots searched in order when the primary root lacks a dir.
    pub resource_dirs_path: Vec<PathBuf>,
    pub container_resource_dir: String,
    pub container_spaces_dir: String,
    pub wait_for_ready_timeout: Duration,
    pub status_poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            namespace: "sprout".into(),
            internal_network: None,
            external_network: None,
            resource_dirs_root: PathBuf::from("/var/lib/sprout/resourcedirs"),
            resource_dirs_path: Vec::new(),
            container_resource_dir: "/res".into(),
            container_spaces_dir: "/spaces".into(),
            wait_for_ready_timeout: Duration::from_secs(120),
            status_poll_interval: Duration::from_millis(500),
        }
    }
}

impl DriverConfig {
    /// Defaults overridden by `SPROUT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`DriverConfig::from_env`], reading variables through `lookup`.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();
        if let Some(namespace) = var("SPROUT_NAMESPACE") {
            config.namespace = namespace;
        }
        config.internal_network = var("SPROUT_INTERNAL_NETWORK");
        config.external_network = var("SPROUT_EXTERNAL_NETWORK");
        if let Some(root) = var("SPROUT_RESOURCEDIRS_ROOT") {
            config.resource_dirs_root = PathBuf::from(root);
        }
        if let Some(path) = var("SPROUT_RESOURCEDIRS_PATH") {
            config.resource_dirs_path = std::env::split_paths(&path)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        config
    }

    /// Networks every instance joins.
    pub fn networks(&self) -> Vec<String> {
        self.internal_network
            .iter()
            .chain(self.external_network.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DriverConfig::default();
        assert_eq!(config.namespace, "sprout");
        assert_eq!(config.container_resource_dir, "/res");
        assert_eq!(config.wait_for_ready_timeout, Duration::from_secs(120));
        assert!(config.networks().is_empty());
    }

    #[test]
    fn networks_keep_internal_first() {
        let config = DriverConfig {
            internal_network: Some("int".into()),
            external_network: Some("ext".into()),
            ..DriverConfig::default()
        };
        assert_eq!(config.networks(), vec!["int".to_string(), "ext".to_string()]);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars = HashMap::from([
            ("SPROUT_NAMESPACE", "staging"),
            ("SPROUT_INTERNAL_NETWORK", "sprout-int"),
            ("SPROUT_EXTERNAL_NETWORK", ""),
            ("SPROUT_RESOURCEDIRS_ROOT", "/data/res"),
            ("SPROUT_RESOURCEDIRS_PATH", "/mnt/a::/mnt/b"),
        ]);
        let config = DriverConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.networks(), vec!["sprout-int".to_string()]);
        assert_eq!(config.resource_dirs_root, PathBuf::from("/data/res"));
        assert_eq!(
            config.resource_dirs_path,
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]
        );
        assert_eq!(config.container_spaces_dir, "/spaces");
    }

    #[test]
    fn empty_environment_keeps_defaults() {
        let config = DriverConfig::from_lookup(|_| None);
        assert_eq!(config.namespace, "sprout");
        assert!(config.resource_dirs_path.is_empty());
    }
}
