//! Spawn, watch and shut down instances on a [`ContainerRuntime`].

use std::collections::BTreeMap;

use sprout_spec::{SpawnResolution, SpawnResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::error::ProvisionError;
use crate::mounts::{resource_dir_mounts, template_mounts, view_mounts};
use crate::runtime::{ContainerSpec, DynRuntime, PortMapping, RemoveOptions};
use crate::state::Event;
use crate::watch::{copy_logs_to_stderr, watch_status};

pub const LABEL_NAMESPACE: &str = "sprout.namespace";
pub const LABEL_GENERATION: &str = "sprout.generation";
pub const LABEL_ACTIVITY: &str = "sprout.activity";

const PORT_VAR: &str = "PORT";

pub struct ProvisionDriver {
    pub(crate) runtime: DynRuntime,
    pub(crate) config: DriverConfig,
    pub(crate) generation: String,
}

impl ProvisionDriver {
    /// Every driver instance gets a fresh generation id; anything labeled with
    /// an older one is an orphan.
    pub fn new(runtime: DynRuntime, config: DriverConfig) -> Self {
        Self::with_generation(runtime, config, Uuid::new_v4().simple().to_string())
    }

    pub fn with_generation(runtime: DynRuntime, config: DriverConfig, generation: impl Into<String>) -> Self {
        Self {
            runtime,
            config,
            generation: generation.into(),
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Translate a resolution into a create request. Touches the filesystem
    /// only to locate resource dirs.
    pub async fn container_spec(&self, resolution: &SpawnResolution) -> Result<ContainerSpec, ProvisionError> {
        let template = &resolution.spawn;
        let environment = template.environment.clone();

        let ports = match environment.get(PORT_VAR) {
            Some(value) => vec![PortMapping {
                container_port: parse_port(value)?,
                protocol: "tcp".into(),
            }],
            None => Vec::new(),
        };

        let (activity, _) = resolution.format();
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_NAMESPACE.to_string(), self.config.namespace.clone());
        labels.insert(LABEL_GENERATION.to_string(), self.generation.clone());
        labels.insert(LABEL_ACTIVITY.to_string(), activity);

        let mut mounts = template_mounts(resolution);
        mounts.extend(resource_dir_mounts(&self.config, resolution).await?);
        for (parameter, multi, view) in resolution.space_views() {
            mounts.extend(view_mounts(&self.config, parameter, multi, view));
        }

        Ok(ContainerSpec {
            image: template.image.clone(),
            command: template.command.clone(),
            environment,
            labels,
            mounts,
            ports,
            networks: self.config.networks(),
            remove_on_exit: true,
        })
    }

    pub async fn spawn(&self, resolution: &SpawnResolution) -> Result<SpawnResponse, ProvisionError> {
        let spec = self.container_spec(resolution).await?;
        let port = spec.ports.first().map(|p| p.container_port);

        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(ProvisionError::runtime("create", &spec.image))?;
        if let Err(err) = self.runtime.start(&id).await {
            self.discard(&id, "start failed").await;
            return Err(ProvisionError::runtime("start", &id)(err));
        }
        info!(instance = %id, service = %resolution.service_name, image = %spec.image, "spawned instance");

        copy_logs_to_stderr(self.runtime.clone(), id.clone());

        let details = match self.runtime.inspect(&id).await {
            Ok(details) => details,
            Err(err) => {
                self.discard(&id, "inspect failed").await;
                return Err(ProvisionError::runtime("inspect", &id)(err));
            }
        };

        let backend_url = match port {
            Some(port) => format!("http://{}:{}{}", details.hostname, port, resolution.spawn.url_prefix),
            None => format!("http://{}{}", details.hostname, resolution.spawn.url_prefix),
        };
        debug!(instance = %id, %backend_url, "instance address");

        Ok(SpawnResponse {
            name: id,
            backend_url,
            bearer_token: None,
            resolution: resolution.clone(),
        })
    }

    /// Best-effort removal of a container that never made it to the caller.
    async fn discard(&self, id: &str, reason: &str) {
        let options = RemoveOptions {
            force: true,
            dependents: false,
        };
        match self.runtime.remove(id, options).await {
            Ok(reports) => {
                for err in reports.into_iter().filter_map(|r| r.error) {
                    warn!(instance = %id, error = %err, %reason, "removing half-started instance");
                }
            }
            Err(err) => warn!(instance = %id, error = %err, %reason, "removing half-started instance"),
        }
    }

    /// Status events for `name` until it is gone or `cancel` fires.
    pub fn status(&self, name: &str, cancel: CancellationToken) -> mpsc::Receiver<Event> {
        watch_status(
            self.runtime.clone(),
            name.to_string(),
            self.config.status_poll_interval,
            self.config.wait_for_ready_timeout,
            cancel,
        )
    }

    /// Stop then force-remove. An instance that is already gone is not an error.
    pub async fn shutdown(&self, name: &str, reason: &str) -> Result<(), ProvisionError> {
        info!(instance = %name, %reason, "shutting down instance");
        match self.runtime.stop(name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(instance = %name, "instance already gone");
                return Ok(());
            }
            Err(err) => warn!(instance = %name, error = %err, "stop failed; forcing removal"),
        }

        let options = RemoveOptions {
            force: true,
            dependents: false,
        };
        match self.runtime.remove(name, options).await {
            Ok(reports) => {
                for report in reports {
                    if let Some(err) = report.error {
                        if !err.is_not_found() {
                            return Err(ProvisionError::Runtime {
                                op: "remove",
                                id: report.id,
                                source: err,
                            });
                        }
                    }
                }
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(ProvisionError::Runtime {
                op: "remove",
                id: name.to_string(),
                source: err,
            }),
        }
    }
}

fn parse_port(value: &str) -> Result<u16, ProvisionError> {
    value.trim().parse().map_err(|_| ProvisionError::BadPort {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use sprout_spec::{
        ParameterValue, ResolvedParameter, ResourceDirDef, SpaceView, SpawnTemplate, TemplateMount,
    };

    use super::*;
    use crate::fixtures::MockRuntime;
    use crate::state::State;

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

    fn resolution(port: Option<&str>) -> SpawnResolution {
        let mut spawn = SpawnTemplate {
            image: "registry.local/chat:1".into(),
            command: vec!["serve".into()],
            url_prefix: "/chat".into(),
            ..SpawnTemplate::default()
        };
        if let Some(port) = port {
            spawn.environment.insert("PORT".into(), port.into());
        }
        spawn.environment.insert("MODEL".into(), "small".into());
        spawn.mounts.push(TemplateMount {
            source: "/etc/certs".into(),
            destination: "/certs".into(),
            mode: None,
        });
        spawn.mounts.push(TemplateMount {
            source: "/var/cache".into(),
            destination: "/cache".into(),
            mode: Some("rw".into()),
        });

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "data".to_string(),
            ResolvedParameter::explicit(ParameterValue::Space(view("sp-1", false))),
        );
        parameters.insert(
            "refs".to_string(),
            ResolvedParameter::explicit(ParameterValue::Spaces(vec![
                view("sp-2", true),
                view("sp-3", true),
            ])),
        );
        SpawnResolution {
            user: "alice".into(),
            ephemeral: false,
            service_name: "chat".into(),
            parameters,
            grace_period_seconds: None,
            spawn,
        }
    }

    fn driver(runtime: Arc<MockRuntime>, config: DriverConfig) -> ProvisionDriver {
        ProvisionDriver::with_generation(runtime, config, "gen-now")
    }

    #[tokio::test]
    async fn container_spec_translation() {
        let runtime = Arc::new(MockRuntime::new());
        let config = DriverConfig {
            internal_network: Some("sprout-int".into()),
            ..DriverConfig::default()
        };
        let driver = driver(runtime, config);
        let res = resolution(Some("8080"));

        let spec = driver.container_spec(&res).await.unwrap();
        assert_eq!(spec.image, "registry.local/chat:1");
        assert_eq!(spec.command, vec!["serve".to_string()]);
        assert_eq!(spec.environment["PORT"], "8080");
        assert_eq!(spec.environment["MODEL"], "small");
        assert_eq!(
            spec.ports,
            vec![PortMapping {
                container_port: 8080,
                protocol: "tcp".into()
            }]
        );
        assert_eq!(spec.labels[LABEL_NAMESPACE], "sprout");
        assert_eq!(spec.labels[LABEL_GENERATION], "gen-now");
        assert_eq!(spec.labels[LABEL_ACTIVITY], "chat[data=sp-1;refs=,sp-2:ro,sp-3:ro]");
        assert_eq!(spec.networks, vec!["sprout-int".to_string()]);
        assert!(spec.remove_on_exit);

        // 2 template mounts + 3 per view.
        assert_eq!(spec.mounts.len(), 2 + 3 * 3);
        assert!(spec.mounts[0].read_only);
        assert!(!spec.mounts[1].read_only);
        let tree = |dest: &str| spec.mounts.iter().find(|m| m.destination == dest).unwrap().clone();
        assert!(!tree("/spaces/data/tree").read_only);
        assert!(tree("/spaces/refs/sp-2/tree").read_only);
        assert!(tree("/spaces/data/owner").read_only);
    }

    #[tokio::test]
    async fn missing_resource_dir_falls_back_to_primary_path() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(MockRuntime::new());
        let config = DriverConfig {
            resource_dirs_root: root.path().to_path_buf(),
            ..DriverConfig::default()
        };
        let driver = driver(runtime, config);
        let mut res = resolution(None);
        res.spawn.resource_dirs.insert(
            "weights".into(),
            ResourceDirDef {
                id: "weights".into(),
                sha256: "feed".into(),
            },
        );

        let spec = driver.container_spec(&res).await.unwrap();
        let mount = spec
            .mounts
            .iter()
            .find(|m| m.destination == "/res/weights")
            .unwrap();
        assert_eq!(mount.source, root.path().join("feed").display().to_string());
        assert!(mount.read_only);
        assert!(spec.ports.is_empty());
    }

    #[tokio::test]
    async fn bad_port_is_rejected() {
        let driver = driver(Arc::new(MockRuntime::new()), DriverConfig::default());
        let err = driver.spawn(&resolution(Some("http"))).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadPort { ref value } if value == "http"));
    }

    #[tokio::test]
    async fn spawn_derives_backend_url() {
        let runtime = Arc::new(MockRuntime::new());
        let driver = driver(runtime.clone(), DriverConfig::default());

        let response = driver.spawn(&resolution(Some("8080"))).await.unwrap();
        let hostname = runtime.hostname(&response.name).unwrap();
        assert_eq!(response.backend_url, format!("http://{hostname}:8080/chat"));
        assert_eq!(response.url().unwrap().port(), Some(8080));
        assert_eq!(runtime.status_of(&response.name).as_deref(), Some("running"));

        let response = driver.spawn(&resolution(None)).await.unwrap();
        let hostname = runtime.hostname(&response.name).unwrap();
        assert_eq!(response.backend_url, format!("http://{hostname}/chat"));
    }

    #[tokio::test]
    async fn status_stream_reports_ready_then_gone() {
        let runtime = Arc::new(MockRuntime::new());
        let config = DriverConfig {
            status_poll_interval: Duration::from_millis(5),
            ..DriverConfig::default()
        };
        let driver = driver(runtime.clone(), config);
        let response = driver.spawn(&resolution(Some("8080"))).await.unwrap();

        let mut events = driver.status(&response.name, CancellationToken::new());
        assert_eq!(events.recv().await, Some(Event::Status(State::Running)));

        runtime.set_status(&response.name, "restarting");
        assert_eq!(events.recv().await, Some(Event::Status(State::Restarting)));

        runtime.set_healthy(&response.name, true);
        runtime.set_status(&response.name, "running");
        assert_eq!(events.recv().await, Some(Event::Status(State::Ready)));

        runtime.kill(&response.name);
        assert_eq!(events.recv().await, Some(Event::Status(State::Dead)));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn status_stream_times_out_and_stops_on_cancel() {
        let runtime = Arc::new(MockRuntime::new());
        let config = DriverConfig {
            status_poll_interval: Duration::from_millis(5),
            wait_for_ready_timeout: Duration::from_millis(20),
            ..DriverConfig::default()
        };
        let driver = driver(runtime.clone(), config);
        let response = driver.spawn(&resolution(Some("8080"))).await.unwrap();

        let mut events = driver.status(&response.name, CancellationToken::new());
        assert!(events.recv().await.unwrap().is_pending());
        assert!(events.recv().await.unwrap().error().is_some());
        assert_eq!(events.recv().await, None);

        let cancel = CancellationToken::new();
        let mut events = driver.status(&response.name, cancel.clone());
        cancel.cancel();
        while events.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn failed_start_removes_the_created_container() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_start("runtime busy");
        let driver = driver(runtime.clone(), DriverConfig::default());

        let err = driver.spawn(&resolution(Some("8080"))).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Runtime { op: "start", .. }), "{err}");
        assert_eq!(runtime.created().len(), 1);
        assert!(!runtime.contains("mock-1"));
        assert_eq!(runtime.removed(), vec!["mock-1".to_string()]);
    }

    #[tokio::test]
    async fn failed_inspect_removes_the_started_container() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_inspect("mock-1", 1);
        let driver = driver(runtime.clone(), DriverConfig::default());

        let err = driver.spawn(&resolution(Some("8080"))).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Runtime { op: "inspect", .. }), "{err}");
        assert!(runtime.running().is_empty());
        assert_eq!(runtime.removed(), vec!["mock-1".to_string()]);
    }

    #[tokio::test]
    async fn failed_create_leaves_nothing_behind() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_create("no space left");
        let driver = driver(runtime.clone(), DriverConfig::default());

        let err = driver.spawn(&resolution(Some("8080"))).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Runtime { op: "create", .. }), "{err}");
        assert!(runtime.created().is_empty());
    }

    #[tokio::test]
    async fn shutdown_removes_and_tolerates_missing() {
        let runtime = Arc::new(MockRuntime::new());
        let driver = driver(runtime.clone(), DriverConfig::default());
        let response = driver.spawn(&resolution(Some("8080"))).await.unwrap();

        driver.shutdown(&response.name, "test").await.unwrap();
        assert!(!runtime.contains(&response.name));
        driver.shutdown(&response.name, "again").await.unwrap();
    }
}
