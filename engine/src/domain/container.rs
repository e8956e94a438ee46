//! Container configuration carried in script frontmatter

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment as written in frontmatter: a mapping or a `KEY=value` list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnvSpec {
    Map(serde_yaml::Mapping),
    List(Vec<String>),
}

/// A port entry as written in frontmatter (`8080:80`, `"3000"` or `3000`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Text(String),
}

/// A command as written in frontmatter: one line or an argv list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    fn into_argv(self) -> Vec<String> {
        match self {
            CommandSpec::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandSpec::Argv(argv) => argv,
        }
    }
}

/// Raw `docker:` block of the frontmatter
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerFrontmatter {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cmd: Option<CommandSpec>,
    #[serde(default)]
    pub shell: Option<CommandSpec>,
    #[serde(default, alias = "working_dir", alias = "workingDir")]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: Option<EnvSpec>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default, alias = "auto_remove")]
    pub auto_remove: Option<bool>,
}

/// Canonical container configuration.
///
/// Shape variations of the frontmatter (env as map or list, ports as
/// numbers or strings, commands as a line or argv) are resolved once here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DockerFrontmatter", rename_all = "camelCase")]
pub struct ContainerConfig {
    pub image: String,
    pub name: Option<String>,
    /// Main container command; the engine default shell when unset
    pub cmd: Option<Vec<String>>,
    /// Command run by the interactive exec; the engine default shell when unset
    pub shell: Option<Vec<String>>,
    pub workdir: Option<String>,
    /// `KEY=value` entries
    pub env: Vec<String>,
    /// `host:container[:mode]` entries, host paths not yet resolved
    pub volumes: Vec<String>,
    /// `host:container` or bare port entries
    pub ports: Vec<String>,
    pub auto_remove: bool,
}

impl From<DockerFrontmatter> for ContainerConfig {
    fn from(raw: DockerFrontmatter) -> Self {
        Self {
            image: raw.image,
            name: raw.name.filter(|n| !n.trim().is_empty()),
            cmd: raw.cmd.map(CommandSpec::into_argv).filter(|c| !c.is_empty()),
            shell: raw.shell.map(CommandSpec::into_argv).filter(|c| !c.is_empty()),
            workdir: raw.workdir,
            env: parse_environment(raw.env.as_ref()),
            volumes: raw.volumes,
            ports: raw
                .ports
                .into_iter()
                .map(|p| match p {
                    PortSpec::Number(n) => n.to_string(),
                    PortSpec::Text(s) => s,
                })
                .collect(),
            auto_remove: raw.auto_remove.unwrap_or(true),
        }
    }
}

impl ContainerConfig {
    /// Minimal configuration for an image, everything else defaulted
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            cmd: None,
            shell: None,
            workdir: None,
            env: Vec::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            auto_remove: true,
        }
    }
}

/// Port binding value in the engine's `PortBindings` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Convert an environment spec into `KEY=value` entries.
///
/// List input passes through unchanged; absent input yields nothing.
pub fn parse_environment(env: Option<&EnvSpec>) -> Vec<String> {
    match env {
        None => Vec::new(),
        Some(EnvSpec::List(entries)) => entries.clone(),
        Some(EnvSpec::Map(map)) => map
            .iter()
            .map(|(k, v)| format!("{}={}", yaml_scalar(k), yaml_scalar(v)))
            .collect(),
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Resolve volume entries into `host:container:mode` binds.
///
/// Relative host paths are resolved against `base_path` (the directory of
/// the loaded script). Mode defaults to `rw`. Entries with fewer than two
/// colon-separated parts pass through unchanged.
pub fn parse_volumes(volumes: &[String], base_path: Option<&Path>) -> Vec<String> {
    volumes
        .iter()
        .map(|vol| {
            let parts: Vec<&str> = vol.split(':').collect();
            if parts.len() < 2 {
                return vol.clone();
            }

            let host = parts[0];
            let container = parts[1];
            let mode = parts.get(2).filter(|m| !m.is_empty()).copied().unwrap_or("rw");

            let host_path = Path::new(host);
            let host = match base_path {
                Some(base) if !host_path.is_absolute() => {
                    normalize_path(&base.join(host_path)).display().to_string()
                }
                _ => host.to_string(),
            };

            format!("{}:{}:{}", host, container, mode)
        })
        .collect()
}

/// Build the engine's port binding map.
///
/// A bare port binds the same host and container port; container ports
/// without a protocol suffix are assumed to be tcp.
pub fn parse_port_bindings(ports: &[String]) -> BTreeMap<String, Vec<PortBinding>> {
    let mut bindings = BTreeMap::new();

    for port in ports {
        let port = port.replace('"', "");
        let parts: Vec<&str> = port.trim().split(':').collect();

        let (host_port, container_port) = if parts.len() == 2 {
            (parts[0], parts[1])
        } else {
            (parts[0], parts[0])
        };

        let container_key = if container_port.contains('/') {
            container_port.to_string()
        } else {
            format!("{}/tcp", container_port)
        };
        let host_port = host_port.split('/').next().unwrap_or(host_port);

        bindings.insert(
            container_key,
            vec![PortBinding {
                host_port: host_port.to_string(),
            }],
        );
    }

    bindings
}

/// Lexically resolve `.` and `..` components without touching the filesystem
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volumes_resolves_relative_paths() {
        let volumes = vec!["./data:/app/data".to_string()];
        let resolved = parse_volumes(&volumes, Some(Path::new("/home/u/demo")));
        assert_eq!(resolved, vec!["/home/u/demo/data:/app/data:rw".to_string()]);
    }

    #[test]
    fn test_parse_volumes_keeps_absolute_paths() {
        let volumes = vec!["/abs:/x:ro".to_string()];
        assert_eq!(
            parse_volumes(&volumes, Some(Path::new("/home/u/demo"))),
            vec!["/abs:/x:ro".to_string()]
        );
        assert_eq!(parse_volumes(&volumes, None), vec!["/abs:/x:ro".to_string()]);
    }

    #[test]
    fn test_parse_volumes_parent_and_bare_relative() {
        let volumes = vec!["../shared:/s".to_string(), "cache:/c:ro".to_string()];
        let resolved = parse_volumes(&volumes, Some(Path::new("/home/u/demo")));
        assert_eq!(
            resolved,
            vec!["/home/u/shared:/s:rw".to_string(), "/home/u/demo/cache:/c:ro".to_string()]
        );
    }

    #[test]
    fn test_parse_volumes_malformed_passthrough() {
        let volumes = vec!["just-a-name".to_string()];
        assert_eq!(
            parse_volumes(&volumes, Some(Path::new("/base"))),
            vec!["just-a-name".to_string()]
        );
    }

    #[test]
    fn test_parse_port_bindings() {
        let ports = vec!["8080:80".to_string(), "3000".to_string()];
        let bindings = parse_port_bindings(&ports);

        let json = serde_json::to_value(&bindings).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "80/tcp": [{ "HostPort": "8080" }],
                "3000/tcp": [{ "HostPort": "3000" }],
            })
        );
    }

    #[test]
    fn test_parse_port_bindings_keeps_protocol() {
        let bindings = parse_port_bindings(&["5353:53/udp".to_string()]);
        assert_eq!(
            bindings.get("53/udp"),
            Some(&vec![PortBinding {
                host_port: "5353".to_string()
            }])
        );
    }

    #[test]
    fn test_parse_environment_shapes() {
        let map: EnvSpec = serde_yaml::from_str("FOO: bar").unwrap();
        assert_eq!(parse_environment(Some(&map)), vec!["FOO=bar".to_string()]);

        let list = EnvSpec::List(vec!["A=1".to_string(), "B=2".to_string()]);
        assert_eq!(
            parse_environment(Some(&list)),
            vec!["A=1".to_string(), "B=2".to_string()]
        );

        assert!(parse_environment(None).is_empty());
    }

    #[test]
    fn test_environment_map_keeps_order_and_scalars() {
        let map: EnvSpec = serde_yaml::from_str("ZED: 1\nALPHA: true\nEMPTY:").unwrap();
        assert_eq!(
            parse_environment(Some(&map)),
            vec!["ZED=1".to_string(), "ALPHA=true".to_string(), "EMPTY=".to_string()]
        );
    }

    #[test]
    fn test_container_config_from_yaml() {
        let yaml = r#"
image: node:20
name: demo-box
shell: /bin/sh -l
env:
  - NODE_ENV=development
ports:
  - 3000
  - "8080:80"
autoRemove: false
"#;
        let config: ContainerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.image, "node:20");
        assert_eq!(config.name.as_deref(), Some("demo-box"));
        assert_eq!(config.cmd, None);
        assert_eq!(
            config.shell,
            Some(vec!["/bin/sh".to_string(), "-l".to_string()])
        );
        assert_eq!(config.env, vec!["NODE_ENV=development".to_string()]);
        assert_eq!(config.ports, vec!["3000".to_string(), "8080:80".to_string()]);
        assert!(!config.auto_remove);
    }

    #[test]
    fn test_auto_remove_defaults_to_true() {
        let config: ContainerConfig = serde_yaml::from_str("image: alpine").unwrap();
        assert!(config.auto_remove);
        assert_eq!(config, ContainerConfig::for_image("alpine"));
    }
}
