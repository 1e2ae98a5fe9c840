//! docker-compose file loading.
//!
//! Only the parts backup needs are read: the project name and, per service,
//! its image and volume mounts. Variable references are resolved from an
//! explicit [`EnvMap`] built from the project's `.env` and the process
//! environment; process state is never modified.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::utils::errors::{BackupError, Result};

pub type EnvMap = BTreeMap<String, String>;

pub const ENV_FILE: &str = ".env";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMount {
    pub kind: MountKind,
    /// Absolute host path for binds, daemon volume name for volumes
    pub source: String,
    pub target: String,
}

/// One service of a compose project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeService {
    pub name: String,
    pub image: Option<String>,
    #[serde(default)]
    pub volumes: Vec<ServiceMount>,
}

#[derive(Debug, Clone)]
pub struct ComposeProject {
    pub name: String,
    pub dir: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
    pub services: Vec<ComposeService>,
}

#[derive(Debug, Deserialize)]
struct ComposeFile {
    name: Option<String>,
    #[serde(default)]
    services: BTreeMap<String, ServiceDef>,
    #[serde(default)]
    volumes: BTreeMap<String, Option<VolumeDef>>,
}

#[derive(Debug, Deserialize)]
struct ServiceDef {
    image: Option<String>,
    #[serde(default)]
    volumes: Vec<VolumeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VolumeEntry {
    Short(String),
    Long {
        #[serde(rename = "type")]
        kind: Option<String>,
        source: Option<String>,
        target: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct VolumeDef {
    name: Option<String>,
    #[serde(default)]
    external: bool,
}

/// `.env` of the project directory (if any), overridden by the process
/// environment.
pub fn load_env(dir: &Path) -> Result<EnvMap> {
    let mut env = EnvMap::new();
    let env_file = dir.join(ENV_FILE);
    if env_file.exists() {
        let iter = dotenvy::from_path_iter(&env_file)
            .map_err(|e| BackupError::Compose(format!("{}: {e}", env_file.display())))?;
        for item in iter {
            let (key, value) =
                item.map_err(|e| BackupError::Compose(format!("{}: {e}", env_file.display())))?;
            env.insert(key, value);
        }
    }
    env.extend(std::env::vars());
    Ok(env)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Resolve `${VAR}`, `${VAR:-default}`, `${VAR-default}` and `$VAR`.
/// `$$` is a literal `$`. Unset variables without a default become empty.
pub fn interpolate(input: &str, env: &EnvMap) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = closing_brace(body)
                .ok_or_else(|| {
                    let line = body.lines().next().unwrap_or_default();
                    BackupError::Compose(format!("unterminated variable reference ${{{line}"))
                })?;
            out.push_str(&resolve_braced(&body[..end], env)?);
            rest = &body[end + 1..];
        } else {
            let len = after
                .char_indices()
                .find(|(_, c)| !is_name_char(*c))
                .map(|(i, _)| i)
                .unwrap_or(after.len());
            if len == 0 {
                out.push('$');
            } else {
                out.push_str(env.get(&after[..len]).map(String::as_str).unwrap_or_default());
            }
            rest = &after[len..];
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Index of the `}` closing a `${`, skipping nested `${...}` defaults.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = body.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'{' if i > 0 && bytes[i - 1] == b'$' => depth += 1,
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn resolve_braced(expr: &str, env: &EnvMap) -> Result<String> {
    let name_len = expr.find(|c: char| !is_name_char(c)).unwrap_or(expr.len());
    let (name, modifier) = expr.split_at(name_len);
    if name.is_empty() {
        return Err(BackupError::Compose(format!("invalid variable ${{{expr}}}")));
    }
    let value = env.get(name);

    if modifier.is_empty() {
        return Ok(value.cloned().unwrap_or_default());
    }
    if let Some(default) = modifier.strip_prefix(":-") {
        return match value {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => interpolate(default, env),
        };
    }
    if let Some(default) = modifier.strip_prefix('-') {
        return match value {
            Some(v) => Ok(v.clone()),
            None => interpolate(default, env),
        };
    }
    Err(BackupError::Compose(format!("unsupported variable syntax ${{{expr}}}")))
}

/// Compose's project name normalization: lowercase, `[a-z0-9_-]` only.
fn normalize_project_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

fn is_host_path(source: &str) -> bool {
    source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
}

fn resolve_host_path(source: &str, dir: &Path, env: &EnvMap) -> String {
    let path = if let Some(rest) = source.strip_prefix('~') {
        let home = env.get("HOME").map(String::as_str).unwrap_or("/");
        PathBuf::from(home).join(rest.trim_start_matches('/'))
    } else if source.starts_with('/') {
        PathBuf::from(source)
    } else {
        dir.join(source)
    };
    // Drop `.` components so records carry clean absolute paths.
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect::<PathBuf>()
        .display()
        .to_string()
}

/// Parse compose YAML that has already been read from `dir`.
pub fn parse_project(text: &str, dir: &Path, env: &EnvMap) -> Result<(String, Vec<ComposeService>)> {
    let resolved = interpolate(text, env)?;
    let file: ComposeFile = serde_yaml::from_str(&resolved)?;

    let raw_name = env
        .get("COMPOSE_PROJECT_NAME")
        .cloned()
        .or_else(|| file.name.clone())
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "default".to_string());
    let project = normalize_project_name(&raw_name);
    if project.is_empty() {
        return Err(BackupError::Compose(format!("invalid project name {raw_name:?}")));
    }

    let volume_name = |short: &str| -> String {
        match file.volumes.get(short).and_then(|d| d.as_ref()) {
            Some(VolumeDef { name: Some(name), .. }) => name.clone(),
            Some(VolumeDef { external: true, .. }) => short.to_string(),
            _ => format!("{project}_{short}"),
        }
    };

    let mut services = Vec::new();
    for (name, def) in &file.services {
        let mut volumes = Vec::new();
        for entry in &def.volumes {
            let (kind, source, target) = match entry {
                VolumeEntry::Short(spec) => {
                    let mut parts = spec.splitn(3, ':');
                    match (parts.next(), parts.next()) {
                        (Some(source), Some(target)) => (None, source.to_string(), target.to_string()),
                        // Anonymous volume, nothing to name or restore.
                        _ => continue,
                    }
                }
                VolumeEntry::Long { kind, source: Some(source), target } => {
                    (kind.clone(), source.clone(), target.clone())
                }
                VolumeEntry::Long { source: None, .. } => continue,
            };

            let mount = match kind.as_deref() {
                Some("bind") => ServiceMount {
                    kind: MountKind::Bind,
                    source: resolve_host_path(&source, dir, env),
                    target,
                },
                Some("volume") => ServiceMount {
                    kind: MountKind::Volume,
                    source: volume_name(&source),
                    target,
                },
                Some(_) => continue,
                None if is_host_path(&source) => ServiceMount {
                    kind: MountKind::Bind,
                    source: resolve_host_path(&source, dir, env),
                    target,
                },
                None => ServiceMount {
                    kind: MountKind::Volume,
                    source: volume_name(&source),
                    target,
                },
            };
            volumes.push(mount);
        }

        services.push(ComposeService {
            name: name.clone(),
            image: def.image.clone(),
            volumes,
        });
    }

    Ok((project, services))
}

/// Load the compose file at `path` (a file, or a directory containing
/// `docker-compose.yml` / `compose.yaml` and friends).
pub fn load_project(path: &Path) -> Result<ComposeProject> {
    let compose_file = if path.is_dir() {
        ["docker-compose.yml", "docker-compose.yaml", "compose.yaml", "compose.yml"]
            .iter()
            .map(|f| path.join(f))
            .find(|p| p.exists())
            .ok_or_else(|| {
                BackupError::NotFound(format!("no compose file in {}", path.display()))
            })?
    } else {
        path.to_path_buf()
    };
    let compose_file = fs::canonicalize(&compose_file)?;
    let dir = compose_file
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| BackupError::Compose(format!("{} has no parent", compose_file.display())))?;

    let env = load_env(&dir)?;
    let text = fs::read_to_string(&compose_file)?;
    let (name, services) = parse_project(&text, &dir, &env)?;

    let env_file = dir.join(ENV_FILE);
    debug!(project = %name, services = services.len(), "Compose project loaded");
    Ok(ComposeProject {
        name,
        dir,
        compose_file,
        env_file: env_file.exists().then_some(env_file),
        services,
    })
}
