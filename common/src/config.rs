//! Job configuration: YAML loading, validation and normalization.
//!
//! The engine trusts that a [`Config`] returned by [`load`] is already
//! validated: non-empty job list, non-empty targets, resolved credentials
//! and normalized roots.

use anyhow::{Context, Result, bail};

use crate::path;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// One source-to-many-targets replication task.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Job {
    #[serde(default)]
    pub name: String,
    pub source: Endpoint,
    #[serde(default)]
    pub targets: Vec<Endpoint>,
    /// Optional subpath under the source root to replicate.
    #[serde(default)]
    pub path: String,
    /// Per-job override of the global worker count (0 = use the global).
    #[serde(default)]
    pub concurrency: usize,
}

/// A remote filesystem location with credentials and a root path.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Environment variable to read the password from when `password` is
    /// empty.
    #[serde(default)]
    pub password_env: String,
    #[serde(default)]
    pub root: String,
}

/// Load and normalise a YAML configuration file.
pub fn load(config_path: &std::path::Path) -> Result<Config> {
    let data = std::fs::read_to_string(config_path)
        .with_context(|| format!("open config {config_path:?}"))?;
    let mut config: Config =
        serde_yaml::from_str(&data).with_context(|| format!("decode config {config_path:?}"))?;
    config.normalise()?;
    Ok(config)
}

impl Config {
    /// Validate and normalise in place. Called by [`load`]; exposed for
    /// configs assembled in code.
    pub fn normalise(&mut self) -> Result<()> {
        if self.jobs.is_empty() {
            bail!("no jobs defined in configuration");
        }
        for (idx, job) in self.jobs.iter_mut().enumerate() {
            job.name = job.name.trim().to_string();
            if job.name.is_empty() {
                job.name = format!("job-{}", idx + 1);
            }
            job.path = job.path.trim_matches('/').to_string();
            job.source.prepare(&job.name, "source")?;
            if job.targets.is_empty() {
                bail!("{}: no targets defined", job.name);
            }
            for (target_idx, target) in job.targets.iter_mut().enumerate() {
                target.prepare(&job.name, &format!("target-{}", target_idx + 1))?;
            }
        }
        Ok(())
    }
}

impl Endpoint {
    fn prepare(&mut self, job_name: &str, role: &str) -> Result<()> {
        self.url = self.url.trim().trim_end_matches('/').to_string();
        if self.url.is_empty() {
            bail!("{job_name} ({role}): missing url");
        }
        if self.password.is_empty() && !self.password_env.is_empty() {
            let value = std::env::var(&self.password_env).unwrap_or_default();
            if value.is_empty() {
                bail!(
                    "{job_name} ({role}): environment variable {:?} is empty",
                    self.password_env
                );
            }
            self.password = value;
        }
        self.root = normalise_root(&self.root);
        Ok(())
    }
}

fn normalise_root(root: &str) -> String {
    let root = root.trim();
    if root.is_empty() || root == "." || root == "/" {
        return "/".to_string();
    }
    path::ensure_absolute(root.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Config> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.normalise()?;
        Ok(config)
    }

    #[test]
    fn defaults_job_name_and_trims_path() {
        let config = parse(
            r"
jobs:
  - source:
      url: sftp://src.example.com
    targets:
      - url: sftp://dst.example.com
    path: /photos/2024/
",
        )
        .unwrap();
        assert_eq!(config.jobs[0].name, "job-1");
        assert_eq!(config.jobs[0].path, "photos/2024");
    }

    #[test]
    fn normalises_roots() {
        assert_eq!(normalise_root(""), "/");
        assert_eq!(normalise_root("."), "/");
        assert_eq!(normalise_root("/"), "/");
        assert_eq!(normalise_root("data/"), "/data");
        assert_eq!(normalise_root("/data//sub/"), "/data/sub");
    }

    #[test]
    fn rejects_empty_job_list() {
        assert!(parse("jobs: []").is_err());
    }

    #[test]
    fn rejects_job_without_targets() {
        let result = parse(
            r"
jobs:
  - name: backup
    source:
      url: sftp://src.example.com
",
        );
        assert!(result.unwrap_err().to_string().contains("no targets"));
    }

    #[test]
    fn rejects_endpoint_without_url() {
        let result = parse(
            r"
jobs:
  - source:
      url: ''
    targets:
      - url: sftp://dst.example.com
",
        );
        assert!(result.unwrap_err().to_string().contains("missing url"));
    }

    #[test]
    fn resolves_password_from_environment() {
        unsafe { std::env::set_var("RFAN_TEST_PW_SET", "s3cret") };
        let config = parse(
            r"
jobs:
  - source:
      url: sftp://src.example.com
      username: sync
      password_env: RFAN_TEST_PW_SET
    targets:
      - url: sftp://dst.example.com
",
        )
        .unwrap();
        assert_eq!(config.jobs[0].source.password, "s3cret");
    }

    #[test]
    fn rejects_empty_password_environment_variable() {
        let result = parse(
            r"
jobs:
  - source:
      url: sftp://src.example.com
      password_env: RFAN_TEST_PW_UNSET
    targets:
      - url: sftp://dst.example.com
",
        );
        assert!(result.unwrap_err().to_string().contains("RFAN_TEST_PW_UNSET"));
    }

    #[test]
    fn explicit_password_wins_over_environment() {
        let config = parse(
            r"
jobs:
  - source:
      url: sftp://src.example.com
      password: direct
      password_env: RFAN_TEST_PW_IGNORED
    targets:
      - url: sftp://dst.example.com
",
        )
        .unwrap();
        assert_eq!(config.jobs[0].source.password, "direct");
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("jobs.yaml");
        std::fs::write(
            &config_path,
            r"
jobs:
  - name: mirror
    source:
      url: sftp://src.example.com
      root: /data
    targets:
      - url: sftp://a.example.com
        root: backups/
      - url: sftp://b.example.com
    concurrency: 4
",
        )
        .unwrap();
        let config = load(&config_path).unwrap();
        assert_eq!(config.jobs.len(), 1);
        let job = &config.jobs[0];
        assert_eq!(job.name, "mirror");
        assert_eq!(job.source.root, "/data");
        assert_eq!(job.targets[0].root, "/backups");
        assert_eq!(job.targets[1].root, "/");
        assert_eq!(job.concurrency, 4);
    }

    #[test]
    fn load_rejects_missing_file() {
        let result = load(std::path::Path::new("/definitely/not/there.yaml"));
        assert!(result.unwrap_err().to_string().contains("open config"));
    }
}
