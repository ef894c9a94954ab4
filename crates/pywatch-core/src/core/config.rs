use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
/// Upper bound for every configured duration.
pub const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

pub const ENV_DIR: &str = ".pywatch/env";
pub const LIB_DIR: &str = ".pywatch/lib";
pub const PAYLOAD_FILE: &str = "payload.py";
pub const MANIFEST_FILE: &str = "libraries.txt";

/// Set on the re-executed supervisor so it never relaunches a second time.
pub const RELAUNCH_MARKER: &str = "PYWATCH_RELAUNCHED";

const DEFAULT_CORE_DEPS: &[(&str, &str)] = &[("requests", "requests"), ("beautifulsoup4", "bs4")];

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Values supplied on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub manifest_url: Option<String>,
    pub interval_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub grace_secs: Option<u64>,
    pub workdir: Option<PathBuf>,
    pub no_isolation: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) source: SourceConfig,
    pub(crate) timing: TimingConfig,
    pub(crate) layout: Layout,
    pub(crate) runtime: RuntimeConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if no page URL is configured, a URL does not parse, or
    /// a numeric setting is not a valid number of seconds.
    pub fn from_env(overrides: &ConfigOverrides) -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        let cwd = env::current_dir().context("failed to read the current directory")?;
        Self::from_snapshot(&snapshot, overrides, &cwd, Invocation::current())
    }

    pub(crate) fn from_snapshot(
        snapshot: &EnvSnapshot,
        overrides: &ConfigOverrides,
        cwd: &Path,
        invocation: Option<Invocation>,
    ) -> Result<Self> {
        let raw_url = overrides
            .url
            .as_deref()
            .or_else(|| snapshot.var("PYWATCH_URL"))
            .ok_or_else(|| anyhow!("no page url configured; pass URL or set PYWATCH_URL"))?;
        let page_url = parse_url(raw_url, "page url")?;
        let manifest_url = match overrides
            .manifest_url
            .as_deref()
            .or_else(|| snapshot.var("PYWATCH_MANIFEST_URL"))
        {
            Some(raw) => parse_url(raw, "manifest url")?,
            None => default_manifest_url(&page_url)?,
        };

        let timing = TimingConfig {
            poll_interval: seconds(
                overrides.interval_secs,
                snapshot,
                "PYWATCH_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL,
                false,
            )?,
            http_timeout: seconds(
                overrides.http_timeout_secs,
                snapshot,
                "PYWATCH_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT,
                false,
            )?,
            grace_period: seconds(
                overrides.grace_secs,
                snapshot,
                "PYWATCH_GRACE_SECS",
                DEFAULT_GRACE_PERIOD,
                true,
            )?,
        };

        let root = match overrides
            .workdir
            .clone()
            .or_else(|| snapshot.var("PYWATCH_WORKDIR").map(PathBuf::from))
        {
            Some(workdir) => cwd.join(workdir),
            None => cwd.to_path_buf(),
        };
        let layout = Layout::new(root);

        let isolate = !overrides.no_isolation
            && !matches!(
                snapshot
                    .var("PYWATCH_ISOLATE")
                    .map(str::to_ascii_lowercase)
                    .as_deref(),
                Some("0" | "false" | "no" | "off")
            );
        let core_deps = match snapshot.var("PYWATCH_CORE_DEPS") {
            Some(raw) => parse_core_deps(raw)?,
            None => DEFAULT_CORE_DEPS
                .iter()
                .map(|(requirement, module)| CoreDependency::new(requirement, module))
                .collect(),
        };

        Ok(Self {
            source: SourceConfig {
                page_url,
                manifest_url,
            },
            timing,
            layout,
            runtime: RuntimeConfig {
                isolate,
                python: snapshot.var("PYWATCH_PYTHON").map(ToOwned::to_owned),
                core_deps,
                virtual_env: snapshot.var("VIRTUAL_ENV").map(PathBuf::from),
                relaunched: snapshot.flag_is_enabled(RELAUNCH_MARKER),
                inherited_path: snapshot.var("PATH").map(ToOwned::to_owned),
                inherited_pythonpath: snapshot.var("PYTHONPATH").map(ToOwned::to_owned),
                invocation,
            },
        })
    }

    #[must_use]
    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    #[must_use]
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub page_url: Url,
    pub manifest_url: Url,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub grace_period: Duration,
}

/// Fixed on-disk locations, all relative to the working directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn env_dir(&self) -> PathBuf {
        self.root.join(ENV_DIR)
    }

    #[must_use]
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join(LIB_DIR)
    }

    #[must_use]
    pub fn payload_path(&self) -> PathBuf {
        self.root.join(PAYLOAD_FILE)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub isolate: bool,
    pub python: Option<String>,
    pub core_deps: Vec<CoreDependency>,
    pub virtual_env: Option<PathBuf>,
    pub relaunched: bool,
    pub inherited_path: Option<String>,
    pub inherited_pythonpath: Option<String>,
    pub invocation: Option<Invocation>,
}

/// A package the supervisor always wants importable, with the module name
/// used to probe for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDependency {
    pub requirement: String,
    pub module: String,
}

impl CoreDependency {
    #[must_use]
    pub fn new(requirement: &str, module: &str) -> Self {
        Self {
            requirement: requirement.to_string(),
            module: module.to_string(),
        }
    }
}

/// How this supervisor was started, so it can re-execute itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    #[must_use]
    pub fn current() -> Option<Self> {
        let program = env::current_exe().ok()?;
        Some(Self {
            program,
            args: env::args_os().skip(1).collect(),
        })
    }
}

fn parse_url(raw: &str, what: &str) -> Result<Url> {
    Url::parse(raw.trim()).with_context(|| format!("invalid {what} {raw:?}"))
}

fn default_manifest_url(page_url: &Url) -> Result<Url> {
    let base = page_url.as_str().trim_end_matches('/');
    parse_url(&format!("{base}/{MANIFEST_FILE}"), "manifest url")
}

fn seconds(
    explicit: Option<u64>,
    snapshot: &EnvSnapshot,
    key: &str,
    default: Duration,
    allow_zero: bool,
) -> Result<Duration> {
    let value = match explicit {
        Some(value) => value,
        None => match snapshot.var(key) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{key} must be a whole number of seconds, got {raw:?}"))?,
            None => return Ok(default),
        },
    };
    if value == 0 && !allow_zero {
        bail!("{key} must be greater than zero");
    }
    if value > MAX_DURATION_SECS {
        bail!("{key} must be at most {MAX_DURATION_SECS} seconds, got {value}");
    }
    Ok(Duration::from_secs(value))
}

fn parse_core_deps(raw: &str) -> Result<Vec<CoreDependency>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((requirement, module)) if !requirement.trim().is_empty() && !module.trim().is_empty() => {
                Ok(CoreDependency::new(requirement.trim(), module.trim()))
            }
            Some(_) => Err(anyhow!("invalid PYWATCH_CORE_DEPS entry {entry:?}")),
            None => Ok(CoreDependency::new(entry, &module_guess(entry))),
        })
        .collect()
}

fn module_guess(requirement: &str) -> String {
    requirement
        .split(|ch: char| "<>=!~[;@ ".contains(ch))
        .next()
        .unwrap_or(requirement)
        .to_ascii_lowercase()
        .replace('-', "_")
}
