//! Scripted stand-ins for the effects seam.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

use super::config::{Config, ConfigOverrides, EnvSnapshot, Invocation};
use super::effects::{
    ChildExit, ChildProcess, Effects, HttpClient, LaunchSpec, ProcessControl, PythonRuntime,
    RelaunchPlan,
};
use super::errors::WatchError;
use super::net::HttpResponse;
use super::process::RunOutput;

pub(crate) const BASE_PYTHON: &str = "/usr/bin/python3";

pub(crate) fn test_config(root: &Path, page_url: &str, pairs: &[(&str, &str)]) -> Config {
    let mut vars = vec![("PYWATCH_URL", page_url), ("PYWATCH_PYTHON", BASE_PYTHON)];
    vars.extend_from_slice(pairs);
    Config::from_snapshot(
        &EnvSnapshot::testing(&vars),
        &ConfigOverrides {
            interval_secs: Some(1),
            grace_secs: Some(1),
            ..ConfigOverrides::default()
        },
        root,
        Some(Invocation {
            program: "/usr/local/bin/pywatch".into(),
            args: vec!["run".into(), page_url.into()],
        }),
    )
    .expect("test config")
}

#[derive(Default)]
pub(crate) struct FakeEffects {
    pub python: FakePython,
    pub http: FakeHttp,
    pub processes: FakeProcesses,
}

impl Effects for FakeEffects {
    fn python(&self) -> &dyn PythonRuntime {
        &self.python
    }

    fn http(&self) -> &dyn HttpClient {
        &self.http
    }

    fn processes(&self) -> &dyn ProcessControl {
        &self.processes
    }
}

type Hook = Box<dyn Fn(&[String]) + Send + Sync>;

/// Records every interpreter invocation. Invocations whose joined argument
/// list contains a registered needle exit with code 1.
#[derive(Default)]
pub(crate) struct FakePython {
    calls: Mutex<Vec<(String, Vec<String>, Vec<(String, String)>)>>,
    failures: Mutex<Vec<String>>,
    hooks: Mutex<Vec<(String, Hook)>>,
}

impl FakePython {
    pub(crate) fn fail_when(&self, needle: &str) {
        self.failures.lock().unwrap().push(needle.to_string());
    }

    /// Run `hook` whenever an invocation contains `needle` and succeeds.
    pub(crate) fn on(&self, needle: &str, hook: impl Fn(&[String]) + Send + Sync + 'static) {
        self.hooks
            .lock()
            .unwrap()
            .push((needle.to_string(), Box::new(hook)));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(python, args, _)| format!("{python} {}", args.join(" ")))
            .collect()
    }

    pub(crate) fn envs_of_call(&self, index: usize) -> Vec<(String, String)> {
        self.calls.lock().unwrap()[index].2.clone()
    }
}

impl PythonRuntime for FakePython {
    fn detect_interpreter(&self, explicit: Option<&str>) -> Result<String> {
        Ok(explicit.unwrap_or(BASE_PYTHON).to_string())
    }

    fn run_command(
        &self,
        python: &str,
        args: &[String],
        env: &[(String, String)],
        _cwd: &Path,
    ) -> Result<RunOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((python.to_string(), args.to_vec(), env.to_vec()));
        let joined = args.join(" ");
        let failing = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|needle| joined.contains(needle.as_str()));
        if failing {
            return Ok(RunOutput {
                code: 1,
                stdout: String::new(),
                stderr: format!("scripted failure for {joined}"),
            });
        }
        for (needle, hook) in self.hooks.lock().unwrap().iter() {
            if joined.contains(needle.as_str()) {
                hook(args);
            }
        }
        Ok(RunOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Serves queued bodies per URL. The last queued response for a URL is
/// repeated once the queue runs dry.
#[derive(Default)]
pub(crate) struct FakeHttp {
    routes: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub(crate) fn respond(&self, url: &str, body: &str) {
        self.push(url, Ok(body.to_string()));
    }

    pub(crate) fn fail(&self, url: &str, reason: &str) {
        self.push(url, Err(reason.to_string()));
    }

    fn push(&self, url: &str, response: Result<String, String>) {
        let key = Url::parse(url).expect("test url").to_string();
        self.routes
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        let key = Url::parse(url).expect("test url").to_string();
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| **seen == key)
            .count()
    }
}

impl HttpClient for FakeHttp {
    fn get(&self, url: &Url, _timeout: Duration) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(url.to_string());
        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(url.as_str())
            .ok_or_else(|| WatchError::network(url, "HTTP 404 Not Found"))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        let response = next.ok_or_else(|| anyhow!("no scripted response for {url}"))?;
        match response {
            Ok(body) => Ok(HttpResponse {
                url: url.clone(),
                body,
            }),
            Err(reason) => Err(WatchError::network(url, reason).into()),
        }
    }
}

/// Children are just pids in a shared live set.
#[derive(Default)]
pub(crate) struct FakeProcesses {
    live: Arc<Mutex<HashSet<u32>>>,
    next_pid: AtomicU32,
    spawned: Mutex<Vec<LaunchSpec>>,
    relaunches: Mutex<Vec<RelaunchPlan>>,
    stops: Arc<Mutex<Vec<u32>>>,
    kills: Arc<Mutex<Vec<u32>>>,
    fail_spawn: AtomicBool,
    ignore_stop: AtomicBool,
    fail_polls: Arc<AtomicBool>,
}

impl FakeProcesses {
    pub(crate) fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn ignore_stop_requests(&self, ignore: bool) {
        self.ignore_stop.store(ignore, Ordering::SeqCst);
    }

    /// Make every `try_wait` on children, present and future, report an error.
    pub(crate) fn fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn live(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.live.lock().unwrap().iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub(crate) fn spawned(&self) -> Vec<LaunchSpec> {
        self.spawned.lock().unwrap().clone()
    }

    pub(crate) fn relaunches(&self) -> Vec<RelaunchPlan> {
        self.relaunches.lock().unwrap().clone()
    }

    pub(crate) fn stops(&self) -> Vec<u32> {
        self.stops.lock().unwrap().clone()
    }

    pub(crate) fn kills(&self) -> Vec<u32> {
        self.kills.lock().unwrap().clone()
    }
}

impl ProcessControl for FakeProcesses {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(anyhow!("failed to start {}", spec.program));
        }
        let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(pid);
        self.spawned.lock().unwrap().push(spec.clone());
        Ok(Box::new(FakeChild {
            pid,
            live: Arc::clone(&self.live),
            stops: Arc::clone(&self.stops),
            kills: Arc::clone(&self.kills),
            ignore_stop: self.ignore_stop.load(Ordering::SeqCst),
            fail_polls: Arc::clone(&self.fail_polls),
        }))
    }

    fn replace_current(&self, plan: &RelaunchPlan) -> anyhow::Error {
        self.relaunches.lock().unwrap().push(plan.clone());
        anyhow!("exec is not available in tests")
    }
}

#[derive(Debug)]
pub(crate) struct FakeChild {
    pid: u32,
    live: Arc<Mutex<HashSet<u32>>>,
    stops: Arc<Mutex<Vec<u32>>>,
    kills: Arc<Mutex<Vec<u32>>>,
    ignore_stop: bool,
    fail_polls: Arc<AtomicBool>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(anyhow!("cannot poll {}", self.pid));
        }
        if self.live.lock().unwrap().contains(&self.pid) {
            Ok(None)
        } else {
            Ok(Some(ChildExit { code: Some(0) }))
        }
    }

    fn request_stop(&mut self) -> Result<()> {
        self.stops.lock().unwrap().push(self.pid);
        if !self.ignore_stop {
            self.live.lock().unwrap().remove(&self.pid);
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.kills.lock().unwrap().push(self.pid);
        self.live.lock().unwrap().remove(&self.pid);
        Ok(())
    }

    fn wait(&mut self) -> Result<ChildExit> {
        self.live.lock().unwrap().remove(&self.pid);
        Ok(ChildExit { code: None })
    }
}
