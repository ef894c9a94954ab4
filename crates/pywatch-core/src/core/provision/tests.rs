use std::ffi::OsString;
use std::fs;
use std::path::Path;

use anyhow::Result;
use pywatch_domain::ProvisioningState;
use tempfile::tempdir;

use super::*;
use crate::core::config::{Config, ConfigOverrides, EnvSnapshot};
use crate::core::testing::{test_config, FakeEffects, BASE_PYTHON};

const PAGE: &str = "https://example.test/";

fn ready(outcome: Provisioned) -> ActiveRuntime {
    match outcome {
        Provisioned::Ready(runtime) => runtime,
        Provisioned::Relaunch(plan) => panic!("expected a ready runtime, got {plan:?}"),
    }
}

fn relaunch(outcome: Provisioned) -> RelaunchPlan {
    match outcome {
        Provisioned::Relaunch(plan) => plan,
        Provisioned::Ready(runtime) => panic!("expected a relaunch, got {runtime:?}"),
    }
}

fn env_value<'a>(plan: &'a RelaunchPlan, key: &str) -> Option<&'a str> {
    plan.env
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Make the venv strategy behave like the real module and drop an
/// interpreter into the target directory.
fn venv_creates_interpreter(effects: &FakeEffects) {
    effects.python.on("-m venv", |args| {
        let env_dir = Path::new(args.last().expect("env dir argument"));
        let python = env_interpreter(env_dir);
        fs::create_dir_all(python.parent().expect("bin dir")).expect("create bin dir");
        fs::write(&python, "").expect("write interpreter");
    });
}

#[test]
fn disabled_isolation_uses_base_interpreter() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[("PYWATCH_ISOLATE", "0")]);
    let effects = FakeEffects::default();
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    assert_eq!(runtime.state(), ProvisioningState::Native);
    assert_eq!(runtime.python(), BASE_PYTHON);
    assert!(runtime.envs().is_empty());
    assert!(effects.python.calls().is_empty());
    assert!(!config.layout().env_dir().exists());
    Ok(())
}

#[test]
fn provisioning_twice_is_a_no_op() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[]);
    let effects = FakeEffects::default();
    effects.python.fail_when("-m venv");
    effects.python.fail_when("virtualenv");
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let first = ready(provisioner.provision(&ctx)?);
    let calls = effects.python.calls().len();
    let second = ready(provisioner.provision(&ctx)?);

    assert_eq!(first.state(), second.state());
    assert_eq!(first.python(), second.python());
    assert_eq!(first.search_path(), second.search_path());
    assert_eq!(effects.python.calls().len(), calls);
    assert_eq!(provisioner.state(), Some(ProvisioningState::LocalTargetDir));
    Ok(())
}

#[test]
fn active_environment_short_circuits() -> Result<()> {
    let temp = tempdir()?;
    let env_dir = temp.path().join(".pywatch/env");
    let env_dir_text = env_dir.display().to_string();
    let config = test_config(temp.path(), PAGE, &[("VIRTUAL_ENV", env_dir_text.as_str())]);
    let effects = FakeEffects::default();
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    assert_eq!(runtime.state(), ProvisioningState::IsolatedEnv);
    assert_eq!(runtime.python(), env_interpreter(&env_dir).display().to_string());
    assert!(effects.python.calls().is_empty());
    assert!(effects.processes.relaunches().is_empty());
    Ok(())
}

#[test]
fn new_environment_requests_relaunch() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[("PATH", "/usr/bin")]);
    let effects = FakeEffects::default();
    venv_creates_interpreter(&effects);
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let plan = relaunch(provisioner.provision(&ctx)?);
    let env_dir = config.layout().env_dir();
    assert_eq!(
        effects.python.calls(),
        vec![format!("{BASE_PYTHON} -m venv {}", env_dir.display())]
    );
    assert_eq!(plan.program, Path::new("/usr/local/bin/pywatch"));
    assert_eq!(plan.args, vec![OsString::from("run"), OsString::from(PAGE)]);
    assert_eq!(
        env_value(&plan, "VIRTUAL_ENV"),
        Some(env_dir.display().to_string().as_str())
    );
    assert_eq!(env_value(&plan, RELAUNCH_MARKER), Some("1"));
    let path = env_value(&plan, "PATH").expect("PATH is set");
    assert!(
        path.starts_with(&env_bin_dir(&env_dir).display().to_string()),
        "{path}"
    );
    assert!(path.ends_with("/usr/bin"), "{path}");
    assert_eq!(provisioner.state(), None);
    Ok(())
}

#[test]
fn existing_environment_is_reused() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[]);
    let python = env_interpreter(&config.layout().env_dir());
    fs::create_dir_all(python.parent().expect("bin dir"))?;
    fs::write(&python, "")?;
    let effects = FakeEffects::default();
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    relaunch(provisioner.provision(&ctx)?);
    assert!(effects.python.calls().is_empty());
    Ok(())
}

#[test]
fn exhausted_strategies_fall_back_to_local_directory() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[("PYTHONPATH", "/site")]);
    let effects = FakeEffects::default();
    effects.python.fail_when("-m venv");
    effects.python.fail_when("virtualenv");
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    let lib_dir = config.layout().lib_dir();
    assert_eq!(runtime.state(), ProvisioningState::LocalTargetDir);
    assert_eq!(runtime.python(), BASE_PYTHON);
    assert!(lib_dir.is_dir());
    assert_eq!(runtime.search_path(), [lib_dir.clone()]);
    let pythonpath = runtime.envs();
    assert_eq!(pythonpath.len(), 1);
    assert!(pythonpath[0].1.starts_with(&lib_dir.display().to_string()));
    assert!(pythonpath[0].1.ends_with("/site"));
    // venv, then the user-scope virtualenv install; the second step never runs
    assert_eq!(effects.python.calls().len(), 2);
    assert!(!config.layout().env_dir().exists());
    Ok(())
}

#[test]
fn strategy_without_interpreter_counts_as_failure() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[]);
    let effects = FakeEffects::default();
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    assert_eq!(runtime.state(), ProvisioningState::LocalTargetDir);
    let calls = effects.python.calls();
    assert_eq!(calls.len(), 3, "{calls:?}");
    assert!(calls[1].contains("pip install --user"));
    assert!(calls[2].contains("-m virtualenv"));
    Ok(())
}

#[test]
fn relaunched_process_without_environment_does_not_loop() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[(RELAUNCH_MARKER, "1")]);
    let effects = FakeEffects::default();
    venv_creates_interpreter(&effects);
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    assert_eq!(runtime.state(), ProvisioningState::LocalTargetDir);
    assert!(effects.python.calls().is_empty());
    Ok(())
}

#[test]
fn relaunched_process_with_environment_is_isolated() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[(RELAUNCH_MARKER, "1")]);
    let python = env_interpreter(&config.layout().env_dir());
    fs::create_dir_all(python.parent().expect("bin dir"))?;
    fs::write(&python, "")?;
    let effects = FakeEffects::default();
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    assert_eq!(runtime.state(), ProvisioningState::IsolatedEnv);
    assert_eq!(runtime.python(), python.display().to_string());
    Ok(())
}

#[test]
fn unknown_invocation_skips_isolation() -> Result<()> {
    let temp = tempdir()?;
    let config = Config::from_snapshot(
        &EnvSnapshot::testing(&[("PYWATCH_URL", PAGE), ("PYWATCH_PYTHON", BASE_PYTHON)]),
        &ConfigOverrides::default(),
        temp.path(),
        None,
    )?;
    let effects = FakeEffects::default();
    venv_creates_interpreter(&effects);
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    let runtime = ready(provisioner.provision(&ctx)?);
    assert_eq!(runtime.state(), ProvisioningState::LocalTargetDir);
    assert!(effects.python.calls().is_empty());
    Ok(())
}

#[test]
fn abandoning_isolation_settles_on_local_directory() -> Result<()> {
    let temp = tempdir()?;
    let config = test_config(temp.path(), PAGE, &[]);
    let effects = FakeEffects::default();
    venv_creates_interpreter(&effects);
    let ctx = WatchContext::new(&effects, &config);
    let mut provisioner = EnvironmentProvisioner::new();

    relaunch(provisioner.provision(&ctx)?);
    let runtime = provisioner.abandon_isolation(&ctx)?;
    assert_eq!(runtime.state(), ProvisioningState::LocalTargetDir);
    assert!(config.layout().lib_dir().is_dir());

    let again = ready(provisioner.provision(&ctx)?);
    assert_eq!(again.state(), ProvisioningState::LocalTargetDir);
    Ok(())
}
