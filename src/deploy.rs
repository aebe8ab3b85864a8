//! Process environment setup: proxy and supervisor configuration files,
//! service restarts and the TLS certificate request.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::config::DeployConfig;
use crate::error::BootstrapError;

/// Runs external tools on behalf of the deploy step.
pub trait CommandRunner {
    fn locate(&self, tool: &str) -> Option<PathBuf>;
    fn run(&self, program: &std::path::Path, args: &[String]) -> Result<(), BootstrapError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        find_in_path(tool)
    }

    fn run(&self, program: &std::path::Path, args: &[String]) -> Result<(), BootstrapError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| BootstrapError::CommandFailed(format!("{}: {err}", program.display())))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} {} exited with {}", program.display(), args.join(" "), output.status)
        } else {
            stderr
        };
        Err(BootstrapError::CommandFailed(message))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployAction {
    pub action: String,
    pub detail: String,
    pub performed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployResult {
    pub dry_run: bool,
    pub actions: Vec<DeployAction>,
}

/// Installs config files, restarts services and requests a certificate.
///
/// Every source file and tool is checked before anything is changed.
pub fn deploy(
    config: &DeployConfig,
    runner: &dyn CommandRunner,
    dry_run: bool,
) -> Result<DeployResult, BootstrapError> {
    for file in &config.files {
        if !file.source.as_std_path().is_file() {
            return Err(BootstrapError::MissingDeployFile(file.source.to_string()));
        }
    }
    let service = runner
        .locate("service")
        .ok_or_else(|| BootstrapError::MissingTool("service".to_string()))?;
    let certbot = match &config.domain {
        Some(_) => Some(
            runner
                .locate("certbot")
                .ok_or_else(|| BootstrapError::MissingTool("certbot".to_string()))?,
        ),
        None => None,
    };

    let mut actions = Vec::new();
    for file in &config.files {
        if !dry_run {
            install_file(&file.source, &file.target)?;
        }
        info!(source = %file.source, target = %file.target, dry_run, "install config");
        actions.push(DeployAction {
            action: "install".to_string(),
            detail: format!("{} -> {}", file.source, file.target),
            performed: !dry_run,
        });
    }

    for name in &config.services {
        let args = vec![name.clone(), "restart".to_string()];
        if !dry_run {
            runner.run(&service, &args)?;
        }
        info!(service = %name, dry_run, "restart service");
        actions.push(DeployAction {
            action: "restart".to_string(),
            detail: name.clone(),
            performed: !dry_run,
        });
    }

    if let (Some(domain), Some(certbot)) = (&config.domain, certbot) {
        let args = vec!["--nginx".to_string(), "-d".to_string(), domain.clone()];
        if !dry_run {
            runner.run(&certbot, &args)?;
        }
        info!(%domain, dry_run, "request certificate");
        actions.push(DeployAction {
            action: "certificate".to_string(),
            detail: format!("certbot {}", args.join(" ")),
            performed: !dry_run,
        });
    }

    Ok(DeployResult { dry_run, actions })
}

/// Copies `source` over `target` through a temp file in the target directory.
pub fn install_file(source: &Utf8Path, target: &Utf8Path) -> Result<(), BootstrapError> {
    let parent = target
        .parent()
        .ok_or_else(|| BootstrapError::Filesystem(format!("invalid target path: {target}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| BootstrapError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".adage-bootstrap")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BootstrapError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| BootstrapError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(target.as_std_path())
        .map_err(|err| BootstrapError::Filesystem(err.to_string()))?;
    Ok(())
}
