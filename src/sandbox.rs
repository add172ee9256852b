//! Docker sandbox for code execution.
//!
//! Each forecast gets its own container with a persistent workspace volume,
//! a memory limit, and a bridged network. Docker being unavailable or the
//! container failing to start is fatal for the run — a forecast that was
//! promised a compute sandbox must not silently lose it.
//!
//! In retrodict mode, network egress from the container is restricted to
//! the package-index IPs resolved at sandbox start: code can still install
//! packages, but it cannot fetch post-cutoff information from the web.

use crate::{Error, Result, Settings};
use crate::tools::{Tool, str_arg, tool};
use serde_json::json;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Package-index hosts the sandbox may reach in retrodict mode. The index
/// sits behind a CDN, so addresses are resolved at sandbox start rather
/// than baked in.
const PACKAGE_INDEX_HOSTS: &[&str] = &["pypi.org", "files.pythonhosted.org", "pypi.python.org"];

/// Resolve the current package-index IPs for the egress allowlist.
pub async fn resolve_package_index_ips() -> BTreeSet<String> {
    let mut ips = BTreeSet::new();
    for host in PACKAGE_INDEX_HOSTS {
        match tokio::net::lookup_host((*host, 443)).await {
            Ok(addrs) => {
                for addr in addrs {
                    ips.insert(addr.ip().to_string());
                }
            }
            Err(e) => log::warn!("Failed to resolve {host}: {e}"),
        }
    }
    log::info!("Resolved {} package-index addresses", ips.len());
    ips
}

/// iptables commands restricting container egress to the allowed IPs.
/// DNS, loopback, and established connections stay open so resolution and
/// responses keep working.
pub fn egress_allowlist_rules(allowed_ips: &BTreeSet<String>) -> Vec<String> {
    let mut rules = vec![
        "iptables -A OUTPUT -p udp --dport 53 -j ACCEPT".to_string(),
        "iptables -A OUTPUT -p tcp --dport 53 -j ACCEPT".to_string(),
        "iptables -A OUTPUT -o lo -j ACCEPT".to_string(),
        "iptables -A OUTPUT -m state --state ESTABLISHED,RELATED -j ACCEPT".to_string(),
    ];
    for ip in allowed_ips {
        rules.push(format!(
            "iptables -A OUTPUT -d {ip} -p tcp --dport 443 -j ACCEPT"
        ));
    }
    rules.push("iptables -A OUTPUT -j DROP".to_string());
    rules
}

/// A running sandbox container. Removed on drop.
pub struct Sandbox {
    container_name: String,
    timeout: Duration,
}

impl Sandbox {
    /// Start a container for one forecast session. `restrict_egress`
    /// applies the package-index allowlist (retrodict mode).
    pub async fn start(
        settings: &Settings,
        session_id: &str,
        restrict_egress: bool,
    ) -> Result<Self> {
        let container_name = format!("forecast-sandbox-{session_id}");

        // Fail fast when the daemon is missing
        let version = Command::new("docker")
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::sandbox(format!("Docker is not available: {e}")))?;
        if !version.success() {
            return Err(Error::sandbox("Docker daemon is not running"));
        }

        let mut run_args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            container_name.clone(),
            "--memory".into(),
            settings.sandbox_memory_limit.clone(),
            "-v".into(),
            format!("{}:/workspace", settings.sandbox_volume_name),
            "-w".into(),
            "/workspace".into(),
            "--network".into(),
            "bridge".into(),
        ];
        if restrict_egress {
            // iptables needs NET_ADMIN inside the container
            run_args.push("--cap-add".into());
            run_args.push("NET_ADMIN".into());
        }
        run_args.push(settings.sandbox_image.clone());
        run_args.push("sleep".into());
        run_args.push("infinity".into());

        let run = Command::new("docker")
            .args(&run_args)
            .output()
            .await
            .map_err(|e| Error::sandbox(format!("Failed to start container: {e}")))?;
        if !run.status.success() {
            return Err(Error::sandbox(format!(
                "Container creation failed: {}",
                String::from_utf8_lossy(&run.stderr).trim()
            )));
        }

        let sandbox = Self {
            container_name,
            timeout: Duration::from_secs(settings.sandbox_timeout_seconds),
        };

        if restrict_egress {
            let ips = resolve_package_index_ips().await;
            for rule in egress_allowlist_rules(&ips) {
                let output = Command::new("docker")
                    .arg("exec")
                    .arg(&sandbox.container_name)
                    .args(["sh", "-c"])
                    .arg(&rule)
                    .output()
                    .await
                    .map_err(|e| Error::sandbox(format!("Failed to apply egress rule: {e}")))?;
                if !output.status.success() {
                    return Err(Error::sandbox(format!(
                        "Egress rule failed: {rule}: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
            }
            log::info!(
                "[Retrodict] Sandbox egress restricted to {} package-index addresses",
                ips.len()
            );
        }

        log::info!("Sandbox container {} started", sandbox.container_name);
        Ok(sandbox)
    }

    async fn exec(&self, argv: &[&str], timeout: Duration) -> Result<(String, String, bool)> {
        let mut command = Command::new("docker");
        command.arg("exec").arg(&self.container_name).args(argv);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Error::timeout())?
            .map_err(|e| Error::sandbox(format!("Exec failed: {e}")))?;

        Ok((
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            output.status.success(),
        ))
    }

    /// Run Python code in the container.
    pub async fn execute_code(&self, code: &str) -> Result<serde_json::Value> {
        let (stdout, stderr, success) = self
            .exec(&["python", "-c", code], self.timeout)
            .await?;
        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "success": success,
        }))
    }

    /// Install a package into the container's environment. Installs get a
    /// longer budget than code execution.
    pub async fn install_package(&self, package: &str) -> Result<serde_json::Value> {
        if !package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.[]=<>,".contains(c))
        {
            return Err(Error::invalid_input(format!(
                "Suspicious package specifier: {package}"
            )));
        }
        let (stdout, stderr, success) = self
            .exec(
                &["python", "-m", "pip", "install", "--quiet", package],
                self.timeout.max(Duration::from_secs(120)),
            )
            .await?;
        Ok(json!({
            "package": package,
            "stdout": stdout,
            "stderr": stderr,
            "success": success,
        }))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        // Removal must not depend on the async runtime still being alive.
        let result = std::process::Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match result {
            Ok(status) if status.success() => {
                log::debug!("Sandbox container {} removed", self.container_name)
            }
            _ => log::warn!(
                "Failed to remove sandbox container {}",
                self.container_name
            ),
        }
    }
}

/// Build the "sandbox" namespace tools over a running sandbox.
pub fn sandbox_tools(sandbox: Arc<Sandbox>) -> Vec<Tool> {
    let execute = {
        let sandbox = sandbox.clone();
        tool(
            "execute_code",
            "Run Python code in an isolated Docker sandbox with a persistent /workspace \
             volume. Use for Monte Carlo simulation, statistical analysis, and any \
             computation needing numpy/scipy/pandas (install_package first).",
        )
        .param("code", "string")
        .build(move |args| {
            let sandbox = sandbox.clone();
            async move {
                let code = str_arg(&args, "code")?.to_string();
                sandbox.execute_code(&code).await
            }
        })
    };

    let install = tool(
        "install_package",
        "Install a Python package into the sandbox (e.g., 'numpy', 'pandas==2.2'). \
         Run before importing the package in execute_code.",
    )
    .param("package", "string")
    .build(move |args| {
        let sandbox = sandbox.clone();
        async move {
            let package = str_arg(&args, "package")?.to_string();
            sandbox.install_package(&package).await
        }
    });

    vec![execute, install]
}
