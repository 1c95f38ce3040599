//! Restricted agent-exec facility (spec.md §9 "Agent exec"): a small,
//! tagged-variant command set layered over `pod/exec`. There is no general
//! shell here -- every variant maps to exactly one fixed command shape.

use futures::AsyncReadExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, api::AttachParams};

use crate::util::error::Error;

/// The fixed command shapes §4.4.1/§4.4.2 need. Each constructs its own
/// argv; callers never supply a raw string.
pub enum AgentCommand<'a> {
    /// `cat <path>` -- reads a well-known file inside the agent (the host
    /// SSH public key).
    ReadFile { path: &'a str },
    /// Tests for an exact line in a file (`grep -qxF <line> <path>`).
    GrepExactLine { line: &'a str, path: &'a str },
    /// Appends a single line to a file (`echo '<line>' >> <path>`).
    AppendLine { line: &'a str, path: &'a str },
    /// `ssh -p 2222 -o StrictHostKeyChecking=no syncer@<host> test-connection`.
    TestConnection { host: &'a str },
    /// Looks for a CSI volume mount for `pv_name` under kubelet's pod
    /// volume directory (spec.md §4.4.4 step 2 fallback scan), printing the
    /// first match or nothing.
    FindCsiMount { pv_name: &'a str },
}

impl<'a> AgentCommand<'a> {
    fn argv(&self) -> Vec<String> {
        match self {
            AgentCommand::ReadFile { path } => vec!["cat".to_string(), (*path).to_string()],
            AgentCommand::GrepExactLine { line, path } => vec![
                "grep".to_string(),
                "-qxF".to_string(),
                (*line).to_string(),
                (*path).to_string(),
            ],
            AgentCommand::AppendLine { line, path } => vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo '{}' >> {}", line.replace('\'', "'\\''"), path),
            ],
            AgentCommand::TestConnection { host } => vec![
                "ssh".to_string(),
                "-p".to_string(),
                "2222".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                format!("syncer@{host}"),
                "test-connection".to_string(),
            ],
            AgentCommand::FindCsiMount { pv_name } => vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    "ls -d /var/lib/kubelet/pods/*/volumes/kubernetes.io~csi/{pv_name}/mount 2>/dev/null | head -n1"
                ),
            ],
        }
    }
}

pub struct ExecOutput {
    pub stdout: String,
    pub success: bool,
}

/// Runs `command` inside `pod_name` and collects stdout. `success` tracks
/// whether the attached process's exit status was zero; callers that only
/// care about presence/absence (`GrepExactLine`) use that bool directly
/// instead of parsing stdout.
pub async fn run(
    pods: &Api<Pod>,
    pod_name: &str,
    command: AgentCommand<'_>,
) -> Result<ExecOutput, Error> {
    let argv = command.argv();
    let mut attached = pods
        .exec(
            pod_name,
            argv,
            &AttachParams::default().stdout(true).stderr(false),
        )
        .await?;

    let mut stdout = String::new();
    if let Some(mut stream) = attached.stdout() {
        stream.read_to_string(&mut stdout).await.ok();
    }

    let status = match attached.take_status() {
        Some(status_fut) => status_fut.await,
        None => None,
    };
    let success = status
        .map(|s| s.status.as_deref() == Some("Success"))
        .unwrap_or(true);

    attached.join().await.ok();

    Ok(ExecOutput { stdout, success })
}
