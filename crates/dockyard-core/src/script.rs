//! Remote command and startup-script generation.
//!
//! Everything here is pure string construction; the orchestrator feeds the
//! results to `SandboxProvider::exec`. Startup scripts are written once per
//! launch and are safe to invoke repeatedly: a script attaches to its named
//! multiplexer session when it already exists instead of spawning a second
//! process. That guard is the idempotency mechanism that keeps repeated
//! restart calls from accumulating duplicate processes.

use crate::config::OrchestratorConfig;
use crate::ports::{PortSet, ServiceKind, SessionKey};
use crate::slot::RepositorySlot;

/// Directory holding generated startup scripts inside the sandbox.
pub const SCRIPT_DIR: &str = "/tmp/dockyard";

/// The long-running process backing one service kind in one slot.
pub fn service_command(
    kind: ServiceKind,
    slot: &RepositorySlot,
    config: &OrchestratorConfig,
) -> String {
    let port = slot.ports.port(kind);
    let dir = slot.path.display();
    match kind {
        ServiceKind::Editor => {
            format!("code-server --bind-addr 0.0.0.0:{port} --auth none {dir}")
        }
        ServiceKind::Terminal => {
            format!("ttyd -p {port} -W sh -c 'cd {dir} && exec ${{SHELL:-bash}}'")
        }
        ServiceKind::PrimaryAssistant => {
            format!(
                "ttyd -p {port} -W sh -c 'cd {dir} && {}'",
                config.assistant_command
            )
        }
        ServiceKind::SecondaryAssistant => {
            format!(
                "ttyd -p {port} -W sh -c 'cd {dir} && {}'",
                config.secondary_assistant_command
            )
        }
    }
}

/// Startup script for one service session: create the named session if it
/// does not exist, otherwise attach to the one already running.
pub fn startup_script(key: &SessionKey, workdir: &str, command: &str) -> String {
    let session = key.session_name();
    format!(
        "#!/bin/sh\n\
         SESSION=\"{session}\"\n\
         mkdir -p \"{workdir}\"\n\
         if tmux has-session -t \"$SESSION\" 2>/dev/null; then\n\
         \texec tmux attach-session -t \"$SESSION\"\n\
         fi\n\
         tmux new-session -d -s \"$SESSION\" -c \"{workdir}\" \"{command}\"\n"
    )
}

/// Path of the generated script for a session.
pub fn script_path(key: &SessionKey) -> String {
    format!("{SCRIPT_DIR}/{}.sh", key.session_name())
}

/// One-shot command writing a startup script into the sandbox.
pub fn write_script_command(key: &SessionKey, script: &str) -> String {
    let path = script_path(key);
    format!(
        "mkdir -p {SCRIPT_DIR} && cat > {path} <<'DOCKYARD_EOF'\n{script}DOCKYARD_EOF\nchmod +x {path}"
    )
}

/// Command launching a session via its startup script.
pub fn launch_command(key: &SessionKey) -> String {
    format!("sh {}", script_path(key))
}

/// Forcibly terminate one slot's service sessions and processes ahead of a
/// relaunch. Slots restart concurrently, so the sweep must only ever name
/// this slot's sessions and ports; other slots' services stay untouched.
/// Individual kills are best-effort.
pub fn kill_slot_command(slot: &RepositorySlot) -> String {
    let mut parts = Vec::new();
    for (kind, port) in slot.ports.entries() {
        let session = SessionKey::new(kind, &slot.source.name).session_name();
        parts.push(format!("tmux kill-session -t \"{session}\" >/dev/null 2>&1"));
        let pattern = match kind {
            ServiceKind::Editor => format!("code-server.*0\\.0\\.0\\.0:{port}"),
            _ => format!("ttyd -p {port} "),
        };
        parts.push(format!("pkill -f '{pattern}' >/dev/null 2>&1"));
    }
    parts.push("true".to_string());
    parts.join("; ")
}

/// One combined check of the sandbox's listening-socket table. Cheaper than
/// per-port HTTP probes when all we need is "did everything bind".
pub fn socket_check_command() -> String {
    "ss -tln".to_string()
}

/// Which of the expected ports are absent from `ss -tln` output.
pub fn missing_ports(socket_output: &str, ports: &PortSet) -> Vec<u16> {
    ports
        .all()
        .into_iter()
        .filter(|port| !port_is_listening(socket_output, *port))
        .collect()
}

fn port_is_listening(socket_output: &str, port: u16) -> bool {
    let needle = format!(":{port}");
    socket_output.lines().any(|line| {
        line.split_whitespace()
            .any(|field| field.ends_with(&needle))
    })
}

/// HTTP probe for one service port, printing only the status code.
pub fn probe_command(port: u16, timeout_secs: u64) -> String {
    format!(
        "curl -s -o /dev/null -w '%{{http_code}}' --max-time {timeout_secs} http://localhost:{port}/"
    )
}

/// Interpret probe output: any 2xx/3xx status means the service is serving.
pub fn probe_ok(stdout: &str) -> bool {
    stdout
        .trim()
        .parse::<u16>()
        .map(|code| (200..400).contains(&code))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::ports::PortAllocator;
    use crate::slot::{RepoSource, RepositorySlot, SourceKind};

    fn slot() -> RepositorySlot {
        RepositorySlot::new(
            1,
            RepoSource {
                url: Some("https://github.com/acme/r1.git".to_string()),
                name: "r1".to_string(),
                description: None,
                kind: SourceKind::Github,
            },
            PortAllocator::new(PortConfig::default()).allocate(1),
        )
    }

    #[test]
    fn test_startup_script_has_session_guard() {
        let key = SessionKey::new(ServiceKind::Editor, "r1");
        let script = startup_script(&key, "/projects/r1", "code-server");
        assert!(script.contains("tmux has-session -t \"$SESSION\""));
        assert!(script.contains("SESSION=\"editor-r1\""));
        assert!(script.contains("tmux new-session -d -s"));
        // Attach path before the spawn path, so an existing session is
        // never duplicated.
        let attach = script.find("attach-session").unwrap();
        let spawn = script.find("new-session").unwrap();
        assert!(attach < spawn);
    }

    #[test]
    fn test_same_key_same_session_name() {
        let a = SessionKey::new(ServiceKind::Terminal, "r1");
        let b = SessionKey::new(ServiceKind::Terminal, "r1");
        assert_eq!(
            startup_script(&a, "/projects/r1", "x"),
            startup_script(&b, "/projects/r1", "x")
        );
        assert_eq!(script_path(&a), "/tmp/dockyard/main-r1.sh");
    }

    #[test]
    fn test_service_commands_bind_allocated_ports() {
        let slot = slot();
        let config = OrchestratorConfig::default();
        assert!(service_command(ServiceKind::Editor, &slot, &config).contains("0.0.0.0:8081"));
        assert!(service_command(ServiceKind::Terminal, &slot, &config).contains("-p 10001"));
        assert!(
            service_command(ServiceKind::PrimaryAssistant, &slot, &config).contains("-p 4001")
        );
    }

    #[test]
    fn test_kill_slot_command_names_only_its_own_sessions() {
        let command = kill_slot_command(&slot());
        assert!(command.contains("tmux kill-session -t \"editor-r1\""));
        assert!(command.contains("tmux kill-session -t \"main-r1\""));
        assert!(command.contains("tmux kill-session -t \"assistant-r1\""));
        assert!(command.contains("tmux kill-session -t \"assistant2-r1\""));
        // Process kills are port-scoped, never blanket.
        assert!(command.contains("8081"));
        assert!(command.contains("ttyd -p 10001 "));
        assert!(!command.contains("kill-server"));
        assert!(!command.contains("pkill -f code-server >"));
    }

    #[test]
    fn test_missing_ports_parses_socket_table() {
        let output = "State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n\
                      LISTEN 0      128    0.0.0.0:8081       0.0.0.0:*\n\
                      LISTEN 0      128    [::]:10001         [::]:*\n";
        let ports = PortAllocator::new(PortConfig::default()).allocate(1);
        let missing = missing_ports(output, &ports);
        assert_eq!(missing, vec![4001, 5001]);
    }

    #[test]
    fn test_missing_ports_no_suffix_match() {
        // Port 800 must not match :8000.
        let output = "LISTEN 0 128 0.0.0.0:8000 0.0.0.0:*\n";
        assert!(!port_is_listening(output, 800));
        assert!(port_is_listening(output, 8000));
    }

    #[test]
    fn test_probe_ok() {
        assert!(probe_ok("200"));
        assert!(probe_ok("302\n"));
        assert!(!probe_ok("000"));
        assert!(!probe_ok("404"));
        assert!(!probe_ok("500"));
        assert!(!probe_ok("garbage"));
    }
}
