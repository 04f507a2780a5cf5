//! SSH transport.
//!
//! One session per command. `ssh2` is blocking, so every call runs on the
//! blocking pool.

use super::{CommandLine, ExecTarget, RemoteExecutor};
use crate::config::SshConfig;
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::debug;

pub struct SshExecutor {
    ssh: SshConfig,
    use_sudo: bool,
}

impl SshExecutor {
    pub fn new(ssh: SshConfig, use_sudo: bool) -> Self {
        Self { ssh, use_sudo }
    }

    fn remote_line(&self, line: &str) -> String {
        match (self.use_sudo, &self.ssh.password) {
            (true, Some(_)) => format!("sudo -S -p '' {line}"),
            (true, None) => format!("sudo {line}"),
            (false, _) => line.to_string(),
        }
    }
}

fn ssh_error(host: &str, err: ssh2::Error) -> BackupError {
    BackupError::Ssh {
        host: host.to_string(),
        message: err.to_string(),
    }
}

fn connect(ssh: &SshConfig, host: &str) -> Result<ssh2::Session> {
    let tcp = TcpStream::connect((host, ssh.port))?;
    let mut sess = ssh2::Session::new().map_err(|e| ssh_error(host, e))?;
    sess.set_tcp_stream(tcp);
    sess.handshake().map_err(|e| ssh_error(host, e))?;

    let auth = match (&ssh.key_file, &ssh.password) {
        (Some(key), _) => sess.userauth_pubkey_file(&ssh.user, None, key, None),
        (None, Some(password)) => sess.userauth_password(&ssh.user, password),
        (None, None) => sess.userauth_agent(&ssh.user),
    };
    auth.map_err(|e| ssh_error(host, e))?;

    if !sess.authenticated() {
        return Err(BackupError::Ssh {
            host: host.to_string(),
            message: format!("authentication failed for user {}", ssh.user),
        });
    }
    Ok(sess)
}

fn exec(ssh: &SshConfig, host: &str, line: &str, sudo_password: bool) -> Result<(i32, String, String)> {
    let sess = connect(ssh, host)?;
    let mut channel = sess.channel_session().map_err(|e| ssh_error(host, e))?;
    channel.exec(line).map_err(|e| ssh_error(host, e))?;

    if sudo_password {
        if let Some(password) = &ssh.password {
            channel.write_all(format!("{password}\n").as_bytes())?;
        }
    }
    channel.send_eof().map_err(|e| ssh_error(host, e))?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;

    channel.wait_close().map_err(|e| ssh_error(host, e))?;
    let status = channel.exit_status().map_err(|e| ssh_error(host, e))?;
    Ok((status, stdout, stderr))
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, target: &ExecTarget, command: &CommandLine) -> Result<String> {
        let line = self.remote_line(command.as_str());
        let sudo_password = self.use_sudo && self.ssh.password.is_some();
        let ssh = self.ssh.clone();
        let host = target.host.clone();

        debug!(host = %target, label = command.label(), "Running command over SSH");
        let (status, stdout, stderr) =
            tokio::task::spawn_blocking(move || exec(&ssh, &host, &line, sudo_password)).await??;

        if status != 0 {
            return Err(BackupError::RemoteCommand {
                host: target.host.clone(),
                command: command.redacted().to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_line_sudo_forms() {
        let plain = SshExecutor::new(SshConfig::default(), false);
        assert_eq!(plain.remote_line("nodetool ring"), "nodetool ring");

        let sudo = SshExecutor::new(SshConfig::default(), true);
        assert_eq!(sudo.remote_line("nodetool ring"), "sudo nodetool ring");

        let with_password = SshExecutor::new(
            SshConfig {
                password: Some("pw".to_string()),
                ..SshConfig::default()
            },
            true,
        );
        assert_eq!(
            with_password.remote_line("nodetool ring"),
            "sudo -S -p '' nodetool ring"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        let executor = SshExecutor::new(
            SshConfig {
                port: 1,
                ..SshConfig::default()
            },
            false,
        );
        let result = executor
            .run(&ExecTarget::new("127.0.0.1"), &CommandLine::raw("ring", "nodetool ring"))
            .await;
        assert!(result.is_err());
    }
}
