//! Authenticated channels provided by the system `ssh` client.
//!
//! The decrypted password reaches `ssh` through its askpass hook: `ssh`
//! re-runs this binary as `SSH_ASKPASS`, which prints the secret held in
//! [`ASKPASS_ENV`] and exits.

use std::ffi::OsString;
use std::io;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

use anyhow::{Context, Result, bail};
use tracing::debug;
use zeroize::Zeroizing;

use crate::store::ServerEntry;
use crate::transfer::{Channel, Download, Transfer, TransferError, Upload};

/// Carries the secret from the parent process to its askpass invocation.
pub const ASKPASS_ENV: &str = "NESTSH_ASKPASS_SECRET";
/// Overrides the `ssh` executable.
pub const SSH_PROGRAM_ENV: &str = "NESTSH_SSH";

/// When running as `SSH_ASKPASS`, the secret to print.
pub fn askpass_reply() -> Option<Zeroizing<String>> {
    std::env::var(ASKPASS_ENV).ok().map(Zeroizing::new)
}

/// `ssh [options] -p PORT -o ... -l USER -- HOST`. Anything appended after
/// this is the remote command.
fn ssh_command(entry: &ServerEntry, secret: &str, options: &[&str]) -> Result<Command> {
    let askpass = std::env::current_exe().context("cannot locate own executable for askpass")?;
    let program = std::env::var_os(SSH_PROGRAM_ENV).unwrap_or_else(|| OsString::from("ssh"));

    let mut cmd = Command::new(program);
    cmd.args(options)
        .arg("-p")
        .arg(entry.port().to_string())
        .args(["-o", "NumberOfPasswordPrompts=1"])
        .arg("-l")
        .arg(entry.user())
        .arg("--")
        .arg(entry.host())
        .env("SSH_ASKPASS", askpass)
        .env("SSH_ASKPASS_REQUIRE", "force")
        .env(ASKPASS_ENV, secret);
    Ok(cmd)
}

/// A remote command whose stdin/stdout form the transfer channel.
pub struct RemoteProcess {
    child: Child,
}

impl RemoteProcess {
    pub fn spawn(entry: &ServerEntry, secret: &str, remote_command: &str) -> Result<Self> {
        debug!(server = entry.name(), remote_command, "spawning ssh");
        let child = ssh_command(entry, secret, &[])?
            .arg(remote_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to start ssh")?;
        Ok(Self { child })
    }

    pub fn channel(&mut self) -> io::Result<Channel<ChildStdout, ChildStdin>> {
        let missing = || io::Error::new(io::ErrorKind::BrokenPipe, "ssh pipes already taken");
        let stdout = self.child.stdout.take().ok_or_else(missing)?;
        let stdin = self.child.stdin.take().ok_or_else(missing)?;
        Ok(Channel::new(stdout, stdin))
    }

    pub fn wait(mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }
}

/// Runs `transfer` against `entry` and returns the number of bytes copied.
pub fn copy(transfer: &Transfer, entry: &ServerEntry, secret: &str) -> Result<u64> {
    let command = transfer.remote_command();
    match transfer {
        Transfer::Upload { local, .. } => {
            let upload = Upload::from_path(local)?;
            run_remote(entry, secret, &command, |ch| upload.run(ch))
        }
        Transfer::Download { local, .. } => run_remote(entry, secret, &command, |ch| {
            Download::new(local.clone()).run(ch).map(|(_, size)| size)
        }),
    }
}

fn run_remote<F>(entry: &ServerEntry, secret: &str, command: &str, job: F) -> Result<u64>
where
    F: FnOnce(&mut Channel<ChildStdout, ChildStdin>) -> Result<u64, TransferError>,
{
    let mut process = RemoteProcess::spawn(entry, secret, command)?;
    let mut channel = process.channel()?;
    let outcome = job(&mut channel);

    // closing stdin lets the remote scp exit
    drop(channel);
    let status = process.wait().context("failed to wait for ssh")?;

    let bytes = outcome?;
    if !status.success() {
        bail!("ssh exited with {status}");
    }
    Ok(bytes)
}

/// Opens an interactive shell on `entry`, inheriting the terminal.
pub fn interactive(entry: &ServerEntry, secret: &str) -> Result<ExitStatus> {
    debug!(server = entry.name(), "starting interactive session");
    ssh_command(entry, secret, &["-t"])?
        .status()
        .context("failed to start ssh")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;

    #[test]
    fn ssh_command_targets_entry() {
        let key = Zeroizing::new([3u8; KEY_LEN]);
        let entry = ServerEntry::new("web", "deploy", "10.0.0.5", 2222, &key, "pw").unwrap();

        let cmd = ssh_command(&entry, "pw", &[]).unwrap();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(
            args,
            ["-p", "2222", "-o", "NumberOfPasswordPrompts=1", "-l", "deploy", "--", "10.0.0.5"]
        );
        let secret = cmd
            .get_envs()
            .find(|(k, _)| *k == ASKPASS_ENV)
            .and_then(|(_, v)| v);
        assert_eq!(secret, Some(std::ffi::OsStr::new("pw")));
    }

    #[test]
    fn options_go_before_the_host() {
        let key = Zeroizing::new([3u8; KEY_LEN]);
        let mut entry = ServerEntry::new("web", "deploy", "10.0.0.5", 22, &key, "pw").unwrap();
        // set_host does not validate; the host must still land after `--`
        entry.set_host("-oProxyCommand=x");

        let cmd = ssh_command(&entry, "pw", &["-t"]).unwrap();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args.first().map(String::as_str), Some("-t"));
        let dashes = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[dashes + 1..], ["-oProxyCommand=x"]);
    }
}
