//! Runs the host utilities every privileged effect goes through.
//!
//! Programs come from a fixed allow-list and arguments are passed as an argv
//! vector. The only shell strings ever built are the two `tar` wrappers at the
//! bottom of this file, and both refuse paths that contain a single quote.

use std::{
    ffi::OsString,
    os::unix::fs::chown as std_chown,
    path::Path,
    process::Stdio,
};

use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    error::{Error, Result},
    users::Account,
};

/// External programs Ground is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Su,
    Sudo,
    Tar,
    Mv,
    Uptime,
    Systemctl,
    Useradd,
    Userdel,
    Passwd,
    Gpasswd,
    Groups,
    Sed,
    Touch,
    Mkdir,
    Du,
    Df,
}

impl Program {
    pub const ALL: [Program; 16] = [
        Program::Su,
        Program::Sudo,
        Program::Tar,
        Program::Mv,
        Program::Uptime,
        Program::Systemctl,
        Program::Useradd,
        Program::Userdel,
        Program::Passwd,
        Program::Gpasswd,
        Program::Groups,
        Program::Sed,
        Program::Touch,
        Program::Mkdir,
        Program::Du,
        Program::Df,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Program::Su => "su",
            Program::Sudo => "sudo",
            Program::Tar => "tar",
            Program::Mv => "mv",
            Program::Uptime => "uptime",
            Program::Systemctl => "systemctl",
            Program::Useradd => "useradd",
            Program::Userdel => "userdel",
            Program::Passwd => "passwd",
            Program::Gpasswd => "gpasswd",
            Program::Groups => "groups",
            Program::Sed => "sed",
            Program::Touch => "touch",
            Program::Mkdir => "mkdir",
            Program::Du => "du",
            Program::Df => "df",
        }
    }
}

/// Captured result of a successful invocation.
#[derive(Debug, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A single command run, built up before it is started.
#[derive(Debug)]
pub struct Invocation {
    program: Program,
    args: Vec<OsString>,
    user: Option<(String, u32)>,
    stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            args: Vec::new(),
            user: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the program as `account` instead of root, via `sudo --user`.
    /// When the process already runs with that uid the program is started
    /// directly.
    pub fn as_user(mut self, account: &Account) -> Self {
        self.user = Some((account.name.clone(), account.uid));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn command(&self) -> Command {
        let euid = unsafe { libc::geteuid() };
        let mut command = match &self.user {
            Some((user, uid)) if *uid != euid => {
                let mut command = Command::new(Program::Sudo.name());
                command
                    .arg(format!("--user={user}"))
                    .arg("--set-home")
                    .arg("--")
                    .arg(self.program.name());
                command
            }
            _ => Command::new(self.program.name()),
        };
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    async fn execute(self) -> Result<(std::process::ExitStatus, Output)> {
        let program = self.program.name();
        let mut child = self
            .command()
            .spawn()
            .map_err(|source| Error::Spawn { program, source })?;

        if let Some(input) = &self.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // A program that exits without reading stdin closes the pipe
                // early; its exit status is what matters.
                if let Err(error) = pipe.write_all(input).await {
                    tracing::debug!(program, %error, "stdin closed early");
                }
            }
        }

        let output = child.wait_with_output().await?;
        Ok((
            output.status,
            Output {
                stdout: output.stdout,
                stderr: output.stderr,
            },
        ))
    }

    /// Run to completion; a non-zero exit is an error.
    pub async fn run(self) -> Result<Output> {
        let program = self.program.name();
        let (status, output) = self.execute().await?;
        if !status.success() {
            return Err(Error::Subprocess {
                program,
                code: status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        tracing::debug!(program, "command succeeded");
        Ok(output)
    }

    /// Run to completion and only report whether the exit status was zero.
    pub async fn succeeds(self) -> Result<bool> {
        let (status, _) = self.execute().await?;
        Ok(status.success())
    }
}

/// Render `path` for use inside a single-quoted shell word.
pub fn single_quoted(path: &Path) -> Result<String> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::input("path is not valid UTF-8"))?;
    if text.contains('\'') {
        return Err(Error::input("path must not contain a single quote"));
    }
    Ok(format!("'{text}'"))
}

/// Pack the contents of `dir` into the gzip tarball `out`, as `user`.
/// Symlinks are dereferenced.
pub async fn tar_create(user: &str, out: &Path, dir: &Path) -> Result<()> {
    let script = format!(
        "tar -zchf {} --directory={} .",
        single_quoted(out)?,
        single_quoted(dir)?
    );
    Invocation::new(Program::Su)
        .arg("-c")
        .arg(script)
        .arg(user)
        .run()
        .await
        .map(drop)
}

/// Unpack the gzip tarball `src` into the existing directory `out`, as `user`.
pub async fn tar_extract(user: &str, src: &Path, out: &Path) -> Result<()> {
    let script = format!(
        "tar -xzf {} --directory={}",
        single_quoted(src)?,
        single_quoted(out)?
    );
    Invocation::new(Program::Su)
        .arg("-c")
        .arg(script)
        .arg(user)
        .run()
        .await
        .map(drop)
}

/// Hand `path` to `account`.
pub fn chown(path: &Path, account: &Account) -> Result<()> {
    std_chown(path, Some(account.uid), Some(account.gid))?;
    Ok(())
}

/// `mkdir -p` as `account`, so every directory it creates belongs to them
/// and no symlink is followed with more rights than they have.
pub async fn make_dirs(account: &Account, dir: &Path) -> Result<()> {
    Invocation::new(Program::Mkdir)
        .arg("-p")
        .arg("--")
        .arg(dir)
        .as_user(account)
        .run()
        .await
        .map(drop)
}
