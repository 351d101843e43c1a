//! Power control and host information.

use std::path::Path;

use crate::{
    error::Result,
    os::{Invocation, Program},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    Poweroff,
}

impl PowerAction {
    fn verb(self) -> &'static str {
        match self {
            PowerAction::Reboot => "reboot",
            PowerAction::Poweroff => "poweroff",
        }
    }
}

/// Ask the service manager to reboot or power off. On success the process is
/// usually killed before the caller gets to respond.
pub async fn power(action: PowerAction) -> Result<()> {
    tracing::warn!(action = action.verb(), "power action requested");
    Invocation::new(Program::Systemctl)
        .arg(action.verb())
        .run()
        .await
        .map(drop)
}

/// Second line of `df` with `--output=size,used,avail,pcent`, reformatted.
pub fn parse_df(output: &str) -> Option<String> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [size, used, avail, pcent] = fields.as_slice() else {
        return None;
    };
    Some(format!("{used} of {size} used ({pcent}), {avail} free"))
}

/// Size column of `du -sh`.
pub fn parse_du(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

pub async fn uptime() -> Option<String> {
    let output = Invocation::new(Program::Uptime).arg("-p").run().await.ok()?;
    let text = output.stdout_text().trim().to_string();
    (!text.is_empty()).then_some(text)
}

pub async fn disk_free(path: &Path) -> Option<String> {
    let output = Invocation::new(Program::Df)
        .args(["-h", "--output=size,used,avail,pcent"])
        .arg(path)
        .run()
        .await
        .ok()?;
    parse_df(&output.stdout_text())
}

pub async fn disk_usage(path: &Path) -> Option<String> {
    let output = Invocation::new(Program::Du)
        .arg("-sh")
        .arg(path)
        .run()
        .await
        .ok()?;
    parse_du(&output.stdout_text())
}
