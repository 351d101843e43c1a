//! Host accounts: lookup, credential checks and account management.

use std::{
    ffi::{CStr, CString},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;
use serde::Serialize;

use crate::{
    error::{Error, Result},
    os::{Invocation, Program},
};

/// Password given to new accounts and to accounts whose password an admin
/// resets. Users are expected to change it from their account page.
pub const DEFAULT_PASSWORD: &str = "password";

/// Groups that may grant admin rights, in order of preference.
pub const ADMIN_GROUP_CANDIDATES: [&str; 2] = ["sudo", "wheel"];

pub const SUDOERS_PATH: &str = "/etc/sudoers";

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("username regex"))
}

pub fn is_valid_username(name: &str) -> bool {
    username_regex().is_match(name)
}

/// A host account as Ground sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Account {
    #[cfg(test)]
    pub(crate) fn current_for_tests(home: &Path) -> Self {
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self {
            name: current_username().unwrap_or_else(|| "tester".to_string()),
            uid,
            gid,
            home: home.to_path_buf(),
        }
    }
}

/// The authenticated account behind an in-flight request.
#[derive(Clone, Debug)]
pub struct Requestor {
    pub account: Account,
    pub is_admin: bool,
}

impl Requestor {
    pub fn name(&self) -> &str {
        &self.account.name
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(Error::NotAuthorized)
        }
    }

    /// Acting on `target` is allowed for `target` itself and for admins.
    pub fn require_self_or_admin(&self, target: &str) -> Result<()> {
        if self.name() == target || self.is_admin {
            Ok(())
        } else {
            Err(Error::NotAuthorized)
        }
    }
}

/// One row of the admin page's user table.
#[derive(Clone, Debug, Serialize)]
pub struct UserSummary {
    pub name: String,
    pub is_admin: bool,
}

/// Resolves usernames to accounts rooted under a home directory root.
#[derive(Clone, Debug)]
pub struct UserDirectory {
    home_root: PathBuf,
    admin_group: String,
    // Stand-in for passwd and `groups` in router tests: (name, is_admin).
    #[cfg(test)]
    fixture: Option<Vec<(String, bool)>>,
}

impl UserDirectory {
    pub fn new(home_root: impl Into<PathBuf>, admin_group: impl Into<String>) -> Self {
        Self {
            home_root: home_root.into(),
            admin_group: admin_group.into(),
            #[cfg(test)]
            fixture: None,
        }
    }

    /// A directory that knows only `users`, each mapped to the current
    /// process ids so their actions run without sudo.
    #[cfg(test)]
    pub(crate) fn with_fixture(home_root: impl Into<PathBuf>, users: &[(&str, bool)]) -> Self {
        Self {
            fixture: Some(
                users
                    .iter()
                    .map(|(name, is_admin)| (name.to_string(), *is_admin))
                    .collect(),
            ),
            ..Self::new(home_root, "sudo")
        }
    }

    #[cfg(test)]
    fn fixture_entry(&self, name: &str) -> Option<Option<bool>> {
        self.fixture.as_ref().map(|users| {
            users
                .iter()
                .find(|(user, _)| user == name)
                .map(|(_, is_admin)| *is_admin)
        })
    }

    #[cfg(not(test))]
    fn fixture_entry(&self, _name: &str) -> Option<Option<bool>> {
        None
    }

    fn ids(&self, name: &str) -> Option<(u32, u32)> {
        match self.fixture_entry(name) {
            Some(entry) => entry.map(|_| unsafe { (libc::geteuid(), libc::getegid()) }),
            None => passwd_ids(name),
        }
    }

    pub fn home_root(&self) -> &Path {
        &self.home_root
    }

    pub fn admin_group(&self) -> &str {
        &self.admin_group
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_username(name) && self.ids(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Result<Account> {
        if !is_valid_username(name) {
            return Err(Error::input("invalid username"));
        }
        let (uid, gid) = self.ids(name).ok_or_else(|| Error::input("user not found"))?;
        Ok(Account {
            name: name.to_string(),
            uid,
            gid,
            home: self.home_root.join(name),
        })
    }

    pub async fn is_admin(&self, name: &str) -> Result<bool> {
        if let Some(entry) = self.fixture_entry(name) {
            return Ok(entry.unwrap_or(false));
        }
        let output = Invocation::new(Program::Groups).arg(name).run().await?;
        Ok(parse_groups_output(&output.stdout_text()).contains(&self.admin_group.as_str()))
    }

    pub async fn requestor(&self, name: &str) -> Result<Requestor> {
        let account = self.lookup(name)?;
        let is_admin = self.is_admin(name).await?;
        Ok(Requestor { account, is_admin })
    }

    /// Users that have a directory under the home root, by name.
    pub async fn list(&self) -> Result<Vec<UserSummary>> {
        let mut names = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.home_root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.exists(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut users = Vec::with_capacity(names.len());
        for name in names {
            let is_admin = self.is_admin(&name).await.unwrap_or(false);
            users.push(UserSummary { name, is_admin });
        }
        Ok(users)
    }
}

// uid/gid via getpwnam_r (thread-safe)
fn passwd_ids(username: &str) -> Option<(u32, u32)> {
    unsafe {
        let c_username = CString::new(username).ok()?;
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut pwd_ptr: *mut libc::passwd = std::ptr::null_mut();

        const GETPWNAM_BUFFER_SIZE: usize = 16384;
        let mut buf = vec![0u8; GETPWNAM_BUFFER_SIZE];

        let result = libc::getpwnam_r(
            c_username.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            GETPWNAM_BUFFER_SIZE,
            &mut pwd_ptr,
        );

        if result != 0 || pwd_ptr.is_null() {
            return None;
        }

        Some((pwd.pw_uid, pwd.pw_gid))
    }
}

/// Name of the user the process runs as.
pub fn current_username() -> Option<String> {
    unsafe {
        let uid = libc::getuid();
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut pwd_ptr: *mut libc::passwd = std::ptr::null_mut();

        const GETPWUID_BUFFER_SIZE: usize = 16384;
        let mut buf = vec![0u8; GETPWUID_BUFFER_SIZE];

        let result = libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            GETPWUID_BUFFER_SIZE,
            &mut pwd_ptr,
        );

        if result != 0 || pwd_ptr.is_null() {
            return None;
        }

        let username = CStr::from_ptr(pwd.pw_name);
        username.to_str().ok().map(|s| s.to_string())
    }
}

/// Group names out of `groups <user>` output (`alice : alice sudo`).
pub fn parse_groups_output(output: &str) -> Vec<&str> {
    let list = match output.split_once(':') {
        Some((_, groups)) => groups,
        None => output,
    };
    list.split_whitespace().collect()
}

/// Pick the admin group from sudoers contents: the first candidate with a
/// `%group ... ALL` rule.
pub fn admin_group_from_sudoers(contents: &str) -> Option<&'static str> {
    let granted = |group: &str| {
        contents.lines().map(str::trim).any(|line| {
            if line.starts_with('#') {
                return false;
            }
            let mut fields = line.split_whitespace();
            let Some(subject) = fields.next() else {
                return false;
            };
            subject.strip_prefix('%') == Some(group) && fields.last() == Some("ALL")
        })
    };
    ADMIN_GROUP_CANDIDATES
        .into_iter()
        .find(|group| granted(group))
}

pub async fn detect_admin_group(sudoers: &Path) -> Result<String> {
    let contents = tokio::fs::read_to_string(sudoers).await?;
    admin_group_from_sudoers(&contents)
        .map(str::to_string)
        .ok_or_else(|| Error::input("no sudo or wheel rule granting ALL in sudoers"))
}

fn check_password_shape(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::input("password must not be empty"));
    }
    if password.contains('\n') || password.contains('\r') {
        return Err(Error::input("password must not contain a newline"));
    }
    Ok(())
}

/// Check `password` against the host's PAM stack.
///
/// Root is never prompted by `su`, so the outer `su` drops to the user and
/// the inner one has to ask for the password, which is read from stdin.
pub async fn verify_credentials(
    users: &UserDirectory,
    username: &str,
    password: &str,
) -> Result<bool> {
    if !users.exists(username) || check_password_shape(password).is_err() {
        return Ok(false);
    }
    Invocation::new(Program::Su)
        .arg("-c")
        .arg(format!("su -c exit {username}"))
        .arg(username)
        .stdin(format!("{password}\n"))
        .succeeds()
        .await
}

/// New password and its confirmation from a change-password form.
pub fn validate_new_password(new: &str, confirm: &str) -> Result<()> {
    check_password_shape(new)?;
    if new != confirm {
        return Err(Error::input("passwords do not match"));
    }
    Ok(())
}

async fn set_password(username: &str, password: &str) -> Result<()> {
    Invocation::new(Program::Passwd)
        .arg("--stdin")
        .arg(username)
        .stdin(format!("{password}\n"))
        .run()
        .await
        .map(drop)
}

pub async fn create_user(users: &UserDirectory, username: &str) -> Result<()> {
    if !is_valid_username(username) {
        return Err(Error::input("invalid username"));
    }
    if users.exists(username) {
        return Err(Error::input("user already exists"));
    }
    Invocation::new(Program::Useradd)
        .arg("--create-home")
        .arg(username)
        .run()
        .await?;
    set_password(username, DEFAULT_PASSWORD).await?;
    tracing::info!(user = username, "user created");
    Ok(())
}

pub async fn delete_user(users: &UserDirectory, username: &str) -> Result<()> {
    users.lookup(username)?;
    Invocation::new(Program::Userdel)
        .arg("--remove")
        .arg(username)
        .run()
        .await?;
    tracing::info!(user = username, "user deleted");
    Ok(())
}

pub async fn reset_password(users: &UserDirectory, username: &str) -> Result<()> {
    users.lookup(username)?;
    set_password(username, DEFAULT_PASSWORD).await
}

pub async fn change_password(
    users: &UserDirectory,
    username: &str,
    current: &str,
    new: &str,
    confirm: &str,
) -> Result<()> {
    users.lookup(username)?;
    validate_new_password(new, confirm)?;
    if !verify_credentials(users, username, current).await? {
        return Err(Error::input("current password is incorrect"));
    }
    set_password(username, new).await
}

/// Flip admin-group membership; returns the new state.
pub async fn toggle_admin(users: &UserDirectory, username: &str) -> Result<bool> {
    users.lookup(username)?;
    let was_admin = users.is_admin(username).await?;
    let flag = if was_admin { "-d" } else { "-a" };
    Invocation::new(Program::Gpasswd)
        .arg(flag)
        .arg(username)
        .arg(users.admin_group())
        .run()
        .await?;
    tracing::info!(user = username, admin = !was_admin, "admin membership changed");
    Ok(!was_admin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("_svc-01"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("Alice"));
        assert!(!is_valid_username("-alice"));
        assert!(!is_valid_username("alice bob"));
        assert!(!is_valid_username("alice;rm"));
        assert!(!is_valid_username(&"a".repeat(33)));
    }

    #[test]
    fn test_parse_groups_output() {
        assert_eq!(parse_groups_output("alice : alice sudo\n"), ["alice", "sudo"]);
        assert_eq!(parse_groups_output("alice wheel"), ["alice", "wheel"]);
    }

    #[test]
    fn test_admin_group_from_sudoers() {
        let debian = "# comment\nroot ALL=(ALL:ALL) ALL\n%sudo   ALL=(ALL:ALL) ALL\n";
        assert_eq!(admin_group_from_sudoers(debian), Some("sudo"));

        let fedora = "%wheel ALL=(ALL) ALL\n# %sudo ALL=(ALL) ALL\n";
        assert_eq!(admin_group_from_sudoers(fedora), Some("wheel"));

        let both = "%wheel ALL=(ALL) ALL\n%sudo ALL=(ALL:ALL) ALL\n";
        assert_eq!(admin_group_from_sudoers(both), Some("sudo"));

        let restricted = "%sudo ALL=(ALL) /usr/bin/apt\n";
        assert_eq!(admin_group_from_sudoers(restricted), None);
    }

    #[test]
    fn test_validate_new_password() {
        assert!(validate_new_password("s3cret", "s3cret").is_ok());
        assert!(validate_new_password("", "").is_err());
        assert!(validate_new_password("a\nb", "a\nb").is_err());
        assert!(validate_new_password("s3cret", "s3cre7").is_err());
    }

    #[test]
    fn test_requestor_rules() {
        let account = Account {
            name: "alice".to_string(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/alice"),
        };
        let alice = Requestor {
            account: account.clone(),
            is_admin: false,
        };
        assert!(alice.require_self_or_admin("alice").is_ok());
        assert!(alice.require_self_or_admin("bob").is_err());
        assert!(alice.require_admin().is_err());

        let admin = Requestor {
            account,
            is_admin: true,
        };
        assert!(admin.require_self_or_admin("bob").is_ok());
        assert!(admin.require_admin().is_ok());
    }

    #[test]
    fn test_lookup_invalid() {
        let users = UserDirectory::new("/home", "sudo");
        assert!(users.lookup("nonexistent_user_12345").is_err());
        assert!(users.lookup("../etc").is_err());
    }

    #[tokio::test]
    async fn test_verify_credentials_rejects_without_running_su() {
        let users = UserDirectory::new("/home", "sudo");
        assert!(!verify_credentials(&users, "nonexistent_user_12345", "pw")
            .await
            .unwrap());
        assert!(!verify_credentials(&users, "Bad Name", "pw").await.unwrap());
    }
}
