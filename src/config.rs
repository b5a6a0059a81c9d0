use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::client::{ClientConfig, Credentials};

/// Public CMR host.
pub const DEFAULT_CMR_URL: &str = "https://cmr.earthdata.nasa.gov";

/// Host that issues Earthdata Login challenges; credentials are only ever sent here.
pub const EARTHDATA_LOGIN_HOST: &str = "urs.earthdata.nasa.gov";

#[derive(Debug, Default, PartialEq)]
struct NetrcEntry {
    login: Option<String>,
    password: Option<String>,
}

pub(crate) fn load_config(
    cmr_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<ClientConfig> {
    resolve_config(cmr_url, username, password, |k| std::env::var(k).ok())
}

fn resolve_config<E>(
    cmr_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    env: E,
) -> Result<ClientConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let cmr_url = cmr_url
        .or_else(|| env("EARTHDATA_CMR_URL"))
        .unwrap_or_else(|| DEFAULT_CMR_URL.to_string());

    let mut username = username.or_else(|| env("EARTHDATA_USERNAME"));
    let mut password = password.or_else(|| env("EARTHDATA_PASSWORD"));

    if username.is_none() || password.is_none() {
        for path in netrc_candidates(&env) {
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read netrc file {}", path.display()))?;
            if let Some(entry) = read_netrc(&text, EARTHDATA_LOGIN_HOST) {
                log::debug!("using Earthdata credentials from {}", path.display());
                if username.is_none() {
                    username = entry.login;
                }
                if password.is_none() {
                    password = entry.password;
                }
                break;
            }
        }
    }

    let credentials = match (username, password) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        (Some(_), None) | (None, Some(_)) => {
            log::warn!("incomplete Earthdata credentials; downloads will fail until both username and password are set");
            None
        }
        (None, None) => None,
    };

    Ok(ClientConfig {
        cmr_url,
        credentials,
    })
}

/// Finds the `machine` block for `host` in netrc-formatted `text`.
///
/// Tokens may be spread over several lines; `default` applies when no machine matches.
fn read_netrc(text: &str, host: &str) -> Option<NetrcEntry> {
    let mut tokens = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.starts_with('#'))
        .flat_map(str::split_whitespace);

    let mut matched: Option<NetrcEntry> = None;
    let mut fallback: Option<NetrcEntry> = None;
    // Which block the current login/password tokens belong to.
    let mut current: Option<bool> = None;

    while let Some(tok) = tokens.next() {
        match tok {
            "machine" => {
                let name = tokens.next().unwrap_or_default();
                if matched.is_some() {
                    break;
                }
                if name == host {
                    matched = Some(NetrcEntry::default());
                    current = Some(true);
                } else {
                    current = None;
                }
            }
            "default" => {
                if matched.is_some() {
                    break;
                }
                fallback = Some(NetrcEntry::default());
                current = Some(false);
            }
            "login" | "password" | "account" | "macdef" => {
                let value = tokens.next().map(str::to_string);
                let entry = match current {
                    Some(true) => matched.as_mut(),
                    Some(false) => fallback.as_mut(),
                    None => None,
                };
                if let Some(entry) = entry {
                    match tok {
                        "login" => entry.login = value,
                        "password" => entry.password = value,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    matched.or(fallback)
}

fn netrc_candidates<E>(env: &E) -> Vec<PathBuf>
where
    E: Fn(&str) -> Option<String>,
{
    // 1) EARTHDATA_NETRC (explicit)
    // 2) NETRC (curl/wget convention)
    // 3) ./.netrc
    // 4) ~/.netrc
    if let Some(p) = env("EARTHDATA_NETRC").or_else(|| env("NETRC")) {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".netrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".netrc"));
        v.push(home.join("_netrc"));
    }
    v
}

/// Writes (or replaces) the Earthdata Login entry of the netrc file at `path`.
///
/// The entry goes before any `default` block, which must stay last. On unix the
/// file is created with mode 0600.
pub fn write_netrc_entry(path: &Path, username: &str, password: &str) -> Result<()> {
    let existing = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read netrc file {}", path.display()))?
    } else {
        String::new()
    };

    let mut machines: Vec<&str> = Vec::new();
    let mut default: Vec<&str> = Vec::new();
    let mut skipping = false;
    let mut in_default = false;
    for line in existing.lines() {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("machine") => {
                skipping = words.next() == Some(EARTHDATA_LOGIN_HOST);
                in_default = false;
            }
            Some("default") => {
                skipping = false;
                in_default = true;
            }
            _ => {}
        }
        if skipping {
            continue;
        }
        if in_default {
            default.push(line);
        } else {
            machines.push(line);
        }
    }

    let mut out = String::new();
    for line in machines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!(
        "machine {} login {} password {}\n",
        EARTHDATA_LOGIN_HOST, username, password
    ));
    for line in default {
        out.push_str(line);
        out.push('\n');
    }

    let mut file = open_private(path)?;
    file.write_all(out.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Opens `path` for writing, truncated and readable only by the owner.
#[cfg(unix)]
fn open_private(path: &Path) -> Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    // `mode` only applies to new files.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}
