//! Deciding which side of an `scp <src> <dst>` is remote.

use std::path::PathBuf;

use super::TransferError;

/// One `scp` argument: a local path, or `name:path` on a saved server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local(String),
    Remote { server: String, path: String },
}

impl Endpoint {
    /// Anything starting with `/`, `./` or `../` is local, even with a colon
    /// in it. Otherwise a colon at index 1 or later splits server from path.
    pub fn parse(arg: &str) -> Self {
        if ["/", "./", "../"].iter().any(|p| arg.starts_with(p)) {
            return Endpoint::Local(arg.to_string());
        }
        match arg.find(':') {
            Some(idx) if idx >= 1 => Endpoint::Remote {
                server: arg[..idx].to_string(),
                path: arg[idx + 1..].to_string(),
            },
            _ => Endpoint::Local(arg.to_string()),
        }
    }
}

/// A resolved copy: which server, which way, and both paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Upload {
        server: String,
        local: PathBuf,
        remote: String,
    },
    Download {
        server: String,
        remote: String,
        local: PathBuf,
    },
}

impl Transfer {
    /// Exactly one of `src` and `dst` must be remote.
    pub fn resolve(src: &str, dst: &str) -> Result<Self, TransferError> {
        match (Endpoint::parse(src), Endpoint::parse(dst)) {
            (Endpoint::Remote { .. }, Endpoint::Remote { .. }) => Err(TransferError::Usage(
                "both arguments cannot be remote; copying between two servers is not supported"
                    .into(),
            )),
            (Endpoint::Local(_), Endpoint::Local(_)) => Err(TransferError::Usage(
                "one argument must be remote (e.g. prod-web:/path)".into(),
            )),
            (Endpoint::Remote { server, path }, Endpoint::Local(local)) => {
                Ok(Transfer::Download {
                    server,
                    remote: path,
                    local: PathBuf::from(local),
                })
            }
            (Endpoint::Local(local), Endpoint::Remote { server, path }) => Ok(Transfer::Upload {
                server,
                local: PathBuf::from(local),
                remote: path,
            }),
        }
    }

    pub fn server(&self) -> &str {
        match self {
            Transfer::Upload { server, .. } | Transfer::Download { server, .. } => server,
        }
    }

    /// The command the remote side runs for this transfer. An empty remote
    /// path means the login directory.
    pub fn remote_command(&self) -> String {
        let (flag, remote) = match self {
            Transfer::Upload { remote, .. } => ("-t", remote),
            Transfer::Download { remote, .. } => ("-f", remote),
        };
        let remote = if remote.is_empty() { "." } else { remote.as_str() };
        format!("scp {flag} {}", shell_quote(remote))
    }
}

/// Single-quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_prefix_is_remote() {
        assert_eq!(
            Endpoint::parse("prod-web:/etc/hostname"),
            Endpoint::Remote {
                server: "prod-web".into(),
                path: "/etc/hostname".into()
            }
        );
    }

    #[test]
    fn relative_path_is_local() {
        assert_eq!(
            Endpoint::parse("./local/file.txt"),
            Endpoint::Local("./local/file.txt".into())
        );
        assert_eq!(
            Endpoint::parse("../up:here"),
            Endpoint::Local("../up:here".into())
        );
    }

    #[test]
    fn absolute_path_with_colon_is_local() {
        assert_eq!(
            Endpoint::parse("/abs/path:weird"),
            Endpoint::Local("/abs/path:weird".into())
        );
    }

    #[test]
    fn leading_colon_is_local() {
        assert_eq!(Endpoint::parse(":x"), Endpoint::Local(":x".into()));
        assert_eq!(Endpoint::parse("plain"), Endpoint::Local("plain".into()));
    }

    #[test]
    fn empty_remote_path_is_allowed() {
        assert_eq!(
            Endpoint::parse("box:"),
            Endpoint::Remote {
                server: "box".into(),
                path: String::new()
            }
        );
    }

    #[test]
    fn resolve_download_and_upload() {
        assert_eq!(
            Transfer::resolve("web:/etc/hosts", "./hosts").unwrap(),
            Transfer::Download {
                server: "web".into(),
                remote: "/etc/hosts".into(),
                local: PathBuf::from("./hosts"),
            }
        );
        let up = Transfer::resolve("notes.txt", "web:/tmp/notes.txt").unwrap();
        assert_eq!(up.server(), "web");
        assert_eq!(up.remote_command(), "scp -t '/tmp/notes.txt'");

        let home = Transfer::resolve("box:", ".").unwrap();
        assert_eq!(home.remote_command(), "scp -f '.'");
    }

    #[test]
    fn both_remote_or_both_local_is_usage_error() {
        assert!(matches!(
            Transfer::resolve("a:/x", "b:/y"),
            Err(TransferError::Usage(_))
        ));
        assert!(matches!(
            Transfer::resolve("./x", "/y"),
            Err(TransferError::Usage(_))
        ));
    }

    #[test]
    fn quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
