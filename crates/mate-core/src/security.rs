use std::collections::HashSet;

/// Base commands the Navigator may execute remotely (no arguments, no paths).
const ALLOWED_COMMANDS: &[&str] = &[
    // System info
    "df", "free", "uptime", "uname", "hostname", "whoami", "date",
    // File operations (read-only)
    "ls", "cat", "head", "tail", "grep", "find", "du", "pwd",
    // Process monitoring
    "ps", "top", "htop", "pgrep", "pidof",
    // System services
    "systemctl", "journalctl", "service",
    // Network
    "ping", "curl", "wget", "netstat", "ss", "ip", "ifconfig",
    // Package info (read-only)
    "dpkg", "apt", "yum", "rpm",
    // Other utilities
    "which", "whereis", "file", "stat", "wc", "sort", "uniq", "dmesg", "lsblk", "lsusb", "lspci",
    "env",
];

/// Explicitly forbidden commands; the deny-list wins over the allow-list.
const DENIED_COMMANDS: &[&str] = &[
    "rm",
    "dd",
    "mkfs",
    "fdisk",
    "parted",
    "chmod",
    "chown",
    "chgrp",
    "useradd",
    "userdel",
    "usermod",
    "passwd",
    "iptables",
    "ufw",
    "firewall-cmd",
    "shutdown",
    "reboot",
    "init",
    "halt",
    "poweroff",
];

const PATH_PREFIXES: &[&str] = &["/usr/bin/", "/bin/"];

/// Decides whether a remotely supplied command name may be executed.
///
/// Matching is on the command name only; arguments are never inspected, so
/// allow-listing `cat` still permits reading any file the process can access.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: HashSet<String>,
    denied: HashSet<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(
            ALLOWED_COMMANDS.iter().copied(),
            DENIED_COMMANDS.iter().copied(),
        )
    }
}

impl CommandPolicy {
    pub fn new<'a>(
        allowed: impl IntoIterator<Item = &'a str>,
        denied: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().map(str::to_string).collect(),
            denied: denied.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        if self.denied.contains(command) {
            return false;
        }
        if self.allowed.contains(command) {
            return true;
        }
        // Accept absolute paths into the standard binary directories by
        // re-checking the bare name, e.g. /usr/bin/df or /bin/ls.
        for prefix in PATH_PREFIXES {
            if let Some(bare) = command.strip_prefix(prefix) {
                return self.is_allowed(bare);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_whitelisted_commands() {
        let policy = CommandPolicy::default();
        for command in ["df", "uptime", "journalctl", "env"] {
            assert!(policy.is_allowed(command), "{command} should be allowed");
        }
    }

    #[test]
    fn rejects_unknown_commands() {
        let policy = CommandPolicy::default();
        for command in ["bash", "python3", "nc", ""] {
            assert!(!policy.is_allowed(command), "{command} should be rejected");
        }
    }

    #[test]
    fn deny_list_wins_over_allow_list() {
        let policy = CommandPolicy::new(["rm", "ls"], ["rm"]);
        assert!(!policy.is_allowed("rm"));
        assert!(policy.is_allowed("ls"));
    }

    #[test]
    fn path_prefix_resolves_to_bare_name() {
        let policy = CommandPolicy::default();
        assert_eq!(policy.is_allowed("/usr/bin/df"), policy.is_allowed("df"));
        assert_eq!(policy.is_allowed("/bin/ls"), policy.is_allowed("ls"));
        assert!(!policy.is_allowed("/usr/bin/rm"));
        assert!(!policy.is_allowed("/opt/bin/ls"));
    }

    #[test]
    fn forbidden_commands_stay_forbidden_behind_prefixes() {
        let policy = CommandPolicy::default();
        for command in ["shutdown", "/bin/dd", "/usr/bin/passwd"] {
            assert!(!policy.is_allowed(command), "{command} should be rejected");
        }
    }
}
