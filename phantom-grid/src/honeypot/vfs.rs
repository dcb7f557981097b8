//! In-memory virtual filesystem backing the SSH emulator: a static map from
//! path to content plus a static map from path to directory entries. Writes
//! are never honored; `cd` only traverses.

use std::collections::HashMap;

pub struct VirtualFileSystem {
    files: HashMap<&'static str, &'static str>,
    dirs: HashMap<&'static str, Vec<&'static str>>,
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        let mut dirs: HashMap<&'static str, Vec<&'static str>> = HashMap::new();

        dirs.insert("/", vec!["root", "home", "etc", "var", "tmp", "usr", "opt", "boot"]);
        dirs.insert(
            "/root",
            vec![".bashrc", ".bash_history", ".ssh", "backup.tar.gz", "config.txt", "logs"],
        );
        dirs.insert("/home", vec!["user", "admin", "www"]);
        dirs.insert("/etc", vec!["passwd", "shadow", "hosts", "nginx", "apache2", "mysql"]);
        dirs.insert("/var", vec!["log", "www", "backup", "tmp"]);
        dirs.insert("/var/log", vec!["auth.log", "syslog", "nginx", "apache2"]);
        dirs.insert("/var/www", vec!["html", "uploads", "config.php"]);
        dirs.insert("/tmp", vec!["session.tmp", "cache.tmp"]);

        files.insert(
            "/etc/passwd",
            "root:x:0:0:root:/root:/bin/bash\n\
             daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
             bin:x:2:2:bin:/bin:/usr/sbin/nologin\n\
             sys:x:3:3:sys:/dev:/usr/sbin/nologin\n\
             sync:x:4:65534:sync:/bin:/bin/sync\n\
             www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin\n\
             backup:x:34:34:backup:/var/backups:/usr/sbin/nologin\n\
             syslog:x:104:110::/home/syslog:/usr/sbin/nologin\n\
             sshd:x:110:65534::/run/sshd:/usr/sbin/nologin\n\
             ubuntu:x:1000:1000:Ubuntu:/home/ubuntu:/bin/bash\n\
             lxd:x:999:100::/var/snap/lxd/common/lxd:/bin/false\n",
        );

        files.insert(
            "/etc/hosts",
            "127.0.0.1\tlocalhost\n\
             127.0.1.1\tserver\n\
             ::1\t\tlocalhost ip6-localhost ip6-loopback\n\
             ff02::1\t\tip6-allnodes\n\
             ff02::2\t\tip6-allrouters\n",
        );

        files.insert(
            "/var/log/auth.log",
            "Dec 15 10:23:15 server sshd[1234]: Accepted publickey for root from 192.168.1.100 port 54321 ssh2\n\
             Dec 15 10:25:30 server sshd[1235]: Failed password for invalid user admin from 192.168.1.101 port 54322 ssh2\n\
             Dec 15 10:26:45 server sshd[1236]: Accepted publickey for ubuntu from 192.168.1.102 port 54323 ssh2\n\
             Dec 15 10:28:12 server sudo:     root : TTY=pts/0 ; PWD=/root ; USER=root ; COMMAND=/usr/bin/apt update\n\
             Dec 15 10:30:22 server sshd[1237]: Invalid user test from 192.168.1.103 port 54324 ssh2\n",
        );

        files.insert(
            "/var/log/syslog",
            "Dec 15 10:20:01 server systemd[1]: Started Daily apt upgrade and clean activities.\n\
             Dec 15 10:20:15 server systemd[1]: Starting Cleanup of Temporary Directories...\n\
             Dec 15 10:20:15 server systemd[1]: Started Cleanup of Temporary Directories.\n\
             Dec 15 10:23:15 server sshd[1234]: Server listening on 0.0.0.0 port 22.\n\
             Dec 15 10:23:15 server sshd[1234]: Server listening on :: port 22.\n",
        );

        files.insert(
            "/root/.bash_history",
            "cd /var/www\nls -la\ncat config.php\nmysql -u root -p\nexit\n",
        );

        files.insert(
            "/root/config.txt",
            "# Database Configuration\n\
             DB_HOST=localhost\n\
             DB_USER=admin\n\
             DB_PASS=********\n\
             DB_NAME=production\n\
             \n\
             # API Keys\n\
             API_KEY=sk_live_51H3ll0W0rld\n\
             SECRET_KEY=sk_test_4BcDeFgHiJkLmNoPqRsTuVwXyZ\n",
        );

        files.insert(
            "/var/www/config.php",
            "<?php\n\
             define('DB_HOST', 'localhost');\n\
             define('DB_USER', 'admin');\n\
             define('DB_PASS', 'P@ssw0rd123');\n\
             define('DB_NAME', 'wordpress');\n\
             define('WP_DEBUG', false);\n\
             ?>",
        );

        files.insert(
            "/etc/nginx/nginx.conf",
            "user www-data;\n\
             worker_processes auto;\n\
             pid /run/nginx.pid;\n\
             \n\
             events {\n\
             \tworker_connections 768;\n\
             }\n\
             \n\
             http {\n\
             \tsendfile on;\n\
             \tkeepalive_timeout 65;\n\
             \tinclude /etc/nginx/mime.types;\n\
             \taccess_log /var/log/nginx/access.log;\n\
             \terror_log /var/log/nginx/error.log;\n\
             }\n",
        );

        Self { files, dirs }
    }

    /// `ls`-style listing or an error line for unknown directories.
    pub fn list_files(&self, path: &str) -> String {
        let path = normalize(path);
        match self.dirs.get(path.as_str()) {
            Some(entries) => {
                let mut out = format!("total {}\r\n", entries.len());
                for entry in entries {
                    if entry.starts_with('.') {
                        out.push_str(&format!(
                            "-rw-r--r-- 1 root root  1024 Dec 15 10:23 {entry}\r\n"
                        ));
                    } else if entry.contains('.') {
                        out.push_str(&format!(
                            "-rw-r--r-- 1 root root  2048 Dec 15 10:23 {entry}\r\n"
                        ));
                    } else {
                        out.push_str(&format!(
                            "drwxr-xr-x 2 root root  4096 Dec 15 10:23 {entry}\r\n"
                        ));
                    }
                }
                out
            }
            None => format!("ls: cannot access '{path}': No such file or directory\r\n"),
        }
    }

    pub fn read_file(&self, path: &str) -> Option<&'static str> {
        self.files.get(normalize(path).as_str()).copied()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains_key(normalize(path).as_str())
    }
}

fn normalize(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() || path == "." {
        return "/root".to_string();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/root/{path}")
    }
}

/// Resolves a `cd` target against the current directory, folding `..` and
/// `.` components.
pub fn resolve_cd(current: &str, target: &str) -> String {
    let mut parts: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        current.split('/').filter(|p| !p.is_empty()).collect()
    };
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwd_is_readable_and_shadow_is_not() {
        let vfs = VirtualFileSystem::new();
        assert!(vfs.read_file("/etc/passwd").unwrap().starts_with("root:x:0:0:"));
        assert!(vfs.read_file("/etc/shadow").is_none());
    }

    #[test]
    fn relative_paths_resolve_under_root() {
        let vfs = VirtualFileSystem::new();
        assert_eq!(vfs.read_file("config.txt"), vfs.read_file("/root/config.txt"));
    }

    #[test]
    fn listing_known_directory_has_entries() {
        let vfs = VirtualFileSystem::new();
        let listing = vfs.list_files("/etc");
        assert!(listing.starts_with("total "));
        assert!(listing.contains("passwd"));
    }

    #[test]
    fn listing_unknown_directory_errors() {
        let vfs = VirtualFileSystem::new();
        assert!(vfs.list_files("/nope").contains("No such file or directory"));
    }

    #[test]
    fn cd_resolution_handles_dotdot_and_absolute_forms() {
        assert_eq!(resolve_cd("/root", ".."), "/");
        assert_eq!(resolve_cd("/", ".."), "/");
        assert_eq!(resolve_cd("/var/log", ".."), "/var");
        assert_eq!(resolve_cd("/root", "/etc"), "/etc");
        assert_eq!(resolve_cd("/var", "log"), "/var/log");
        assert_eq!(resolve_cd("/var", "./log/../log"), "/var/log");
    }

    #[test]
    fn directories_and_files_are_distinguished() {
        let vfs = VirtualFileSystem::new();
        assert!(vfs.is_dir("/var/log"));
        assert!(!vfs.is_dir("/etc/passwd"));
        assert!(!vfs.is_dir("/nope"));
    }
}
