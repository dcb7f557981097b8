//! Interactive shell emulator. Commands run against the virtual filesystem;
//! nothing the attacker does has any effect outside the session.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::vfs::{resolve_cd, VirtualFileSystem};
use super::{realism_delay, LineReader, SessionContext};

pub async fn handle<S>(stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    realism_delay(100, 150).await;

    let vfs = VirtualFileSystem::new();
    let mut cwd = String::from("/root");
    let mut history: Vec<String> = Vec::new();

    let (read_half, mut stream) = tokio::io::split(stream);
    let mut reader = LineReader::new(read_half);

    stream.write_all(prompt(&cwd).as_bytes()).await?;

    loop {
        let Some(input) = reader.next_line().await? else {
            return Ok(());
        };
        if input.is_empty() {
            stream.write_all(prompt(&cwd).as_bytes()).await?;
            continue;
        }

        ctx.command(format!("SSH COMMAND: {input}"), format!("SSH: {input}"));
        history.push(input.clone());

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        realism_delay(50, 150).await;

        let output = match cmd {
            "exit" | "logout" | "quit" => {
                stream.write_all(b"Connection closed by foreign host.\r\n").await?;
                return Ok(());
            }
            "ls" => vfs.list_files(if args.is_empty() || args[0].starts_with('-') {
                cwd.as_str()
            } else {
                args[0]
            }),
            "pwd" => format!("{cwd}\r\n"),
            "whoami" => "root\r\n".to_string(),
            "id" => "uid=0(root) gid=0(root) groups=0(root)\r\n".to_string(),
            "uname" => {
                if args.first() == Some(&"-a") {
                    "Linux server 5.4.0-74-generic #83-Ubuntu SMP Sat May 8 02:35:04 UTC 2021 x86_64 x86_64 x86_64 GNU/Linux\r\n".to_string()
                } else {
                    "Linux\r\n".to_string()
                }
            }
            "cat" | "less" | "more" => cat_output(&vfs, &cwd, cmd, &args),
            "cd" => {
                match args.first() {
                    None => cwd = "/root".to_string(),
                    Some(target) => {
                        let resolved = resolve_cd(&cwd, target);
                        if vfs.is_dir(&resolved) || resolved == "/" {
                            cwd = resolved;
                        } else {
                            let msg = format!("bash: cd: {target}: No such file or directory\r\n");
                            stream.write_all(msg.as_bytes()).await?;
                            stream.write_all(prompt(&cwd).as_bytes()).await?;
                            continue;
                        }
                    }
                }
                String::new()
            }
            "history" => {
                let mut out = String::new();
                for (i, entry) in history.iter().enumerate() {
                    out.push_str(&format!(" {:4}  {entry}\r\n", i + 1));
                }
                out
            }
            "ps" => ps_output(args.first() == Some(&"aux")),
            "netstat" => netstat_output(args.first() == Some(&"-an")),
            "ifconfig" => ifconfig_output(),
            "ip" => {
                if args.first() == Some(&"addr") {
                    ip_addr_output()
                } else {
                    "Usage: ip addr\r\n".to_string()
                }
            }
            "df" => {
                "Filesystem     1K-blocks    Used Available Use% Mounted on\r\n\
                 /dev/sda1       20971520 8388608  12582912  40% /\r\n\
                 tmpfs             524288       0    524288   0% /dev/shm\r\n\
                 /dev/sda2       52428800 10485760  41943040  20% /home\r\n"
                    .to_string()
            }
            "free" => {
                "              total        used        free      shared  buff/cache   available\r\n\
                 Mem:         8192000     4096000     2048000      512000     2048000     3584000\r\n\
                 Swap:        2097152           0     2097152\r\n"
                    .to_string()
            }
            "top" | "htop" => top_output(),
            "grep" => grep_output(&vfs, &args),
            "find" => {
                if matches!(args.first(), Some(&"/") | Some(&".")) {
                    "/root/.bashrc\r\n/root/.bash_history\r\n/etc/passwd\r\n/etc/hosts\r\n".to_string()
                } else if args.is_empty() {
                    "find: missing path\r\n".to_string()
                } else {
                    String::new()
                }
            }
            "tail" | "head" => tail_head_output(&vfs, &cwd, cmd, &args),
            "wget" | "curl" => {
                if let Some(url) = args.first() {
                    realism_delay(200, 400).await;
                    format!(
                        "Connecting to {}...\r\n\
                         HTTP request sent, awaiting response... 200 OK\r\n\
                         Length: 1024 (1.0K) [text/html]\r\n\
                         Saving to: 'index.html'\r\n\
                         'index.html' saved [1024/1024]\r\n",
                        url.trim_start_matches("http://").trim_start_matches("https://")
                    )
                } else {
                    format!("{cmd}: missing URL\r\n")
                }
            }
            "sudo" => {
                if args.is_empty() {
                    "sudo: missing command\r\n".to_string()
                } else {
                    stream.write_all(b"[sudo] password for root: ").await?;
                    realism_delay(300, 600).await;
                    format!("\r\nExecuting: {}\r\n", args.join(" "))
                }
            }
            "passwd" => {
                stream.write_all(b"Changing password for root.\r\nCurrent password: ").await?;
                realism_delay(400, 800).await;
                "\r\npasswd: Authentication token manipulation error\r\n".to_string()
            }
            "su" => {
                if args.is_empty() {
                    "su: must be run from a terminal\r\n".to_string()
                } else {
                    stream.write_all(b"Password: ").await?;
                    realism_delay(300, 600).await;
                    "\r\nsu: Authentication failure\r\n".to_string()
                }
            }
            "clear" | "reset" => "\x1b[2J\x1b[H".to_string(),
            other => {
                realism_delay(40, 60).await;
                format!("bash: {other}: command not found\r\n")
            }
        };

        stream.write_all(output.as_bytes()).await?;
        stream.write_all(prompt(&cwd).as_bytes()).await?;
    }
}

fn prompt(cwd: &str) -> String {
    format!("root@server:{cwd}# ")
}

fn cat_output(vfs: &VirtualFileSystem, cwd: &str, cmd: &str, args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return format!("{cmd}: missing file operand\r\n");
    };
    let path = if name.starts_with('/') { name.to_string() } else { format!("{cwd}/{name}") };
    match vfs.read_file(&path) {
        Some(content) => format!("{content}\r\n"),
        None if path == "/etc/shadow" => "cat: /etc/shadow: Permission denied\r\n".to_string(),
        None => format!("cat: {name}: No such file or directory\r\n"),
    }
}

fn tail_head_output(vfs: &VirtualFileSystem, cwd: &str, cmd: &str, args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return format!("{cmd}: missing file operand\r\n");
    };
    let path = if name.starts_with('/') { name.to_string() } else { format!("{cwd}/{name}") };
    match vfs.read_file(&path) {
        Some(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let selected: Vec<&str> = if cmd == "tail" {
                lines.iter().rev().take(10).rev().copied().collect()
            } else {
                lines.iter().take(10).copied().collect()
            };
            format!("{}\r\n", selected.join("\n"))
        }
        None => format!("{cmd}: {name}: No such file or directory\r\n"),
    }
}

fn grep_output(vfs: &VirtualFileSystem, args: &[&str]) -> String {
    match args {
        [] => "grep: missing pattern\r\n".to_string(),
        [_pattern] => "grep: missing file operand\r\n".to_string(),
        [pattern, file, ..] => match vfs.read_file(file) {
            Some(content) => content
                .lines()
                .filter(|line| line.contains(pattern))
                .map(|line| format!("{line}\r\n"))
                .collect(),
            None => format!("grep: {file}: No such file or directory\r\n"),
        },
    }
}

fn ps_output(aux: bool) -> String {
    if aux {
        "USER       PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND\r\n\
         root         1  0.0  0.1  22536  3824 ?        Ss   Dec10   0:01 /sbin/init\r\n\
         root       456  0.0  0.2  47864  8960 ?        Ss   Dec10   0:02 /usr/sbin/sshd\r\n\
         root       789  0.0  0.1  23456  5120 ?        S    Dec10   0:00 /usr/sbin/nginx\r\n\
         mysql      890  0.1  2.5 123456 25600 ?        Sl   Dec10   0:15 /usr/sbin/mysqld\r\n\
         redis      901  0.0  0.3  12345  3072 ?        Ssl  Dec10   0:01 /usr/bin/redis-server\r\n\
         www-data  1234  0.0  0.2  34567  2048 ?        S    Dec10   0:00 /usr/sbin/apache2\r\n"
            .to_string()
    } else {
        "  PID TTY          TIME CMD\r\n\
         \x20   1 ?        00:00:01 systemd\r\n\
         \x20 456 ?        00:00:02 sshd\r\n\
         \x20 789 ?        00:00:00 nginx\r\n\
         \x20 890 ?        00:00:01 mysqld\r\n\
         \x20 901 ?        00:00:00 redis-server\r\n\
         \x201234 ?        00:00:00 apache2\r\n"
            .to_string()
    }
}

fn netstat_output(all: bool) -> String {
    if all {
        "Active Internet connections (servers and established)\r\n\
         Proto Recv-Q Send-Q Local Address           Foreign Address         State\r\n\
         tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN\r\n\
         tcp        0      0 0.0.0.0:80              0.0.0.0:*               LISTEN\r\n\
         tcp        0      0 127.0.0.1:3306          0.0.0.0:*               LISTEN\r\n"
            .to_string()
    } else {
        "Active Internet connections (w/o servers)\r\n\
         Proto Recv-Q Send-Q Local Address           Foreign Address         State\r\n\
         tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN\r\n\
         tcp        0      0 0.0.0.0:80              0.0.0.0:*               LISTEN\r\n\
         tcp        0      0 0.0.0.0:443             0.0.0.0:*               LISTEN\r\n\
         tcp        0      0 0.0.0.0:3306            0.0.0.0:*               LISTEN\r\n"
            .to_string()
    }
}

fn ifconfig_output() -> String {
    "eth0: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500\r\n\
     \x20       inet 192.168.1.100  netmask 255.255.255.0  broadcast 192.168.1.255\r\n\
     \x20       ether 00:0c:29:12:34:56  txqueuelen 1000  (Ethernet)\r\n\
     \x20       RX packets 12345  bytes 1234567 (1.2 MB)\r\n\
     \x20       TX packets 9876  bytes 987654 (987.6 KB)\r\n"
        .to_string()
}

fn ip_addr_output() -> String {
    "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000\r\n\
     \x20   inet 127.0.0.1/8 scope host lo\r\n\
     2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc pfifo_fast state UP group default qlen 1000\r\n\
     \x20   link/ether 00:0c:29:12:34:56 brd ff:ff:ff:ff:ff:ff\r\n\
     \x20   inet 192.168.1.100/24 brd 192.168.1.255 scope global eth0\r\n"
        .to_string()
}

fn top_output() -> String {
    "top - 10:30:15 up 5 days,  2:15,  1 user,  load average: 0.45, 0.52, 0.48\r\n\
     Tasks: 125 total,   1 running, 124 sleeping,   0 stopped,   0 zombie\r\n\
     %Cpu(s):  2.5 us,  1.2 sy,  0.0 ni, 96.3 id,  0.0 wa,  0.0 hi,  0.0 si,  0.0 st\r\n\
     MiB Mem :   8000.0 total,   4000.0 free,   2000.0 used,   2000.0 buff/cache\r\n\
     \r\n\
     \x20 PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND\r\n\
     \x20 890 mysql     20   0  123456  25600   5120 S   1.2   0.3   0:15.23 mysqld\r\n\
     \x20 456 root      20   0   47864   8960   2048 S   0.3   0.1   0:02.45 sshd\r\n\
     \x20   1 root      20   0   22536   3824   2048 S   0.0   0.0   0:01.23 systemd\r\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::honeypot::tests_support::{drive, test_ctx};

    #[tokio::test]
    async fn exit_closes_the_session() {
        let (output, result) = drive!(handle, b"exit\n").await;
        assert!(result.is_ok());
        assert!(output.contains("root@server:/root# "));
        assert!(output.contains("Connection closed by foreign host."));
    }

    #[tokio::test]
    async fn pwd_and_whoami_report_the_fake_identity() {
        let (output, _) = drive!(handle, b"pwd\nwhoami\nexit\n").await;
        assert!(output.contains("/root\r\n"));
        assert!(output.contains("root\r\n"));
    }

    #[tokio::test]
    async fn shadow_is_permission_denied() {
        let (output, _) = drive!(handle, b"cat /etc/shadow\nexit\n").await;
        assert!(output.contains("cat: /etc/shadow: Permission denied"));
    }

    #[tokio::test]
    async fn passwd_file_is_served_from_the_vfs() {
        let (output, _) = drive!(handle, b"cat /etc/passwd\nexit\n").await;
        assert!(output.contains("root:x:0:0:root:/root:/bin/bash"));
    }

    #[tokio::test]
    async fn cd_updates_the_prompt() {
        let (output, _) = drive!(handle, b"cd /etc\npwd\nexit\n").await;
        assert!(output.contains("root@server:/etc# "));
        assert!(output.contains("/etc\r\n"));
    }

    #[tokio::test]
    async fn cd_dotdot_walks_up() {
        let (output, _) = drive!(handle, b"cd /var/log\ncd ..\npwd\nexit\n").await;
        assert!(output.contains("root@server:/var# "));
    }

    #[tokio::test]
    async fn cd_to_missing_directory_is_an_error() {
        let (output, _) = drive!(handle, b"cd /no/such/dir\nexit\n").await;
        assert!(output.contains("bash: cd: /no/such/dir: No such file or directory"));
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let (output, _) = drive!(handle, b"frobnicate\nexit\n").await;
        assert!(output.contains("bash: frobnicate: command not found"));
    }

    #[tokio::test]
    async fn history_replays_the_session() {
        let (output, _) = drive!(handle, b"pwd\nhistory\nexit\n").await;
        assert!(output.contains("1  pwd"));
        assert!(output.contains("2  history"));
    }

    #[tokio::test]
    async fn commands_are_counted() {
        let ctx = test_ctx();
        let stats = std::sync::Arc::clone(&ctx.stats);
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { handle(&mut server, &ctx).await });

        use tokio::io::AsyncWriteExt;
        client.write_all(b"id\nexit\n").await.unwrap();
        client.shutdown().await.unwrap();
        let _ = task.await.unwrap();
        assert!(stats.snapshot().total_commands >= 2);
    }
}
