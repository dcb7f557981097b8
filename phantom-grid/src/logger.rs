use chrono::{Local, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Capacity of the operator log channel. Producers never block: when the
/// channel is full the message is dropped.
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Event taxonomy carried over the log channel. Consumers (dashboard, ELK
/// exporter) key off the bracketed tag at the start of each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TrapHit,
    SpaSuccess,
    SpaFail,
    StealthDrop,
    OsMutation,
    EgressBlock,
    System,
}

impl EventKind {
    pub fn tag(self) -> &'static str {
        match self {
            EventKind::TrapHit => "[TRAP]",
            EventKind::SpaSuccess | EventKind::SpaFail => "[SPA]",
            EventKind::StealthDrop => "[STEALTH]",
            EventKind::OsMutation => "[OS-MUTATION]",
            EventKind::EgressBlock => "[EGRESS]",
            EventKind::System => "[SYSTEM]",
        }
    }
}

/// Cloneable handle onto the single process-wide log channel.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<String>,
}

impl LogSink {
    pub fn channel() -> (LogSink, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        (LogSink { tx }, rx)
    }

    /// Non-blocking send; hot paths drop on overflow rather than stall.
    pub fn send(&self, message: impl Into<String>) {
        let _ = self.tx.try_send(message.into());
    }

    pub fn event(&self, kind: EventKind, message: impl AsRef<str>) {
        self.send(format!("{} {}", kind.tag(), message.as_ref()));
    }
}

/// Local wall-clock tag used in session log lines.
pub fn clock_tag() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp: String,
    src_ip: &'a str,
    command: &'a str,
    risk_level: &'static str,
}

/// Append-only JSON Lines audit trail of attacker activity.
#[derive(Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Best-effort append; audit failures must never take down a session.
    pub fn record(&self, src_ip: &str, command: &str) {
        let entry = AuditRecord {
            timestamp: Utc::now().to_rfc3339(),
            src_ip,
            command,
            risk_level: "HIGH",
        };

        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o755));
        }

        let path = self.dir.join("audit.json");
        let Ok(mut file) = OpenOptions::new().append(true).create(true).open(&path) else {
            return;
        };
        if let Ok(mut line) = serde_json::to_vec(&entry) {
            line.push(b'\n');
            let _ = file.write_all(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sink_drops_on_overflow_without_blocking() {
        let (sink, mut rx) = LogSink::channel();
        for i in 0..LOG_CHANNEL_CAPACITY + 50 {
            sink.send(format!("message {i}"));
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, LOG_CHANNEL_CAPACITY);
    }

    #[test]
    fn event_lines_carry_the_kind_tag() {
        let (sink, mut rx) = LogSink::channel();
        sink.event(EventKind::TrapHit, "connection from 10.0.0.5");
        assert_eq!(rx.try_recv().unwrap(), "[TRAP] connection from 10.0.0.5");
    }

    #[test]
    fn audit_records_are_json_lines() {
        let dir = std::env::temp_dir().join(format!("phantom-audit-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let audit = AuditLog::new(&dir);
        audit.record("10.0.0.5", "SSH: cat /etc/shadow");
        audit.record("10.0.0.6", "FTP_CONNECTION");

        let contents = std::fs::read_to_string(dir.join("audit.json")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["src_ip"], "10.0.0.5");
        assert_eq!(first["command"], "SSH: cat /etc/shadow");
        assert_eq!(first["risk_level"], "HIGH");
        assert!(first["timestamp"].as_str().unwrap().contains('T'));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
