//! FTP deception: the control-channel pleasantries of a server whose logins
//! never succeed. The 220 greeting is written by the listener before the
//! session starts.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{realism_delay, LineReader, SessionContext};

pub async fn handle<S>(stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    ctx.command(format!("FTP connection from {}", ctx.peer_ip), "FTP_CONNECTION");

    let (read_half, mut stream) = tokio::io::split(stream);
    let mut reader = LineReader::new(read_half);

    // No password is ever accepted, so this never flips.
    let authenticated = false;

    loop {
        let Some(line) = reader.next_line().await? else {
            return Ok(());
        };
        if line.is_empty() {
            stream.write_all(b"500 Syntax error\r\n").await?;
            continue;
        }

        ctx.command(format!("FTP COMMAND: {line}"), format!("FTP: {line}"));

        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or_default().to_uppercase();
        let args: Vec<&str> = parts.collect();

        match cmd.as_str() {
            "USER" => {
                if args.is_empty() {
                    stream.write_all(b"501 Syntax error in parameters\r\n").await?;
                } else {
                    stream.write_all(b"331 Password required\r\n").await?;
                }
            }
            "PASS" => {
                if args.is_empty() {
                    stream.write_all(b"501 Syntax error in parameters\r\n").await?;
                } else {
                    ctx.audit.record(&ctx.peer_ip, "FTP_LOGIN: pass=***");
                    realism_delay(180, 250).await;
                    stream.write_all(b"530 Login incorrect\r\n").await?;
                }
            }
            "SYST" => stream.write_all(b"215 UNIX Type: L8\r\n").await?,
            "PWD" => stream.write_all(b"257 \"/\" is current directory\r\n").await?,
            "LIST" | "LS" => {
                if authenticated {
                    stream.write_all(b"150 Opening ASCII mode data connection\r\n").await?;
                    realism_delay(80, 120).await;
                    stream.write_all(b"226 Transfer complete\r\n").await?;
                } else {
                    stream.write_all(b"530 Please login with USER and PASS\r\n").await?;
                }
            }
            "CWD" => {
                if let Some(dir) = args.first() {
                    let reply = format!("250 CWD command successful: {dir}\r\n");
                    stream.write_all(reply.as_bytes()).await?;
                } else {
                    stream.write_all(b"501 Syntax error in parameters\r\n").await?;
                }
            }
            "RETR" | "GET" => {
                if args.is_empty() {
                    stream.write_all(b"501 Syntax error in parameters\r\n").await?;
                } else {
                    stream.write_all(b"550 File not found\r\n").await?;
                }
            }
            "STOR" | "PUT" => {
                if args.is_empty() {
                    stream.write_all(b"501 Syntax error in parameters\r\n").await?;
                } else {
                    stream.write_all(b"553 Requested action not taken\r\n").await?;
                }
            }
            "QUIT" | "BYE" => {
                stream.write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            "HELP" => {
                stream.write_all(b"214-The following commands are recognized:\r\n").await?;
                stream.write_all(b" USER PASS SYST PWD LIST CWD RETR STOR QUIT\r\n").await?;
                stream.write_all(b"214 Help OK\r\n").await?;
            }
            _ => stream.write_all(b"502 Command not implemented\r\n").await?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::honeypot::tests_support::drive;

    #[tokio::test]
    async fn login_is_always_incorrect() {
        let (output, result) = drive!(handle, b"USER admin\r\nPASS hunter2\r\nQUIT\r\n").await;
        assert!(result.is_ok());
        assert!(output.contains("331 Password required"));
        assert!(output.contains("530 Login incorrect"));
        assert!(output.contains("221 Goodbye"));
    }

    #[tokio::test]
    async fn list_requires_a_login_that_never_happens() {
        let (output, _) = drive!(handle, b"LIST\r\nQUIT\r\n").await;
        assert!(output.contains("530 Please login with USER and PASS"));
    }

    #[tokio::test]
    async fn retr_and_stor_are_refused() {
        let (output, _) = drive!(handle, b"RETR secrets.txt\r\nSTOR payload.bin\r\nQUIT\r\n").await;
        assert!(output.contains("550 File not found"));
        assert!(output.contains("553 Requested action not taken"));
    }

    #[tokio::test]
    async fn syst_and_pwd_answer() {
        let (output, _) = drive!(handle, b"SYST\r\nPWD\r\nQUIT\r\n").await;
        assert!(output.contains("215 UNIX Type: L8"));
        assert!(output.contains("257 \"/\" is current directory"));
    }

    #[tokio::test]
    async fn missing_arguments_are_501() {
        let (output, _) = drive!(handle, b"USER\r\nRETR\r\nQUIT\r\n").await;
        assert!(output.matches("501 Syntax error in parameters").count() >= 2);
    }

    #[tokio::test]
    async fn unknown_command_is_502() {
        let (output, _) = drive!(handle, b"FEAT\r\nQUIT\r\n").await;
        assert!(output.contains("502 Command not implemented"));
    }
}
