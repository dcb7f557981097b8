//! Telnet deception: a login prompt that harvests credential pairs and
//! locks out after three attempts. The distro banner is written by the
//! listener before the session starts.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{realism_delay, LineReader, SessionContext};

const MAX_ATTEMPTS: u32 = 3;

pub async fn handle<S>(stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, mut stream) = tokio::io::split(stream);
    let mut reader = LineReader::new(read_half);

    realism_delay(150, 250).await;

    let mut attempts = 0u32;
    while attempts < MAX_ATTEMPTS {
        stream.write_all(b"server login: ").await?;
        let Some(username) = reader.next_line().await? else {
            return Ok(());
        };

        stream.write_all(b"\r\nPassword: ").await?;
        let Some(password) = reader.next_line().await? else {
            return Ok(());
        };

        attempts += 1;
        ctx.command(
            format!(
                "TELNET LOGIN ATTEMPT #{attempts}: username='{username}' (password length: {})",
                password.len()
            ),
            format!("TELNET_LOGIN: user={username}, pass=***"),
        );

        realism_delay(400, 600).await;
        if attempts < MAX_ATTEMPTS {
            stream.write_all(b"\r\nLogin incorrect\r\n\r\n").await?;
        }
    }

    stream.write_all(b"\r\nToo many login attempts. Connection closed.\r\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::honeypot::tests_support::{drive, test_ctx};

    #[tokio::test]
    async fn three_attempts_then_lockout() {
        let input = b"root\ntoor\nadmin\nadmin123\nuser\npassword\n";
        let (output, result) = drive!(handle, input).await;
        assert!(result.is_ok());
        assert_eq!(output.matches("Login incorrect").count(), 2);
        assert!(output.contains("Too many login attempts. Connection closed."));
    }

    #[tokio::test]
    async fn early_disconnect_ends_quietly() {
        let (output, result) = drive!(handle, b"root\n").await;
        assert!(result.is_ok());
        assert!(output.contains("server login: "));
        assert!(output.contains("Password: "));
        assert!(!output.contains("Too many"));
    }

    #[tokio::test]
    async fn each_pair_is_one_attempt() {
        let ctx = test_ctx();
        let stats = std::sync::Arc::clone(&ctx.stats);
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { handle(&mut server, &ctx).await });

        use tokio::io::AsyncWriteExt;
        client.write_all(b"admin\nletmein\n").await.unwrap();
        client.shutdown().await.unwrap();
        let _ = task.await.unwrap();

        assert_eq!(stats.snapshot().total_commands, 1);
    }
}
