//! MySQL wire deception: a protocol-10 greeting, an access-denied login
//! exchange, then canned result sets for the queries attackers try first.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{realism_delay, SessionContext};

const READ_BUFFER: usize = 4096;

const COM_QUIT: u8 = 0x01;
const COM_QUERY: u8 = 0x03;

/// OK frame: affected rows 0.
const OK_PACKET: [u8; 11] = [0x07, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
/// OK frame: one row affected.
const OK_ONE_ROW: [u8; 11] = [0x07, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];

pub async fn handle<S>(stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    ctx.command(
        format!("MySQL connection attempt from {}", ctx.peer_ip),
        "MySQL_CONNECTION",
    );

    stream.write_all(&handshake_packet()).await?;

    let mut buf = vec![0u8; READ_BUFFER];
    let mut authenticated = false;

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if n <= 4 {
            continue;
        }

        if !authenticated {
            // Simplified login frame: length-prefixed username right after
            // the packet header.
            let username_len = buf[4] as usize;
            let username = if username_len > 0 && username_len < 32 && n > 5 + username_len {
                String::from_utf8_lossy(&buf[5..5 + username_len]).into_owned()
            } else {
                String::from("unknown")
            };
            ctx.command(
                format!("MySQL LOGIN: username='{username}'"),
                format!("MySQL_LOGIN: user={username}"),
            );

            stream
                .write_all(&error_packet(&format!(
                    "Access denied for user '{username}'@'{}' (using password: YES)",
                    ctx.peer_ip
                )))
                .await?;
            realism_delay(150, 250).await;

            // Keep the session alive so query traffic can be observed.
            authenticated = true;
            stream.write_all(&OK_PACKET).await?;
            continue;
        }

        let command = buf[4];
        let body = String::from_utf8_lossy(&buf[5..n]).into_owned();

        match command {
            COM_QUERY => {
                ctx.command(format!("MySQL COMMAND: {body}"), format!("MySQL: {body}"));
                let response = query_response(&body, ctx);
                stream.write_all(&response).await?;
            }
            COM_QUIT => {
                stream.write_all(&OK_PACKET).await?;
                return Ok(());
            }
            _ => {
                stream.write_all(&error_packet("Unknown command")).await?;
            }
        }

        realism_delay(60, 120).await;
    }
}

fn handshake_packet() -> Vec<u8> {
    let mut packet = vec![
        0x4a, 0x00, 0x00, 0x00, // packet length
        0x0a, // protocol version 10
    ];
    packet.extend_from_slice(b"8.0.27");
    packet.push(0x00);
    // Thread id and auth-plugin salt.
    packet.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x40, 0x41, 0x51, 0x27, 0x4a, 0x4b, 0x5c, 0x5d]);
    packet.extend_from_slice(b"mysql_native_password");
    packet.push(0x00);
    packet
}

fn error_packet(message: &str) -> Vec<u8> {
    // 0xff marker, error 1045, SQL state #28000.
    let mut packet = vec![0xff, 0x15, 0x04, 0x23, 0x28, 0x30, 0x30, 0x30, 0x30, 0x34];
    packet.extend_from_slice(message.as_bytes());
    packet.push(0x00);
    packet
}

fn syntax_error_packet() -> Vec<u8> {
    error_packet("You have an error in your SQL syntax")
}

fn result_set(column: &str, rows: &[&str]) -> Vec<u8> {
    let mut response = vec![0x01, 0x00, 0x00, 0x01, 0x01]; // one column
    response.extend_from_slice(column.as_bytes());
    response.push(0x00);
    for row in rows {
        response.push(row.len() as u8);
        response.extend_from_slice(row.as_bytes());
    }
    response
}

fn query_response(raw: &str, ctx: &SessionContext) -> Vec<u8> {
    let query = raw.trim().to_uppercase();

    if query.starts_with("SHOW DATABASES") {
        return result_set(
            "Database",
            &["information_schema", "mysql", "performance_schema", "sys", "wordpress", "production", "test"],
        );
    }

    if query.starts_with("SHOW TABLES") {
        return result_set("Tables_in_database", &["users", "posts", "comments", "settings", "logs"]);
    }

    if query.starts_with("SHOW CREATE TABLE") {
        let table = raw.trim()["SHOW CREATE TABLE".len()..].trim().to_string();
        let create = format!(
            "CREATE TABLE `{table}` (`id` int(11) NOT NULL AUTO_INCREMENT, PRIMARY KEY (`id`))"
        );
        let mut response = vec![0x01, 0x00, 0x00, 0x01, 0x02];
        response.extend_from_slice(b"Table\x00Create Table\x00");
        response.push(create.len() as u8);
        response.extend_from_slice(create.as_bytes());
        return response;
    }

    if query.starts_with("USE ") {
        return OK_PACKET.to_vec();
    }

    if query.starts_with("SELECT") {
        if query.contains("VERSION()") {
            return result_set("VERSION()", &["8.0.27"]);
        }
        if query.contains("FROM USERS") || query.contains("FROM USER") {
            let mut response = vec![0x01, 0x00, 0x00, 0x01, 0x03];
            response.extend_from_slice(b"id\x00username\x00password\x00");
            response.extend_from_slice(&[0x01, 0x00, 0x00, 0x02]);
            response.extend_from_slice(b"1admin***");
            return response;
        }
        return vec![0x01, 0x00, 0x00, 0x01, 0x00]; // empty result
    }

    if query.starts_with("INSERT") || query.starts_with("UPDATE") || query.starts_with("DELETE") {
        ctx.audit.record(&ctx.peer_ip, &format!("MySQL_MODIFY: {}", raw.trim()));
        return OK_ONE_ROW.to_vec();
    }

    syntax_error_packet()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::honeypot::tests_support::test_ctx;
    use tokio::io::DuplexStream;

    fn login_packet(username: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x00, 0x00, 0x00, 0x01];
        packet.push(username.len() as u8);
        packet.extend_from_slice(username);
        packet.push(0x00); // no password
        packet.push(0x00);
        packet
    }

    fn com_query(query: &[u8]) -> Vec<u8> {
        let mut packet = vec![query.len() as u8 + 1, 0x00, 0x00, 0x00, COM_QUERY];
        packet.extend_from_slice(query);
        packet
    }

    async fn read_until_contains(stream: &mut DuplexStream, needle: &[u8], acc: &mut Vec<u8>) {
        while !acc.windows(needle.len().max(1)).any(|w| w == needle) {
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before expected bytes arrived");
            acc.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn login_then_query_flow() {
        let ctx = test_ctx();
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { handle(&mut server, &ctx).await });

        let mut acc = Vec::new();
        read_until_contains(&mut client, b"mysql_native_password", &mut acc).await;
        assert_eq!(acc[4], 0x0a); // protocol 10
        assert!(acc.windows(6).any(|w| w == b"8.0.27"));

        client.write_all(&login_packet(b"root")).await.unwrap();
        read_until_contains(&mut client, b"Access denied for user 'root'", &mut acc).await;
        read_until_contains(&mut client, &OK_PACKET, &mut acc).await;

        client.write_all(&com_query(b"SHOW DATABASES")).await.unwrap();
        read_until_contains(&mut client, b"wordpress", &mut acc).await;

        client.write_all(&com_query(b"SELECT VERSION()")).await.unwrap();
        read_until_contains(&mut client, b"VERSION()", &mut acc).await;

        client.shutdown().await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn quit_ends_the_session() {
        let ctx = test_ctx();
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { handle(&mut server, &ctx).await });

        let mut acc = Vec::new();
        read_until_contains(&mut client, b"mysql_native_password", &mut acc).await;
        client.write_all(&login_packet(b"admin")).await.unwrap();
        read_until_contains(&mut client, &OK_PACKET, &mut acc).await;

        client.write_all(&[0x01, 0x00, 0x00, 0x00, COM_QUIT]).await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unknown_query_is_a_syntax_error() {
        let ctx = test_ctx();
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { handle(&mut server, &ctx).await });

        let mut acc = Vec::new();
        read_until_contains(&mut client, b"mysql_native_password", &mut acc).await;
        client.write_all(&login_packet(b"root")).await.unwrap();
        read_until_contains(&mut client, &OK_PACKET, &mut acc).await;

        client.write_all(&com_query(b"GRANT ALL ON *.*")).await.unwrap();
        read_until_contains(&mut client, b"error in your SQL syntax", &mut acc).await;

        client.shutdown().await.unwrap();
        let _ = task.await.unwrap();
    }
}
