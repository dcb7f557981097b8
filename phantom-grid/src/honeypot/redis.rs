//! Redis deception: RESP array and inline command parsing with responses
//! mimicking a standalone Redis 6.2.6. AUTH never succeeds, EVAL is always
//! refused, and the destructive commands pretend to work.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{realism_delay, LineReader, SessionContext};

/// Upper bound on RESP array fan-out; real clients never come close.
const MAX_ARRAY_LEN: usize = 64;

pub async fn handle<S>(stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    ctx.command(format!("Redis connection from {}", ctx.peer_ip), "REDIS_CONNECTION");

    let (read_half, mut stream) = tokio::io::split(stream);
    let mut reader = LineReader::new(read_half);

    loop {
        let Some(parts) = read_command(&mut reader).await? else {
            return Ok(());
        };
        if parts.is_empty() {
            stream.write_all(b"-ERR unknown command\r\n").await?;
            continue;
        }

        let cmd = parts[0].to_uppercase();
        let args = &parts[1..];

        ctx.command(
            format!("REDIS COMMAND: {}", parts.join(" ")),
            format!("REDIS: {}", parts.join(" ")),
        );

        realism_delay(30, 70).await;

        let reply: String = match cmd.as_str() {
            "PING" => "+PONG\r\n".into(),
            "INFO" => info_reply(),
            "GET" => match args.first() {
                Some(_) => "$-1\r\n".into(),
                None => "-ERR wrong number of arguments for 'get' command\r\n".into(),
            },
            "SET" => {
                if args.len() >= 2 {
                    "+OK\r\n".into()
                } else {
                    "-ERR wrong number of arguments for 'set' command\r\n".into()
                }
            }
            "KEYS" => "*0\r\n".into(),
            "AUTH" => {
                if args.is_empty() {
                    "-ERR wrong number of arguments for 'auth' command\r\n".into()
                } else {
                    ctx.audit.record(&ctx.peer_ip, "REDIS_AUTH: password=***");
                    "-ERR invalid password\r\n".into()
                }
            }
            "CONFIG" => {
                if args.first().map(|a| a.to_uppercase()) == Some("GET".into()) {
                    "*2\r\n$11\r\nrequirepass\r\n$0\r\n\r\n".into()
                } else {
                    "-ERR unknown subcommand or wrong number of arguments\r\n".into()
                }
            }
            "HGET" => {
                if args.len() >= 2 {
                    "$-1\r\n".into()
                } else {
                    "-ERR wrong number of arguments for 'hget' command\r\n".into()
                }
            }
            "HSET" => {
                if args.len() >= 3 {
                    ":1\r\n".into()
                } else {
                    "-ERR wrong number of arguments for 'hset' command\r\n".into()
                }
            }
            "HGETALL" => {
                if args.is_empty() {
                    "-ERR wrong number of arguments for 'hgetall' command\r\n".into()
                } else {
                    "*0\r\n".into()
                }
            }
            "LPUSH" | "RPUSH" => {
                if args.len() >= 2 {
                    ":1\r\n".into()
                } else {
                    format!(
                        "-ERR wrong number of arguments for '{}' command\r\n",
                        cmd.to_lowercase()
                    )
                }
            }
            "LRANGE" => {
                if args.len() >= 3 {
                    "*0\r\n".into()
                } else {
                    "-ERR wrong number of arguments for 'lrange' command\r\n".into()
                }
            }
            "FLUSHALL" | "FLUSHDB" => {
                ctx.log_line(format!("REDIS {cmd}: DANGEROUS COMMAND!"));
                ctx.audit.record(&ctx.peer_ip, &format!("REDIS_{cmd}: DANGEROUS"));
                "+OK\r\n".into()
            }
            "EVAL" | "EVALSHA" => {
                if args.is_empty() {
                    "-ERR wrong number of arguments\r\n".into()
                } else {
                    ctx.audit.record(
                        &ctx.peer_ip,
                        &format!("REDIS_{cmd}: script_length={}", args[0].len()),
                    );
                    "-ERR script execution not allowed\r\n".into()
                }
            }
            "SAVE" | "BGSAVE" => "+OK\r\n".into(),
            "DBSIZE" => ":0\r\n".into(),
            "SELECT" => {
                if args.is_empty() {
                    "-ERR wrong number of arguments for 'select' command\r\n".into()
                } else {
                    "+OK\r\n".into()
                }
            }
            "QUIT" | "EXIT" => {
                stream.write_all(b"+OK\r\n").await?;
                return Ok(());
            }
            other => format!("-ERR unknown command '{}'\r\n", other.to_lowercase()),
        };

        stream.write_all(reply.as_bytes()).await?;
    }
}

/// One client command: a RESP array, a lone bulk string, or an inline
/// space-separated line.
async fn read_command<R>(reader: &mut LineReader<R>) -> std::io::Result<Option<Vec<String>>>
where
    R: AsyncRead + Unpin,
{
    let Some(first) = reader.next_line().await? else {
        return Ok(None);
    };
    if first.is_empty() {
        return Ok(Some(Vec::new()));
    }

    if let Some(count) = first.strip_prefix('*').and_then(|s| s.parse::<usize>().ok()) {
        let mut parts = Vec::new();
        for _ in 0..count.min(MAX_ARRAY_LEN) {
            let Some(header) = reader.next_line().await? else {
                return Ok(None);
            };
            if header.starts_with('$') {
                let Some(content) = reader.next_line().await? else {
                    return Ok(None);
                };
                parts.push(content);
            } else {
                parts.push(header);
            }
        }
        return Ok(Some(parts));
    }

    if first.starts_with('$') {
        let Some(content) = reader.next_line().await? else {
            return Ok(None);
        };
        return Ok(Some(vec![content]));
    }

    Ok(Some(first.split_whitespace().map(String::from).collect()))
}

fn info_reply() -> String {
    let info = "# Server\r\n\
                redis_version:6.2.6\r\n\
                redis_mode:standalone\r\n\
                os:Linux 5.4.0 x86_64\r\n\
                arch_bits:64\r\n\
                multiplexing_api:epoll\r\n\
                process_id:1234\r\n\
                run_id:abc123def456\r\n\
                tcp_port:6379\r\n\
                uptime_in_seconds:86400\r\n\
                uptime_in_days:1\r\n\
                connected_clients:1\r\n\
                used_memory:1048576\r\n\
                used_memory_human:1.00M\r\n";
    format!("${}\r\n{}\r\n", info.len(), info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::honeypot::tests_support::drive;

    #[tokio::test]
    async fn ping_pongs() {
        let (output, result) = drive!(handle, b"PING\r\nQUIT\r\n").await;
        assert!(result.is_ok());
        assert!(output.contains("+PONG\r\n"));
    }

    #[tokio::test]
    async fn resp_arrays_are_parsed() {
        let (output, _) = drive!(handle, b"*2\r\n$3\r\nGET\r\n$6\r\nsecret\r\n*1\r\n$4\r\nQUIT\r\n").await;
        assert!(output.contains("$-1\r\n"));
    }

    #[tokio::test]
    async fn auth_always_fails() {
        let (output, _) = drive!(handle, b"AUTH hunter2\r\nQUIT\r\n").await;
        assert!(output.contains("-ERR invalid password"));
    }

    #[tokio::test]
    async fn flushall_pretends_to_work() {
        let (output, _) = drive!(handle, b"FLUSHALL\r\nQUIT\r\n").await;
        assert!(output.contains("+OK\r\n"));
    }

    #[tokio::test]
    async fn eval_is_refused() {
        let (output, _) = drive!(handle, b"EVAL return(1) 0\r\nQUIT\r\n").await;
        assert!(output.contains("-ERR script execution not allowed"));
    }

    #[tokio::test]
    async fn info_mimics_redis_626() {
        let (output, _) = drive!(handle, b"INFO\r\nQUIT\r\n").await;
        assert!(output.contains("redis_version:6.2.6"));
        assert!(output.contains("redis_mode:standalone"));
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let (output, _) = drive!(handle, b"SUBSCRIBE chan\r\nQUIT\r\n").await;
        assert!(output.contains("-ERR unknown command 'subscribe'"));
    }

    #[tokio::test]
    async fn config_get_exposes_empty_requirepass() {
        let (output, _) = drive!(handle, b"CONFIG GET requirepass\r\nQUIT\r\n").await;
        assert!(output.contains("requirepass"));
    }
}
