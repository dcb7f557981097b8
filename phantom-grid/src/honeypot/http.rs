//! HTTP deception: a handful of canned pages that look like a carelessly
//! run management server. One request per connection, like a server with
//! keep-alive disabled.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{realism_delay, SessionContext};

const READ_BUFFER: usize = 8192;

const SERVER_NGINX: &str = "nginx/1.18.0 (Ubuntu)";
const SERVER_APACHE: &str = "Apache/2.4.41 (Debian)";

pub async fn handle<S>(stream: &mut S, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; READ_BUFFER];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]).into_owned();
    let mut lines = request.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();

    ctx.command(format!("HTTP REQUEST: {request_line}"), format!("HTTP: {request_line}"));

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let raw_path = parts.next().unwrap_or("/");
    let path = raw_path.split('?').next().unwrap_or("/");

    let user_agent = request
        .split("\r\n")
        .find(|line| line.to_ascii_lowercase().starts_with("user-agent:"))
        .map(|line| line[11..].trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    if method == "POST" {
        if let Some(body_start) = request.find("\r\n\r\n") {
            let body = &request[body_start + 4..];
            if body.contains("password") || body.contains("pass") {
                ctx.log_line(format!(
                    "HTTP POST with credentials detected! User-Agent: {user_agent}"
                ));
                ctx.audit.record(&ctx.peer_ip, &format!("HTTP_POST_CREDENTIALS: {body}"));
            }
        }
    }

    // Render time scales loosely with the path, like a real app stack.
    realism_delay(50, 50 + 2 * path.len().min(100) as u64).await;

    let response = route(&method, path);
    stream.write_all(response.as_bytes()).await?;
    realism_delay(80, 120).await;
    Ok(())
}

fn route(method: &str, path: &str) -> String {
    match path {
        "/" | "/index.html" | "/index.php" => page_index(),
        "/admin" | "/admin.php" | "/admin.html" | "/administrator" | "/wp-admin" => page_admin(),
        "/login" | "/login.php" | "/signin" => page_login(),
        "/wp-login.php" | "/wordpress/wp-admin" => page_wp_login(),
        "/robots.txt" => {
            response_with(
                "200 OK",
                SERVER_NGINX,
                "text/plain",
                "User-agent: *\nDisallow: /admin/\nDisallow: /private/\nDisallow: /config/\nAllow: /public/",
            )
        }
        "/phpinfo.php" | "/info.php" => response_with(
            "200 OK",
            SERVER_APACHE,
            "text/html",
            "<html><head><title>phpinfo()</title></head><body>\n\
             <h1>PHP Version 7.4.3</h1>\n\
             <p>System: Linux server 5.4.0-74-generic</p>\n\
             <p>Server API: Apache 2.0 Handler</p>\n\
             <p>Document Root: /var/www/html</p>\n\
             </body></html>",
        ),
        "/dashboard" | "/panel" => "HTTP/1.1 302 Found\r\nLocation: /login\r\n\r\n".to_string(),
        p if p.starts_with("/.git") => response_with(
            "403 Forbidden",
            SERVER_NGINX,
            "text/html",
            "<h1>403 Forbidden</h1><p>You don't have permission to access this resource.</p>",
        ),
        p if p.starts_with("/api") => {
            let body = match p {
                "/api/v1/config" | "/api/config" => {
                    r#"{"database":{"host":"localhost","port":3306,"name":"production"},"api_key":"sk_live_51H3ll0W0rld","version":"1.2.3"}"#
                }
                _ => {
                    r#"{"status":"ok","data":[{"id":1,"username":"admin","email":"admin@server.com","role":"administrator"},{"id":2,"username":"user","email":"user@server.com","role":"user"}]}"#
                }
            };
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\n\r\n{body}"
            )
        }
        _ if method == "POST" => {
            "HTTP/1.1 302 Found\r\nLocation: /admin/dashboard\r\nSet-Cookie: auth_token=invalid; Path=/\r\n\r\n"
                .to_string()
        }
        p if p.ends_with(".php") || p.ends_with(".jsp") || p.ends_with(".asp") => response_with(
            "200 OK",
            SERVER_APACHE,
            "text/html",
            "<html><body><h1>Page Not Found</h1><p>The requested page could not be found.</p></body></html>",
        ),
        p => response_with(
            "404 Not Found",
            SERVER_NGINX,
            "text/html; charset=UTF-8",
            &format!(
                "<!DOCTYPE html>\n<html>\n<head><title>404 Not Found</title></head>\n<body>\n\
                 <h1>404 Not Found</h1>\n\
                 <p>The requested URL {p} was not found on this server.</p>\n\
                 <p><a href=\"/\">Return to homepage</a></p>\n\
                 </body>\n</html>"
            ),
        ),
    }
}

fn response_with(status: &str, server: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nServer: {server}\r\nContent-Type: {content_type}\r\n\r\n{body}"
    )
}

fn page_index() -> String {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\n\
         Server: nginx/1.18.0 (Ubuntu)\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Connection: keep-alive\r\n\
         X-Powered-By: PHP/7.4.3\r\n\
         \r\n",
    );
    response.push_str(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Welcome - Server Management</title>
</head>
<body>
    <div class="container">
        <h1>Welcome to Server Management Portal</h1>
        <p>System is running normally. All services are operational.</p>
        <div class="nav">
            <a href="/admin">Admin Panel</a>
            <a href="/login">Login</a>
            <a href="/dashboard">Dashboard</a>
            <a href="/api">API</a>
        </div>
    </div>
</body>
</html>"#,
    );
    response
}

fn page_admin() -> String {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\n\
         Server: nginx/1.18.0 (Ubuntu)\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Set-Cookie: session_id=abc123xyz; Path=/; HttpOnly\r\n\
         \r\n",
    );
    response.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Administration Panel</title>
</head>
<body>
    <div class="login-box">
        <h2>Administration Panel</h2>
        <form method="POST" action="/admin/login">
            <input type="text" name="username" placeholder="Username" required>
            <input type="password" name="password" placeholder="Password" required>
            <button type="submit">Login</button>
        </form>
        <p>Forgot password? <a href="/admin/reset">Reset here</a></p>
    </div>
</body>
</html>"#,
    );
    response
}

fn page_login() -> String {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\n\
         Server: Apache/2.4.41 (Debian)\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         \r\n",
    );
    response.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>User Login</title>
</head>
<body>
    <div class="form-container">
        <h2>User Login</h2>
        <form method="POST" action="/login/check">
            <input type="text" name="user" placeholder="Username" required>
            <input type="password" name="pass" placeholder="Password" required>
            <button type="submit">Sign In</button>
        </form>
    </div>
</body>
</html>"#,
    );
    response
}

fn page_wp_login() -> String {
    let mut response = String::from(
        "HTTP/1.1 200 OK\r\n\
         Server: nginx/1.18.0 (Ubuntu)\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         \r\n",
    );
    response.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>WordPress Login</title>
</head>
<body>
    <div class="login">
        <h1>WordPress</h1>
        <form method="POST">
            <input type="text" name="log" placeholder="Username or Email">
            <input type="password" name="pwd" placeholder="Password">
            <button type="submit">Log In</button>
        </form>
    </div>
</body>
</html>"#,
    );
    response
}
