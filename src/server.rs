//! Demo HTTP front end.
//!
//! One tokio task per connection, one request per connection. Sessions live
//! in memory keyed by a random cookie; every protected path runs the Teams
//! sign-in flow before rendering the local user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use teams_sso::auth::token::format_duration;
use teams_sso::auth::{
    AuthOutcome, AzureProvider, CallbackParams, RedirectReason, RedirectTargets, Teams,
};
use teams_sso::profile::repository::JsonFileUserRepository;
use teams_sso::profile::PROFILE_FIELDS;
use teams_sso::{AppError, LocalUser, LocalUserSync, MemorySession, ProfileRecord};

/// Session cookie name.
const SESSION_COOKIE: &str = "teams_session";
/// Maximum request head size we read.
const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Sessions unused for this long are dropped.
const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Shared state for all connections.
pub struct AppState {
    pub provider: Arc<AzureProvider>,
    pub targets: RedirectTargets,
    pub users: LocalUserSync<JsonFileUserRepository>,
    sessions: Mutex<SessionTable>,
}

impl AppState {
    pub fn new(
        provider: Arc<AzureProvider>,
        targets: RedirectTargets,
        users: LocalUserSync<JsonFileUserRepository>,
    ) -> Self {
        Self {
            provider,
            targets,
            users,
            sessions: Mutex::new(SessionTable::new(SESSION_IDLE_TTL)),
        }
    }
}

struct SessionEntry {
    session: MemorySession,
    last_seen: Instant,
}

/// Cookie change sent along with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCookie {
    Keep,
    Set(Uuid),
    Clear,
}

/// Server-side sessions, keyed by ids this server issued.
///
/// Ids are never taken from the client: an unknown cookie starts a new
/// session under a new id, and signing in moves the session to a fresh id.
struct SessionTable {
    entries: HashMap<Uuid, SessionEntry>,
    idle_ttl: Duration,
}

impl SessionTable {
    fn new(idle_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            idle_ttl,
        }
    }

    /// Copy of the live session for `id`, or an empty one when `id` is unknown.
    fn checkout(&mut self, id: Option<Uuid>, now: Instant) -> (Option<Uuid>, MemorySession) {
        self.evict_idle(now);
        match id.and_then(|id| self.entries.get(&id).map(|entry| (id, entry.session.clone()))) {
            Some((id, session)) => (Some(id), session),
            None => (None, MemorySession::new()),
        }
    }

    /// Store `session` after a request.
    ///
    /// Empty sessions are not kept. `rotate` moves the session to a new id.
    fn check_in(
        &mut self,
        id: Option<Uuid>,
        session: MemorySession,
        rotate: bool,
        now: Instant,
    ) -> SessionCookie {
        if session.is_empty() {
            return match id.and_then(|id| self.entries.remove(&id)) {
                Some(_) => SessionCookie::Clear,
                None => SessionCookie::Keep,
            };
        }

        let (id, cookie) = match id {
            Some(id) if !rotate => (id, SessionCookie::Keep),
            previous => {
                if let Some(old) = previous {
                    self.entries.remove(&old);
                }
                let id = Uuid::new_v4();
                (id, SessionCookie::Set(id))
            }
        };
        self.entries.insert(
            id,
            SessionEntry {
                session,
                last_seen: now,
            },
        );
        cookie
    }

    fn evict_idle(&mut self, now: Instant) {
        let before = self.entries.len();
        let ttl = self.idle_ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) < ttl);

        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "Dropped idle sessions");
        }
    }
}

/// Parsed request line plus the headers we care about.
#[derive(Debug, PartialEq, Eq)]
struct Request {
    method: String,
    path: String,
    query: String,
    session_id: Option<Uuid>,
}

/// Response ready to be written.
#[derive(Debug, PartialEq, Eq)]
struct Response {
    status: u16,
    location: Option<String>,
    body: String,
}

impl Response {
    fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            location: Some(location.to_string()),
            body: String::new(),
        }
    }

    fn page(status: u16, title: &str, content: &str) -> Self {
        Self {
            status,
            location: None,
            body: format!(
                "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{content}\n</body>\n</html>",
                title = escape_html(title),
                content = content
            ),
        }
    }

    fn error(err: &AppError) -> Self {
        Self::page(
            err.status_code(),
            "Sign-in problem",
            &format!(
                "<p>{}</p>\n<p><a href=\"/\">Try again</a></p>",
                escape_html(err.user_message())
            ),
        )
    }
}

/// Accept connections until the listener fails.
pub async fn serve(bind_address: &str, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    info!("Demo app listening on http://{}", bind_address);

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                continue;
            }
        };

        debug!("Connection from {}", peer_addr);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &state).await {
                debug!("Connection closed with error: {}", e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: &AppState) -> std::io::Result<()> {
    let mut buffer = vec![0u8; MAX_REQUEST_BYTES];
    let bytes_read = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buffer)).await {
        Ok(result) => result?,
        Err(_) => return Ok(()),
    };

    let raw = String::from_utf8_lossy(&buffer[..bytes_read]);
    let Some(request) = parse_request(&raw) else {
        let response = Response::page(400, "Bad Request", "");
        return write_response(&mut stream, &response, SessionCookie::Keep).await;
    };

    if request.method != "GET" {
        let response = Response::page(405, "Method Not Allowed", "");
        return write_response(&mut stream, &response, SessionCookie::Keep).await;
    }

    if let Some(response) = static_page(&request.path) {
        return write_response(&mut stream, &response, SessionCookie::Keep).await;
    }

    let (session_id, session) = state
        .sessions
        .lock()
        .await
        .checkout(request.session_id, Instant::now());

    let (response, session, signed_in) = route(&request, session, state).await;

    // Concurrent requests of one session are not coordinated: last write wins
    let cookie = state
        .sessions
        .lock()
        .await
        .check_in(session_id, session, signed_in, Instant::now());

    write_response(&mut stream, &response, cookie).await
}

/// Pages served without touching the session.
fn static_page(path: &str) -> Option<Response> {
    match path {
        "/logged-out" => Some(Response::page(
            200,
            "Signed out",
            "<p>You have been signed out.</p>\n<p><a href=\"/\">Sign in again</a></p>",
        )),
        "/favicon.ico" => Some(Response::page(404, "Not Found", "")),
        _ => None,
    }
}

/// Run the sign-in flow for one request.
///
/// Returns the response, the updated session and whether the user just
/// signed in.
async fn route(
    request: &Request,
    session: MemorySession,
    state: &AppState,
) -> (Response, MemorySession, bool) {
    let mut teams = Teams::new(Arc::clone(&state.provider), session, state.targets.clone());
    let mut signed_in = false;

    let response = if request.path == "/logout" {
        Response::redirect(teams.logout().location())
    } else {
        let params = CallbackParams::from_query(&request.query);
        match teams.authenticate(&params).await {
            Ok(AuthOutcome::Redirect(action)) => {
                signed_in = action.reason() == RedirectReason::SignedIn;
                Response::redirect(action.location())
            }
            Ok(AuthOutcome::Authenticated) => match state.users.upsert(teams.user_teams()).await {
                Ok(user) => {
                    let expires = teams
                        .token()
                        .and_then(|t| t.time_until_expiry())
                        .map(format_duration)
                        .unwrap_or_else(|| "expired".to_string());
                    let content = format!(
                        "{}\n{}\n<h2>Teams profile</h2>\n{}",
                        render_greeting(teams.user_teams()),
                        render_user(&user, &expires),
                        render_profile(teams.user_teams())
                    );
                    Response::page(200, "Connected to Teams", &content)
                }
                Err(e) => {
                    let err = AppError::from(e);
                    error!("Local user sync failed: {}", err);
                    Response::error(&err)
                }
            },
            Err(e) => {
                error!("Authentication failed: {}", e);
                Response::error(&e)
            }
        }
    };

    (response, teams.into_session(), signed_in)
}

fn parse_request(raw: &str) -> Option<Request> {
    let mut lines = raw.lines();
    let request_line = lines.next()?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let (path, query) = match parts[1].split_once('?') {
        Some((path, query)) => (path, query),
        None => (parts[1], ""),
    };

    let mut session_id = None;
    for line in lines.take_while(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("cookie") {
            session_id = session_id.or_else(|| session_from_cookie(value));
        }
    }

    Some(Request {
        method: parts[0].to_string(),
        path: path.to_string(),
        query: query.to_string(),
        session_id,
    })
}

fn session_from_cookie(header: &str) -> Option<Uuid> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

fn render_greeting(profile: &ProfileRecord) -> String {
    format!(
        "<p>Signed in as {} ({})</p>",
        escape_html(&profile.display_name_or_upn()),
        escape_html(&profile.email())
    )
}

fn render_user(user: &LocalUser, expires: &str) -> String {
    let rows = [
        ("Id", user.id.map(|id| id.to_string())),
        ("Guid", user.guid.clone()),
        ("Principal name", Some(user.user_principal_name.clone())),
        ("Display name", user.display_name.clone()),
        ("Mail", user.mail.clone()),
        ("Job title", user.job_title.clone()),
        ("Token expires in", Some(expires.to_string())),
    ];

    let mut html = String::from("<table>\n");
    for (label, value) in rows {
        html.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>\n",
            label,
            escape_html(value.as_deref().unwrap_or("-"))
        ));
    }
    html.push_str("</table>\n<p><a href=\"/logout\">Sign out</a></p>");
    html
}

fn render_profile(profile: &ProfileRecord) -> String {
    let mut html = String::from("<table>\n");
    for field in PROFILE_FIELDS {
        let value = match profile.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            Some(Value::Null) | None => continue,
            Some(other) => other.to_string(),
        };
        html.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>\n",
            field,
            escape_html(&value)
        ));
    }
    html.push_str("</table>");
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

fn format_head(response: &Response, cookie: SessionCookie) -> String {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        response.body.len()
    );
    if let Some(location) = &response.location {
        head.push_str(&format!("Location: {}\r\n", location));
    }
    match cookie {
        SessionCookie::Keep => {}
        SessionCookie::Set(id) => head.push_str(&format!(
            "Set-Cookie: {}={}; Path=/; HttpOnly; SameSite=Lax\r\n",
            SESSION_COOKIE, id
        )),
        SessionCookie::Clear => head.push_str(&format!(
            "Set-Cookie: {}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax\r\n",
            SESSION_COOKIE
        )),
    }
    head.push_str("\r\n");
    head
}

async fn write_response(
    stream: &mut TcpStream,
    response: &Response,
    cookie: SessionCookie,
) -> std::io::Result<()> {
    let head = format_head(response, cookie);
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use teams_sso::{AuthError, KeyValueStore};

    fn signed_in_session() -> MemorySession {
        let mut session = MemorySession::new();
        session.set("teams_token", "{}".into());
        session
    }

    #[test]
    fn test_parse_request() {
        let id = Uuid::new_v4();
        let raw = format!(
            "GET /?code=abc&state=xyz HTTP/1.1\r\nHost: localhost\r\nCookie: theme=dark; teams_session={}\r\n\r\n",
            id
        );

        let request = parse_request(&raw).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/");
        assert_eq!(request.query, "code=abc&state=xyz");
        assert_eq!(request.session_id, Some(id));
    }

    #[test]
    fn test_parse_request_without_cookie() {
        let request = parse_request("GET /logout HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.path, "/logout");
        assert_eq!(request.query, "");
        assert_eq!(request.session_id, None);

        assert!(parse_request("").is_none());
        assert!(parse_request("GARBAGE\r\n").is_none());
    }

    #[test]
    fn test_invalid_session_cookie_is_ignored() {
        assert_eq!(session_from_cookie("teams_session=not-a-uuid"), None);
        assert_eq!(session_from_cookie("other=1"), None);
    }

    #[test]
    fn test_redirect_head() {
        let id = Uuid::new_v4();
        let head = format_head(
            &Response::redirect("https://login.example.com/a?b=c"),
            SessionCookie::Set(id),
        );

        assert!(head.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(head.contains("Location: https://login.example.com/a?b=c\r\n"));
        assert!(head.contains(&format!("Set-Cookie: teams_session={}; Path=/; HttpOnly", id)));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_error_page_hides_details() {
        let err = AppError::Auth(AuthError::TokenExchangeFailed("HTTP 400 (invalid_grant)".into()));
        let response = Response::error(&err);

        assert_eq!(response.status, 500);
        assert!(!response.body.contains("invalid_grant"));
        assert!(response.body.contains("Sign-in failed"));
    }

    #[test]
    fn test_render_profile_skips_missing_fields() {
        let profile = ProfileRecord::from_graph(serde_json::json!({
            "id": "guid-1",
            "userPrincipalName": "john@contoso.com",
            "businessPhones": ["+47 1", "+47 2"],
            "mail": null
        }))
        .unwrap();

        let html = render_profile(&profile);
        assert!(html.contains("<th>guid</th><td>guid-1</td>"));
        assert!(html.contains("+47 1, +47 2"));
        assert!(!html.contains("<th>mail</th>"));
    }

    #[test]
    fn test_render_user_escapes() {
        let user = LocalUser {
            id: Some(1),
            user_principal_name: "john@contoso.com".into(),
            display_name: Some("<script>".into()),
            ..Default::default()
        };

        let html = render_user(&user, "45 min");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("45 min"));
    }

    #[test]
    fn test_cleared_cookie_head() {
        let head = format_head(&Response::redirect("/logged-out"), SessionCookie::Clear);
        assert!(head.contains("Set-Cookie: teams_session=; Path=/; Max-Age=0"));

        let head = format_head(&Response::page(200, "Ok", ""), SessionCookie::Keep);
        assert!(!head.contains("Set-Cookie"));
    }

    #[test]
    fn test_static_pages_skip_sessions() {
        assert_eq!(static_page("/favicon.ico").map(|r| r.status), Some(404));
        assert_eq!(static_page("/logged-out").map(|r| r.status), Some(200));
        assert!(static_page("/").is_none());
        assert!(static_page("/logout").is_none());
    }

    #[test]
    fn test_unknown_session_id_gets_fresh_id() {
        let mut table = SessionTable::new(SESSION_IDLE_TTL);
        let now = Instant::now();
        let forged = Uuid::new_v4();

        let (id, session) = table.checkout(Some(forged), now);
        assert_eq!(id, None);
        assert!(session.is_empty());

        let cookie = table.check_in(id, signed_in_session(), false, now);
        let SessionCookie::Set(issued) = cookie else {
            panic!("expected a new cookie, got {:?}", cookie);
        };
        assert_ne!(issued, forged);
        assert!(table.entries.contains_key(&issued));
        assert!(!table.entries.contains_key(&forged));
    }

    #[test]
    fn test_known_session_keeps_id() {
        let mut table = SessionTable::new(SESSION_IDLE_TTL);
        let now = Instant::now();
        let SessionCookie::Set(id) = table.check_in(None, signed_in_session(), false, now) else {
            panic!("expected a new cookie");
        };

        let (known, session) = table.checkout(Some(id), now);
        assert_eq!(known, Some(id));
        assert!(session.contains("teams_token"));
        assert_eq!(table.check_in(known, session, false, now), SessionCookie::Keep);
        assert_eq!(table.entries.len(), 1);
    }

    #[test]
    fn test_sign_in_rotates_session_id() {
        let mut table = SessionTable::new(SESSION_IDLE_TTL);
        let now = Instant::now();
        let SessionCookie::Set(before) = table.check_in(None, signed_in_session(), false, now)
        else {
            panic!("expected a new cookie");
        };

        let (known, session) = table.checkout(Some(before), now);
        let SessionCookie::Set(after) = table.check_in(known, session, true, now) else {
            panic!("expected a rotated cookie");
        };

        assert_ne!(before, after);
        assert!(!table.entries.contains_key(&before));
        assert!(table.entries.contains_key(&after));
    }

    #[test]
    fn test_empty_sessions_are_not_kept() {
        let mut table = SessionTable::new(SESSION_IDLE_TTL);
        let now = Instant::now();

        assert_eq!(
            table.check_in(None, MemorySession::new(), false, now),
            SessionCookie::Keep
        );
        assert!(table.entries.is_empty());

        let SessionCookie::Set(id) = table.check_in(None, signed_in_session(), false, now) else {
            panic!("expected a new cookie");
        };
        // Logout leaves the session empty
        assert_eq!(
            table.check_in(Some(id), MemorySession::new(), false, now),
            SessionCookie::Clear
        );
        assert!(table.entries.is_empty());
    }

    #[test]
    fn test_idle_sessions_are_evicted() {
        let mut table = SessionTable::new(Duration::from_secs(60));
        let start = Instant::now();
        let SessionCookie::Set(idle) = table.check_in(None, signed_in_session(), false, start)
        else {
            panic!("expected a new cookie");
        };

        let later = start + Duration::from_secs(30);
        let SessionCookie::Set(active) = table.check_in(None, signed_in_session(), false, later)
        else {
            panic!("expected a new cookie");
        };

        let (id, session) = table.checkout(Some(idle), start + Duration::from_secs(61));
        assert_eq!(id, None);
        assert!(session.is_empty());
        assert!(!table.entries.contains_key(&idle));
        assert!(table.entries.contains_key(&active));
    }

    #[test]
    fn test_greeting_uses_profile() {
        let profile = ProfileRecord::from_graph(serde_json::json!({
            "id": "guid-1",
            "userPrincipalName": "john@contoso.com",
            "displayName": "John & Co",
            "mail": null
        }))
        .unwrap();

        let html = render_greeting(&profile);
        assert!(html.contains("John &amp; Co"));
        assert!(html.contains("(john@contoso.com)"));
    }
}
