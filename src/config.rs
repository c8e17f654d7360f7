//! Connection configuration.

use std::time::Duration;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::Error;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never send SSLRequest
    Disable,
    /// Try TLS, continue unencrypted if the server declines.
    /// Skipped entirely when no TLS feature is compiled in.
    #[default]
    Prefer,
    /// Require TLS; the server certificate is not verified
    Require,
    /// Require TLS and verify the certificate chain and host name
    VerifyFull,
}

impl SslMode {
    /// Parse a libpq `sslmode` value.
    ///
    /// `allow` is treated as `prefer`; `verify-ca` as `verify-full`.
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "disable" => Ok(SslMode::Disable),
            "allow" | "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(Error::InvalidUsage(format!(
                "Invalid sslmode: expected one of ['disable', 'prefer', 'require', 'verify-full'], got {}",
                value
            ))),
        }
    }

    /// Returns true if the handshake must fail when TLS is unavailable.
    pub fn is_required(self) -> bool {
        matches!(self, SslMode::Require | SslMode::VerifyFull)
    }
}

/// Connection configuration.
///
/// Build it as a struct literal with `..Config::default()`, with the
/// builder methods, or from a `postgres://` URL.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname, IP address, or a Unix socket directory (starts with `/`).
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number; also names the Unix socket file `.s.PGSQL.{port}`.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Username. Falls back to `PGUSER`, then `USER`, then `"postgres"`.
    ///
    /// Default: `None`
    pub user: Option<String>,

    /// Password for cleartext, MD5 or SCRAM authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Database name. The server defaults it to the user name.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Connection URL. When set, user, password, host, port, database and
    /// sslmode come only from the URL; the discrete fields are ignored.
    ///
    /// Default: `None`
    pub connection_string: Option<String>,

    /// TLS negotiation mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Server-side `statement_timeout`, sent as a startup parameter.
    ///
    /// Default: `None`
    pub statement_timeout: Option<Duration>,

    /// Client-side bound on each query round trip. Expiry breaks the
    /// connection.
    ///
    /// Default: `None`
    pub query_timeout: Option<Duration>,

    /// Server-side `lock_timeout`, sent as a startup parameter.
    ///
    /// Default: `None`
    pub lock_timeout: Option<Duration>,

    /// Bound on TCP connect plus the startup handshake.
    ///
    /// Default: `None`
    pub connection_timeout: Option<Duration>,

    /// Enables TCP keep-alive with this initial delay.
    ///
    /// Default: `None`
    pub keep_alive_initial_delay: Option<Duration>,

    /// Server-side `idle_in_transaction_session_timeout`.
    ///
    /// Default: `None`
    pub idle_in_transaction_session_timeout: Option<Duration>,

    /// `application_name` reported to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// `fallback_application_name` reported to the server.
    ///
    /// Default: `None`
    pub fallback_application_name: Option<String>,

    /// Client encoding. Values are decoded as UTF-8 regardless.
    ///
    /// Default: `"UTF8"`
    pub client_encoding: String,

    /// Command-line options for the backend (`options` startup parameter).
    ///
    /// Default: `None`
    pub options: Option<String>,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            database: None,
            connection_string: None,
            ssl_mode: SslMode::Prefer,
            statement_timeout: None,
            query_timeout: None,
            lock_timeout: None,
            connection_timeout: None,
            keep_alive_initial_delay: None,
            idle_in_transaction_session_timeout: None,
            application_name: None,
            fallback_application_name: None,
            client_encoding: "UTF8".to_string(),
            options: None,
            params: Vec::new(),
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Server host name, IP address or Unix socket directory.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// User name to log in as.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Password for cleartext, MD5 or SCRAM authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Database to connect to.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Connection URL that replaces the endpoint fields when set.
    pub fn connection_string(mut self, url: impl Into<String>) -> Self {
        self.connection_string = Some(url.into());
        self
    }

    /// TLS negotiation mode.
    pub fn ssl_mode(mut self, ssl_mode: SslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    /// Server-side `statement_timeout` sent at startup.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Client-side limit on waiting for a query response. Zero disables it.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Server-side `lock_timeout` sent at startup.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Limit on connecting and completing the handshake. Zero disables it.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Enable TCP keep-alive after the connection has been idle this long.
    pub fn keep_alive_initial_delay(mut self, delay: Duration) -> Self {
        self.keep_alive_initial_delay = Some(delay);
        self
    }

    /// Server-side `idle_in_transaction_session_timeout` sent at startup.
    pub fn idle_in_transaction_session_timeout(mut self, timeout: Duration) -> Self {
        self.idle_in_transaction_session_timeout = Some(timeout);
        self
    }

    /// `application_name` reported to the server.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// `fallback_application_name` reported to the server.
    pub fn fallback_application_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_application_name = Some(name.into());
        self
    }

    /// `client_encoding` sent at startup.
    pub fn client_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.client_encoding = encoding.into();
        self
    }

    /// Command-line options passed to the backend.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Add an extra startup parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Apply `connection_string`, if set, and return the effective config.
    ///
    /// Endpoint fields are reset before the URL is applied so that nothing
    /// from the discrete fields leaks into the connection.
    ///
    /// Zero client-side durations mean "no timeout" and are dropped here.
    pub fn resolve(&self) -> Result<Config, Error> {
        let mut config = self.resolve_endpoint()?;
        for duration in [
            &mut config.connection_timeout,
            &mut config.query_timeout,
            &mut config.keep_alive_initial_delay,
        ] {
            *duration = duration.filter(|d| !d.is_zero());
        }
        Ok(config)
    }

    fn resolve_endpoint(&self) -> Result<Config, Error> {
        let Some(connection_string) = &self.connection_string else {
            return Ok(self.clone());
        };

        let url = Url::parse(connection_string)
            .map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        let mut config = Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            database: None,
            connection_string: None,
            ssl_mode: SslMode::default(),
            ..self.clone()
        };
        config.apply_url(&url)?;
        Ok(config)
    }

    /// The user name sent in the StartupMessage.
    pub fn effective_user(&self) -> String {
        if let Some(user) = self.user.as_ref().filter(|u| !u.is_empty()) {
            return user.clone();
        }
        ["PGUSER", "USER"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "postgres".to_string())
    }

    /// Unix socket path when `host` names a socket directory.
    pub fn socket_path(&self) -> Option<String> {
        self.host
            .starts_with('/')
            .then(|| format!("{}/.s.PGSQL.{}", self.host.trim_end_matches('/'), self.port))
    }

    /// Parameters for the StartupMessage, in the order they are sent.
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("user".to_string(), self.effective_user())];

        let optional = [
            ("database", self.database.clone()),
            ("client_encoding", Some(self.client_encoding.clone())),
            ("application_name", self.application_name.clone()),
            (
                "fallback_application_name",
                self.fallback_application_name.clone(),
            ),
            ("options", self.options.clone()),
            ("statement_timeout", self.statement_timeout.map(millis)),
            ("lock_timeout", self.lock_timeout.map(millis)),
            (
                "idle_in_transaction_session_timeout",
                self.idle_in_transaction_session_timeout.map(millis),
            ),
        ];
        params.extend(
            optional
                .into_iter()
                .filter_map(|(name, value)| Some((name.to_string(), value?))),
        );

        params.extend(self.params.iter().cloned());
        params
    }

    fn apply_url(&mut self, url: &Url) -> Result<(), Error> {
        if !["postgres", "postgresql"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'postgresql://', got '{}://'",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
            self.host = decode(host)?;
        }
        if let Some(port) = url.port() {
            self.port = port;
        }
        if !url.username().is_empty() {
            self.user = Some(decode(url.username())?);
        }
        if let Some(password) = url.password() {
            self.password = Some(decode(password)?);
        }
        if let Some(database) = url.path().strip_prefix('/').filter(|d| !d.is_empty()) {
            self.database = Some(decode(database)?);
        }

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => self.ssl_mode = SslMode::parse(&value)?,
                "host" => self.host = value.to_string(),
                "port" => self.port = parse_number(&key, &value)?,
                "user" => self.user = Some(value.to_string()),
                "password" => self.password = Some(value.to_string()),
                "dbname" => self.database = Some(value.to_string()),
                "application_name" => self.application_name = Some(value.to_string()),
                "fallback_application_name" => {
                    self.fallback_application_name = Some(value.to_string())
                }
                "client_encoding" => self.client_encoding = value.to_string(),
                "options" => self.options = Some(value.to_string()),
                "connect_timeout" => {
                    self.connection_timeout = Some(Duration::from_secs(parse_number(&key, &value)?))
                }
                "statement_timeout" => self.statement_timeout = Some(parse_millis(&key, &value)?),
                "lock_timeout" => self.lock_timeout = Some(parse_millis(&key, &value)?),
                "idle_in_transaction_session_timeout" => {
                    self.idle_in_transaction_session_timeout = Some(parse_millis(&key, &value)?)
                }
                "query_timeout" => self.query_timeout = Some(parse_millis(&key, &value)?),
                "keepalives_idle" => {
                    self.keep_alive_initial_delay =
                        Some(Duration::from_secs(parse_number(&key, &value)?))
                }
                _ => self.params.push((key.to_string(), value.to_string())),
            }
        }

        Ok(())
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

fn decode(component: &str) -> Result<String, Error> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::InvalidUsage(format!("Invalid URL component {:?}: {}", component, e)))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, Error> {
    parse_number(key, value).map(Duration::from_millis)
}

impl TryFrom<&Url> for Config {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Recognized query parameters: `sslmode`, `host`, `port`, `user`,
    /// `password`, `dbname`, `application_name`, `fallback_application_name`,
    /// `client_encoding`, `options`, `connect_timeout` (seconds),
    /// `statement_timeout`, `lock_timeout`,
    /// `idle_in_transaction_session_timeout`, `query_timeout` (milliseconds),
    /// `keepalives_idle` (seconds). Anything else becomes a startup parameter.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        let mut config = Config::default();
        config.apply_url(url)?;
        Ok(config)
    }
}

impl TryFrom<&str> for Config {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

impl TryFrom<String> for Config {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_from(s.as_str())
    }
}
