use std::time::Duration;

/// Redirect hops followed before failing with `ERR_TOO_MANY_REDIRECTS`.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Responses whose declared length is at or below this are delivered through
/// the combined notification. Zero disables the combined path.
pub const DEFAULT_COMBINE_THRESHOLD: u64 = 32 * 1024;

/// Write buffer for download-to-file mode (256 KB).
pub const DEFAULT_WRITE_BUFFER: usize = 256 * 1024;

/// Upload bodies are streamed in slices of this size, one progress tick each.
pub const DEFAULT_UPLOAD_SLICE: usize = 64 * 1024;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Knobs for `HttpLoader` and `ResourceFetcher`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub max_redirects: usize,
    pub combine_threshold: u64,
    pub write_buffer: usize,
    pub upload_slice: usize,
    pub channel_capacity: usize,
    pub connect_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            combine_threshold: DEFAULT_COMBINE_THRESHOLD,
            write_buffer: DEFAULT_WRITE_BUFFER,
            upload_slice: DEFAULT_UPLOAD_SLICE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: None,
        }
    }
}

impl LoaderConfig {
    /// Defaults overridden by `REQPEER_*` environment variables:
    /// `REQPEER_MAX_REDIRECTS`, `REQPEER_COMBINE_THRESHOLD`,
    /// `REQPEER_WRITE_BUFFER`, `REQPEER_UPLOAD_SLICE`,
    /// `REQPEER_CHANNEL_CAPACITY`, `REQPEER_CONNECT_TIMEOUT_SECS` and
    /// `REQPEER_USER_AGENT`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "REQPEER_MAX_REDIRECTS") {
            config.max_redirects = v;
        }
        if let Some(v) = parse_var(&lookup, "REQPEER_COMBINE_THRESHOLD") {
            config.combine_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "REQPEER_WRITE_BUFFER") {
            config.write_buffer = v;
        }
        if let Some(v) = parse_var(&lookup, "REQPEER_UPLOAD_SLICE") {
            config.upload_slice = v;
        }
        if let Some(v) = parse_var(&lookup, "REQPEER_CHANNEL_CAPACITY") {
            config.channel_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "REQPEER_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(v);
        }
        if let Some(ua) = lookup("REQPEER_USER_AGENT").filter(|s| !s.is_empty()) {
            config.user_agent = Some(ua);
        }

        config
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_combine_threshold(mut self, threshold: u64) -> Self {
        self.combine_threshold = threshold;
        self
    }

    pub fn with_write_buffer(mut self, bytes: usize) -> Self {
        self.write_buffer = bytes.max(1);
        self
    }

    pub fn with_upload_slice(mut self, bytes: usize) -> Self {
        self.upload_slice = bytes.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[config] ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}
