//! Naming conventions shared with callers and the discovery component.
//!
//! - Job topics: `<prefix>.io`, `<prefix>.ping`
//! - Control topic: `<prefix>.meta`
//! - Registration topic: `modules`, keyed by module name
//! - Job key `<callerHost>.<requestId>` routes the reply to
//!   `supervisor.<callerHost>` under key `<requestId>`
//!
//! `<prefix>` is the module name with `/` replaced by `.` so that it is a
//! legal topic name.

/// Topic carrying registration heartbeats.
pub const REGISTRATION_TOPIC: &str = "modules";

const REPLY_TOPIC_PREFIX: &str = "supervisor.";
const RID_RADIX: u32 = 32;

/// Check that a module name has the `owner/name` shape.
pub fn validate_module_name(name: &str) -> bool {
    let mut parts = name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(module), None) => is_segment(owner) && is_segment(module),
        _ => false,
    }
}

fn is_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

/// Topic names derived from one module identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTopics {
    prefix: String,
}

impl ModuleTopics {
    pub fn new(module: &str) -> Self {
        Self {
            prefix: module.replace('/', "."),
        }
    }

    pub fn io(&self) -> String {
        format!("{}.io", self.prefix)
    }

    pub fn ping(&self) -> String {
        format!("{}.ping", self.prefix)
    }

    pub fn meta(&self) -> String {
        format!("{}.meta", self.prefix)
    }

    /// Both job topics consumed by the queue worker.
    pub fn jobs(&self) -> Vec<String> {
        vec![self.io(), self.ping()]
    }
}

/// Consumer group shared by every worker serving the same topics.
pub fn consumer_group_name(topics: &[String]) -> String {
    let mut sorted: Vec<&str> = topics.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("group.{}", sorted.join("|"))
}

/// Where the reply to a queued job is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRoute {
    pub topic: String,
    pub key: String,
}

impl ReplyRoute {
    /// Derive the route from a job key. Returns `None` when the key has no
    /// host part.
    pub fn from_key(key: &str) -> Option<Self> {
        let (host, rid) = key.rsplit_once('.')?;
        Some(Self {
            topic: format!("{REPLY_TOPIC_PREFIX}{host}"),
            key: rid.to_string(),
        })
    }
}

/// Last `.`-separated segment of a message key, used to tag log lines.
pub fn key_rid(key: &str) -> &str {
    key.rsplit_once('.').map_or(key, |(_, rid)| rid)
}

/// Render a request id the way caller tooling prints it (base 32).
pub fn fmt_rid(rid: u64) -> String {
    if rid == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    let mut n = rid;
    while n > 0 {
        let digit = (n % RID_RADIX as u64) as u32;
        // from_digit only fails for digit >= radix
        digits.push(char::from_digit(digit, RID_RADIX).unwrap_or('?'));
        n /= RID_RADIX as u64;
    }
    digits.iter().rev().collect()
}

/// Inverse of [`fmt_rid`].
pub fn parse_rid(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s, RID_RADIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_validation() {
        assert!(validate_module_name("acme/image-resize"));
        assert!(validate_module_name("a_b/c-1"));
        assert!(!validate_module_name("acme"));
        assert!(!validate_module_name("acme/"));
        assert!(!validate_module_name("/resize"));
        assert!(!validate_module_name("acme/img/resize"));
        assert!(!validate_module_name("Acme/resize"));
        assert!(!validate_module_name("acme/re size"));
    }

    #[test]
    fn topics_derive_from_module() {
        let topics = ModuleTopics::new("acme/resize");
        assert_eq!(topics.io(), "acme.resize.io");
        assert_eq!(topics.ping(), "acme.resize.ping");
        assert_eq!(topics.meta(), "acme.resize.meta");
        assert_eq!(topics.jobs(), vec!["acme.resize.io", "acme.resize.ping"]);
    }

    #[test]
    fn group_name_is_order_independent() {
        let a = consumer_group_name(&["b.io".to_string(), "a.io".to_string()]);
        let b = consumer_group_name(&["a.io".to_string(), "b.io".to_string()]);
        assert_eq!(a, "group.a.io|b.io");
        assert_eq!(a, b);
    }

    #[test]
    fn reply_route_splits_on_last_dot() {
        let route = ReplyRoute::from_key("host-1.eu.example.9og").unwrap();
        assert_eq!(route.topic, "supervisor.host-1.eu.example");
        assert_eq!(route.key, "9og");
        assert!(ReplyRoute::from_key("no-separator").is_none());
    }

    #[test]
    fn key_rid_takes_last_segment() {
        assert_eq!(key_rid("host.abc"), "abc");
        assert_eq!(key_rid("abc"), "abc");
    }

    #[test]
    fn rid_formatting() {
        assert_eq!(fmt_rid(0), "0");
        assert_eq!(fmt_rid(10000), "9og");
        assert_eq!(fmt_rid(13629185736935353049), "bq94o6udtkamp");
        assert_eq!(parse_rid("9og").unwrap(), 10000);
        assert_eq!(parse_rid(&fmt_rid(u64::MAX)).unwrap(), u64::MAX);
        assert!(parse_rid("not-a-rid").is_err());
    }
}
