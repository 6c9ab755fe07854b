//! Endpoint-scoped URL extraction.
//!
//! Matches `href="<scheme>://<host>:<port><path>"` where `host:port` appears verbatim and the
//! path starts with `/`, `?` or `#`. A bare origin (`http://host:port`) is not a training URL.

use regex::Regex;

use crate::error::CaseError;
use crate::models::ServiceEndpoint;

#[derive(Debug, Clone)]
pub struct UrlMatcher {
    re: Regex,
}

impl UrlMatcher {
    pub fn for_endpoint(endpoint: &ServiceEndpoint) -> Result<Self, CaseError> {
        let pattern = format!(
            r#"href="([A-Za-z][A-Za-z0-9+.\-]*://{}[/?#][^"]*)""#,
            regex::escape(&endpoint.authority())
        );
        let re = Regex::new(&pattern).map_err(|e| {
            CaseError::Configuration(format!("Invalid URL pattern for {}: {}", endpoint, e))
        })?;
        Ok(Self { re })
    }

    pub fn pattern(&self) -> &str {
        self.re.as_str()
    }

    /// All matches in document order (duplicates included).
    pub fn extract(&self, body: &str) -> Vec<String> {
        self.re
            .captures_iter(body)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(host: &str, port: u16) -> UrlMatcher {
        UrlMatcher::for_endpoint(&ServiceEndpoint::new(host, port).expect("endpoint"))
            .expect("matcher")
    }

    #[test]
    fn matches_only_configured_authority() {
        let m = matcher("127.0.0.1", 8080);
        let body = r#"
            <a href="http://127.0.0.1:8080/p1">one</a>
            <a href="http://other:8080/p2">two</a>
            <a href="http://127.0.0.1:9090/p3">three</a>
            <link href="https://127.0.0.1:8080/style.css?ver=1">
        "#;
        assert_eq!(
            m.extract(body),
            vec![
                "http://127.0.0.1:8080/p1",
                "https://127.0.0.1:8080/style.css?ver=1"
            ]
        );
    }

    #[test]
    fn host_dots_are_literal() {
        let m = matcher("127.0.0.1", 8080);
        assert!(m.extract(r#"href="http://127a0b0c1:8080/x""#).is_empty());
    }

    #[test]
    fn longer_port_does_not_match() {
        let m = matcher("localhost", 80);
        assert!(m.extract(r#"href="http://localhost:8080/x""#).is_empty());
        assert_eq!(
            m.extract(r#"href="http://localhost:80/x""#),
            vec!["http://localhost:80/x"]
        );
    }

    #[test]
    fn requires_scheme_and_path() {
        let m = matcher("h.test", 8080);
        let body = r#"href="//h.test:8080/a" href="http://h.test:8080" href="http://h.test:8080/""#;
        assert_eq!(m.extract(body), vec!["http://h.test:8080/"]);
    }

    #[test]
    fn keeps_duplicates_for_caller_to_dedup() {
        let m = matcher("h.test", 8080);
        let body = r#"href="http://h.test:8080/a" href="http://h.test:8080/a""#;
        assert_eq!(m.extract(body).len(), 2);
        assert!(m.pattern().contains("h\\.test:8080"));
    }
}
