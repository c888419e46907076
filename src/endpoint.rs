//! Endpoint pool: host spec expansion and per-thread round-robin cycling.
//!
//! A host spec is one or more comma-separated tokens. A token may contain a
//! single brace range `{N...M}` which expands to every value from `N` to `M`
//! inclusive; the digit count of the bounds sets the zero padding, so
//! `host{08...10}` yields `host08, host09, host10`.

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::Client as S3Client;

use crate::config::ConnectConfig;
use crate::error::{BenchError, Result};

/// Expand a host spec into an ordered, deduplicated endpoint list.
pub fn expand_hosts(spec: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        for host in expand_token(token)? {
            if !out.contains(&host) {
                out.push(host);
            }
        }
    }
    if out.is_empty() {
        return Err(BenchError::endpoint(format!("empty expansion of {spec:?}")));
    }
    Ok(out)
}

fn expand_token(token: &str) -> Result<Vec<String>> {
    let Some(open) = token.find('{') else {
        if token.contains('}') {
            return Err(BenchError::endpoint(format!("unmatched '}}' in {token:?}")));
        }
        return Ok(vec![token.to_string()]);
    };
    let close = token[open..]
        .find('}')
        .map(|i| open + i)
        .ok_or_else(|| BenchError::endpoint(format!("unmatched '{{' in {token:?}")))?;
    let body = &token[open + 1..close];
    let tail = &token[close + 1..];
    if tail.contains('{') {
        return Err(BenchError::endpoint(format!(
            "only one brace range per host allowed in {token:?}"
        )));
    }
    let (lo_s, hi_s) = body.split_once("...").ok_or_else(|| {
        BenchError::endpoint(format!("range {body:?} must use the form {{N...M}}"))
    })?;
    let lo: u64 = lo_s
        .parse()
        .map_err(|_| BenchError::endpoint(format!("bad range bound {lo_s:?}")))?;
    let hi: u64 = hi_s
        .parse()
        .map_err(|_| BenchError::endpoint(format!("bad range bound {hi_s:?}")))?;
    if lo >= hi {
        return Err(BenchError::endpoint(format!(
            "reversed range {{{lo_s}...{hi_s}}}"
        )));
    }
    let width = lo_s.len();
    let head = &token[..open];
    Ok((lo..=hi)
        .map(|v| format!("{head}{v:0width$}{tail}"))
        .collect())
}

/// Attach a scheme to a bare `host:port` endpoint.
pub fn endpoint_url(host: &str, tls: bool) -> String {
    if host.contains("://") {
        host.to_string()
    } else if tls {
        format!("https://{host}")
    } else {
        format!("http://{host}")
    }
}

/// One benchmark endpoint: its URL and a client configured against it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub client: S3Client,
}

/// The expanded endpoint list, shared read-only across workers.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Arc<Vec<Endpoint>>,
}

impl EndpointPool {
    /// Expand the host spec and build one configured client per endpoint.
    pub fn connect(connect: &ConnectConfig) -> Result<Self> {
        let hosts = expand_hosts(&connect.host)?;
        let endpoints = hosts
            .into_iter()
            .map(|host| {
                let url = endpoint_url(&host, connect.tls);
                let client = create_client(connect, &url);
                Endpoint { url, client }
            })
            .collect();
        Ok(Self {
            endpoints: Arc::new(endpoints),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_urls(connect: &ConnectConfig, urls: &[&str]) -> Self {
        let endpoints = urls
            .iter()
            .map(|url| Endpoint {
                url: url.to_string(),
                client: create_client(connect, url),
            })
            .collect();
        Self {
            endpoints: Arc::new(endpoints),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, index: usize) -> &Endpoint {
        &self.endpoints[index % self.endpoints.len()]
    }

    pub fn urls(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.url.as_str()).collect()
    }

    /// A round-robin cursor seeded by `thread_id`, so with many threads and
    /// few hosts every host gets an even share of workers.
    pub fn ring(&self, thread_id: u32) -> EndpointRing {
        EndpointRing {
            endpoints: Arc::clone(&self.endpoints),
            pos: thread_id as usize % self.endpoints.len(),
        }
    }
}

/// A worker-owned cursor cycling through all endpoints.
#[derive(Debug, Clone)]
pub struct EndpointRing {
    endpoints: Arc<Vec<Endpoint>>,
    pos: usize,
}

impl EndpointRing {
    pub fn next_index(&mut self) -> usize {
        let i = self.pos;
        self.pos = (self.pos + 1) % self.endpoints.len();
        i
    }

    pub fn next(&mut self) -> Endpoint {
        let i = self.next_index();
        self.endpoints[i].clone()
    }
}

fn create_client(connect: &ConnectConfig, endpoint_url: &str) -> S3Client {
    let credentials = Credentials::new(
        connect.access_key.clone(),
        connect.secret_key.clone(),
        None,
        None,
        "static",
    );

    let config = S3ConfigBuilder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(connect.region.clone()))
        .endpoint_url(endpoint_url)
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();

    S3Client::from_conf(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_list_expands_in_order() {
        let hosts = expand_hosts("10.0.0.1:9000,10.0.0.2:9000").unwrap();
        assert_eq!(hosts, vec!["10.0.0.1:9000", "10.0.0.2:9000"]);
    }

    #[test]
    fn brace_range_expands() {
        let hosts = expand_hosts("10.0.0.{1...3}:9000").unwrap();
        assert_eq!(
            hosts,
            vec!["10.0.0.1:9000", "10.0.0.2:9000", "10.0.0.3:9000"]
        );
    }

    #[test]
    fn range_bound_digits_set_zero_padding() {
        let hosts = expand_hosts("host{08...10}").unwrap();
        assert_eq!(hosts, vec!["host08", "host09", "host10"]);
    }

    #[test]
    fn duplicates_collapse_preserving_first_occurrence() {
        let hosts = expand_hosts("a:9000,b:9000,a:9000").unwrap();
        assert_eq!(hosts, vec!["a:9000", "b:9000"]);
    }

    #[test]
    fn reversed_range_rejected() {
        assert!(matches!(
            expand_hosts("host{3...1}"),
            Err(BenchError::BadEndpointSpec(_))
        ));
        assert!(matches!(
            expand_hosts("host{2...2}"),
            Err(BenchError::BadEndpointSpec(_))
        ));
    }

    #[test]
    fn malformed_specs_rejected() {
        assert!(expand_hosts("").is_err());
        assert!(expand_hosts(" , ,").is_err());
        assert!(expand_hosts("host{1..3}").is_err());
        assert!(expand_hosts("host{1...x}").is_err());
        assert!(expand_hosts("host{1...3").is_err());
        assert!(expand_hosts("host}1{").is_err());
        assert!(expand_hosts("h{1...2}x{1...2}").is_err());
    }

    #[test]
    fn scheme_attachment() {
        assert_eq!(endpoint_url("h:9000", false), "http://h:9000");
        assert_eq!(endpoint_url("h:9000", true), "https://h:9000");
        assert_eq!(endpoint_url("https://h", false), "https://h");
    }

    #[test]
    fn ring_seeded_by_thread_id() {
        let connect = ConnectConfig::test_default();
        let pool = EndpointPool::for_urls(&connect, &["http://a", "http://b", "http://c"]);
        let mut r0 = pool.ring(0);
        let mut r1 = pool.ring(1);
        let mut r4 = pool.ring(4);
        assert_eq!(r0.next_index(), 0);
        assert_eq!(r0.next_index(), 1);
        assert_eq!(r0.next_index(), 2);
        assert_eq!(r0.next_index(), 0);
        assert_eq!(r1.next_index(), 1);
        assert_eq!(r4.next_index(), 1);
    }
}
