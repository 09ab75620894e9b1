use crate::{DigestResolver, RegistryError};
use opbundle_schema::ImageReference;
use std::collections::BTreeMap;
use std::io::Read;
use tracing::debug;
use ureq::Agent;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Digest resolver speaking the registry v2 HTTP API.
///
/// Resolution is a `HEAD /v2/<repo>/manifests/<tag>` returning the content
/// digest in the `Docker-Content-Digest` header. Registries requiring
/// authentication get one anonymous bearer-token retry driven by the
/// `Www-Authenticate` challenge; there is no credential store.
pub struct HttpResolver {
    agent: Agent,
    insecure: bool,
}

struct HeadOutcome {
    status: u16,
    digest: Option<String>,
    challenge: Option<String>,
}

impl HttpResolver {
    pub fn new(insecure: bool) -> Self {
        // Non-2xx statuses are inspected, not raised: the 401 challenge
        // headers drive the token retry.
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent, insecure }
    }

    fn scheme(&self) -> &'static str {
        if self.insecure {
            "http"
        } else {
            "https"
        }
    }

    fn head(&self, url: &str, token: Option<&str>) -> Result<HeadOutcome, RegistryError> {
        debug!("HEAD {url}");
        let mut req = self.agent.head(url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        let resp = req.call().map_err(|e| RegistryError::Http(e.to_string()))?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        Ok(HeadOutcome {
            status: resp.status().as_u16(),
            digest: header("docker-content-digest"),
            challenge: header("www-authenticate"),
        })
    }

    fn fetch_token(&self, challenge: &str) -> Result<String, RegistryError> {
        let params = parse_bearer_challenge(challenge)
            .ok_or_else(|| RegistryError::Http(format!("unusable challenge '{challenge}'")))?;
        let realm = params
            .get("realm")
            .ok_or_else(|| RegistryError::Http("challenge without realm".to_owned()))?;

        let mut url = realm.clone();
        let mut separator = '?';
        for key in ["service", "scope"] {
            if let Some(value) = params.get(key) {
                url.push(separator);
                url.push_str(&format!("{key}={value}"));
                separator = '&';
            }
        }

        debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        if resp.status().as_u16() >= 400 {
            return Err(RegistryError::Http(format!(
                "HTTP {} from token endpoint {url}",
                resp.status().as_u16()
            )));
        }

        let mut body = String::new();
        resp.into_body()
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        let parsed: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| RegistryError::Http(e.to_string()))?;
        parsed
            .get("token")
            .or_else(|| parsed.get("access_token"))
            .and_then(|t| t.as_str())
            .map(str::to_owned)
            .ok_or_else(|| RegistryError::Http(format!("no token in response from {url}")))
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."` into its parameters.
fn parse_bearer_challenge(header: &str) -> Option<BTreeMap<String, String>> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut params = BTreeMap::new();
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        params.insert(key.to_owned(), value.trim_matches('"').to_owned());
    }
    Some(params)
}

impl DigestResolver for HttpResolver {
    fn resolve(&self, reference: &ImageReference) -> Result<ImageReference, RegistryError> {
        if reference.is_pinned() {
            return Ok(reference.clone());
        }

        let (host, repository) = reference.registry_and_repository();
        let url = format!(
            "{}://{host}/v2/{repository}/manifests/{}",
            self.scheme(),
            reference.tag_or_latest()
        );

        let mut outcome = self.head(&url, None)?;
        if outcome.status == 401 {
            let challenge = outcome.challenge.ok_or_else(|| RegistryError::Resolution {
                reference: reference.to_string(),
                reason: "registry returned 401 without a challenge".to_owned(),
            })?;
            let token = self.fetch_token(&challenge)?;
            outcome = self.head(&url, Some(&token))?;
        }

        if outcome.status != 200 {
            return Err(RegistryError::Resolution {
                reference: reference.to_string(),
                reason: format!("HTTP {} for {url}", outcome.status),
            });
        }
        let digest = outcome.digest.ok_or_else(|| RegistryError::Resolution {
            reference: reference.to_string(),
            reason: "registry response carried no Docker-Content-Digest header".to_owned(),
        })?;

        debug!("resolved {reference} -> {digest}");
        Ok(reference.pinned(&digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::Arc;

    type Responder = dyn Fn(&str, &str, &HashMap<String, String>) -> String + Send + Sync;

    struct MockRegistry {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
    }

    impl MockRegistry {
        fn start(responder: Arc<Responder>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let responder = Arc::clone(&responder);
                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let method = parts[0].to_owned();
                        let path = parts[1].to_owned();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                        }

                        let response = responder(&method, &path, &headers);
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    });
                }
            });
            MockRegistry {
                addr,
                _handle: handle,
            }
        }
    }

    fn ok_with_digest(digest: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nDocker-Content-Digest: {digest}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        )
    }

    fn plain(status: &str) -> String {
        format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
    }

    #[test]
    fn resolves_digest_from_head() {
        let server = MockRegistry::start(Arc::new(
            |method: &str, path: &str, _headers: &HashMap<String, String>| {
                assert_eq!(method, "HEAD");
                if path == "/v2/ns/app/manifests/v1" {
                    ok_with_digest("sha256:feedface")
                } else {
                    plain("404 Not Found")
                }
            },
        ));
        let resolver = HttpResolver::new(true);
        let reference: ImageReference = format!("{}/ns/app:v1", server.addr).parse().unwrap();
        let pinned = resolver.resolve(&reference).unwrap();
        assert_eq!(
            pinned.to_string(),
            format!("{}/ns/app@sha256:feedface", server.addr)
        );
    }

    #[test]
    fn untagged_reference_resolves_latest() {
        let server = MockRegistry::start(Arc::new(
            |_method: &str, path: &str, _headers: &HashMap<String, String>| {
                if path == "/v2/ns/app/manifests/latest" {
                    ok_with_digest("sha256:0ddba11")
                } else {
                    plain("404 Not Found")
                }
            },
        ));
        let resolver = HttpResolver::new(true);
        let reference: ImageReference = format!("{}/ns/app", server.addr).parse().unwrap();
        let pinned = resolver.resolve(&reference).unwrap();
        assert!(pinned.is_pinned());
    }

    #[test]
    fn retries_with_anonymous_token_on_401() {
        let server_addr = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
        let addr_for_responder = Arc::clone(&server_addr);
        let server = MockRegistry::start(Arc::new(
            move |method: &str, path: &str, headers: &HashMap<String, String>| {
                let addr = addr_for_responder.lock().unwrap().clone();
                if method == "GET" && path.starts_with("/token") {
                    assert!(path.contains("service=reg"), "token query: {path}");
                    let body = r#"{"token":"tok123"}"#;
                    return format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                }
                match headers.get("authorization").map(String::as_str) {
                    Some("Bearer tok123") => ok_with_digest("sha256:cafe"),
                    _ => format!(
                        "HTTP/1.1 401 Unauthorized\r\nWww-Authenticate: Bearer realm=\"http://{addr}/token\",service=\"reg\",scope=\"repository:ns/app:pull\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    ),
                }
            },
        ));
        *server_addr.lock().unwrap() = server.addr.clone();

        let resolver = HttpResolver::new(true);
        let reference: ImageReference = format!("{}/ns/app:v1", server.addr).parse().unwrap();
        let pinned = resolver.resolve(&reference).unwrap();
        assert_eq!(pinned.digest(), Some("sha256:cafe"));
    }

    #[test]
    fn missing_digest_header_is_a_resolution_error() {
        let server = MockRegistry::start(Arc::new(
            |_method: &str, _path: &str, _headers: &HashMap<String, String>| plain("200 OK"),
        ));
        let resolver = HttpResolver::new(true);
        let reference: ImageReference = format!("{}/ns/app:v1", server.addr).parse().unwrap();
        assert!(matches!(
            resolver.resolve(&reference),
            Err(RegistryError::Resolution { .. })
        ));
    }

    #[test]
    fn http_error_status_is_a_resolution_error() {
        let server = MockRegistry::start(Arc::new(
            |_method: &str, _path: &str, _headers: &HashMap<String, String>| {
                plain("404 Not Found")
            },
        ));
        let resolver = HttpResolver::new(true);
        let reference: ImageReference = format!("{}/ns/missing:v1", server.addr).parse().unwrap();
        let err = resolver.resolve(&reference).unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn pinned_reference_skips_the_network() {
        // No server: a pinned reference must never trigger a request.
        let resolver = HttpResolver::new(true);
        let reference: ImageReference = "quay.io/ns/app@sha256:abcd".parse().unwrap();
        assert_eq!(resolver.resolve(&reference).unwrap(), reference);
    }

    #[test]
    fn connection_refused_is_an_http_error() {
        let resolver = HttpResolver::new(true);
        let reference: ImageReference = "127.0.0.1:1/ns/app:v1".parse().unwrap();
        assert!(matches!(
            resolver.resolve(&reference),
            Err(RegistryError::Http(_))
        ));
    }

    #[test]
    fn challenge_parser_extracts_params() {
        let params = parse_bearer_challenge(
            "Bearer realm=\"https://auth.docker.io/token\",service=\"registry.docker.io\"",
        )
        .unwrap();
        assert_eq!(
            params.get("realm").map(String::as_str),
            Some("https://auth.docker.io/token")
        );
        assert_eq!(
            params.get("service").map(String::as_str),
            Some("registry.docker.io")
        );
        assert!(parse_bearer_challenge("Basic realm=x").is_none());
    }
}
