use crate::SchemaError;
use std::fmt;
use std::str::FromStr;

/// Docker Hub's canonical registry endpoint. Bare references like
/// `ubuntu:22.04` resolve against it under the `library/` namespace.
const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// A container image pull specification: `[registry/]repo[:tag][@algo:hex]`.
///
/// Pinning is the one-way transform tag -> digest; a reference that already
/// carries a digest is final and passes through every stage unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    repo: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Tag used for resolution; an untagged reference means `latest`.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// The digest-qualified form of this reference. The tag is dropped: a
    /// digest identifies content exactly and the tag would only mislead.
    pub fn pinned(&self, digest: &str) -> ImageReference {
        ImageReference {
            repo: self.repo.clone(),
            tag: None,
            digest: Some(digest.to_owned()),
        }
    }

    /// Split into (registry host, repository path) for registry API calls,
    /// normalizing Docker Hub shorthand.
    pub fn registry_and_repository(&self) -> (String, String) {
        if let Some((head, rest)) = self.repo.split_once('/') {
            if head.contains('.') || head.contains(':') || head == "localhost" {
                let host = if head == "docker.io" || head == "index.docker.io" {
                    DEFAULT_REGISTRY.to_owned()
                } else {
                    head.to_owned()
                };
                let repository = if host == DEFAULT_REGISTRY && !rest.contains('/') {
                    format!("library/{rest}")
                } else {
                    rest.to_owned()
                };
                return (host, repository);
            }
        }
        let repository = if self.repo.contains('/') {
            self.repo.clone()
        } else {
            format!("library/{}", self.repo)
        };
        (DEFAULT_REGISTRY.to_owned(), repository)
    }
}

impl FromStr for ImageReference {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(SchemaError::InvalidImageReference(s.to_owned()));
        }

        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) => {
                // A digest is `algorithm:hex`; anything else is malformed.
                if name.is_empty() || !digest.split_once(':').is_some_and(is_digest_parts) {
                    return Err(SchemaError::InvalidImageReference(s.to_owned()));
                }
                (name, Some(digest.to_owned()))
            }
            None => (raw, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port (e.g. localhost:5000/repo).
        let slash = name.rfind('/').map_or(0, |i| i + 1);
        let (repo, tag) = match name[slash..].rfind(':') {
            Some(i) => {
                let split = slash + i;
                let tag = &name[split + 1..];
                if tag.is_empty() {
                    return Err(SchemaError::InvalidImageReference(s.to_owned()));
                }
                (name[..split].to_owned(), Some(tag.to_owned()))
            }
            None => (name.to_owned(), None),
        };
        if repo.is_empty() {
            return Err(SchemaError::InvalidImageReference(s.to_owned()));
        }

        Ok(ImageReference { repo, tag, digest })
    }
}

fn is_digest_parts((algorithm, hex): (&str, &str)) -> bool {
    !algorithm.is_empty() && !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repo)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_reference() {
        let r: ImageReference = "quay.io/example/memcached-operator:v0.0.1"
            .parse()
            .unwrap();
        assert_eq!(r.repo(), "quay.io/example/memcached-operator");
        assert_eq!(r.tag(), Some("v0.0.1"));
        assert!(!r.is_pinned());
    }

    #[test]
    fn parses_digest_reference() {
        let r: ImageReference = "quay.io/example/app@sha256:0123456789abcdef"
            .parse()
            .unwrap();
        assert!(r.is_pinned());
        assert_eq!(r.digest(), Some("sha256:0123456789abcdef"));
        assert_eq!(r.tag(), None);
    }

    #[test]
    fn untagged_reference_resolves_as_latest() {
        let r: ImageReference = "memcached".parse().unwrap();
        assert_eq!(r.tag(), None);
        assert_eq!(r.tag_or_latest(), "latest");
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let r: ImageReference = "localhost:5000/app".parse().unwrap();
        assert_eq!(r.repo(), "localhost:5000/app");
        assert_eq!(r.tag(), None);

        let r: ImageReference = "localhost:5000/app:dev".parse().unwrap();
        assert_eq!(r.repo(), "localhost:5000/app");
        assert_eq!(r.tag(), Some("dev"));
    }

    #[test]
    fn pinning_drops_the_tag() {
        let r: ImageReference = "quay.io/example/app:v1".parse().unwrap();
        let pinned = r.pinned("sha256:abcd");
        assert_eq!(pinned.to_string(), "quay.io/example/app@sha256:abcd");
    }

    #[test]
    fn docker_hub_shorthand_normalizes() {
        let r: ImageReference = "ubuntu:22.04".parse().unwrap();
        let (host, repo) = r.registry_and_repository();
        assert_eq!(host, "registry-1.docker.io");
        assert_eq!(repo, "library/ubuntu");

        let r: ImageReference = "docker.io/grafana/grafana:10".parse().unwrap();
        let (host, repo) = r.registry_and_repository();
        assert_eq!(host, "registry-1.docker.io");
        assert_eq!(repo, "grafana/grafana");
    }

    #[test]
    fn explicit_registry_passes_through() {
        let r: ImageReference = "quay.io/ns/app:v1".parse().unwrap();
        let (host, repo) = r.registry_and_repository();
        assert_eq!(host, "quay.io");
        assert_eq!(repo, "ns/app");
    }

    #[test]
    fn rejects_malformed_references() {
        assert!("".parse::<ImageReference>().is_err());
        assert!("   ".parse::<ImageReference>().is_err());
        assert!("app:".parse::<ImageReference>().is_err());
        assert!("app@notadigest".parse::<ImageReference>().is_err());
        assert!("app@sha256:zzzz".parse::<ImageReference>().is_err());
    }

    #[test]
    fn display_roundtrips() {
        for s in [
            "quay.io/example/app:v1",
            "quay.io/example/app@sha256:abcd",
            "memcached",
            "localhost:5000/app:dev",
        ] {
            let r: ImageReference = s.parse().unwrap();
            assert_eq!(r.to_string(), s);
        }
    }
}
