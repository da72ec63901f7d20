//! Container image reference parsing
//!
//! Handles the `[domain/]path[:tag][@algo:hex]` form used in pod specs and
//! the `image_id` values reported in container statuses.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("empty image reference")]
    Empty,

    #[error("invalid image reference: {0:?}")]
    Invalid(String),

    #[error("image reference {0:?} has no repository name")]
    MissingName(String),

    #[error("image reference {0:?} has neither tag nor digest")]
    NoVersion(String),

    #[error("image reference {0:?} has no digest")]
    NoDigest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Domain as written in the reference, if any
    pub domain: Option<String>,
    /// Repository path without the domain
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

fn path_component() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid path pattern")
    })
}

fn domain_component() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?(?::[0-9]+)?$")
            .expect("valid domain pattern")
    })
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("valid tag pattern"))
}

fn digest_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("valid digest pattern")
    })
}

fn bare_digest() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]{64}$").expect("valid identifier pattern"))
}

impl ImageRef {
    pub fn parse(image: &str) -> Result<Self, ImageRefError> {
        if image.is_empty() {
            return Err(ImageRefError::Empty);
        }
        if bare_digest().is_match(image) {
            return Err(ImageRefError::MissingName(image.to_string()));
        }
        let invalid = || ImageRefError::Invalid(image.to_string());

        let (rest, digest) = match image.split_once('@') {
            Some((rest, digest)) => {
                if !digest_pattern().is_match(digest) {
                    return Err(invalid());
                }
                (rest, Some(digest.to_string()))
            }
            None => (image, None),
        };

        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &rest[split + 1..];
                if !tag_pattern().is_match(tag) {
                    return Err(invalid());
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        if name.is_empty() {
            return Err(ImageRefError::MissingName(image.to_string()));
        }

        let (domain, path) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                if !domain_component().is_match(first) {
                    return Err(invalid());
                }
                (Some(first.to_string()), remainder)
            }
            _ => (None, name),
        };

        if !path.split('/').all(|c| path_component().is_match(c)) {
            return Err(invalid());
        }

        Ok(Self {
            domain,
            path: path.to_string(),
            tag,
            digest,
        })
    }

    /// Name as a user would usually write it, without the default registry
    pub fn familiar_name(&self) -> String {
        match self.domain.as_deref() {
            None | Some(DEFAULT_DOMAIN) | Some(LEGACY_DEFAULT_DOMAIN) => {
                match self.path.strip_prefix(OFFICIAL_REPO_PREFIX) {
                    Some(short) if !short.contains('/') => short.to_string(),
                    _ => self.path.clone(),
                }
            }
            Some(domain) => format!("{}/{}", domain, self.path),
        }
    }

    /// Fully qualified name including the default registry
    pub fn normalized_name(&self) -> String {
        match self.domain.as_deref() {
            None | Some(DEFAULT_DOMAIN) | Some(LEGACY_DEFAULT_DOMAIN) => {
                if self.path.contains('/') {
                    format!("{}/{}", DEFAULT_DOMAIN, self.path)
                } else {
                    format!("{}/{}{}", DEFAULT_DOMAIN, OFFICIAL_REPO_PREFIX, self.path)
                }
            }
            Some(domain) => format!("{}/{}", domain, self.path),
        }
    }

    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// Version string for `service.version`: `tag@digest`, `digest` or `tag`
    pub fn service_version(&self) -> Result<String, ImageRefError> {
        match (&self.tag, &self.digest) {
            (Some(tag), Some(digest)) => Ok(format!("{tag}@{digest}")),
            (None, Some(digest)) => Ok(digest.clone()),
            (Some(tag), None) => Ok(tag.clone()),
            (None, None) => Err(ImageRefError::NoVersion(self.normalized_name())),
        }
    }
}

/// Canonical `repository@digest` form of a container status image id, which
/// may carry a runtime prefix such as `docker-pullable://`.
pub fn canonical_image_ref(image_id: &str) -> Result<String, ImageRefError> {
    let trimmed = image_id
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(image_id);
    let image = ImageRef::parse(trimmed)?;

    match &image.digest {
        Some(digest) => Ok(format!("{}@{}", image.normalized_name(), digest)),
        None => Err(ImageRefError::NoDigest(image_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4e0a0f7e4f9a3a7f1bbde3c2b4c6bfb9a5ee7c5a0a8f2f3d0e1c9b8a7f6e5d4c";

    #[test]
    fn test_parse_simple() {
        let image = ImageRef::parse("nginx").unwrap();
        assert_eq!(image.familiar_name(), "nginx");
        assert_eq!(image.normalized_name(), "docker.io/library/nginx");
        assert_eq!(image.tag_or_latest(), "latest");
        assert!(image.service_version().is_err());
    }

    #[test]
    fn test_parse_registry_with_port_and_tag() {
        let image = ImageRef::parse("registry.local:5000/team/app:1.2.3").unwrap();
        assert_eq!(image.domain.as_deref(), Some("registry.local:5000"));
        assert_eq!(image.path, "team/app");
        assert_eq!(image.familiar_name(), "registry.local:5000/team/app");
        assert_eq!(image.tag_or_latest(), "1.2.3");
        assert_eq!(image.service_version().unwrap(), "1.2.3");
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let image = ImageRef::parse(&format!("docker.io/library/redis:7@{DIGEST}")).unwrap();
        assert_eq!(image.familiar_name(), "redis");
        assert_eq!(image.service_version().unwrap(), format!("7@{DIGEST}"));

        let image = ImageRef::parse(&format!("test/image@{DIGEST}")).unwrap();
        assert_eq!(image.familiar_name(), "test/image");
        assert_eq!(image.service_version().unwrap(), DIGEST);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(ImageRef::parse(""), Err(ImageRefError::Empty));
        assert!(matches!(
            ImageRef::parse("Upper/Case:1"),
            Err(ImageRefError::Invalid(_))
        ));
        assert!(matches!(
            ImageRef::parse("nginx@sha256:short"),
            Err(ImageRefError::Invalid(_))
        ));
        assert!(matches!(
            ImageRef::parse(":tag"),
            Err(ImageRefError::MissingName(_))
        ));
    }

    #[test]
    fn test_canonical_image_ref() {
        let canonical = canonical_image_ref(&format!("docker-pullable://nginx@{DIGEST}")).unwrap();
        assert_eq!(canonical, format!("docker.io/library/nginx@{DIGEST}"));

        let canonical = canonical_image_ref(&format!("quay.io/org/app@{DIGEST}")).unwrap();
        assert_eq!(canonical, format!("quay.io/org/app@{DIGEST}"));

        assert!(matches!(
            canonical_image_ref("nginx:1.25"),
            Err(ImageRefError::NoDigest(_))
        ));
    }
}
