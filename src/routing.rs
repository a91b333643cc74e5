//! Routing decision engine
//!
//! A normalized path is tested against a fixed, ordered policy chain and the
//! first matching policy decides the disposition. The order is part of the
//! contract: a private path that also looks like a stylesheet is still denied,
//! and a static pattern whose file is missing is answered with 404 instead of
//! falling through to the legacy application.

use crate::assets::{AssetResolver, StaticFamily};
use crate::error::FacadeErrorCode;
use crate::normalize::is_entry_script;
use std::path::PathBuf;

const PRIVATE_PREFIX: &str = "/private/";
const UPLOADS_PREFIX: &str = "/uploads/r/";
const UPLOADS_CONF_SEGMENT: &str = "/conf/";

/// Terminal classification of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    ServeStatic,
    StaticNotFound,
    DenyPrivate,
    DenyUploadConfig,
    DenyDirectFileAccess,
    ForwardToLegacyEntrypoint,
    ForwardUploadedArtifact,
}

impl Disposition {
    /// Error answered by the facade itself, if this disposition refuses the request
    pub fn deny_code(&self) -> Option<FacadeErrorCode> {
        match self {
            Disposition::StaticNotFound => Some(FacadeErrorCode::NotFound),
            Disposition::DenyPrivate => Some(FacadeErrorCode::PrivatePath),
            Disposition::DenyUploadConfig => Some(FacadeErrorCode::UploadConfig),
            Disposition::DenyDirectFileAccess => Some(FacadeErrorCode::DirectFileAccess),
            _ => None,
        }
    }

    /// Whether the request goes to the legacy runtime
    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Disposition::ForwardToLegacyEntrypoint | Disposition::ForwardUploadedArtifact
        )
    }
}

/// The result of classifying one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub disposition: Disposition,
    /// Short label used in route logs
    pub label: &'static str,
    /// Resolved file for `ServeStatic`
    pub asset: Option<PathBuf>,
}

impl RouteDecision {
    fn new(disposition: Disposition, label: &'static str) -> Self {
        Self {
            disposition,
            label,
            asset: None,
        }
    }
}

/// What a policy does once its predicate matches
#[derive(Debug, Clone, Copy)]
enum Action {
    Decide(Disposition, &'static str),
    /// Static family: serve the file or answer 404, never fall through
    ResolveStatic,
    /// Deny when the path is a file on disk, otherwise continue down the chain
    DenyIfOnDisk,
}

struct Policy {
    matches: fn(&str) -> bool,
    action: Action,
}

const POLICY_CHAIN: &[Policy] = &[
    Policy {
        matches: is_private,
        action: Action::Decide(Disposition::DenyPrivate, "deny_private"),
    },
    Policy {
        matches: is_upload_config,
        action: Action::Decide(Disposition::DenyUploadConfig, "deny_uploads_conf"),
    },
    Policy {
        matches: is_entry_script,
        action: Action::Decide(Disposition::ForwardToLegacyEntrypoint, "legacy_entry"),
    },
    Policy {
        matches: is_static,
        action: Action::ResolveStatic,
    },
    Policy {
        matches: is_uploaded_artifact,
        action: Action::Decide(
            Disposition::ForwardUploadedArtifact,
            "uploads_front_controller",
        ),
    },
    Policy {
        matches: any_path,
        action: Action::DenyIfOnDisk,
    },
];

const DEFAULT_DECISION: (Disposition, &str) =
    (Disposition::ForwardToLegacyEntrypoint, "front_controller");

fn is_private(path: &str) -> bool {
    path.starts_with(PRIVATE_PREFIX)
}

fn is_upload_config(path: &str) -> bool {
    path.strip_prefix(UPLOADS_PREFIX)
        .map(|rest| rest.contains(UPLOADS_CONF_SEGMENT))
        .unwrap_or(false)
}

fn any_path(_: &str) -> bool {
    true
}

fn is_static(path: &str) -> bool {
    StaticFamily::classify(path).is_some()
}

fn is_uploaded_artifact(path: &str) -> bool {
    path.starts_with(UPLOADS_PREFIX)
}

/// Classifies normalized paths; only reads the filesystem
#[derive(Debug, Clone)]
pub struct Router {
    resolver: AssetResolver,
}

impl Router {
    pub fn new(resolver: AssetResolver) -> Self {
        Self { resolver }
    }

    /// Classify a normalized path. Never fails.
    pub fn decide(&self, path: &str) -> RouteDecision {
        for policy in POLICY_CHAIN {
            if !(policy.matches)(path) {
                continue;
            }
            match policy.action {
                Action::Decide(disposition, label) => {
                    return RouteDecision::new(disposition, label);
                }
                Action::ResolveStatic => return self.resolve_static(path),
                Action::DenyIfOnDisk => {
                    if self.resolver.exists_in_app_root(path) {
                        return RouteDecision::new(
                            Disposition::DenyDirectFileAccess,
                            "deny_direct_file",
                        );
                    }
                }
            }
        }

        let (disposition, label) = DEFAULT_DECISION;
        RouteDecision::new(disposition, label)
    }

    fn resolve_static(&self, path: &str) -> RouteDecision {
        let resolved = StaticFamily::classify(path)
            .and_then(|family| self.resolver.resolve(path, family));
        match resolved {
            Some(file) => RouteDecision {
                disposition: Disposition::ServeStatic,
                label: "static",
                asset: Some(file),
            },
            None => RouteDecision::new(Disposition::StaticNotFound, "static_missing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use std::fs;
    use tempfile::TempDir;

    fn app_fixture() -> (TempDir, Router) {
        let app = tempfile::tempdir().unwrap();
        fs::create_dir_all(app.path().join("css")).unwrap();
        fs::create_dir_all(app.path().join("private/images")).unwrap();
        fs::create_dir_all(app.path().join("lib")).unwrap();
        fs::write(app.path().join("css/main.css"), b"body{}").unwrap();
        fs::write(app.path().join("private/images/x.png"), b"png").unwrap();
        fs::write(app.path().join("lib/secret.php"), b"<?php").unwrap();
        fs::write(app.path().join("index.php"), b"<?php").unwrap();

        let router = Router::new(AssetResolver::new(app.path().to_path_buf(), None));
        (app, router)
    }

    #[test]
    fn test_private_beats_static() {
        let (_app, router) = app_fixture();
        let decision = router.decide("/private/images/x.png");
        assert_eq!(decision.disposition, Disposition::DenyPrivate);
        assert_eq!(decision.label, "deny_private");
        assert_eq!(decision.disposition.deny_code(), Some(FacadeErrorCode::PrivatePath));
    }

    #[test]
    fn test_upload_config_denied_before_upload_forwarding() {
        let (_app, router) = app_fixture();
        let decision = router.decide("/uploads/r/repo-1/conf/settings.yml");
        assert_eq!(decision.disposition, Disposition::DenyUploadConfig);
        assert_eq!(decision.disposition.deny_code(), Some(FacadeErrorCode::UploadConfig));

        // The conf directory must sit below a repository directory
        let decision = router.decide("/uploads/r/conf/x");
        assert_eq!(decision.disposition, Disposition::ForwardUploadedArtifact);
    }

    #[test]
    fn test_uploaded_artifact_is_forwarded() {
        let (_app, router) = app_fixture();
        let decision = router.decide("/uploads/r/repo-1/a/b/object.jpg");
        assert_eq!(decision.disposition, Disposition::ForwardUploadedArtifact);
        assert!(decision.disposition.is_forward());
        assert_eq!(decision.disposition.deny_code(), None);
    }

    #[test]
    fn test_deny_codes_and_forwarding_partition_dispositions() {
        let all = [
            Disposition::ServeStatic,
            Disposition::StaticNotFound,
            Disposition::DenyPrivate,
            Disposition::DenyUploadConfig,
            Disposition::DenyDirectFileAccess,
            Disposition::ForwardToLegacyEntrypoint,
            Disposition::ForwardUploadedArtifact,
        ];
        for disposition in all {
            let answered_here = disposition.deny_code().is_some();
            let forwarded = disposition.is_forward();
            let served = disposition == Disposition::ServeStatic;
            assert_eq!(
                [answered_here, forwarded, served].iter().filter(|b| **b).count(),
                1,
                "{:?}",
                disposition
            );
        }
        assert_eq!(
            Disposition::StaticNotFound.deny_code().map(|c| c.status_code()),
            Some(hyper::StatusCode::NOT_FOUND)
        );
        assert_eq!(
            Disposition::DenyDirectFileAccess.deny_code().map(|c| c.status_code()),
            Some(hyper::StatusCode::FORBIDDEN)
        );
    }

    #[test]
    fn test_residual_entry_script_forwarded() {
        let (_app, router) = app_fixture();
        let decision = router.decide("/index.php");
        assert_eq!(decision.disposition, Disposition::ForwardToLegacyEntrypoint);
        assert_eq!(decision.label, "legacy_entry");
    }

    #[test]
    fn test_static_hit_and_miss() {
        let (app, router) = app_fixture();
        let decision = router.decide("/css/main.css");
        assert_eq!(decision.disposition, Disposition::ServeStatic);
        assert_eq!(decision.asset, Some(app.path().join("css/main.css")));

        let decision = router.decide("/css/missing.css");
        assert_eq!(decision.disposition, Disposition::StaticNotFound);
        assert_eq!(decision.label, "static_missing");
    }

    #[test]
    fn test_existing_unlisted_file_is_forbidden() {
        let (_app, router) = app_fixture();
        let decision = router.decide("/lib/secret.php");
        assert_eq!(decision.disposition, Disposition::DenyDirectFileAccess);
        assert_eq!(decision.label, "deny_direct_file");
    }

    #[test]
    fn test_directories_are_not_direct_files() {
        let (_app, router) = app_fixture();
        let decision = router.decide("/lib");
        assert_eq!(decision.disposition, Disposition::ForwardToLegacyEntrypoint);
    }

    #[test]
    fn test_default_forwards_to_front_controller() {
        let (_app, router) = app_fixture();
        let normalized = normalize("/index.php/informationobject/browse");
        assert_eq!(normalized.as_str(), "/informationobject/browse");

        let decision = router.decide(normalized.as_str());
        assert_eq!(decision.disposition, Disposition::ForwardToLegacyEntrypoint);
        assert_eq!(decision.label, "front_controller");
        assert!(decision.asset.is_none());
    }

    #[test]
    fn test_root_forwards() {
        let (_app, router) = app_fixture();
        assert_eq!(
            router.decide("/").disposition,
            Disposition::ForwardToLegacyEntrypoint
        );
    }
}
