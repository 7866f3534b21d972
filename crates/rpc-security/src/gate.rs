//! The CSRF/origin security gate.
//!
//! A pure function: the same inputs always yield the same decision, which
//! is what lets the state machine re-invoke it on every credentialed read
//! or write without worrying about hidden state.

use subtle::ConstantTimeEq;

use rpc_protocol::session::{CsrfProtectionMode, SecurityPropertiesOfHttpRequest};
use rpc_protocol::SecurityRelevantSessionFields;

/// Everything the gate needs about the specific request being evaluated,
/// beyond the session-wide [`SecurityPropertiesOfHttpRequest`].
pub struct GateRequest<'a> {
    /// The request's observed security properties.
    pub properties: &'a SecurityPropertiesOfHttpRequest,
    /// The security group this request is acting against.
    pub security_group: &'a str,
    /// Whether the HTTP method used is one the gate treats as safe (GET,
    /// HEAD) and therefore permits even as a simple cross-origin request.
    pub method_is_safe: bool,
    /// Whether signals on the request (e.g. `Sec-Fetch-Mode: navigate`)
    /// indicate it was a top-level browser navigation rather than a
    /// programmatic fetch.
    pub is_top_level_navigation: bool,
    /// Whether the request's `Content-Type` is one the gate accepts for a
    /// non-simple request whose preflight is being trusted.
    pub content_type_acceptable: bool,
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The request may proceed.
    Allowed,
    /// The request is denied, with the specific reason.
    Rejected(GateRejection),
}

impl GateDecision {
    /// `true` for [`GateDecision::Allowed`].
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Why the gate denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// The enforced CSRF protection mode does not match what the request
    /// presents (e.g. a `csrfToken`-mode session receiving a request with
    /// no way to ever present one).
    ProtocolMismatch,
    /// A required token was not presented.
    TokenMissing,
    /// A presented token did not match the session's record.
    TokenInvalid,
    /// The request's origin is not in the allowed set, and no fallback
    /// token path accepted it.
    OriginDisallowed,
    /// The request was non-simple (would have triggered a preflight) but
    /// carried a `Content-Type` the gate does not trust preflight
    /// validation for.
    NonSimpleRequestUnacceptableContentType,
    /// A simple request attempted to reach a method the gate does not
    /// consider safe for simple requests.
    UnsafeMethodViaSimpleRequest {
        /// Best-effort classification of what produced the simple request,
        /// for diagnostics.
        hint: SimpleRequestHint,
    },
}

/// A best-effort guess at what kind of simple request was blocked, used
/// only to produce a more actionable rejection message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleRequestHint {
    /// An HTML form submission (`Content-Type: application/x-www-form-urlencoded`
    /// or `multipart/form-data`).
    FormPost,
    /// A top-level browser navigation (following a link, typing a URL).
    TopLevelNavigation,
    /// Neither of the above — most likely a crafted cross-origin request.
    CraftedRequest,
}

fn origin_is_allowed(origin: Option<&str>, allowed_origins: &[String]) -> bool {
    match origin {
        Some(origin) => allowed_origins.iter().any(|allowed| allowed == origin),
        None => false,
    }
}

fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Evaluate the security gate for one request.
#[must_use]
pub fn evaluate(
    request: &GateRequest<'_>,
    session: &SecurityRelevantSessionFields,
    allowed_origins: &[String],
) -> GateDecision {
    let props = request.properties;

    match props.csrf_protection_mode {
        CsrfProtectionMode::CsrfToken => {
            // Browsers with known CORS weaknesses can be tricked into
            // attaching credentials to a cross-origin request even past a
            // correct-looking preflight; csrfToken mode refuses them
            // outright rather than trusting any origin signal at all.
            if props.browser_might_have_security_issue {
                return GateDecision::Rejected(GateRejection::OriginDisallowed);
            }
            match (
                session.csrf_tokens.get(request.security_group),
                props.csrf_token.as_deref(),
            ) {
                (Some(expected), Some(presented)) if tokens_match(expected, presented) => {
                    GateDecision::Allowed
                }
                (Some(_), Some(_)) => GateDecision::Rejected(GateRejection::TokenInvalid),
                (_, None) => GateDecision::Rejected(GateRejection::TokenMissing),
                (None, _) => GateDecision::Rejected(GateRejection::ProtocolMismatch),
            }
        }

        CsrfProtectionMode::CorsReadToken => {
            if origin_is_allowed(props.origin.as_deref(), allowed_origins) {
                return GateDecision::Allowed;
            }
            match (
                session.cors_read_tokens.get(request.security_group),
                props.cors_read_token.as_deref(),
            ) {
                (Some(expected), Some(presented)) if tokens_match(expected, presented) => {
                    GateDecision::Allowed
                }
                (Some(_), Some(_)) => GateDecision::Rejected(GateRejection::TokenInvalid),
                (Some(_), None) => GateDecision::Rejected(GateRejection::TokenMissing),
                (None, _) => GateDecision::Rejected(GateRejection::OriginDisallowed),
            }
        }

        CsrfProtectionMode::Preflight => {
            if !props.could_be_simple_request {
                // A non-simple request would have triggered a CORS
                // preflight; the browser already enforced origin there.
                if request.content_type_acceptable {
                    return GateDecision::Allowed;
                }
                return GateDecision::Rejected(
                    GateRejection::NonSimpleRequestUnacceptableContentType,
                );
            }

            if request.method_is_safe {
                return GateDecision::Allowed;
            }

            let hint = if request.is_top_level_navigation {
                SimpleRequestHint::TopLevelNavigation
            } else if request.content_type_acceptable {
                SimpleRequestHint::FormPost
            } else {
                SimpleRequestHint::CraftedRequest
            };
            GateDecision::Rejected(GateRejection::UnsafeMethodViaSimpleRequest { hint })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_properties(mode: CsrfProtectionMode) -> SecurityPropertiesOfHttpRequest {
        SecurityPropertiesOfHttpRequest {
            origin: None,
            destination: "group-a".into(),
            could_be_simple_request: false,
            browser_might_have_security_issue: false,
            csrf_protection_mode: mode,
            cors_read_token: None,
            csrf_token: None,
            read_was_proven: false,
        }
    }

    #[test]
    fn preflight_mode_trusts_non_simple_requests_with_acceptable_content_type() {
        let props = base_properties(CsrfProtectionMode::Preflight);
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: false,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let session = SecurityRelevantSessionFields::default();
        assert_eq!(
            evaluate(&request, &session, &[]),
            GateDecision::Allowed
        );
    }

    #[test]
    fn preflight_mode_allows_simple_get() {
        let mut props = base_properties(CsrfProtectionMode::Preflight);
        props.could_be_simple_request = true;
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: true,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let session = SecurityRelevantSessionFields::default();
        assert!(evaluate(&request, &session, &[]).is_allowed());
    }

    #[test]
    fn preflight_mode_blocks_simple_post_with_form_hint() {
        let mut props = base_properties(CsrfProtectionMode::Preflight);
        props.could_be_simple_request = true;
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: false,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let session = SecurityRelevantSessionFields::default();
        assert_eq!(
            evaluate(&request, &session, &[]),
            GateDecision::Rejected(GateRejection::UnsafeMethodViaSimpleRequest {
                hint: SimpleRequestHint::FormPost
            })
        );
    }

    #[test]
    fn csrf_token_mode_rejects_browsers_with_known_cors_weaknesses() {
        let mut props = base_properties(CsrfProtectionMode::CsrfToken);
        props.browser_might_have_security_issue = true;
        props.csrf_token = Some("tok".into());
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: true,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let mut session = SecurityRelevantSessionFields::default();
        session.csrf_tokens.insert("group-a".into(), "tok".into());
        assert_eq!(
            evaluate(&request, &session, &[]),
            GateDecision::Rejected(GateRejection::OriginDisallowed)
        );
    }

    #[test]
    fn csrf_token_mode_requires_a_matching_token() {
        let mut props = base_properties(CsrfProtectionMode::CsrfToken);
        props.csrf_token = Some("wrong".into());
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: true,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let mut session = SecurityRelevantSessionFields::default();
        session.csrf_tokens.insert("group-a".into(), "right".into());
        assert_eq!(
            evaluate(&request, &session, &[]),
            GateDecision::Rejected(GateRejection::TokenInvalid)
        );

        let mut props_ok = base_properties(CsrfProtectionMode::CsrfToken);
        props_ok.csrf_token = Some("right".into());
        let request_ok = GateRequest {
            properties: &props_ok,
            ..request
        };
        assert!(evaluate(&request_ok, &session, &[]).is_allowed());
    }

    #[test]
    fn cors_read_token_mode_allows_matching_origin_without_a_token() {
        let mut props = base_properties(CsrfProtectionMode::CorsReadToken);
        props.origin = Some("https://trusted.example".into());
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: true,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let session = SecurityRelevantSessionFields::default();
        let allowed = vec!["https://trusted.example".to_string()];
        assert!(evaluate(&request, &session, &allowed).is_allowed());
    }

    #[test]
    fn cors_read_token_mode_falls_back_to_token_on_origin_mismatch() {
        let mut props = base_properties(CsrfProtectionMode::CorsReadToken);
        props.origin = Some("https://evil.example".into());
        props.cors_read_token = Some("tok".into());
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: true,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let mut session = SecurityRelevantSessionFields::default();
        session.cors_read_tokens.insert("group-a".into(), "tok".into());
        assert!(evaluate(&request, &session, &[]).is_allowed());
    }

    #[test]
    fn decision_is_a_pure_function_of_its_inputs() {
        let mut props = base_properties(CsrfProtectionMode::CsrfToken);
        props.csrf_token = Some("tok".into());
        let request = GateRequest {
            properties: &props,
            security_group: "group-a",
            method_is_safe: true,
            is_top_level_navigation: false,
            content_type_acceptable: true,
        };
        let mut session = SecurityRelevantSessionFields::default();
        session.csrf_tokens.insert("group-a".into(), "tok".into());

        let first = evaluate(&request, &session, &[]);
        let second = evaluate(&request, &session, &[]);
        assert_eq!(first, second);
    }
}
