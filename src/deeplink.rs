// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Redirect Deep-Link Parsing
//!
//! Turns whatever the provider redirected to into a [`RedirectParameters`]
//! record. Input is untrusted and may not be a valid URI at all, so parsing
//! never fails:
//!
//! 1. Structured parse with [`url::Url`] (query, fragment, path).
//! 2. If that fails, manual `#` / `?` / `&` / `=` splitting.
//! 3. If nothing is recognisable, an empty record.
//!
//! ## Extraction Rules
//!
//! Each canonical field is filled from an ordered list of provider aliases.
//! For every alias the query string is consulted before the fragment, and the
//! first non-empty value wins. `status` additionally falls back to the last
//! path segment (`scheme://payment/success`).
//!
//! | Field | Aliases (priority order) |
//! |-------|--------------------------|
//! | `status` | `status`, `collection_status`, last path segment |
//! | `payment_id` | `payment_id`, `collection_id`, `paymentId` |
//! | `external_reference` | `external_reference`, `externalReference` |
//! | `collection_status` | `collection_status` |
//! | `payment_type` | `payment_type`, `payment_type_id` |

use url::{form_urlencoded, Url};

use crate::models::RedirectParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Status,
    PaymentId,
    ExternalReference,
    CollectionStatus,
    PaymentType,
}

struct ExtractionRule {
    field: Field,
    keys: &'static [&'static str],
    path_fallback: bool,
}

const EXTRACTION_RULES: [ExtractionRule; 5] = [
    ExtractionRule {
        field: Field::Status,
        keys: &["status", "collection_status"],
        path_fallback: true,
    },
    ExtractionRule {
        field: Field::PaymentId,
        keys: &["payment_id", "collection_id", "paymentId"],
        path_fallback: false,
    },
    ExtractionRule {
        field: Field::ExternalReference,
        keys: &["external_reference", "externalReference"],
        path_fallback: false,
    },
    ExtractionRule {
        field: Field::CollectionStatus,
        keys: &["collection_status"],
        path_fallback: false,
    },
    ExtractionRule {
        field: Field::PaymentType,
        keys: &["payment_type", "payment_type_id"],
        path_fallback: false,
    },
];

const APPROVED_STATUSES: [&str; 4] = ["approved", "success", "succeeded", "paid"];
const PENDING_STATUSES: [&str; 4] = ["pending", "in_process", "in_mediation", "processing"];
// "null" is what the provider sends as collection_status when the buyer
// backs out of the hosted page.
const REJECTED_STATUSES: [&str; 6] = [
    "rejected",
    "failure",
    "failed",
    "cancelled",
    "canceled",
    "null",
];

/// Coarse meaning of a redirect's `status` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFamily {
    Approved,
    Pending,
    Rejected,
    Unknown,
}

impl StatusFamily {
    pub fn classify(status: Option<&str>) -> Self {
        let Some(status) = status else {
            return Self::Unknown;
        };
        let status = status.trim().to_ascii_lowercase();
        let status = status.as_str();
        if APPROVED_STATUSES.contains(&status) {
            Self::Approved
        } else if PENDING_STATUSES.contains(&status) {
            Self::Pending
        } else if REJECTED_STATUSES.contains(&status) {
            Self::Rejected
        } else {
            Self::Unknown
        }
    }
}

/// Raw pieces of a redirect before alias resolution.
#[derive(Debug, Default)]
struct RawLink {
    query: Vec<(String, String)>,
    fragment: Vec<(String, String)>,
    last_segment: Option<String>,
}

/// Result of [`DeepLinkParser::inspect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRedirect {
    pub params: RedirectParameters,
    /// The input was not a valid URI and was split by hand. Values taken
    /// from such input must not be acted on without a backend check.
    pub malformed: bool,
}

/// Parser for provider redirects back into the app.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepLinkParser;

impl DeepLinkParser {
    /// Parse a raw redirect. Never fails; unrecognisable input yields an
    /// empty record.
    pub fn parse(raw: &str) -> RedirectParameters {
        Self::inspect(raw).params
    }

    /// Like [`DeepLinkParser::parse`], also reporting whether the manual
    /// fallback had to be used.
    pub fn inspect(raw: &str) -> ParsedRedirect {
        let raw = raw.trim();
        if raw.is_empty() {
            return ParsedRedirect::default();
        }
        match structured(raw) {
            Some(link) => ParsedRedirect {
                params: resolve(&link),
                malformed: false,
            },
            None => ParsedRedirect {
                params: resolve(&manual(raw)),
                malformed: true,
            },
        }
    }

    /// Canonical app URI if `uri` targets `scheme`, either directly or as an
    /// Android `intent://...#Intent;scheme=...;end` wrapper.
    pub fn match_app_scheme(uri: &str, scheme: &str) -> Option<String> {
        let uri = uri.trim();
        let prefix_len = scheme.len() + 1;
        if uri.len() > prefix_len
            && uri.is_char_boundary(scheme.len())
            && uri[..scheme.len()].eq_ignore_ascii_case(scheme)
            && uri.as_bytes()[scheme.len()] == b':'
        {
            return Some(uri.to_string());
        }

        let rest = uri
            .strip_prefix("intent://")
            .or_else(|| uri.strip_prefix("INTENT://"))?;
        let (body, params) = rest.split_once("#Intent;")?;
        let targets_scheme = params.split(';').any(|param| {
            param
                .strip_prefix("scheme=")
                .is_some_and(|value| value.eq_ignore_ascii_case(scheme))
        });
        targets_scheme.then(|| format!("{scheme}://{body}"))
    }

    /// Build a redirect URI carrying `params`, in the shape the provider uses.
    pub fn build_redirect_uri(scheme: &str, params: &RedirectParameters) -> String {
        let mut uri = format!("{scheme}://payment");
        if let Some(status) = &params.status {
            let segment: String = form_urlencoded::byte_serialize(status.as_bytes()).collect();
            uri.push('/');
            uri.push_str(&segment);
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        let pairs = [
            ("status", &params.status),
            ("payment_id", &params.payment_id),
            ("external_reference", &params.external_reference),
            ("collection_status", &params.collection_status),
            ("payment_type", &params.payment_type),
        ];
        let mut any = false;
        for (key, value) in pairs {
            if let Some(value) = value {
                query.append_pair(key, value);
                any = true;
            }
        }
        if any {
            uri.push('?');
            uri.push_str(&query.finish());
        }
        uri
    }
}

fn structured(raw: &str) -> Option<RawLink> {
    let url = Url::parse(raw).ok()?;

    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let fragment = url.fragment().map(fragment_pairs).unwrap_or_default();
    let last_segment = match url.path_segments() {
        Some(segments) => segments.filter(|s| !s.is_empty()).last().map(str::to_string),
        // `scheme:payment/success` has an opaque path.
        None => last_non_empty(url.path().split('/')),
    };

    Some(RawLink {
        query,
        fragment,
        last_segment,
    })
}

fn manual(raw: &str) -> RawLink {
    let (before_fragment, fragment) = match raw.split_once('#') {
        Some((head, tail)) => (head, Some(tail)),
        None => (raw, None),
    };
    let (base, query) = match before_fragment.split_once('?') {
        Some((head, tail)) => (head, Some(tail)),
        None => (before_fragment, None),
    };

    // With an authority, the first component is the host, not a path segment.
    let last_segment = match base.split_once("://") {
        Some((_, rest)) => last_non_empty(rest.split('/').skip(1)),
        None => last_non_empty(base.split('/')),
    };

    RawLink {
        query: query.map(pairs).unwrap_or_default(),
        fragment: fragment.map(fragment_pairs).unwrap_or_default(),
        last_segment,
    }
}

fn pairs(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Fragments are either `a=1&b=2` or a hash route such as `/result?a=1`.
fn fragment_pairs(fragment: &str) -> Vec<(String, String)> {
    match fragment.split_once('?') {
        Some((_, query)) => pairs(query),
        None => pairs(fragment),
    }
}

fn last_non_empty<'a>(segments: impl Iterator<Item = &'a str>) -> Option<String> {
    segments
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim())
        .find(|v| !v.is_empty())
}

fn resolve(link: &RawLink) -> RedirectParameters {
    let mut params = RedirectParameters::default();
    for rule in &EXTRACTION_RULES {
        let value = rule
            .keys
            .iter()
            .find_map(|key| lookup(&link.query, key).or_else(|| lookup(&link.fragment, key)))
            .map(str::to_string)
            .or_else(|| {
                if rule.path_fallback {
                    link.last_segment.clone()
                } else {
                    None
                }
            });

        let slot = match rule.field {
            Field::Status => &mut params.status,
            Field::PaymentId => &mut params.payment_id,
            Field::ExternalReference => &mut params.external_reference,
            Field::CollectionStatus => &mut params.collection_status,
            Field::PaymentType => &mut params.payment_type,
        };
        *slot = value;
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_query_string() {
        let params = DeepLinkParser::parse(
            "marketplace://payment/success?status=approved&payment_id=999&external_reference=oferta_42_total&collection_status=approved&payment_type=credit_card",
        );
        assert_eq!(params.status.as_deref(), Some("approved"));
        assert_eq!(params.payment_id.as_deref(), Some("999"));
        assert_eq!(params.external_reference.as_deref(), Some("oferta_42_total"));
        assert_eq!(params.collection_status.as_deref(), Some("approved"));
        assert_eq!(params.payment_type.as_deref(), Some("credit_card"));
    }

    #[test]
    fn status_falls_back_to_collection_status_then_path() {
        let params = DeepLinkParser::parse("marketplace://payment/success?collection_status=pending");
        assert_eq!(params.status.as_deref(), Some("pending"));

        let params = DeepLinkParser::parse("marketplace://payment/failure?payment_id=5");
        assert_eq!(params.status.as_deref(), Some("failure"));
        assert_eq!(params.payment_id.as_deref(), Some("5"));
    }

    #[test]
    fn empty_values_do_not_win() {
        let params = DeepLinkParser::parse(
            "marketplace://payment/pending?status=&collection_status=in_process",
        );
        assert_eq!(params.status.as_deref(), Some("in_process"));
    }

    #[test]
    fn payment_id_resolves_aliases_in_order() {
        let params = DeepLinkParser::parse("marketplace://payment?collection_id=11&paymentId=22");
        assert_eq!(params.payment_id.as_deref(), Some("11"));

        let params = DeepLinkParser::parse("marketplace://payment?paymentId=22&payment_id=33");
        assert_eq!(params.payment_id.as_deref(), Some("33"));
    }

    #[test]
    fn reads_fragment_parameters() {
        let params = DeepLinkParser::parse(
            "marketplace://payment#status=rejected&external_reference=oferta_1_parts",
        );
        assert_eq!(params.status.as_deref(), Some("rejected"));
        assert_eq!(params.external_reference.as_deref(), Some("oferta_1_parts"));
    }

    #[test]
    fn query_beats_fragment_for_same_key() {
        let params = DeepLinkParser::parse("marketplace://payment?status=approved#status=rejected");
        assert_eq!(params.status.as_deref(), Some("approved"));
    }

    #[test]
    fn reads_hash_route_fragment() {
        let params = DeepLinkParser::parse("https://shop.example.com/#/result?status=approved&payment_id=3");
        assert_eq!(params.status.as_deref(), Some("approved"));
        assert_eq!(params.payment_id.as_deref(), Some("3"));
    }

    #[test]
    fn falls_back_to_manual_split_for_invalid_uri() {
        // Spaces and no scheme make this unparseable for `Url`.
        let params = DeepLinkParser::parse("payment result/success?payment_id=77&external_reference=oferta_7_total");
        assert_eq!(params.status.as_deref(), Some("success"));
        assert_eq!(params.payment_id.as_deref(), Some("77"));
        assert_eq!(params.external_reference.as_deref(), Some("oferta_7_total"));
    }

    #[test]
    fn inspect_flags_manual_fallback() {
        let garbled = DeepLinkParser::inspect("not a uri/failure");
        assert!(garbled.malformed);
        assert_eq!(garbled.params.status.as_deref(), Some("failure"));

        let clean = DeepLinkParser::inspect("marketplace://payment/failure?payment_id=1");
        assert!(!clean.malformed);
        assert!(!DeepLinkParser::inspect("").malformed);
    }

    #[test]
    fn garbage_yields_empty_record() {
        assert!(DeepLinkParser::parse("").is_empty());
        assert!(DeepLinkParser::parse("   ").is_empty());
        assert!(DeepLinkParser::parse("marketplace://payment").is_empty());
    }

    #[test]
    fn opaque_path_still_yields_status() {
        let params = DeepLinkParser::parse("marketplace:payment/approved");
        assert_eq!(params.status.as_deref(), Some("approved"));
    }

    #[test]
    fn classify_status_families() {
        assert_eq!(StatusFamily::classify(Some("approved")), StatusFamily::Approved);
        assert_eq!(StatusFamily::classify(Some("SUCCESS")), StatusFamily::Approved);
        assert_eq!(StatusFamily::classify(Some("in_process")), StatusFamily::Pending);
        assert_eq!(StatusFamily::classify(Some("pending")), StatusFamily::Pending);
        assert_eq!(StatusFamily::classify(Some("cancelled")), StatusFamily::Rejected);
        assert_eq!(StatusFamily::classify(Some("failure")), StatusFamily::Rejected);
        assert_eq!(StatusFamily::classify(Some("rejected")), StatusFamily::Rejected);
        assert_eq!(StatusFamily::classify(Some("callback")), StatusFamily::Unknown);
        assert_eq!(StatusFamily::classify(None), StatusFamily::Unknown);
    }

    #[test]
    fn matches_app_scheme_case_insensitively() {
        assert_eq!(
            DeepLinkParser::match_app_scheme("Marketplace://payment/success", "marketplace"),
            Some("Marketplace://payment/success".to_string())
        );
        assert_eq!(
            DeepLinkParser::match_app_scheme("https://provider.example/checkout", "marketplace"),
            None
        );
        assert_eq!(
            DeepLinkParser::match_app_scheme("marketplacex://payment", "marketplace"),
            None
        );
    }

    #[test]
    fn unwraps_android_intent_uri() {
        let uri = "intent://payment/success?status=approved#Intent;scheme=marketplace;package=com.example.app;end";
        assert_eq!(
            DeepLinkParser::match_app_scheme(uri, "marketplace"),
            Some("marketplace://payment/success?status=approved".to_string())
        );
        let other = "intent://payment/success#Intent;scheme=otherapp;end";
        assert_eq!(DeepLinkParser::match_app_scheme(other, "marketplace"), None);
    }

    #[test]
    fn build_then_parse_keeps_parameters() {
        let params = RedirectParameters {
            status: Some("approved".into()),
            payment_id: Some("999".into()),
            external_reference: Some("oferta_42_total".into()),
            collection_status: Some("approved".into()),
            payment_type: Some("account_money".into()),
        };
        let uri = DeepLinkParser::build_redirect_uri("marketplace", &params);
        assert!(uri.starts_with("marketplace://payment/approved?"));
        assert_eq!(DeepLinkParser::parse(&uri), params);
    }
}
