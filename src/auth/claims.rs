//! Claim checks against accepted value sets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::token::Claims;
use crate::error::GatewayError;

/// Shape expected for a claim value.
///
/// Unknown names are kept so the failure surfaces when a check runs, not when
/// configuration loads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClaimType {
    #[default]
    String,
    StringList,
    Unsupported(String),
}

impl From<String> for ClaimType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "string" => ClaimType::String,
            "[]string" | "string_list" => ClaimType::StringList,
            _ => ClaimType::Unsupported(value),
        }
    }
}

impl From<ClaimType> for String {
    fn from(value: ClaimType) -> Self {
        match value {
            ClaimType::String => "string".to_string(),
            ClaimType::StringList => "[]string".to_string(),
            ClaimType::Unsupported(other) => other,
        }
    }
}

/// Where a claim lives in the token and which values it may take.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimCheckerConfig {
    /// Dotted path into the claims, e.g. `resource_access.gateway.roles`.
    pub token_key: String,
    pub claim_type: ClaimType,
    /// Service-wide accepted values, inherited by endpoints that declare no
    /// auth block of their own.
    pub values: Vec<String>,
}

/// Evaluates one claim of a parsed token.
#[derive(Debug, Clone)]
pub struct ClaimChecker {
    token_key: String,
    claim_type: ClaimType,
}

impl ClaimChecker {
    pub fn new(token_key: impl Into<String>, claim_type: ClaimType) -> Self {
        Self {
            token_key: token_key.into(),
            claim_type,
        }
    }

    pub fn from_config(config: &ClaimCheckerConfig) -> Self {
        Self::new(config.token_key.clone(), config.claim_type.clone())
    }

    /// Returns whether the claim holds one of `accepted`.
    pub fn check(&self, claims: &Claims, accepted: &[String]) -> Result<bool, GatewayError> {
        let claim = find_claim(&self.token_key, claims)?;

        match &self.claim_type {
            ClaimType::String => {
                let value = claim
                    .as_str()
                    .ok_or(GatewayError::InvalidClaimType("expected a string"))?;
                Ok(accepted.iter().any(|a| a == value))
            }
            ClaimType::StringList => {
                let values = claim
                    .as_array()
                    .ok_or(GatewayError::InvalidClaimType("expected a list of strings"))?;
                for value in values {
                    let value = value
                        .as_str()
                        .ok_or(GatewayError::InvalidClaimType("expected a list of strings"))?;
                    if accepted.iter().any(|a| a == value) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ClaimType::Unsupported(name) => Err(GatewayError::UnsupportedClaimType(name.clone())),
        }
    }
}

/// Resolve a dotted key by descending through nested objects.
pub fn find_claim<'a>(key: &str, claims: &'a Claims) -> Result<&'a Value, GatewayError> {
    let mut current = claims;
    let mut parts = key.split('.').peekable();

    while let Some(part) = parts.next() {
        let claim = current.get(part).ok_or(GatewayError::ClaimNotFound)?;
        if parts.peek().is_none() {
            return Ok(claim);
        }
        current = claim.as_object().ok_or(GatewayError::InvalidClaim)?;
    }

    Err(GatewayError::ClaimNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => map,
            _ => panic!("claims must be an object"),
        }
    }

    fn accepted() -> Vec<String> {
        vec!["user".to_string(), "manager".to_string()]
    }

    #[test]
    fn test_check_admits() {
        let cases = [
            ("role", ClaimType::String, json!({"role": "user"})),
            ("role", ClaimType::StringList, json!({"role": ["user", "dummy"]})),
            ("access.role", ClaimType::String, json!({"access": {"role": "user"}})),
            (
                "access.role",
                ClaimType::StringList,
                json!({"access": {"role": ["dummy", "user"]}}),
            ),
            (
                "resource_access.gateway.roles",
                ClaimType::StringList,
                json!({"resource_access": {"gateway": {"roles": ["user"]}}}),
            ),
        ];

        for (key, claim_type, token) in cases {
            let checker = ClaimChecker::new(key, claim_type);
            assert!(checker.check(&claims(token), &accepted()).unwrap(), "key {key}");
        }
    }

    #[test]
    fn test_check_rejects_unaccepted_values() {
        let checker = ClaimChecker::new("role", ClaimType::String);
        assert!(!checker.check(&claims(json!({"role": "admin"})), &accepted()).unwrap());

        let checker = ClaimChecker::new("role", ClaimType::StringList);
        assert!(!checker.check(&claims(json!({"role": ["admin"]})), &accepted()).unwrap());
        assert!(!checker.check(&claims(json!({"role": []})), &accepted()).unwrap());
    }

    #[test]
    fn test_check_errors() {
        let checker = ClaimChecker::new("role", ClaimType::String);
        assert!(matches!(
            checker.check(&claims(json!({"invalid_key": "user"})), &accepted()),
            Err(GatewayError::ClaimNotFound)
        ));
        assert!(matches!(
            checker.check(&claims(json!({"role": null})), &accepted()),
            Err(GatewayError::InvalidClaimType(_))
        ));

        let checker = ClaimChecker::new("access.role", ClaimType::String);
        assert!(matches!(
            checker.check(&claims(json!({"access": "role"})), &accepted()),
            Err(GatewayError::InvalidClaim)
        ));

        let checker = ClaimChecker::new("role", ClaimType::StringList);
        assert!(matches!(
            checker.check(&claims(json!({"role": "user"})), &accepted()),
            Err(GatewayError::InvalidClaimType(_))
        ));
        assert!(matches!(
            checker.check(&claims(json!({"role": [1, "user"]})), &accepted()),
            Err(GatewayError::InvalidClaimType(_))
        ));

        let checker = ClaimChecker::new("role", ClaimType::from("unsupported".to_string()));
        assert!(matches!(
            checker.check(&claims(json!({"role": "user"})), &accepted()),
            Err(GatewayError::UnsupportedClaimType(name)) if name == "unsupported"
        ));
    }

    #[test]
    fn test_set_path_round_trip() {
        let token = claims(json!({"a": {"b": {"c": "value"}}}));
        let checker = ClaimChecker::new("a.b.c", ClaimType::String);
        assert!(checker.check(&token, &["value".to_string()]).unwrap());
        assert!(!checker.check(&token, &["other".to_string()]).unwrap());

        let unknown = ClaimChecker::new("a.x", ClaimType::String);
        assert!(matches!(
            unknown.check(&token, &["value".to_string()]),
            Err(GatewayError::ClaimNotFound)
        ));
    }

    #[test]
    fn test_find_claim() {
        let token = claims(json!({"role": "user", "access": {"role": "user"}, "nested": null}));
        assert_eq!(find_claim("role", &token).unwrap(), "user");
        assert_eq!(find_claim("access.role", &token).unwrap(), "user");
        assert!(matches!(find_claim("unknown", &token), Err(GatewayError::ClaimNotFound)));
        assert!(matches!(find_claim("nested.role", &token), Err(GatewayError::InvalidClaim)));
        assert!(matches!(find_claim("", &token), Err(GatewayError::ClaimNotFound)));
        assert!(matches!(
            find_claim("missing.role.test", &token),
            Err(GatewayError::ClaimNotFound)
        ));
    }

    #[test]
    fn test_claim_type_names() {
        assert_eq!(ClaimType::from("string".to_string()), ClaimType::String);
        assert_eq!(ClaimType::from("[]string".to_string()), ClaimType::StringList);
        assert_eq!(ClaimType::from("string_list".to_string()), ClaimType::StringList);
        assert_eq!(String::from(ClaimType::StringList), "[]string");
    }
}
