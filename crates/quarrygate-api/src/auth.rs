//! Bearer-token authentication.
//!
//! HS256 verification hand-rolled from `hmac`+`sha2`+`base64` rather
//! than a dedicated JWT crate, to keep the signing/verification path
//! free of an external JWT dependency.

use base64::Engine;
use hmac::{Hmac, Mac};
use quarrygate_common::GatewayError;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// The authenticated caller, enriched with effective permissions:
/// role permissions plus inherited roles plus token-explicit
/// permissions, de-duplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub role: String,
    pub permissions: HashSet<String>,
}

impl Subject {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission) || self.permissions.contains("*")
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    role: String,
    exp: u64,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    permissions: Vec<String>,
}

/// Maps each role to the roles it inherits from, so permission sets
/// can be flattened once at verification time.
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    inherits: std::collections::HashMap<String, Vec<String>>,
    role_permissions: std::collections::HashMap<String, Vec<String>>,
}

impl RoleHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>, inherits_from: Vec<String>, permissions: Vec<String>) -> Self {
        let role = role.into();
        self.inherits.insert(role.clone(), inherits_from);
        self.role_permissions.insert(role, permissions);
        self
    }

    /// Flattens a role's own permissions plus every inherited role's
    /// permissions, following the chain to a fixed point.
    fn effective_permissions(&self, role: &str) -> HashSet<String> {
        let mut seen_roles = HashSet::new();
        let mut out = HashSet::new();
        let mut frontier = vec![role.to_string()];
        while let Some(r) = frontier.pop() {
            if !seen_roles.insert(r.clone()) {
                continue;
            }
            if let Some(perms) = self.role_permissions.get(&r) {
                out.extend(perms.iter().cloned());
            }
            if let Some(parents) = self.inherits.get(&r) {
                frontier.extend(parents.iter().cloned());
            }
        }
        out
    }
}

pub struct JwtVerifier {
    secret: Vec<u8>,
    roles: RoleHierarchy,
}

impl JwtVerifier {
    pub fn new(secret: impl AsRef<[u8]>, roles: RoleHierarchy) -> Self {
        Self { secret: secret.as_ref().to_vec(), roles }
    }

    pub fn verify(&self, bearer_token: &str) -> Result<Subject, GatewayError> {
        let parts: Vec<&str> = bearer_token.split('.').collect();
        let [header, payload, signature] = parts.as_slice() else {
            return Err(GatewayError::Authentication("malformed bearer token".into()));
        };

        let message = format!("{header}.{payload}");
        let expected = self.sign(&message);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(GatewayError::Authentication("bad token signature".into()));
        }

        let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| GatewayError::Authentication("malformed token payload".into()))?;
        let claims: RawClaims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| GatewayError::Authentication("malformed token claims".into()))?;

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        if claims.exp < now {
            return Err(GatewayError::Authentication("token expired".into()));
        }
        if claims.nbf.map(|nbf| nbf > now).unwrap_or(false) {
            return Err(GatewayError::Authentication("token not yet valid".into()));
        }

        let mut permissions = self.roles.effective_permissions(&claims.role);
        permissions.extend(claims.permissions);

        Ok(Subject { id: claims.sub, role: claims.role, permissions })
    }

    fn sign(&self, message: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extracts the bearer token from an `Authorization` header value.
pub fn extract_bearer(header_value: &str) -> Result<&str, GatewayError> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::Authentication("missing or malformed Authorization header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_for(secret: &[u8], role: &str, exp_offset: i64, permissions: Vec<&str>) -> String {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let exp = (now + exp_offset).max(0) as u64;
        let claims = serde_json::json!({"sub": "u1", "role": role, "exp": exp, "permissions": permissions});
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        let message = format!("{header}.{payload}");
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(message.as_bytes());
        let sig = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{message}.{sig}")
    }

    #[test]
    fn verifies_a_well_formed_token_and_flattens_role_permissions() {
        let roles = RoleHierarchy::new()
            .with_role("viewer", vec![], vec!["users:find".to_string()])
            .with_role("editor", vec!["viewer".to_string()], vec!["users:updateOne".to_string()]);
        let verifier = JwtVerifier::new(b"secret", roles);
        let token = token_for(b"secret", "editor", 3600, vec!["procedures:execute"]);

        let subject = verifier.verify(&token).unwrap();
        assert_eq!(subject.role, "editor");
        assert!(subject.has_permission("users:find"));
        assert!(subject.has_permission("users:updateOne"));
        assert!(subject.has_permission("procedures:execute"));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = JwtVerifier::new(b"secret", RoleHierarchy::new());
        let token = token_for(b"secret", "viewer", -10, vec![]);
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(err.kind().as_str(), "authentication");
    }

    #[test]
    fn rejects_tampered_signature() {
        let verifier = JwtVerifier::new(b"secret", RoleHierarchy::new());
        let token = token_for(b"other-secret", "viewer", 3600, vec![]);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
        assert!(extract_bearer("Basic abc").is_err());
    }
}
