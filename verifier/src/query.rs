//! Query constraints and their evaluation
//!
//! A [`Query`] is the typed form of a proof request's `rules` map. The
//! [`QueryEvaluator`] checks it against values decoded from public signals.
//! Each check is an independent predicate; circuits call them in order and the
//! first failure short-circuits with the name of the rule that failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::parse_decimal;
use crate::error::{DecodeError, QueryViolation, SchemaError};
use crate::identity::Identifier;

pub const RULE_CHALLENGE: &str = "challenge";
pub const RULE_ALLOWED_ISSUERS: &str = "allowedIssuers";
pub const RULE_SCHEMA: &str = "schema";
pub const RULE_COUNTRY_BLACKLIST: &str = "countryBlacklist";
pub const RULE_MIN_AGE: &str = "minAge";
pub const RULE_CURRENT_YEAR: &str = "currentYear";
pub const RULE_CURRENT_MONTH: &str = "currentMonth";
pub const RULE_CURRENT_DAY: &str = "currentDay";
pub const RULE_AUDIENCE: &str = "audience";

/// Claim schema named by its document URL and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    pub url: String,
    #[serde(rename = "type")]
    pub schema_type: String,
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.url, self.schema_type)
    }
}

pub const SCHEMA_HASH_LENGTH: usize = 16;

/// 16-byte claim schema hash. Circuits carry it as its little-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaHash(pub [u8; SCHEMA_HASH_LENGTH]);

impl SchemaHash {
    pub fn from_int(value: &BigUint) -> Option<Self> {
        let le = value.to_bytes_le();
        if le.len() > SCHEMA_HASH_LENGTH {
            return None;
        }
        let mut bytes = [0u8; SCHEMA_HASH_LENGTH];
        bytes[..le.len()].copy_from_slice(&le);
        Some(Self(bytes))
    }

    pub fn to_int(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }

    /// Parse the 32-character hex form, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| DecodeError::InvalidHex(e.to_string()))?;
        let got = bytes.len();
        let bytes: [u8; SCHEMA_HASH_LENGTH] =
            bytes.try_into().map_err(|_| DecodeError::InvalidLength {
                kind: "schema hash",
                expected: SCHEMA_HASH_LENGTH,
                got,
            })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaHash({self})")
    }
}

/// Resolves a schema reference to the hash circuits commit to.
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn resolve(&self, schema: &SchemaRef) -> Result<SchemaHash, SchemaError>;
}

/// Static schema table, keyed by `"<url>#<type>"`.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredSchemas {
    schemas: HashMap<String, SchemaHash>,
}

impl ConfiguredSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: &SchemaRef, hash: SchemaHash) -> Self {
        self.schemas.insert(schema.to_string(), hash);
        self
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl FromIterator<(SchemaRef, SchemaHash)> for ConfiguredSchemas {
    fn from_iter<I: IntoIterator<Item = (SchemaRef, SchemaHash)>>(iter: I) -> Self {
        Self {
            schemas: iter
                .into_iter()
                .map(|(schema, hash)| (schema.to_string(), hash))
                .collect(),
        }
    }
}

#[async_trait]
impl SchemaResolver for ConfiguredSchemas {
    async fn resolve(&self, schema: &SchemaRef) -> Result<SchemaHash, SchemaError> {
        self.schemas
            .get(&schema.to_string())
            .copied()
            .ok_or_else(|| SchemaError::Unknown(schema.to_string()))
    }
}

/// Calendar date carried by attribute proofs. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueryDate {
    pub year: u64,
    pub month: u64,
    pub day: u64,
}

impl fmt::Display for QueryDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Typed constraints of one proof request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub challenge: Option<BigUint>,
    pub allowed_issuers: Option<Vec<String>>,
    pub schema: Option<SchemaRef>,
    pub country_blacklist: Option<Vec<u64>>,
    pub min_age: Option<u64>,
    pub current_date: Option<QueryDate>,
    pub audience: Option<String>,
}

fn invalid(rule: &'static str, reason: impl Into<String>) -> QueryViolation {
    QueryViolation::InvalidRule {
        rule,
        reason: reason.into(),
    }
}

fn rule_u64(rule: &'static str, value: &Value) -> Result<u64, QueryViolation> {
    value
        .as_u64()
        .ok_or_else(|| invalid(rule, format!("expected a non-negative integer, got {value}")))
}

fn rule_string(rule: &'static str, value: &Value) -> Result<String, QueryViolation> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(rule, format!("expected a string, got {value}")))
}

fn rule_list<T>(
    rule: &'static str,
    value: &Value,
    item: impl Fn(&'static str, &Value) -> Result<T, QueryViolation>,
) -> Result<Vec<T>, QueryViolation> {
    value
        .as_array()
        .ok_or_else(|| invalid(rule, format!("expected a list, got {value}")))?
        .iter()
        .map(|v| item(rule, v))
        .collect()
}

fn rule_challenge(value: &Value) -> Result<BigUint, QueryViolation> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(BigUint::from)
            .ok_or_else(|| invalid(RULE_CHALLENGE, format!("expected a non-negative integer, got {n}"))),
        Value::String(s) => parse_decimal(s).map_err(|e| invalid(RULE_CHALLENGE, e.to_string())),
        other => Err(invalid(
            RULE_CHALLENGE,
            format!("expected a number or decimal string, got {other}"),
        )),
    }
}

impl Query {
    /// Parse a request's rule map. Unknown rule names are rejected.
    pub fn from_rules(rules: &Map<String, Value>) -> Result<Self, QueryViolation> {
        let mut query = Query::default();
        let (mut year, mut month, mut day) = (None, None, None);

        for (name, value) in rules {
            match name.as_str() {
                RULE_CHALLENGE => query.challenge = Some(rule_challenge(value)?),
                RULE_ALLOWED_ISSUERS => {
                    query.allowed_issuers = Some(rule_list(RULE_ALLOWED_ISSUERS, value, rule_string)?)
                }
                RULE_SCHEMA => {
                    query.schema = Some(
                        serde_json::from_value(value.clone())
                            .map_err(|e| invalid(RULE_SCHEMA, e.to_string()))?,
                    )
                }
                RULE_COUNTRY_BLACKLIST => {
                    query.country_blacklist = Some(rule_list(RULE_COUNTRY_BLACKLIST, value, rule_u64)?)
                }
                RULE_MIN_AGE => query.min_age = Some(rule_u64(RULE_MIN_AGE, value)?),
                RULE_CURRENT_YEAR => year = Some(rule_u64(RULE_CURRENT_YEAR, value)?),
                RULE_CURRENT_MONTH => month = Some(rule_u64(RULE_CURRENT_MONTH, value)?),
                RULE_CURRENT_DAY => day = Some(rule_u64(RULE_CURRENT_DAY, value)?),
                RULE_AUDIENCE => query.audience = Some(rule_string(RULE_AUDIENCE, value)?),
                other => return Err(QueryViolation::UnsupportedRule(other.to_string())),
            }
        }

        query.current_date = match (year, month, day) {
            (None, None, None) => None,
            (Some(year), Some(month), Some(day)) => Some(QueryDate { year, month, day }),
            (None, _, _) => return Err(invalid(RULE_CURRENT_YEAR, "date rules must be given together")),
            (_, None, _) => return Err(invalid(RULE_CURRENT_MONTH, "date rules must be given together")),
            (_, _, None) => return Err(invalid(RULE_CURRENT_DAY, "date rules must be given together")),
        };
        Ok(query)
    }

    /// Names of the rules this query carries.
    pub fn rule_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.challenge.is_some() {
            names.push(RULE_CHALLENGE);
        }
        if self.allowed_issuers.is_some() {
            names.push(RULE_ALLOWED_ISSUERS);
        }
        if self.schema.is_some() {
            names.push(RULE_SCHEMA);
        }
        if self.country_blacklist.is_some() {
            names.push(RULE_COUNTRY_BLACKLIST);
        }
        if self.min_age.is_some() {
            names.push(RULE_MIN_AGE);
        }
        if self.current_date.is_some() {
            names.extend([RULE_CURRENT_YEAR, RULE_CURRENT_MONTH, RULE_CURRENT_DAY]);
        }
        if self.audience.is_some() {
            names.push(RULE_AUDIENCE);
        }
        names
    }

    /// Whether `issuer` is in the allow-list. An absent or empty allow-list
    /// admits nobody.
    pub fn check_issuer(&self, issuer: &str) -> bool {
        self.allowed_issuers
            .as_ref()
            .is_some_and(|allowed| allowed.iter().any(|a| a == issuer))
    }
}

/// Evaluates [`Query`] predicates. Holds the relying party's audience and the
/// schema-resolution collaborator.
#[derive(Clone)]
pub struct QueryEvaluator {
    audience: Option<String>,
    schemas: Arc<dyn SchemaResolver>,
}

impl fmt::Debug for QueryEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEvaluator")
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl Default for QueryEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(ConfiguredSchemas::new()))
    }
}

impl QueryEvaluator {
    pub fn new(schemas: Arc<dyn SchemaResolver>) -> Self {
        Self {
            audience: None,
            schemas,
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    pub fn check_challenge(&self, query: &Query, challenge: &BigUint) -> Result<(), QueryViolation> {
        match &query.challenge {
            Some(expected) if expected != challenge => Err(QueryViolation::ChallengeMismatch {
                expected: expected.to_string(),
                actual: challenge.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Issuer check for circuits where the allow-list is optional.
    pub fn check_issuer(&self, query: &Query, issuer: &Identifier) -> Result<(), QueryViolation> {
        match &query.allowed_issuers {
            None => Ok(()),
            Some(_) => self.require_issuer(query, issuer),
        }
    }

    /// Issuer check for circuits where the allow-list is mandatory.
    pub fn require_issuer(&self, query: &Query, issuer: &Identifier) -> Result<(), QueryViolation> {
        match &query.allowed_issuers {
            None => Err(QueryViolation::MissingRule(RULE_ALLOWED_ISSUERS)),
            Some(allowed) if allowed.is_empty() => Err(QueryViolation::EmptyIssuerAllowList),
            Some(_) => {
                let issuer = issuer.to_string();
                if query.check_issuer(&issuer) {
                    Ok(())
                } else {
                    Err(QueryViolation::IssuerNotAllowed { issuer })
                }
            }
        }
    }

    /// Resolve the query's schema and compare it with the proven one.
    pub async fn check_schema(&self, query: &Query, claim_schema: &SchemaHash) -> Result<(), QueryViolation> {
        let schema = query
            .schema
            .as_ref()
            .ok_or(QueryViolation::MissingRule(RULE_SCHEMA))?;
        let expected = self.schemas.resolve(schema).await?;
        if expected != *claim_schema {
            return Err(QueryViolation::SchemaMismatch {
                expected: expected.to_string(),
                actual: claim_schema.to_string(),
            });
        }
        Ok(())
    }

    pub fn check_country(&self, query: &Query, country: u64) -> Result<(), QueryViolation> {
        match &query.country_blacklist {
            Some(blacklist) if blacklist.contains(&country) => {
                Err(QueryViolation::CountryBlacklisted(country))
            }
            _ => Ok(()),
        }
    }

    pub fn check_min_age(&self, query: &Query, proven: u64) -> Result<(), QueryViolation> {
        match query.min_age {
            Some(required) if proven < required => {
                Err(QueryViolation::AgeBelowMinimum { proven, required })
            }
            _ => Ok(()),
        }
    }

    pub fn check_date(&self, query: &Query, proven: QueryDate) -> Result<(), QueryViolation> {
        match query.current_date {
            Some(required) if proven < required => Err(QueryViolation::DateBeforeCutoff {
                proven: proven.to_string(),
                required: required.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn check_audience(&self, query: &Query) -> Result<(), QueryViolation> {
        let Some(requested) = &query.audience else {
            return Ok(());
        };
        match &self.audience {
            None => Err(QueryViolation::AudienceNotConfigured),
            Some(expected) if expected != requested => Err(QueryViolation::AudienceMismatch {
                expected: expected.clone(),
                actual: requested.clone(),
            }),
            Some(_) => Ok(()),
        }
    }
}
