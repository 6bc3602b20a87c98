//! Provider records and the validation step that produces them.
//!
//! The extraction backend returns loosely-typed JSON. [`RawProvider`] mirrors
//! that JSON with permissive field types and aliases for the names LLMs tend
//! to use (`full_name`, `provider_id_insurer`, `zip_code`, …). Only
//! [`RawProvider::validate`] can turn one into a [`ProviderRecord`]; it either
//! returns a fully-typed record or a named [`ValidationError`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One healthcare provider directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Insurer-assigned identifier (PCP#, provider ID). Empty when absent.
    pub identifier: String,
    /// Provider name as printed.
    pub name: String,
    pub credentials: Option<String>,
    pub specialties: Vec<String>,
    /// Clinic, group or organization the provider practises under.
    pub practice_name: Option<String>,
    pub address: Option<Address>,
    pub phone: Option<String>,
    pub telehealth: Telehealth,
    pub languages: Vec<String>,
    pub county: Option<String>,
    /// 1-indexed page the record was extracted from.
    pub source_page: usize,
}

/// A practice location, either split into parts or kept as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Structured(StructuredAddress),
    FreeText(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl StructuredAddress {
    fn is_empty(&self) -> bool {
        self.line1.is_none()
            && self.line2.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip.is_none()
    }
}

impl Address {
    /// First street line, used to match providers to their organization entry.
    pub fn street_line(&self) -> Option<&str> {
        match self {
            Address::Structured(a) => a.line1.as_deref(),
            Address::FreeText(s) => s.lines().next(),
        }
    }
}

/// Whether the provider offers telehealth visits, plus any printed detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telehealth {
    pub available: bool,
    pub details: Option<String>,
}

/// Why a backend entry was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field '{0}' is missing or blank")]
    MissingField(&'static str),

    #[error("field '{field}' has the wrong type: expected {expected}, got {got}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    /// The entry describes an organization, not a person.
    #[error("organization entry '{practice_name}' has no provider name")]
    OrganizationOnly { practice_name: String },
}

/// Page-level context applied to every entry of a page.
#[derive(Debug, Clone, Default)]
pub struct PageDefaults {
    pub page_num: usize,
    pub county: Option<String>,
    pub specialty: Option<String>,
}

/// A provider entry exactly as the backend sent it.
///
/// Unknown fields are ignored. Every field is optional at this stage;
/// [`RawProvider::validate`] decides what is required.
///
/// Each field accepts several key spellings. When more than one is present
/// the first non-null one in the listed order wins, so an entry carrying
/// both `specialty` and `specialties` still decodes.
#[derive(Debug, Clone, Default)]
pub struct RawProvider {
    pub identifier: Option<Value>,
    pub name: Option<Value>,
    pub credentials: Option<Value>,
    pub specialty: Option<Value>,
    pub practice_name: Option<Value>,
    pub address: Option<Value>,
    pub address_line1: Option<Value>,
    pub address_line2: Option<Value>,
    pub city: Option<Value>,
    pub state: Option<Value>,
    pub zip: Option<Value>,
    pub phone: Option<Value>,
    pub telehealth: Option<Value>,
    pub telehealth_details: Option<Value>,
    pub languages: Option<Value>,
    pub county: Option<Value>,
}

impl<'de> Deserialize<'de> for RawProvider {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = Map::<String, Value>::deserialize(deserializer)?;
        let mut take = |keys: &[&str]| -> Option<Value> {
            keys.iter()
                .filter_map(|k| map.remove(*k))
                .find(|v| !v.is_null())
        };
        Ok(Self {
            identifier: take(&["identifier", "provider_id_insurer", "provider_id", "id", "pcp_id"]),
            name: take(&["name", "full_name", "provider_name"]),
            credentials: take(&["credentials"]),
            specialty: take(&["specialty", "specialties"]),
            practice_name: take(&["practice_name"]),
            address: take(&["address"]),
            address_line1: take(&["address_line1"]),
            address_line2: take(&["address_line2"]),
            city: take(&["city"]),
            state: take(&["state"]),
            zip: take(&["zip", "zip_code", "postal_code"]),
            phone: take(&["phone", "phone_number"]),
            telehealth: take(&["telehealth"]),
            telehealth_details: take(&["telehealth_details"]),
            languages: take(&["languages", "languages_spoken"]),
            county: take(&["county"]),
        })
    }
}

impl RawProvider {
    /// The entry's name, if it carries a non-blank string one.
    pub fn name_str(&self) -> Option<&str> {
        self.name
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn practice_str(&self) -> Option<&str> {
        self.practice_name
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn phone_str(&self) -> Option<&str> {
        self.phone
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First street line from either the flat or the nested address form.
    pub fn street_str(&self) -> Option<&str> {
        if let Some(s) = self.address_line1.as_ref().and_then(Value::as_str) {
            return Some(s.trim()).filter(|s| !s.is_empty());
        }
        match self.address.as_ref()? {
            Value::Object(map) => map
                .get("line1")
                .or_else(|| map.get("address_line1"))
                .or_else(|| map.get("street"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty()),
            Value::String(s) => s.lines().next().map(str::trim).filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// Validate the entry into a [`ProviderRecord`].
    ///
    /// `name` is required; every other field is type-checked when present.
    /// Missing county and specialty fall back to `defaults`.
    pub fn validate(self, defaults: &PageDefaults) -> Result<ProviderRecord, ValidationError> {
        let name = match optional_string(self.name.as_ref(), "name")? {
            Some(n) => n,
            None => {
                if let Some(practice) = self.practice_str() {
                    return Err(ValidationError::OrganizationOnly {
                        practice_name: practice.to_string(),
                    });
                }
                return Err(ValidationError::MissingField("name"));
            }
        };

        let identifier = identifier_string(self.identifier.as_ref())?.unwrap_or_default();

        let credentials = match optional_string(self.credentials.as_ref(), "credentials")? {
            Some(c) => Some(c),
            None => credential_suffix(&name),
        };

        let mut specialties = string_list(self.specialty.as_ref(), "specialty")?;
        if specialties.is_empty() {
            specialties.extend(defaults.specialty.clone());
        }

        let address = self.address_value()?;
        let telehealth = telehealth_value(self.telehealth.as_ref(), self.telehealth_details.as_ref())?;
        let languages = string_list(self.languages.as_ref(), "languages")?;
        let county = optional_string(self.county.as_ref(), "county")?.or_else(|| defaults.county.clone());

        Ok(ProviderRecord {
            identifier,
            name,
            credentials,
            specialties,
            practice_name: optional_string(self.practice_name.as_ref(), "practice_name")?,
            address,
            phone: optional_string(self.phone.as_ref(), "phone")?,
            telehealth,
            languages,
            county,
            source_page: defaults.page_num,
        })
    }

    fn address_value(&self) -> Result<Option<Address>, ValidationError> {
        let flat = StructuredAddress {
            line1: optional_string(self.address_line1.as_ref(), "address_line1")?,
            line2: optional_string(self.address_line2.as_ref(), "address_line2")?,
            city: optional_string(self.city.as_ref(), "city")?,
            state: optional_string(self.state.as_ref(), "state")?,
            zip: optional_string(self.zip.as_ref(), "zip")?,
        };

        match self.address.as_ref() {
            None | Some(Value::Null) => Ok((!flat.is_empty()).then_some(Address::Structured(flat))),
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    Ok((!flat.is_empty()).then_some(Address::Structured(flat)))
                } else {
                    Ok(Some(Address::FreeText(s.to_string())))
                }
            }
            Some(Value::Object(map)) => {
                let nested = StructuredAddress {
                    line1: optional_string(
                        map.get("line1").or_else(|| map.get("address_line1")).or_else(|| map.get("street")),
                        "address.line1",
                    )?,
                    line2: optional_string(
                        map.get("line2").or_else(|| map.get("address_line2")),
                        "address.line2",
                    )?,
                    city: optional_string(map.get("city"), "address.city")?,
                    state: optional_string(map.get("state"), "address.state")?,
                    zip: optional_string(
                        map.get("zip").or_else(|| map.get("zip_code")).or_else(|| map.get("postal_code")),
                        "address.zip",
                    )?,
                };
                let merged = StructuredAddress {
                    line1: nested.line1.or(flat.line1),
                    line2: nested.line2.or(flat.line2),
                    city: nested.city.or(flat.city),
                    state: nested.state.or(flat.state),
                    zip: nested.zip.or(flat.zip),
                };
                Ok((!merged.is_empty()).then_some(Address::Structured(merged)))
            }
            Some(other) => Err(ValidationError::InvalidType {
                field: "address",
                expected: "object or string",
                got: type_name(other),
            }),
        }
    }
}

// ── Field helpers ────────────────────────────────────────────────────────

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A trimmed, non-blank string, `None` for null/absent/blank.
fn optional_string(v: Option<&Value>, field: &'static str) -> Result<Option<String>, ValidationError> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(other) => Err(ValidationError::InvalidType {
            field,
            expected: "string",
            got: type_name(other),
        }),
    }
}

/// Identifiers are printed as digits, so integers are accepted as-is.
fn identifier_string(v: Option<&Value>) -> Result<Option<String>, ValidationError> {
    match v {
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(Some(n.to_string())),
        other => optional_string(other, "identifier"),
    }
}

/// A list field sent either as an array of strings or as one delimited string.
fn string_list(v: Option<&Value>, field: &'static str) -> Result<Vec<String>, ValidationError> {
    match v {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(split_list(s)),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => {
                        let s = s.trim();
                        if !s.is_empty() {
                            out.push(s.to_string());
                        }
                    }
                    Value::Null => {}
                    other => {
                        return Err(ValidationError::InvalidType {
                            field,
                            expected: "array of strings",
                            got: type_name(other),
                        })
                    }
                }
            }
            Ok(out)
        }
        Some(other) => Err(ValidationError::InvalidType {
            field,
            expected: "string or array of strings",
            got: type_name(other),
        }),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split([';', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn telehealth_value(flag: Option<&Value>, details: Option<&Value>) -> Result<Telehealth, ValidationError> {
    let extra = optional_string(details, "telehealth_details")?;
    let mut t = match flag {
        None | Some(Value::Null) => Telehealth::default(),
        Some(Value::Bool(b)) => Telehealth {
            available: *b,
            details: None,
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.to_ascii_lowercase().as_str() {
                "" | "n" | "no" | "false" | "none" | "not available" => Telehealth::default(),
                "y" | "yes" | "true" | "available" => Telehealth {
                    available: true,
                    details: None,
                },
                _ => Telehealth {
                    available: true,
                    details: Some(s.to_string()),
                },
            }
        }
        Some(Value::Object(map)) => {
            let available = match map.get("available").or_else(|| map.get("offered")) {
                None | Some(Value::Null) => false,
                Some(Value::Bool(b)) => *b,
                Some(other) => {
                    return Err(ValidationError::InvalidType {
                        field: "telehealth.available",
                        expected: "boolean",
                        got: type_name(other),
                    })
                }
            };
            Telehealth {
                available,
                details: optional_string(map.get("details"), "telehealth.details")?,
            }
        }
        Some(other) => {
            return Err(ValidationError::InvalidType {
                field: "telehealth",
                expected: "boolean, string or object",
                got: type_name(other),
            })
        }
    };
    if t.details.is_none() {
        t.details = extra;
    }
    Ok(t)
}

static RE_CREDENTIAL_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s,])((?:MD|DO|NP|PA-C|PA|FNP|DNP|APRN|CNM|DPM|DDS|DMD|OD|PhD|PsyD|LCSW|LMFT|RN)(?:\s*,\s*(?:MD|DO|NP|PA-C|PA|FNP|DNP|APRN|CNM|DPM|DDS|DMD|OD|PhD|PsyD|LCSW|LMFT|RN))*)\**\s*$")
        .expect("credential regex is valid")
});

/// Trailing credential suffix of a printed name, e.g. `"Patel, Nigam M MD*"` → `MD`.
pub fn credential_suffix(name: &str) -> Option<String> {
    RE_CREDENTIAL_SUFFIX
        .captures(name.trim())
        .map(|c| c[1].to_string())
}
