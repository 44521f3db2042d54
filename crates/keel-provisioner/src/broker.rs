//! Secret/output broker.
//!
//! Holds the attributes each descriptor produced during the current run and
//! evaluates property expressions against them. The per-run store is
//! write-once: every slot is a [`OnceLock`] created up front for each
//! descriptor, so concurrent captures for different descriptors never
//! contend and a second capture for the same descriptor is rejected.
//!
//! Attributes a resource kind marks as secret are sealed on capture. Any
//! value assembled from a secret (a template embedding a key or a secret
//! parameter) is itself sealed, and only [`ResolvedValue::expose`] turns it
//! back into plaintext for the provider's configuration channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use keel_core::secret::REDACTED;
use keel_core::{
    BoundParameters, Manifest, OutputRef, ParameterValue, PropertyValue, ResourceAddr,
    ResourceKind, Secret, Segment, Template,
};
use serde_json::Value;

use crate::error::ProvisionerError;
use crate::provider::{AttributeValue, Attributes};

/// A property expression after evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Plain(Value),
    Secret(Secret),
    List(Vec<ResolvedValue>),
    Object(BTreeMap<String, ResolvedValue>),
}

impl ResolvedValue {
    /// True when this value or anything nested in it is secret.
    pub fn is_secret(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Secret(_) => true,
            Self::List(items) => items.iter().any(Self::is_secret),
            Self::Object(fields) => fields.values().any(Self::is_secret),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Plain(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// JSON with every secret replaced by a placeholder.
    pub fn redacted(&self) -> Value {
        self.render(&|_| Value::String(REDACTED.to_string()))
    }

    /// JSON with plaintext secrets. Only for handing to the provider.
    pub fn expose(&self) -> Value {
        self.render(&|secret| Value::String(secret.expose().to_string()))
    }

    fn render(&self, secret: &dyn Fn(&Secret) -> Value) -> Value {
        match self {
            Self::Plain(value) => value.clone(),
            Self::Secret(s) => secret(s),
            Self::List(items) => Value::Array(items.iter().map(|i| i.render(secret)).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render(secret)))
                    .collect(),
            ),
        }
    }
}

/// Resolved property bag of one descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedProperties(BTreeMap<String, ResolvedValue>);

impl ResolvedProperties {
    pub fn get(&self, name: &str) -> Option<&ResolvedValue> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(ResolvedValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn redacted(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.redacted())).collect())
    }

    pub fn expose(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.expose())).collect())
    }
}

impl FromIterator<(String, ResolvedValue)> for ResolvedProperties {
    fn from_iter<I: IntoIterator<Item = (String, ResolvedValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

struct Slot {
    kind: ResourceKind,
    attributes: OnceLock<Attributes>,
}

pub struct OutputBroker<'a> {
    params: &'a BoundParameters,
    slots: HashMap<String, Slot>,
}

impl<'a> OutputBroker<'a> {
    pub fn new(manifest: &Manifest, params: &'a BoundParameters) -> Self {
        let slots = manifest
            .resources
            .iter()
            .map(|d| {
                let slot = Slot {
                    kind: d.kind,
                    attributes: OnceLock::new(),
                };
                (d.name.clone(), slot)
            })
            .collect();
        Self { params, slots }
    }

    /// Store the attributes `addr` produced. Secret outputs of the kind are
    /// sealed if the provider reported them in plaintext.
    pub fn capture(&self, addr: &ResourceAddr, attributes: Attributes) -> Result<(), ProvisionerError> {
        let slot = self
            .slots
            .get(&addr.name)
            .ok_or_else(|| ProvisionerError::UnknownResource(addr.clone()))?;

        let mut sealed = Attributes::new();
        for (name, value) in attributes.into_inner() {
            let value = match value {
                AttributeValue::Plain(plain) if slot.kind.is_secret_output(&name) => {
                    AttributeValue::Secret(seal(plain))
                }
                other => other,
            };
            sealed.insert(name, value);
        }

        slot.attributes
            .set(sealed)
            .map_err(|_| ProvisionerError::DuplicateCapture(addr.clone()))
    }

    pub fn attributes(&self, name: &str) -> Option<&Attributes> {
        self.slots.get(name).and_then(|slot| slot.attributes.get())
    }

    pub fn is_captured(&self, name: &str) -> bool {
        self.attributes(name).is_some()
    }

    pub fn resolve_properties(
        &self,
        consumer: &str,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<ResolvedProperties, ProvisionerError> {
        properties
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.resolve_value(consumer, value)?)))
            .collect()
    }

    pub fn resolve_value(
        &self,
        consumer: &str,
        value: &PropertyValue,
    ) -> Result<ResolvedValue, ProvisionerError> {
        Ok(match value {
            PropertyValue::Literal(v) => ResolvedValue::Plain(v.clone()),
            PropertyValue::Parameter(name) => match self.parameter(consumer, name)? {
                ParameterValue::Plain(v) => ResolvedValue::Plain(v.clone()),
                ParameterValue::Secret(s) => ResolvedValue::Secret(s.clone()),
            },
            PropertyValue::Output(output) => match self.output(consumer, output)? {
                AttributeValue::Plain(v) => ResolvedValue::Plain(v.clone()),
                AttributeValue::Secret(s) => ResolvedValue::Secret(s.clone()),
            },
            PropertyValue::Template(template) => self.compose(consumer, template)?,
            PropertyValue::List(items) => ResolvedValue::List(
                items
                    .iter()
                    .map(|item| self.resolve_value(consumer, item))
                    .collect::<Result<_, _>>()?,
            ),
            PropertyValue::Object(fields) => ResolvedValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_value(consumer, v)?)))
                    .collect::<Result<_, ProvisionerError>>()?,
            ),
        })
    }

    /// Evaluate a template. The result is sealed if any part was secret.
    fn compose(&self, consumer: &str, template: &Template) -> Result<ResolvedValue, ProvisionerError> {
        let mut out = String::new();
        let mut secret = false;
        for segment in template.segments() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Parameter(name) => match self.parameter(consumer, name)? {
                    ParameterValue::Plain(v) => push_plain(&mut out, v),
                    ParameterValue::Secret(s) => {
                        secret = true;
                        out.push_str(s.expose());
                    }
                },
                Segment::Output(output) => match self.output(consumer, output)? {
                    AttributeValue::Plain(v) => push_plain(&mut out, v),
                    AttributeValue::Secret(s) => {
                        secret = true;
                        out.push_str(s.expose());
                    }
                },
            }
        }
        Ok(if secret {
            ResolvedValue::Secret(Secret::new(out))
        } else {
            ResolvedValue::Plain(Value::String(out))
        })
    }

    fn parameter(&self, consumer: &str, name: &str) -> Result<&ParameterValue, ProvisionerError> {
        self.params
            .get(name)
            .ok_or_else(|| ProvisionerError::MissingParameter {
                consumer: consumer.to_string(),
                name: name.to_string(),
            })
    }

    fn output(&self, consumer: &str, output: &OutputRef) -> Result<&AttributeValue, ProvisionerError> {
        let attributes =
            self.attributes(&output.resource)
                .ok_or_else(|| ProvisionerError::UnresolvedReference {
                    consumer: consumer.to_string(),
                    reference: output.to_string(),
                })?;
        attributes
            .get(&output.attribute)
            .ok_or_else(|| ProvisionerError::MissingOutput {
                consumer: consumer.to_string(),
                reference: output.to_string(),
            })
    }

    /// Redactor covering every secret this run has seen so far.
    pub fn redactor(&self) -> Redactor {
        let mut secrets: Vec<String> = self
            .params
            .secrets()
            .map(|s| s.expose().to_string())
            .collect();
        for slot in self.slots.values() {
            if let Some(attributes) = slot.attributes.get() {
                secrets.extend(attributes.iter().filter_map(|(_, v)| match v {
                    AttributeValue::Secret(s) => Some(s.expose().to_string()),
                    AttributeValue::Plain(_) => None,
                }));
            }
        }
        Redactor::new(secrets)
    }
}

fn push_plain(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

fn seal(value: Value) -> Secret {
    match value {
        Value::String(s) => Secret::new(s),
        other => Secret::new(other.to_string()),
    }
}

/// Scrubs known secret values out of free-form text such as error messages.
///
/// Composite secrets are built from their parts, so redacting every part
/// also redacts every composition.
#[derive(Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl Redactor {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        let mut secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        // longest first so a secret containing another is replaced whole
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }
}
