//! Property expressions.
//!
//! A descriptor's property bag is a tree of [`PropertyValue`]s. Every value is
//! one of a literal, a parameter reference, an output reference, a string
//! template, or a nested list/object of the same. Because the reference forms
//! are explicit variants, the graph builder can enumerate every dependency
//! edge of a manifest before any provider call is made.
//!
//! # JSON form
//!
//! | JSON | Value |
//! |------|-------|
//! | `{"param": "admin_password"}` | parameter reference |
//! | `{"output": "cache.host_name"}` | output reference |
//! | `{"template": "rediss://${cache.host_name}:${cache.ssl_port}"}` | template |
//! | `{"literal": {"param": "x"}}` | literal, taken verbatim |
//! | other objects / arrays | nested values |
//! | scalars | literal |
//!
//! Inside a template, `${params.NAME}` reads a parameter and
//! `${RESOURCE.ATTRIBUTE}` reads an output.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ValueError;

const PARAMS_PREFIX: &str = "params.";

/// Pointer to one output attribute of another descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub resource: String,
    pub attribute: String,
}

impl OutputRef {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl FromStr for OutputRef {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValueError::MalformedOutputRef(s.to_string());
        let (resource, attribute) = s.trim().split_once('.').ok_or_else(malformed)?;
        if resource.is_empty()
            || attribute.is_empty()
            || attribute.contains('.')
            || resource.contains(char::is_whitespace)
        {
            return Err(malformed());
        }
        Ok(Self::new(resource, attribute))
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Anything a property can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Parameter(String),
    Output(OutputRef),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter(name) => write!(f, "{PARAMS_PREFIX}{name}"),
            Self::Output(output) => output.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Parameter(String),
    Output(OutputRef),
}

/// A string assembled from text and references, evaluated when the consuming
/// descriptor is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ValueError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| ValueError::UnterminatedPlaceholder(source.to_string()))?;
            let inner = after[..end].trim();
            if inner.is_empty() {
                return Err(ValueError::EmptyPlaceholder(source.to_string()));
            }

            let segment = match inner.strip_prefix(PARAMS_PREFIX) {
                Some("") => return Err(ValueError::EmptyPlaceholder(source.to_string())),
                Some(name) => Segment::Parameter(name.to_string()),
                None => Segment::Output(inner.parse()?),
            };
            segments.push(segment);
            rest = &after[end + 1..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Text(_) => None,
            Segment::Parameter(name) => Some(Reference::Parameter(name.clone())),
            Segment::Output(output) => Some(Reference::Output(output.clone())),
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => f.write_str(text)?,
                Segment::Parameter(name) => write!(f, "${{{PARAMS_PREFIX}{name}}}")?,
                Segment::Output(output) => write!(f, "${{{output}}}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum PropertyValue {
    Literal(Value),
    Parameter(String),
    Output(OutputRef),
    Template(Template),
    List(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    pub fn output(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Output(OutputRef::new(resource, attribute))
    }

    pub fn template(source: &str) -> Result<Self, ValueError> {
        Template::parse(source).map(Self::Template)
    }

    /// Every reference in this value, depth-first, duplicates included.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Parameter(name) => out.push(Reference::Parameter(name.clone())),
            Self::Output(output) => out.push(Reference::Output(output.clone())),
            Self::Template(template) => out.extend(template.references()),
            Self::List(items) => items.iter().for_each(|item| item.collect_references(out)),
            Self::Object(fields) => fields
                .values()
                .for_each(|field| field.collect_references(out)),
        }
    }
}

fn expect_str<'a>(key: &'static str, value: &'a Value) -> Result<&'a str, ValueError> {
    value.as_str().ok_or_else(|| ValueError::NotAString {
        key,
        found: value.to_string(),
    })
}

impl TryFrom<Value> for PropertyValue {
    type Error = ValueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => {
                if map.len() == 1
                    && let Some((key, inner)) = map.iter().next()
                {
                    match key.as_str() {
                        "param" => return Ok(Self::Parameter(expect_str("param", inner)?.into())),
                        "output" => return Ok(Self::Output(expect_str("output", inner)?.parse()?)),
                        "template" => {
                            return Ok(Self::Template(Template::parse(expect_str(
                                "template", inner,
                            )?)?));
                        }
                        "literal" => return Ok(Self::Literal(inner.clone())),
                        _ => {}
                    }
                }
                map.into_iter()
                    .map(|(key, field)| Ok((key, Self::try_from(field)?)))
                    .collect::<Result<BTreeMap<_, _>, ValueError>>()
                    .map(Self::Object)
            }
            Value::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            scalar => Ok(Self::Literal(scalar)),
        }
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Literal(v @ (Value::Object(_) | Value::Array(_))) => json!({"literal": v}),
            PropertyValue::Literal(v) => v,
            PropertyValue::Parameter(name) => json!({"param": name}),
            PropertyValue::Output(output) => json!({"output": output.to_string()}),
            PropertyValue::Template(template) => json!({"template": template.to_string()}),
            PropertyValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            PropertyValue::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, field)| (key, Value::from(field)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_splits_text_params_and_outputs() {
        let t = Template::parse("rediss://:${cache.primary_key}@${cache.host_name}:6380/${params.db}")
            .unwrap();
        assert_eq!(
            t.segments(),
            &[
                Segment::Text("rediss://:".into()),
                Segment::Output(OutputRef::new("cache", "primary_key")),
                Segment::Text("@".into()),
                Segment::Output(OutputRef::new("cache", "host_name")),
                Segment::Text(":6380/".into()),
                Segment::Parameter("db".into()),
            ]
        );
    }

    #[test]
    fn template_display_reproduces_source() {
        let source = "https://${app.fqdn}/health?env=${params.environment}";
        assert_eq!(Template::parse(source).unwrap().to_string(), source);
    }

    #[test]
    fn template_without_placeholders_is_plain_text() {
        let t = Template::parse("no placeholders").unwrap();
        assert_eq!(t.segments(), &[Segment::Text("no placeholders".into())]);
        assert_eq!(t.references().count(), 0);
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        assert!(matches!(
            Template::parse("x ${cache.host_name"),
            Err(ValueError::UnterminatedPlaceholder(_))
        ));
    }

    #[test]
    fn empty_placeholders_are_rejected() {
        assert!(matches!(Template::parse("${}"), Err(ValueError::EmptyPlaceholder(_))));
        assert!(matches!(
            Template::parse("${params.}"),
            Err(ValueError::EmptyPlaceholder(_))
        ));
    }

    #[test]
    fn output_ref_needs_exactly_one_dot() {
        assert!("cache".parse::<OutputRef>().is_err());
        assert!("cache.a.b".parse::<OutputRef>().is_err());
        assert!(".host".parse::<OutputRef>().is_err());
        assert_eq!(
            "cache.host_name".parse::<OutputRef>().unwrap(),
            OutputRef::new("cache", "host_name")
        );
    }
}
