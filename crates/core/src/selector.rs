//! Label-selector evaluation shared by every resource-matching decision.
//!
//! A selector is a conjunction of `matchLabels` equalities and
//! `matchExpressions` set constraints. A list of selectors matches when at
//! least one member matches; an empty list never matches, a selector with no
//! constraints matches everything.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::error::{Error, Result};

/// Parsed form of a single `matchExpressions` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement<'a> {
    In(&'a str, &'a [String]),
    NotIn(&'a str, &'a [String]),
    Exists(&'a str),
    DoesNotExist(&'a str),
}

impl<'a> Requirement<'a> {
    fn parse(req: &'a LabelSelectorRequirement) -> Result<Self> {
        validate_key(&req.key)?;
        let values: &[String] = req.values.as_deref().unwrap_or(&[]);
        match req.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => Err(Error::validation(format!(
                "selector requirement on {:?}: operator {} needs at least one value",
                req.key, req.operator
            ))),
            "In" => Ok(Requirement::In(&req.key, values)),
            "NotIn" => Ok(Requirement::NotIn(&req.key, values)),
            "Exists" | "DoesNotExist" if !values.is_empty() => Err(Error::validation(format!(
                "selector requirement on {:?}: operator {} takes no values",
                req.key, req.operator
            ))),
            "Exists" => Ok(Requirement::Exists(&req.key)),
            "DoesNotExist" => Ok(Requirement::DoesNotExist(&req.key)),
            other => Err(Error::validation(format!("unknown selector operator {:?}", other))),
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::In(k, vals) => labels.get(*k).map(|v| vals.contains(v)).unwrap_or(false),
            // NotIn matches when the label is absent as well
            Requirement::NotIn(k, vals) => labels.get(*k).map(|v| !vals.contains(v)).unwrap_or(true),
            Requirement::Exists(k) => labels.contains_key(*k),
            Requirement::DoesNotExist(k) => !labels.contains_key(*k),
        }
    }
}

fn validate_name_segment(seg: &str, what: &str) -> Result<()> {
    let ok = !seg.is_empty()
        && seg.len() <= 63
        && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && seg.chars().next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
        && seg.chars().last().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid label {}: {:?}", what, seg)))
    }
}

fn validate_key(key: &str) -> Result<()> {
    match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > 253 {
                return Err(Error::validation(format!("invalid label key prefix: {:?}", key)));
            }
            validate_name_segment(name, "key")
        }
        None => validate_name_segment(key, "key"),
    }
}

fn validate_value(value: &str) -> Result<()> {
    // empty values are legal label values
    if value.is_empty() {
        return Ok(());
    }
    validate_name_segment(value, "value")
}

/// True when the selector carries no constraints at all.
pub fn is_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().map(|m| m.is_empty()).unwrap_or(true)
        && selector.match_expressions.as_ref().map(|e| e.is_empty()).unwrap_or(true)
}

/// Evaluate a single selector against a label set.
pub fn matches(labels: &BTreeMap<String, String>, selector: &LabelSelector) -> Result<bool> {
    let mut result = true;
    if let Some(ml) = &selector.match_labels {
        for (k, v) in ml {
            validate_key(k)?;
            validate_value(v)?;
            result = result && labels.get(k) == Some(v);
        }
    }
    if let Some(exprs) = &selector.match_expressions {
        for expr in exprs {
            let req = Requirement::parse(expr)?;
            result = result && req.matches(labels);
        }
    }
    Ok(result)
}

/// True if the labels satisfy at least one of the selectors.
///
/// Every selector is validated, even after a match was found, so a malformed
/// entry is reported regardless of its position in the list.
pub fn matches_any(labels: &BTreeMap<String, String>, selectors: &[LabelSelector]) -> Result<bool> {
    let mut result = false;
    for selector in selectors {
        let m = matches(labels, selector)?;
        result = result || m;
    }
    Ok(result)
}
