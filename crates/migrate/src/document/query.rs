//! Filter matching and update operators for the document engine
//!
//! Supports equality and the comparison operators `$eq $ne $gt $gte $lt $lte
//! $in $nin $exists`, combined with `$and` / `$or`. Updates support `$set`,
//! `$unset` and `$inc`. Field paths may be dotted.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{Document, DocumentResult, DocumentStoreError};

/// Check whether a document matches a filter
pub fn matches(doc: &Document, filter: &Document) -> DocumentResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => all_match(doc, condition, key)?,
            "$or" => any_match(doc, condition, key)?,
            op if op.starts_with('$') => {
                return Err(DocumentStoreError::InvalidFilter(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            path => field_matches(lookup(doc, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(condition: &'a Value, op: &str) -> DocumentResult<Vec<&'a Document>> {
    let items = condition.as_array().ok_or_else(|| {
        DocumentStoreError::InvalidFilter(format!("'{}' expects an array of filters", op))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_object().ok_or_else(|| {
                DocumentStoreError::InvalidFilter(format!("'{}' expects an array of filters", op))
            })
        })
        .collect()
}

fn all_match(doc: &Document, condition: &Value, op: &str) -> DocumentResult<bool> {
    for filter in sub_filters(condition, op)? {
        if !matches(doc, filter)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_match(doc: &Document, condition: &Value, op: &str) -> DocumentResult<bool> {
    for filter in sub_filters(condition, op)? {
        if matches(doc, filter)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// An object whose keys are all operators is an operator expression
fn operator_expression(condition: &Value) -> Option<&Map<String, Value>> {
    condition
        .as_object()
        .filter(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn field_matches(value: Option<&Value>, condition: &Value) -> DocumentResult<bool> {
    let Some(operators) = operator_expression(condition) else {
        return Ok(equals(value, condition));
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compare(value, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare(value, operand) == Some(Ordering::Less),
            "$lte" => matches!(
                compare(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            "$in" => in_list(value, operand, op)?,
            "$nin" => !in_list(value, operand, op)?,
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    DocumentStoreError::InvalidFilter("'$exists' expects a boolean".to_string())
                })?;
                value.is_some() == wanted
            }
            other => {
                return Err(DocumentStoreError::InvalidFilter(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality; `null` matches a missing field and array fields match any element
fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(actual) if actual == expected => true,
        Some(Value::Array(items)) => items.iter().any(|item| item == expected),
        Some(_) => false,
    }
}

fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (value?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn in_list(value: Option<&Value>, operand: &Value, op: &str) -> DocumentResult<bool> {
    let candidates = operand.as_array().ok_or_else(|| {
        DocumentStoreError::InvalidFilter(format!("'{}' expects an array", op))
    })?;
    Ok(candidates.iter().any(|candidate| equals(value, candidate)))
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> DocumentResult<()> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut target = doc;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            let entry = target
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = entry.as_object_mut().ok_or_else(|| {
                DocumentStoreError::InvalidUpdate(format!(
                    "cannot create field '{}' inside a non-object value",
                    path
                ))
            })?;
        }
    }
    target.insert(last.to_string(), value);
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => doc.remove(path).is_some(),
        Some((parents, last)) => {
            let mut target = doc;
            for segment in parents.split('.') {
                match target.get_mut(segment).and_then(Value::as_object_mut) {
                    Some(next) => target = next,
                    None => return false,
                }
            }
            target.remove(last).is_some()
        }
    }
}

fn operator_fields<'a>(update: &'a Document, op: &str) -> DocumentResult<Option<&'a Document>> {
    match update.get(op) {
        None => Ok(None),
        Some(Value::Object(fields)) => Ok(Some(fields)),
        Some(_) => Err(DocumentStoreError::InvalidUpdate(format!(
            "'{}' expects an object",
            op
        ))),
    }
}

/// Check an update document before applying it
pub fn validate_update(update: &Document) -> DocumentResult<()> {
    if update.is_empty() {
        return Err(DocumentStoreError::InvalidUpdate(
            "update document is empty".to_string(),
        ));
    }
    for (op, fields) in update {
        if !matches!(op.as_str(), "$set" | "$unset" | "$inc") {
            return Err(DocumentStoreError::InvalidUpdate(format!(
                "unsupported update operator '{}'",
                op
            )));
        }
        let fields = fields.as_object().ok_or_else(|| {
            DocumentStoreError::InvalidUpdate(format!("'{}' expects an object", op))
        })?;
        if fields.contains_key("_id") {
            return Err(DocumentStoreError::InvalidUpdate(
                "the '_id' field cannot be modified".to_string(),
            ));
        }
        if op == "$inc" && fields.values().any(|v| !v.is_number()) {
            return Err(DocumentStoreError::InvalidUpdate(
                "'$inc' expects numeric values".to_string(),
            ));
        }
    }
    Ok(())
}

/// Apply update operators; returns whether the document changed
pub fn apply_update(doc: &mut Document, update: &Document) -> DocumentResult<bool> {
    validate_update(update)?;
    let before = doc.clone();

    if let Some(fields) = operator_fields(update, "$set")? {
        for (path, value) in fields {
            set_path(doc, path, value.clone())?;
        }
    }

    if let Some(fields) = operator_fields(update, "$unset")? {
        for path in fields.keys() {
            unset_path(doc, path);
        }
    }

    if let Some(fields) = operator_fields(update, "$inc")? {
        for (path, delta) in fields {
            let next = match lookup(doc, path) {
                None => delta.clone(),
                Some(Value::Number(current)) => add_numbers(current, delta, path)?,
                Some(_) => {
                    return Err(DocumentStoreError::InvalidUpdate(format!(
                        "cannot apply '$inc' to non-numeric field '{}'",
                        path
                    )))
                }
            };
            set_path(doc, path, next)?;
        }
    }

    Ok(*doc != before)
}

fn add_numbers(current: &serde_json::Number, delta: &Value, path: &str) -> DocumentResult<Value> {
    let overflow =
        || DocumentStoreError::InvalidUpdate(format!("'$inc' overflowed field '{}'", path));

    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return a.checked_add(b).map(Value::from).ok_or_else(overflow);
    }

    let sum = current.as_f64().unwrap_or_default() + delta.as_f64().unwrap_or_default();
    serde_json::Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(overflow)
}

/// Seed document for an upsert: the filter's plain equality fields
pub fn upsert_seed(filter: &Document) -> DocumentResult<Document> {
    let mut seed = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') || operator_expression(condition).is_some() {
            continue;
        }
        set_path(&mut seed, key, condition.clone())?;
    }
    Ok(seed)
}
