//! Typed condition and update expressions.
//!
//! Callers build [`Condition`] and [`UpdateExpression`] values instead of
//! expression strings. [`DynamoEngine`](crate::client::DynamoEngine) renders
//! them into DynamoDB syntax through an [`ExpressionContext`], which hands out
//! `#nN` name placeholders and `:vN` value placeholders. The in-process engine
//! evaluates the same values directly.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::fmt;

use crate::engine::Item;

/// Document path to an attribute, top-level first.
///
/// `AttributePath::from("admins")` addresses a top-level attribute;
/// `AttributePath::nested(["phoneNumbers", "MobileNumber"])` addresses a map
/// entry. Segments are never split on dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    pub fn new(name: impl Into<String>) -> Self {
        AttributePath(vec![name.into()])
    }

    pub fn nested<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributePath(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The top-level attribute this path lives under.
    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }
}

impl From<&str> for AttributePath {
    fn from(name: &str) -> Self {
        AttributePath::new(name)
    }
}

impl From<String> for AttributePath {
    fn from(name: String) -> Self {
        AttributePath::new(name)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A predicate over the current state of one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    AttributeExists(AttributePath),
    AttributeNotExists(AttributePath),
    Equals(AttributePath, AttributeValue),
    /// Set membership or substring, depending on the attribute's type.
    Contains(AttributePath, AttributeValue),
    BeginsWith(AttributePath, String),
    /// Inclusive range.
    Between(AttributePath, AttributeValue, AttributeValue),
    And(Vec<Condition>),
}

impl Condition {
    pub fn attribute_exists(path: impl Into<AttributePath>) -> Self {
        Condition::AttributeExists(path.into())
    }

    pub fn attribute_not_exists(path: impl Into<AttributePath>) -> Self {
        Condition::AttributeNotExists(path.into())
    }

    pub fn equals(path: impl Into<AttributePath>, value: AttributeValue) -> Self {
        Condition::Equals(path.into(), value)
    }

    pub fn contains(path: impl Into<AttributePath>, value: AttributeValue) -> Self {
        Condition::Contains(path.into(), value)
    }

    pub fn begins_with(path: impl Into<AttributePath>, prefix: impl Into<String>) -> Self {
        Condition::BeginsWith(path.into(), prefix.into())
    }

    pub fn between(path: impl Into<AttributePath>, low: AttributeValue, high: AttributeValue) -> Self {
        Condition::Between(path.into(), low, high)
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut parts) => {
                parts.push(other);
                Condition::And(parts)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Render into DynamoDB condition syntax, registering placeholders in `ctx`.
    pub fn render(&self, ctx: &mut ExpressionContext) -> String {
        match self {
            Condition::AttributeExists(path) => format!("attribute_exists({})", ctx.path(path)),
            Condition::AttributeNotExists(path) => {
                format!("attribute_not_exists({})", ctx.path(path))
            }
            Condition::Equals(path, value) => {
                format!("{} = {}", ctx.path(path), ctx.value(value.clone()))
            }
            Condition::Contains(path, value) => {
                format!("contains({}, {})", ctx.path(path), ctx.value(value.clone()))
            }
            Condition::BeginsWith(path, prefix) => format!(
                "begins_with({}, {})",
                ctx.path(path),
                ctx.value(AttributeValue::S(prefix.clone()))
            ),
            Condition::Between(path, low, high) => format!(
                "{} BETWEEN {} AND {}",
                ctx.path(path),
                ctx.value(low.clone()),
                ctx.value(high.clone())
            ),
            Condition::And(parts) => parts
                .iter()
                .map(|part| match part {
                    Condition::And(_) => format!("({})", part.render(ctx)),
                    _ => part.render(ctx),
                })
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// Sort-key restriction of a query's key condition.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    Between {
        name: String,
        low: AttributeValue,
        high: AttributeValue,
    },
    BeginsWith {
        name: String,
        prefix: String,
    },
}

impl SortKeyCondition {
    pub fn as_condition(&self) -> Condition {
        match self {
            SortKeyCondition::Between { name, low, high } => {
                Condition::between(name.as_str(), low.clone(), high.clone())
            }
            SortKeyCondition::BeginsWith { name, prefix } => {
                Condition::begins_with(name.as_str(), prefix.clone())
            }
        }
    }
}

/// One clause of an update expression.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    /// Assign a value (`SET path = :v`).
    Set(AttributePath, AttributeValue),
    /// Set union for set values, addition for numbers (`ADD path :v`).
    Add(AttributePath, AttributeValue),
    /// Set difference (`DELETE path :v`).
    Delete(AttributePath, AttributeValue),
}

impl UpdateAction {
    fn keyword(&self) -> &'static str {
        match self {
            UpdateAction::Set(..) => "SET",
            UpdateAction::Add(..) => "ADD",
            UpdateAction::Delete(..) => "DELETE",
        }
    }

    pub fn path(&self) -> &AttributePath {
        match self {
            UpdateAction::Set(path, _)
            | UpdateAction::Add(path, _)
            | UpdateAction::Delete(path, _) => path,
        }
    }
}

/// An ordered list of update clauses.
///
/// An empty expression is representable so it can be built up conditionally,
/// but it must never be submitted; components check [`is_empty`](Self::is_empty)
/// before calling the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    actions: Vec<UpdateAction>,
}

impl UpdateExpression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<AttributePath>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Set(path.into(), value));
        self
    }

    pub fn add(mut self, path: impl Into<AttributePath>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Add(path.into(), value));
        self
    }

    pub fn delete(mut self, path: impl Into<AttributePath>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Delete(path.into(), value));
        self
    }

    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Build a SET expression assigning every attribute of `attributes`.
    ///
    /// Attributes are sorted by name so the rendered expression is stable.
    pub fn assign_all(attributes: &Item) -> Self {
        let mut names: Vec<&String> = attributes.keys().collect();
        names.sort();
        names.into_iter().fold(UpdateExpression::new(), |expr, name| {
            expr.set(name.as_str(), attributes[name].clone())
        })
    }

    /// Render into DynamoDB update syntax, grouping clauses by keyword.
    pub fn render(&self, ctx: &mut ExpressionContext) -> String {
        let mut sections: Vec<String> = Vec::new();
        for keyword in ["SET", "ADD", "DELETE"] {
            let clauses: Vec<String> = self
                .actions
                .iter()
                .filter(|action| action.keyword() == keyword)
                .map(|action| match action {
                    UpdateAction::Set(path, value) => {
                        format!("{} = {}", ctx.path(path), ctx.value(value.clone()))
                    }
                    UpdateAction::Add(path, value) | UpdateAction::Delete(path, value) => {
                        format!("{} {}", ctx.path(path), ctx.value(value.clone()))
                    }
                })
                .collect();
            if !clauses.is_empty() {
                sections.push(format!("{} {}", keyword, clauses.join(", ")));
            }
        }
        sections.join(" ")
    }
}

/// Placeholder registry shared by every expression of one request.
#[derive(Debug, Default)]
pub struct ExpressionContext {
    names: HashMap<String, String>,
    name_lookup: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl ExpressionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for one attribute name; repeated names reuse their placeholder.
    pub fn name(&mut self, attribute: &str) -> String {
        if let Some(existing) = self.name_lookup.get(attribute) {
            return existing.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names
            .insert(placeholder.clone(), attribute.to_string());
        self.name_lookup
            .insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    pub fn path(&mut self, path: &AttributePath) -> String {
        path.segments()
            .iter()
            .map(|segment| self.name(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Projection expression listing `paths`.
    pub fn projection(&mut self, paths: &[AttributePath]) -> String {
        paths
            .iter()
            .map(|path| self.path(path))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Name and value maps, `None` when empty (DynamoDB rejects empty maps).
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Option<HashMap<String, String>>,
        Option<HashMap<String, AttributeValue>>,
    ) {
        let names = (!self.names.is_empty()).then_some(self.names);
        let values = (!self.values.is_empty()).then_some(self.values);
        (names, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    #[test]
    fn renders_membership_condition() {
        let mut ctx = ExpressionContext::new();
        let expr = Condition::contains("admins", s("Alice")).render(&mut ctx);
        assert_eq!(expr, "contains(#n0, :v0)");

        let (names, values) = ctx.into_parts();
        assert_eq!(names.unwrap()["#n0"], "admins");
        assert_eq!(values.unwrap()[":v0"], s("Alice"));
    }

    #[test]
    fn renders_grouped_update_clauses() {
        let update = UpdateExpression::new()
            .add("admins", AttributeValue::Ss(vec!["Dave".into()]))
            .set("emailAddress", s("ops@acme.io"))
            .set(
                AttributePath::nested(["phoneNumbers", "MobileNumber"]),
                s("555-0100"),
            );
        let mut ctx = ExpressionContext::new();
        let rendered = update.render(&mut ctx);
        assert_eq!(rendered, "SET #n0 = :v0, #n1.#n2 = :v1 ADD #n3 :v2");
    }

    #[test]
    fn repeated_names_share_a_placeholder() {
        let mut ctx = ExpressionContext::new();
        let cond = Condition::attribute_exists("status")
            .and(Condition::equals("status", s("ACTIVE")));
        assert_eq!(cond.render(&mut ctx), "attribute_exists(#n0) AND #n0 = :v0");
    }

    #[test]
    fn projection_shares_placeholders_with_filter() {
        let mut ctx = ExpressionContext::new();
        let filter = Condition::equals("status", s("ACTIVE")).render(&mut ctx);
        let projection = ctx.projection(&[
            AttributePath::new("status"),
            AttributePath::nested(["phoneNumbers", "MobileNumber"]),
        ]);
        assert_eq!(filter, "#n0 = :v0");
        assert_eq!(projection, "#n0, #n1.#n2");
    }

    #[test]
    fn empty_context_yields_no_maps() {
        let (names, values) = ExpressionContext::new().into_parts();
        assert!(names.is_none());
        assert!(values.is_none());
    }

    #[test]
    fn assign_all_is_sorted_by_attribute() {
        let item: Item = [
            ("status".to_string(), s("ACTIVE")),
            ("email".to_string(), s("a@b.c")),
        ]
        .into_iter()
        .collect();
        let update = UpdateExpression::assign_all(&item);
        let paths: Vec<String> = update.actions().iter().map(|a| a.path().to_string()).collect();
        assert_eq!(paths, ["email", "status"]);
    }

    #[test]
    fn empty_update_is_detectable() {
        assert!(UpdateExpression::new().is_empty());
        assert!(!UpdateExpression::new().set("ttl", AttributeValue::N("60".into())).is_empty());
    }
}
