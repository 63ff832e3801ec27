//! Condition evaluation.
//!
//! Expressions are parsed once at load time (see [`milestone_playbook::parse_condition`])
//! and evaluated here against an [`EvalContext`]. Evaluation is total: a path that
//! resolves to nothing (or to `null`) makes its leaf `false`, whatever the operator,
//! so visibility gating fails closed.

use serde_json::Value;

use milestone_playbook::{ConditionExpr, FieldPath, Literal, Operator};
use milestone_types::{FieldValues, ProcessFlags, RawStateMap};

/// Values an expression may refer to.
///
/// Single-segment paths look in the evaluating node's own fields first, then in the
/// process flags unless the context is [`own_fields_only`](Self::own_fields_only).
/// `node_id.field` paths read that node's submitted fields.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    own: Option<&'a FieldValues>,
    submissions: &'a RawStateMap,
    flags: &'a ProcessFlags,
    own_only: bool,
}

impl<'a> EvalContext<'a> {
    pub fn new(submissions: &'a RawStateMap, flags: &'a ProcessFlags) -> Self {
        Self {
            own: None,
            submissions,
            flags,
            own_only: false,
        }
    }

    /// Evaluate relative to one node's submitted fields.
    pub fn with_own(mut self, fields: Option<&'a FieldValues>) -> Self {
        self.own = fields;
        self
    }

    /// Stop single-segment paths from falling back to process flags. Outcome
    /// matching uses this so a flag can never stand in for a submitted answer.
    pub fn own_fields_only(mut self) -> Self {
        self.own_only = true;
        self
    }

    fn local(&self, key: &str) -> Option<&'a Value> {
        let own = self.own.and_then(|own| own.get(key));
        if self.own_only {
            own
        } else {
            own.or_else(|| self.flags.get(key))
        }
    }

    /// Resolve a path to a value. `None` for unknown paths and for `null`.
    pub fn lookup(&self, path: &FieldPath) -> Option<&'a Value> {
        let (first, rest) = path.segments.split_first()?;

        let found = if rest.is_empty() {
            self.local(first)
        } else if let Some(raw) = self.submissions.get(first) {
            let (field, nested) = rest.split_first()?;
            raw.submitted_fields
                .get(field)
                .and_then(|v| walk(v, nested))
        } else {
            self.local(first).and_then(|v| walk(v, rest))
        };

        found.filter(|v| !v.is_null())
    }
}

fn walk<'v>(value: &'v Value, segments: &[String]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// Evaluate a parsed condition. Never fails.
pub fn evaluate_condition(expr: &ConditionExpr, ctx: &EvalContext<'_>) -> bool {
    match expr {
        ConditionExpr::Any(children) => children.iter().any(|c| evaluate_condition(c, ctx)),
        ConditionExpr::All(children) => children.iter().all(|c| evaluate_condition(c, ctx)),
        ConditionExpr::Truthy(path) => known(path, ctx).is_some_and(is_truthy),
        ConditionExpr::Compare { path, op, value } => match known(path, ctx) {
            None => false,
            Some(actual) => match op {
                Operator::Eq => matches_literal(actual, value),
                Operator::NotEq => !matches_literal(actual, value),
            },
        },
        ConditionExpr::In { path, values } => {
            known(path, ctx).is_some_and(|actual| values.iter().any(|v| matches_literal(actual, v)))
        }
    }
}

fn known<'a>(path: &FieldPath, ctx: &EvalContext<'a>) -> Option<&'a Value> {
    let value = ctx.lookup(path);
    if value.is_none() {
        tracing::debug!(path = %path, "Condition references unknown field, leaf evaluates false");
    }
    value
}

/// JSON truthiness: `false`, `0`, `""`, `"false"`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Equality between a submitted value and a literal. Arrays (multi-select
/// answers) match when any element matches.
fn matches_literal(actual: &Value, literal: &Literal) -> bool {
    match (actual, literal) {
        (Value::Array(items), _) => items.iter().any(|item| matches_literal(item, literal)),
        (Value::String(s), Literal::String(l)) => s == l,
        (Value::String(s), Literal::Number(n)) => s.trim().parse::<f64>().is_ok_and(|x| x == *n),
        (Value::String(s), Literal::Boolean(b)) => s.trim() == b.to_string(),
        (Value::Number(x), Literal::Number(n)) => x.as_f64().is_some_and(|x| x == *n),
        (Value::Number(x), Literal::String(l)) => match (x.as_f64(), l.trim().parse::<f64>()) {
            (Some(x), Ok(n)) => x == n,
            _ => false,
        },
        (Value::Bool(b), Literal::Boolean(l)) => b == l,
        (Value::Bool(b), Literal::String(l)) => l.trim() == b.to_string(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milestone_playbook::parse_condition;
    use milestone_types::{NodeState, RawNodeState};
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> FieldValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(source: &str, own: &FieldValues, raw: &RawStateMap, flags: &ProcessFlags) -> bool {
        let expr = parse_condition(source).unwrap();
        let ctx = EvalContext::new(raw, flags).with_own(Some(own));
        evaluate_condition(&expr, &ctx)
    }

    #[test]
    fn equality_against_own_fields() {
        let own = fields(&[("flag", json!("X"))]);
        let (raw, flags) = (RawStateMap::new(), ProcessFlags::new());
        assert!(eval("flag == \"X\"", &own, &raw, &flags));
        assert!(eval("flag = X", &own, &raw, &flags));
        assert!(!eval("flag == Y", &own, &raw, &flags));
        assert!(eval("flag != Y", &own, &raw, &flags));
    }

    #[test]
    fn unknown_field_is_false_for_every_operator() {
        let (own, raw, flags) = (FieldValues::new(), RawStateMap::new(), ProcessFlags::new());
        assert!(!eval("missing == X", &own, &raw, &flags));
        assert!(!eval("missing != X", &own, &raw, &flags));
        assert!(!eval("missing in [X, Y]", &own, &raw, &flags));
        assert!(!eval("missing", &own, &raw, &flags));
        assert!(!eval("S9.field != X", &own, &raw, &flags));
    }

    #[test]
    fn own_fields_only_ignores_flags_but_reads_other_nodes() {
        let mut raw = RawStateMap::new();
        raw.insert(
            "S1".into(),
            RawNodeState::new(NodeState::Done).with_field("program", json!("phd")),
        );
        let flags: ProcessFlags = [("outcome".to_string(), json!("approve"))].into_iter().collect();
        let own = FieldValues::new();
        let ctx = EvalContext::new(&raw, &flags).with_own(Some(&own));

        let by_flag = parse_condition("outcome == approve").unwrap();
        assert!(evaluate_condition(&by_flag, &ctx));
        assert!(!evaluate_condition(&by_flag, &ctx.own_fields_only()));

        let cross = parse_condition("S1.program == phd").unwrap();
        assert!(evaluate_condition(&cross, &ctx.own_fields_only()));
    }

    #[test]
    fn null_counts_as_unknown() {
        let own = fields(&[("flag", Value::Null)]);
        let (raw, flags) = (RawStateMap::new(), ProcessFlags::new());
        assert!(!eval("flag != X", &own, &raw, &flags));
    }

    #[test]
    fn membership_and_multiselect() {
        let own = fields(&[
            ("track", json!("phd")),
            ("languages", json!(["kz", "en"])),
        ]);
        let (raw, flags) = (RawStateMap::new(), ProcessFlags::new());
        assert!(eval("track in [master, phd]", &own, &raw, &flags));
        assert!(!eval("track in [master]", &own, &raw, &flags));
        assert!(eval("languages == en", &own, &raw, &flags));
        assert!(eval("languages in [ru, kz]", &own, &raw, &flags));
        assert!(!eval("languages == ru", &own, &raw, &flags));
    }

    #[test]
    fn cross_node_reference_reads_submission() {
        let mut raw = RawStateMap::new();
        raw.insert(
            "S1_profile".into(),
            RawNodeState::new(NodeState::Done)
                .with_field("years_since_graduation", json!("more_than_3")),
        );
        let (own, flags) = (FieldValues::new(), ProcessFlags::new());
        assert!(eval(
            "S1_profile.years_since_graduation == more_than_3",
            &own,
            &raw,
            &flags
        ));
        assert!(!eval("S1_profile.other == x", &own, &raw, &flags));
    }

    #[test]
    fn flags_are_consulted_after_own_fields() {
        let own = fields(&[("rp_required", json!(false))]);
        let raw = RawStateMap::new();
        let mut flags = ProcessFlags::new();
        flags.insert("rp_required".into(), json!(true));
        flags.insert("dissertation_language".into(), json!("kz"));

        assert!(!eval("rp_required", &own, &raw, &flags));
        assert!(eval("rp_required", &FieldValues::new(), &raw, &flags));
        assert!(eval("dissertation_language == kz", &own, &raw, &flags));
    }

    #[test]
    fn mixed_scalar_comparisons() {
        let own = fields(&[
            ("count", json!(4)),
            ("agreed", json!(true)),
            ("score", json!("12.5")),
            ("answer", json!("true")),
        ]);
        let (raw, flags) = (RawStateMap::new(), ProcessFlags::new());
        assert!(eval("count == 4", &own, &raw, &flags));
        assert!(eval("count == \"4\"", &own, &raw, &flags));
        assert!(eval("agreed == true", &own, &raw, &flags));
        assert!(eval("agreed == 'true'", &own, &raw, &flags));
        assert!(eval("score == 12.5", &own, &raw, &flags));
        assert!(eval("answer == true", &own, &raw, &flags));
        assert!(!eval("agreed == 1", &own, &raw, &flags));
    }

    #[test]
    fn nested_object_paths() {
        let own = fields(&[("profile", json!({"track": "phd"}))]);
        let (raw, flags) = (RawStateMap::new(), ProcessFlags::new());
        assert!(eval("profile.track == phd", &own, &raw, &flags));
        assert!(!eval("profile.missing == phd", &own, &raw, &flags));
    }

    #[test]
    fn combinators() {
        let own = fields(&[("a", json!("1")), ("b", json!("2"))]);
        let (raw, flags) = (RawStateMap::new(), ProcessFlags::new());
        assert!(eval("a == 1 && b == 2", &own, &raw, &flags));
        assert!(!eval("a == 1 && missing == 2", &own, &raw, &flags));
        assert!(eval("missing == 2 || b == 2", &own, &raw, &flags));
        assert!(eval("(missing || a == 1) && b in [2, 3]", &own, &raw, &flags));
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!(["a"])));
    }
}
