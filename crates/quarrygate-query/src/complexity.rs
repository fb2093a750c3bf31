//! One complexity cost formula shared by the pipeline builder and the
//! shell script parser, so a query's cost doesn't depend on which
//! surface issued it:
//!
//! `cost = base + 0.1·fields + 5·relationships + 10·depth + 3·dangerousOperators`

use crate::select::SelectionAst;
use serde_json::Value;

pub const BASE_COST: f64 = 5.0;
pub const FIELD_WEIGHT: f64 = 0.1;
pub const RELATIONSHIP_WEIGHT: f64 = 5.0;
pub const DEPTH_WEIGHT: f64 = 10.0;
pub const DANGEROUS_OPERATOR_PENALTY: f64 = 3.0;

/// MongoDB operators that evaluate arbitrary code; always penalized
/// regardless of where they appear in a caller-supplied pipeline.
pub const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

pub fn selection_field_count(nodes: &[SelectionAst]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            SelectionAst::Field(_) => 1,
            SelectionAst::Relationship(rel) => selection_field_count(&rel.fields),
            SelectionAst::Aggregate(_) => 0,
        })
        .sum()
}

pub fn selection_relationship_count(nodes: &[SelectionAst]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            SelectionAst::Field(_) => 0,
            SelectionAst::Relationship(rel) => 1 + selection_relationship_count(&rel.fields),
            SelectionAst::Aggregate(_) => 1,
        })
        .sum()
}

pub fn selection_max_depth(nodes: &[SelectionAst]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            SelectionAst::Field(_) => 1,
            SelectionAst::Relationship(rel) => 1 + selection_max_depth(&rel.fields),
            SelectionAst::Aggregate(_) => 1,
        })
        .max()
        .unwrap_or(0)
}

pub fn dangerous_operator_count(pipeline: &[Value]) -> usize {
    pipeline.iter().map(count_dangerous_in_value).sum()
}

fn count_dangerous_in_value(value: &Value) -> usize {
    match value {
        Value::Object(map) => {
            let mut count = map.keys().filter(|k| DANGEROUS_OPERATORS.contains(&k.as_str())).count();
            for v in map.values() {
                count += count_dangerous_in_value(v);
            }
            count
        }
        Value::Array(arr) => arr.iter().map(count_dangerous_in_value).sum(),
        _ => 0,
    }
}

/// Cost of a selection/pipeline request. `raw_pipeline` is only
/// present for `/crud/:collection/aggregate` calls carrying a
/// caller-supplied pipeline.
pub fn compute_cost(nodes: &[SelectionAst], raw_pipeline: Option<&[Value]>) -> f64 {
    let fields = selection_field_count(nodes) as f64;
    let relationships = selection_relationship_count(nodes) as f64;
    let depth = selection_max_depth(nodes) as f64;
    let dangerous = raw_pipeline.map(dangerous_operator_count).unwrap_or(0) as f64;

    BASE_COST
        + FIELD_WEIGHT * fields
        + RELATIONSHIP_WEIGHT * relationships
        + DEPTH_WEIGHT * depth
        + DANGEROUS_OPERATOR_PENALTY * dangerous
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::parse;

    #[test]
    fn bare_field_list_is_cheap() {
        let ast = parse("name,email").unwrap();
        let cost = compute_cost(&ast, None);
        assert_eq!(cost, BASE_COST + FIELD_WEIGHT * 2.0);
    }

    #[test]
    fn relationships_and_depth_add_weight() {
        let ast = parse("name,orders(orderNumber,shipments(trackingNumber))").unwrap();
        let cost = compute_cost(&ast, None);
        assert!(cost > BASE_COST + RELATIONSHIP_WEIGHT);
    }

    #[test]
    fn dangerous_operator_in_raw_pipeline_is_penalized() {
        let ast = parse("name").unwrap();
        let pipeline = vec![serde_json::json!({"$match": {"$where": "this.x > 1"}})];
        let cost = compute_cost(&ast, Some(&pipeline));
        assert_eq!(cost, BASE_COST + FIELD_WEIGHT + DANGEROUS_OPERATOR_PENALTY);
    }
}
