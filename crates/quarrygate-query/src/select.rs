//! Parses a `select=` expression into a [`SelectionAst`] tree and
//! validates it against a [`CollectionDescriptor`].

use quarrygate_common::GatewayError;
use quarrygate_schema::{CollectionDescriptor, SchemaRegistry};

pub const DEFAULT_MAX_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Modifiers {
    pub order: Vec<(String, SortDirection)>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub inner: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipNode {
    /// Output key. Equal to `relation` unless the request renamed it
    /// with `alias:relation(...)`.
    pub alias: String,
    /// The name under which the target is declared in the owning
    /// collection's `relationships` map.
    pub relation: String,
    pub wildcard: bool,
    pub fields: Vec<SelectionAst>,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateNode {
    pub alias: String,
    pub relation: String,
    pub function: AggregateFunction,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionAst {
    Field(String),
    Relationship(RelationshipNode),
    Aggregate(AggregateNode),
}

/// Parse a top-level `select=` string into its AST forest.
pub fn parse(input: &str) -> Result<Vec<SelectionAst>, GatewayError> {
    let elements = split_top_level(input)?;
    elements.iter().map(|e| parse_element(e)).collect()
}

fn split_top_level(input: &str) -> Result<Vec<String>, GatewayError> {
    let mut depth: i32 = 0;
    let mut start = 0usize;
    let mut parts = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(GatewayError::QueryParse("unbalanced parentheses in select".into()));
                }
            }
            ',' if depth == 0 => {
                parts.push(chars[start..i].iter().collect::<String>());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(GatewayError::QueryParse("unbalanced parentheses in select".into()));
    }
    parts.push(chars[start..].iter().collect::<String>());
    Ok(parts.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && (chars[*pos].is_alphanumeric() || chars[*pos] == '_') {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn matching_paren(chars: &[char], open: usize) -> Result<usize, GatewayError> {
    let mut depth = 0i32;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(GatewayError::QueryParse("unbalanced parentheses in select".into()))
}

fn parse_element(raw: &str) -> Result<SelectionAst, GatewayError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut pos = 0usize;
    let first = read_ident(&chars, &mut pos);
    if first.is_empty() {
        return Err(GatewayError::QueryParse(format!("empty selection element near '{raw}'")));
    }

    let mut alias = first.clone();
    let mut relation = first;
    if pos < chars.len() && chars[pos] == ':' {
        pos += 1;
        relation = read_ident(&chars, &mut pos);
        if relation.is_empty() {
            return Err(GatewayError::QueryParse(format!("expected relationship name after ':' in '{raw}'")));
        }
    }

    if pos >= chars.len() {
        if relation != alias {
            return Err(GatewayError::QueryParse(format!("relationship '{raw}' missing a body")));
        }
        return Ok(SelectionAst::Field(alias));
    }

    match chars[pos] {
        '(' => {
            let close = matching_paren(&chars, pos)?;
            let inner: String = chars[pos + 1..close].iter().collect();
            let inner = inner.trim();
            let (wildcard, fields) = if inner == "*" {
                (true, Vec::new())
            } else {
                let sub_elements = split_top_level(inner)?;
                let fields = sub_elements.iter().map(|e| parse_element(e)).collect::<Result<Vec<_>, _>>()?;
                (false, fields)
            };
            let tail: String = chars[close + 1..].iter().collect();
            let modifiers = parse_modifier_chain(&tail)?;
            Ok(SelectionAst::Relationship(RelationshipNode { alias, relation, wildcard, fields, modifiers }))
        }
        '!' => {
            pos += 1;
            let func_name = read_ident(&chars, &mut pos);
            let function = AggregateFunction::parse(&func_name)
                .ok_or_else(|| GatewayError::QueryParse(format!("unknown aggregate function '{func_name}'")))?;
            let field = if pos < chars.len() && chars[pos] == '(' {
                let close = matching_paren(&chars, pos)?;
                let name: String = chars[pos + 1..close].iter().collect();
                pos = close + 1;
                Some(name.trim().to_string())
            } else {
                None
            };
            if function != AggregateFunction::Count && field.is_none() {
                return Err(GatewayError::QueryParse(format!("aggregate '{func_name}' requires a field")));
            }
            if pos != chars.len() {
                return Err(GatewayError::QueryParse(format!("unexpected trailing input after aggregate in '{raw}'")));
            }
            Ok(SelectionAst::Aggregate(AggregateNode { alias, relation, function, field }))
        }
        other => Err(GatewayError::QueryParse(format!("unexpected character '{other}' in '{raw}'"))),
    }
}

fn parse_modifier_chain(tail: &str) -> Result<Modifiers, GatewayError> {
    let mut modifiers = Modifiers::default();
    if tail.is_empty() {
        return Ok(modifiers);
    }
    for token in tail.split('!').filter(|t| !t.is_empty()) {
        if let Some(rest) = token.strip_prefix("order.") {
            let (field, direction) = rest
                .rsplit_once('.')
                .ok_or_else(|| GatewayError::QueryParse(format!("malformed order modifier '{token}'")))?;
            let direction = match direction {
                "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                other => return Err(GatewayError::QueryParse(format!("unknown sort direction '{other}'"))),
            };
            modifiers.order.push((field.to_string(), direction));
        } else if let Some(rest) = token.strip_prefix("limit.") {
            let n: u64 = rest
                .parse()
                .map_err(|_| GatewayError::QueryParse(format!("malformed limit modifier '{token}'")))?;
            if n == 0 {
                return Err(GatewayError::QueryParse("limit modifier must be positive".into()));
            }
            modifiers.limit = Some(n);
        } else if let Some(rest) = token.strip_prefix("skip.") {
            let n: u64 = rest
                .parse()
                .map_err(|_| GatewayError::QueryParse(format!("malformed skip modifier '{token}'")))?;
            modifiers.skip = Some(n);
        } else if token == "inner" {
            modifiers.inner = true;
        } else {
            return Err(GatewayError::QueryParse(format!("unknown modifier '!{token}'")));
        }
    }
    Ok(modifiers)
}

/// Walk a parsed AST against a collection descriptor, resolving
/// relationship aliases and checking declared fields and depth bound.
pub fn validate(
    nodes: &[SelectionAst],
    root: &CollectionDescriptor,
    registry: &SchemaRegistry,
    max_depth: usize,
) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at_depth(nodes, root, registry, max_depth, 1, &mut errors);
    errors
}

fn validate_at_depth(
    nodes: &[SelectionAst],
    collection: &CollectionDescriptor,
    registry: &SchemaRegistry,
    max_depth: usize,
    depth: usize,
    errors: &mut Vec<String>,
) {
    for node in nodes {
        match node {
            SelectionAst::Field(name) => {
                if !collection.has_field(name) {
                    errors.push(format!("unknown field '{name}' on collection '{}'", collection.name));
                }
            }
            SelectionAst::Relationship(rel) => {
                let Some(descriptor) = collection.relationships.get(&rel.relation) else {
                    errors.push(format!("unknown relationship '{}' on collection '{}'", rel.relation, collection.name));
                    continue;
                };
                if depth > max_depth {
                    errors.push(format!("relationship depth exceeds maximum of {max_depth} at '{}'", rel.alias));
                    continue;
                }
                let Some(target) = registry.get_collection(descriptor.target_collection()) else {
                    errors.push(format!("relationship '{}' targets unregistered collection '{}'", rel.alias, descriptor.target_collection()));
                    continue;
                };
                validate_at_depth(&rel.fields, target, registry, max_depth, depth + 1, errors);
            }
            SelectionAst::Aggregate(agg) => {
                let Some(descriptor) = collection.relationships.get(&agg.relation) else {
                    errors.push(format!("unknown relationship '{}' on collection '{}'", agg.relation, collection.name));
                    continue;
                };
                if let Some(field) = &agg.field {
                    if let Some(target) = registry.get_collection(descriptor.target_collection()) {
                        if !target.has_field(field) {
                            errors.push(format!("unknown field '{field}' on collection '{}'", target.name));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_field_list() {
        let ast = parse("orderNumber,customerId").unwrap();
        assert_eq!(ast, vec![SelectionAst::Field("orderNumber".into()), SelectionAst::Field("customerId".into())]);
    }

    #[test]
    fn parses_relationship_with_alias() {
        let ast = parse("customer(name,email)").unwrap();
        let SelectionAst::Relationship(rel) = &ast[0] else { panic!("expected relationship") };
        assert_eq!(rel.alias, "customer");
        assert_eq!(rel.relation, "customer");
        assert_eq!(rel.fields.len(), 2);
    }

    #[test]
    fn parses_renamed_relationship() {
        let ast = parse("recentOrders:orders(orderNumber)").unwrap();
        let SelectionAst::Relationship(rel) = &ast[0] else { panic!("expected relationship") };
        assert_eq!(rel.alias, "recentOrders");
        assert_eq!(rel.relation, "orders");
    }

    #[test]
    fn parses_wildcard_relationship() {
        let ast = parse("orders(*)").unwrap();
        let SelectionAst::Relationship(rel) = &ast[0] else { panic!("expected relationship") };
        assert!(rel.wildcard);
        assert!(rel.fields.is_empty());
    }

    #[test]
    fn parses_nested_relationships_and_modifiers() {
        let ast = parse("orders(orderNumber,shipments(trackingNumber))!order.totalAmount.desc!limit.5").unwrap();
        let SelectionAst::Relationship(rel) = &ast[0] else { panic!("expected relationship") };
        assert_eq!(rel.fields.len(), 2);
        assert_eq!(rel.modifiers.order, vec![("totalAmount".to_string(), SortDirection::Desc)]);
        assert_eq!(rel.modifiers.limit, Some(5));
    }

    #[test]
    fn parses_aggregate_forms() {
        let ast = parse("orders!count,orders!sum(totalAmount)").unwrap();
        let SelectionAst::Aggregate(count) = &ast[0] else { panic!("expected aggregate") };
        assert_eq!(count.function, AggregateFunction::Count);
        assert!(count.field.is_none());

        let SelectionAst::Aggregate(sum) = &ast[1] else { panic!("expected aggregate") };
        assert_eq!(sum.function, AggregateFunction::Sum);
        assert_eq!(sum.field.as_deref(), Some("totalAmount"));
    }

    #[test]
    fn rejects_unbalanced_parentheses() {
        assert!(parse("orders(orderNumber").is_err());
        assert!(parse("orders)orderNumber(").is_err());
    }

    #[test]
    fn sum_without_field_is_an_error() {
        assert!(parse("orders!sum").is_err());
    }
}
