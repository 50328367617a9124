//! Predicate DSL: a conjunction of `field OP literal` atoms joined by `and`
//! (spec §4.2). Ported from the original's `_basic_eval`/`_eval_single`
//! string-split parser, kept deliberately as forgiving — a malformed or
//! unparsable atom evaluates to `false` rather than raising, matching
//! "missing fields evaluate the atom to false (never raises)".

use std::cmp::Ordering;

use crate::model::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    /// Longest operators first so `==`/`!=`/`<=`/`>=` aren't mis-split as
    /// `<`/`>` with a trailing `=`.
    const ALL: [(&'static str, Op); 6] = [
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("<", Op::Lt),
        (">", Op::Gt),
    ];
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
}

fn parse_literal(raw: &str) -> Literal {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Literal::Str(raw[1..raw.len() - 1].to_string());
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Literal::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Literal::Float(f);
    }
    Literal::Str(raw.to_string())
}

fn compare(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Text(s), Literal::Str(l)) => Some(s.as_str().cmp(l.as_str())),
        (Value::Integer(i), Literal::Int(l)) => Some(i.cmp(l)),
        (Value::Integer(i), Literal::Float(l)) => (*i as f64).partial_cmp(l),
        (Value::Decimal(d), Literal::Int(l)) => {
            d.to_string().parse::<f64>().ok()?.partial_cmp(&(*l as f64))
        }
        (Value::Decimal(d), Literal::Float(l)) => d.to_string().parse::<f64>().ok()?.partial_cmp(l),
        (Value::Boolean(b), Literal::Str(l)) => Some(b.to_string().as_str().cmp(l.as_str())),
        _ => None,
    }
}

fn eval_single(atom: &str, row: &Row) -> bool {
    let atom = atom.trim();
    let found = Op::ALL.iter().find_map(|(sym, op)| {
        atom.find(&format!(" {} ", sym)).map(|idx| (idx, *sym, *op))
    });

    let Some((idx, sym, op)) = found else {
        return false;
    };

    let field = atom[..idx].trim();
    let literal_raw = &atom[idx + 1 + sym.len() + 1..];
    let literal = parse_literal(literal_raw);

    let Some(value) = row.get(field) else {
        return false;
    };
    if value.is_null() {
        return false;
    }

    let Some(ordering) = compare(value, &literal) else {
        return false;
    };

    match op {
        Op::Eq => ordering == Ordering::Equal,
        Op::Ne => ordering != Ordering::Equal,
        Op::Lt => ordering == Ordering::Less,
        Op::Le => ordering != Ordering::Greater,
        Op::Gt => ordering == Ordering::Greater,
        Op::Ge => ordering != Ordering::Less,
    }
}

/// Evaluate a full predicate (conjunction of ` and `-joined atoms) against a row.
pub fn eval(predicate: &str, row: &Row) -> bool {
    predicate.split(" and ").all(|atom| eval_single(atom, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn string_equality() {
        let r = row(&[("region", Value::Text("EU".into()))]);
        assert!(eval("region == 'EU'", &r));
        assert!(!eval("region == 'US'", &r));
    }

    #[test]
    fn numeric_comparison() {
        let r = row(&[("amount", Value::Integer(5000))]);
        assert!(eval("amount > 1000", &r));
        assert!(!eval("amount > 10000", &r));
    }

    #[test]
    fn conjunction_requires_all_atoms() {
        let r = row(&[
            ("region", Value::Text("EU".into())),
            ("amount", Value::Integer(50)),
        ]);
        assert!(eval("region == 'EU' and amount < 100", &r));
        assert!(!eval("region == 'EU' and amount > 100", &r));
    }

    #[test]
    fn missing_field_is_false_not_error() {
        let r = row(&[("region", Value::Text("US".into()))]);
        assert!(!eval("amount > 1000", &r));
    }

    #[test]
    fn null_field_is_false() {
        let r = row(&[("amount", Value::Null)]);
        assert!(!eval("amount > 1000", &r));
    }
}
