//! Shunting-yard evaluator for `{{ ... }}` expressions (spec. §4.7).
//!
//! Grounded on the original implementation's `math/helpers.h` (the
//! stack-of-stacks design, one frame per paren depth) and `math/actions.h`
//! (the `pi` constant and the unary-minus-as-binary-operator `m` trick:
//! `-x` pushes as `push(-1); push('m'); push(x)`).

use indexmap::IndexMap;

use crate::error::Error;
use crate::node::{Node, NumberValue, Origin, ScalarValue};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Op(char),
    LParen,
    RParen,
    /// `$(dotted.path)`, still carrying its path text — resolved to `Num`
    /// against the `Expression::lookups` map before the shunting-yard pass.
    Lookup(String),
}

fn tokenize(raw: &str, origin: &Origin) -> Result<Vec<Tok>, Error> {
    let mut out = Vec::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '+' | '-' | '/' | '^' => {
                out.push(Tok::Op(c));
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    out.push(Tok::Op('^'));
                    i += 2;
                } else {
                    out.push(Tok::Op('*'));
                    i += 1;
                }
            }
            '$' if chars.get(i + 1) == Some(&'(') => {
                let start = i + 2;
                let mut j = start;
                while j < chars.len() && chars[j] != ')' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(Error::Parse {
                        message: "unterminated value lookup in expression".into(),
                        origin: origin.clone(),
                    });
                }
                let path: String = chars[start..j].iter().collect();
                out.push(Tok::Lookup(path));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let save = i;
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    if i < chars.len() && chars[i].is_ascii_digit() {
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    } else {
                        i = save;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text.parse().map_err(|_| Error::Parse {
                    message: format!("invalid numeric literal '{text}' in expression"),
                    origin: origin.clone(),
                })?;
                out.push(Tok::Num(value));
            }
            c if c.is_ascii_lowercase() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_lowercase() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word == "pi" {
                    out.push(Tok::Num(std::f64::consts::PI));
                } else {
                    return Err(Error::Parse {
                        message: format!("unknown identifier '{word}' in expression"),
                        origin: origin.clone(),
                    });
                }
            }
            other => {
                return Err(Error::Parse {
                    message: format!("unexpected character '{other}' in expression"),
                    origin: origin.clone(),
                })
            }
        }
    }
    Ok(out)
}

/// Scans `raw` for `$(dotted.path)` occurrences and returns a map from the
/// dotted path text to a fresh `ValueLookup` node — the
/// `Expression::lookups` companion map (spec. §3).
pub(crate) fn extract_lookups(raw: &str, origin: &Origin) -> Result<IndexMap<String, Node>, Error> {
    let mut lookups = IndexMap::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && chars.get(i + 1) == Some(&'(') {
            let start = i + 2;
            let mut j = start;
            while j < chars.len() && chars[j] != ')' {
                j += 1;
            }
            if j >= chars.len() {
                return Err(Error::Parse {
                    message: "unterminated value lookup in expression".into(),
                    origin: origin.clone(),
                });
            }
            let path_text: String = chars[start..j].iter().collect();
            let segments: Vec<String> = path_text.split('.').map(str::to_owned).collect();
            lookups.insert(
                path_text,
                Node::ValueLookup {
                    path: segments,
                    origin: origin.clone(),
                },
            );
            i = j + 1;
        } else {
            i += 1;
        }
    }
    Ok(lookups)
}

fn precedence(op: char) -> u8 {
    match op {
        '+' | '-' => 6,
        '*' | '/' => 8,
        '^' => 9,
        'm' => 10,
        _ => unreachable!("unknown operator '{op}'"),
    }
}

fn right_assoc(op: char) -> bool {
    matches!(op, '^' | 'm')
}

fn apply(op: char, lhs: f64, rhs: f64) -> f64 {
    match op {
        '+' => lhs + rhs,
        '-' => lhs - rhs,
        '*' => lhs * rhs,
        '/' => lhs / rhs,
        '^' => lhs.powf(rhs),
        'm' => -rhs,
        _ => unreachable!("unknown operator '{op}'"),
    }
}

/// Evaluates `raw` (an Expression's already-substituted source text) given a
/// map from dotted-path text to its resolved numeric value.
pub(crate) fn evaluate(
    raw: &str,
    lookups: &IndexMap<String, Node>,
    origin: &Origin,
) -> Result<f64, Error> {
    let tokens = tokenize(raw, origin)?;

    // Rewrite `Lookup` tokens into resolved `Num` tokens up front, so the
    // shunting-yard proper only ever sees numbers/operators/parens.
    let mut resolved = Vec::with_capacity(tokens.len());
    for tok in tokens {
        match tok {
            Tok::Lookup(key) => {
                let node = lookups.get(&key).ok_or_else(|| Error::InvalidConfig {
                    message: format!("expression references unresolved lookup '$({key})'"),
                    origin: origin.clone(),
                })?;
                resolved.push(Tok::Num(numeric_value(node, origin)?));
            }
            other => resolved.push(other),
        }
    }

    // Insert explicit unary-minus markers: a '-' is unary when at the start
    // of the stream/frame or immediately after another operator or '('.
    let mut with_unary = Vec::with_capacity(resolved.len());
    let mut prev_was_operand_or_rparen = false;
    for tok in resolved {
        match tok {
            Tok::Op('-') if !prev_was_operand_or_rparen => {
                with_unary.push(Tok::Num(-1.0));
                with_unary.push(Tok::Op('m'));
                prev_was_operand_or_rparen = false;
                continue;
            }
            _ => {}
        }
        prev_was_operand_or_rparen = matches!(tok, Tok::Num(_) | Tok::RParen);
        with_unary.push(tok);
    }

    let mut operand_stacks: Vec<Vec<f64>> = vec![Vec::new()];
    let mut operator_stacks: Vec<Vec<char>> = vec![Vec::new()];

    fn drain_to(operands: &mut Vec<f64>, operators: &mut Vec<char>, until_prec: u8, strict: bool) {
        while let Some(&top) = operators.last() {
            let top_prec = precedence(top);
            let should_apply = if strict {
                top_prec > until_prec
            } else {
                top_prec >= until_prec
            };
            if !should_apply {
                break;
            }
            let op = operators.pop().unwrap();
            let rhs = operands.pop().expect("rhs operand present");
            let lhs = operands.pop().expect("lhs operand present");
            operands.push(apply(op, lhs, rhs));
        }
    }

    for tok in with_unary {
        match tok {
            Tok::Num(n) => operand_stacks.last_mut().unwrap().push(n),
            Tok::LParen => {
                operand_stacks.push(Vec::new());
                operator_stacks.push(Vec::new());
            }
            Tok::RParen => {
                let mut operands = operand_stacks.pop().expect("matching '(' frame");
                let mut operators = operator_stacks.pop().expect("matching '(' frame");
                drain_to(&mut operands, &mut operators, 0, false);
                let value = operands.pop().expect("one value left in closed frame");
                operand_stacks
                    .last_mut()
                    .expect("outer frame present")
                    .push(value);
            }
            Tok::Op(op) => {
                let operands = operand_stacks.last_mut().unwrap();
                let operators = operator_stacks.last_mut().unwrap();
                let strict = right_assoc(op);
                drain_to(operands, operators, precedence(op), strict);
                operators.push(op);
            }
        }
    }

    let mut operands = operand_stacks.pop().expect("one operand frame");
    let mut operators = operator_stacks.pop().expect("one operator frame");
    drain_to(&mut operands, &mut operators, 0, false);

    if operands.len() != 1 || !operators.is_empty() {
        return Err(Error::Parse {
            message: format!("malformed expression '{raw}'"),
            origin: origin.clone(),
        });
    }
    Ok(operands[0])
}

fn numeric_value(node: &Node, origin: &Origin) -> Result<f64, Error> {
    match node {
        Node::Value {
            value: ScalarValue::Number { value, .. },
            ..
        } => Ok(value.as_f64()),
        Node::Value {
            value: ScalarValue::Hex(hex),
            ..
        } => Ok(hex.value as f64),
        other => Err(Error::InvalidType {
            path: String::new(),
            expected: "number".into(),
            found: other.kind_name().into(),
            origin: origin.clone(),
        }),
    }
}

/// Builds the resolved `Value` node an Expression becomes once evaluated.
pub(crate) fn evaluate_to_node(
    raw: &str,
    lookups: &IndexMap<String, Node>,
    origin: &Origin,
) -> Result<Node, Error> {
    let value = evaluate(raw, lookups, origin)?;
    Ok(Node::Value {
        value: ScalarValue::Number {
            raw: format_number(value),
            value: NumberValue::Float(value),
        },
        origin: origin.clone(),
    })
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin::new("test.cfg", 1)
    }

    #[test]
    fn evaluates_precedence_and_unary_minus() {
        let lookups = IndexMap::new();
        let v = evaluate("-4.7 * -(3.72 + -pi)", &lookups, &origin()).unwrap();
        assert!((v - 2.7185145281279732).abs() < 1e-9);
    }

    #[test]
    fn evaluates_power_with_lookup() {
        let mut lookups = IndexMap::new();
        lookups.insert(
            "x".to_string(),
            Node::Value {
                value: ScalarValue::Number {
                    raw: "3".into(),
                    value: NumberValue::Int(3),
                },
                origin: origin(),
            },
        );
        let v = evaluate("$(x) ^ 2 + 1", &lookups, &origin()).unwrap();
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn double_star_is_power_synonym() {
        let lookups = IndexMap::new();
        let v = evaluate("2 ** 3", &lookups, &origin()).unwrap();
        assert!((v - 8.0).abs() < 1e-9);
    }

    #[test]
    fn extract_lookups_finds_dotted_paths() {
        let lookups = extract_lookups("$(a.b) + $(x)", &origin()).unwrap();
        assert!(lookups.contains_key("a.b"));
        assert!(lookups.contains_key("x"));
    }
}


