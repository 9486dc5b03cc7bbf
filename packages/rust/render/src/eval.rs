//! Evaluate a parsed template part against a merge context.

use auditdoc_shared::{AuditDocError, Result};
use serde_json::Value;

use crate::context::{MergeContext, kind_of};
use crate::parse::{Cond, Expr, Node};
use crate::xml::escape_text;

/// Loop bindings in scope, innermost last.
type Locals = Vec<(String, Value)>;

pub(crate) fn render_nodes(nodes: &[Node], ctx: &MergeContext) -> Result<String> {
    let mut out = String::new();
    let mut locals = Locals::new();
    write_nodes(nodes, ctx, &mut locals, &mut out)?;
    Ok(out)
}

fn write_nodes(
    nodes: &[Node],
    ctx: &MergeContext,
    locals: &mut Locals,
    out: &mut String,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(expr) => {
                let value = eval(expr, ctx, locals)?;
                out.push_str(&escape_text(&to_text(&value, expr)?));
            }
            Node::If {
                branches,
                otherwise,
            } => {
                let mut chosen = otherwise;
                for (cond, body) in branches {
                    if test(cond, ctx, locals)? {
                        chosen = body;
                        break;
                    }
                }
                write_nodes(chosen, ctx, locals, out)?;
            }
            Node::For {
                binding,
                list,
                body,
            } => {
                let items = match eval(list, ctx, locals)? {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(AuditDocError::rendering(format!(
                            "cannot loop over {} '{}'",
                            kind_of(&other),
                            describe(list)
                        )));
                    }
                };
                for item in items {
                    locals.push((binding.clone(), item));
                    let result = write_nodes(body, ctx, locals, out);
                    locals.pop();
                    result?;
                }
            }
        }
    }
    Ok(())
}

fn test(cond: &Cond, ctx: &MergeContext, locals: &Locals) -> Result<bool> {
    Ok(match cond {
        Cond::Truthy(expr) => truthy(&eval(expr, ctx, locals)?),
        Cond::Not(inner) => !test(inner, ctx, locals)?,
        Cond::Eq(lhs, rhs) => compare(lhs, rhs, ctx, locals)?,
        Cond::Ne(lhs, rhs) => !compare(lhs, rhs, ctx, locals)?,
        Cond::And(all) => {
            for c in all {
                if !test(c, ctx, locals)? {
                    return Ok(false);
                }
            }
            true
        }
        Cond::Or(any) => {
            for c in any {
                if test(c, ctx, locals)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

/// Equality on the rendered text of two scalars.
fn compare(lhs: &Expr, rhs: &Expr, ctx: &MergeContext, locals: &Locals) -> Result<bool> {
    let left = to_text(&eval(lhs, ctx, locals)?, lhs)?;
    let right = to_text(&eval(rhs, ctx, locals)?, rhs)?;
    Ok(left == right)
}

fn eval(expr: &Expr, ctx: &MergeContext, locals: &Locals) -> Result<Value> {
    match expr {
        Expr::Literal(text) => Ok(Value::String(text.clone())),
        Expr::Path(segments) => lookup(segments, ctx, locals),
        Expr::Call { helper, arg } => {
            let f = ctx.helper(helper).ok_or_else(|| {
                AuditDocError::rendering(format!("unknown helper '{helper}'"))
            })?;
            f(&eval(arg, ctx, locals)?)
        }
    }
}

/// Resolve a dotted path. Unknown names are errors, never blanks.
fn lookup(segments: &[String], ctx: &MergeContext, locals: &Locals) -> Result<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(AuditDocError::rendering("empty merge field"));
    };

    let mut current = locals
        .iter()
        .rev()
        .find(|(name, _)| name == head)
        .map(|(_, value)| value)
        .or_else(|| ctx.get(head))
        .ok_or_else(|| AuditDocError::rendering(format!("unknown merge field '{head}'")))?;

    for (depth, segment) in rest.iter().enumerate() {
        let walked = segments[..=depth].join(".");
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| {
                AuditDocError::rendering(format!(
                    "unknown merge field '{walked}.{segment}'"
                ))
            })?,
            other => {
                return Err(AuditDocError::rendering(format!(
                    "cannot read '{segment}' of {} '{walked}'",
                    kind_of(other)
                )));
            }
        };
    }
    Ok(current.clone())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text of a scalar merge value; null renders empty.
fn to_text(value: &Value, expr: &Expr) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(AuditDocError::rendering(format!(
            "'{}' is a {}, not a printable value",
            describe(expr),
            kind_of(other)
        ))),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Path(segments) => segments.join("."),
        Expr::Literal(text) => format!("\"{text}\""),
        Expr::Call { helper, arg } => format!("{helper}({})", describe(arg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use serde_json::json;

    fn ctx() -> MergeContext {
        let Value::Object(values) = json!({
            "recipientName": "Greater Valley Transit",
            "hasDeficiencies": true,
            "deficiencyCount": 2,
            "exitFormat": "virtual",
            "subrecipientName": null,
            "rows": [
                {"area": "Legal", "code": "L2"},
                {"area": "Procurement", "code": null}
            ]
        }) else {
            unreachable!()
        };
        MergeContext::new(values).with_helper("shout", |v| {
            Ok(Value::String(v.as_str().unwrap_or_default().to_uppercase()))
        })
    }

    fn render(src: &str) -> Result<String> {
        render_nodes(&parse(src)?, &ctx())
    }

    #[test]
    fn substitutes_and_escapes() {
        assert_eq!(
            render("{{ recipientName }} & {{ deficiencyCount }}").unwrap(),
            "Greater Valley Transit & 2"
        );
        let mut c = ctx();
        c.insert("recipientName", json!("A&B"));
        assert_eq!(render_nodes(&parse("{{ recipientName }}").unwrap(), &c).unwrap(), "A&amp;B");
    }

    #[test]
    fn null_renders_empty() {
        assert_eq!(render("[{{ subrecipientName }}]").unwrap(), "[]");
    }

    #[test]
    fn unknown_fields_are_errors() {
        let err = render("{{ recipientNmae }}").unwrap_err();
        assert!(err.to_string().contains("unknown merge field 'recipientNmae'"));
        assert!(render("{% if missingFlag %}x{% endif %}").is_err());
        assert!(render("{% for r in rows %}{{ r.nope }}{% endfor %}").is_err());
        assert!(render("{{ nope(recipientName) }}").is_err());
    }

    #[test]
    fn conditionals_pick_one_branch() {
        assert_eq!(
            render("{% if hasDeficiencies %}found{% else %}none{% endif %}").unwrap(),
            "found"
        );
        assert_eq!(
            render(r#"{% if exitFormat == "in-person" %}room{% elif exitFormat == "virtual" %}call{% endif %}"#)
                .unwrap(),
            "call"
        );
        assert_eq!(render("{% if not subrecipientName %}none{% endif %}").unwrap(), "none");
    }

    #[test]
    fn loops_bind_rows() {
        assert_eq!(
            render("{% for row in rows %}{{ row.area }}={{ row.code }};{% endfor %}").unwrap(),
            "Legal=L2;Procurement=;"
        );
        assert_eq!(render("{% for r in subrecipientName %}x{% endfor %}").unwrap(), "");
        assert!(render("{% for r in recipientName %}x{% endfor %}").is_err());
    }

    #[test]
    fn helpers_receive_evaluated_arguments() {
        assert_eq!(render("{{ shout(exitFormat) }}").unwrap(), "VIRTUAL");
        assert_eq!(render("{{ shout('a') }}").unwrap(), "A");
    }

    #[test]
    fn lists_are_not_printable() {
        assert!(render("{{ rows }}").is_err());
    }
}
