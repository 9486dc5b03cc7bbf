//! Template language: tokens and syntax tree.
//!
//! ```text
//! {{ path.to.value }}            merge field
//! {{ helper(arg) }}              helper call, arg is a path or "literal"
//! {% if [not] cond %} {% elif cond %} {% else %} {% endif %}
//! {% for row in list %} ... {% endfor %}
//! ```
//!
//! Conditions are a value's truthiness, `a == "x"`, `a != "x"`, joined with
//! `and` / `or` (`and` binds tighter).

use auditdoc_shared::{AuditDocError, Result};

/// An expression inside a tag.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Path(Vec<String>),
    Literal(String),
    Call { helper: String, arg: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cond {
    Truthy(Expr),
    Not(Box<Cond>),
    Eq(Expr, Expr),
    Ne(Expr, Expr),
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Field(Expr),
    If {
        branches: Vec<(Cond, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        binding: String,
        list: Expr,
        body: Vec<Node>,
    },
}

/// Parse one template part into its syntax tree.
pub(crate) fn parse(source: &str) -> Result<Vec<Node>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let (nodes, _) = parser.block(&[])?;
    Ok(nodes)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    Text(&'a str),
    Field(&'a str),
    Block(&'a str),
}

fn tokenize(source: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    loop {
        let next = [rest.find("{{"), rest.find("{%")].into_iter().flatten().min();
        let Some(start) = next else {
            if !rest.is_empty() {
                tokens.push(Token::Text(rest));
            }
            return Ok(tokens);
        };

        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let is_field = rest[start..].starts_with("{{");
        let closer = if is_field { "}}" } else { "%}" };
        let body_start = start + 2;
        let body_len = rest[body_start..].find(closer).ok_or_else(|| {
            AuditDocError::rendering(format!(
                "unterminated tag starting '{}'",
                snippet(&rest[start..])
            ))
        })?;
        let body = rest[body_start..body_start + body_len].trim();
        tokens.push(if is_field {
            Token::Field(body)
        } else {
            Token::Block(body)
        });
        rest = &rest[body_start + body_len + 2..];
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(40).collect()
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Parse nodes until one of `until` block keywords; returns that tag's body.
    fn block(&mut self, until: &[&str]) -> Result<(Vec<Node>, Option<&'a str>)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos).copied() {
            self.pos += 1;
            match token {
                Token::Text(text) => nodes.push(Node::Text(text.to_string())),
                Token::Field(src) => nodes.push(Node::Field(parse_expr(src)?)),
                Token::Block(src) => {
                    let (keyword, rest) = split_keyword(src);
                    if until.contains(&keyword) {
                        return Ok((nodes, Some(src)));
                    }
                    match keyword {
                        "if" => nodes.push(self.if_block(rest)?),
                        "for" => nodes.push(self.for_block(rest)?),
                        _ => {
                            return Err(AuditDocError::rendering(format!(
                                "unexpected tag '{{% {src} %}}'"
                            )));
                        }
                    }
                }
            }
        }

        match until.last() {
            None => Ok((nodes, None)),
            Some(expected) => Err(AuditDocError::rendering(format!(
                "missing '{{% {expected} %}}'"
            ))),
        }
    }

    fn if_block(&mut self, cond_src: &str) -> Result<Node> {
        let mut branches = Vec::new();
        let mut cond = parse_cond(cond_src)?;

        loop {
            let (body, end) = self.block(&["elif", "else", "endif"])?;
            branches.push((cond, body));
            let (keyword, rest) = split_keyword(end.unwrap_or("endif"));
            match keyword {
                "elif" => cond = parse_cond(rest)?,
                "else" => {
                    let (otherwise, _) = self.block(&["endif"])?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
            }
        }
    }

    fn for_block(&mut self, header: &str) -> Result<Node> {
        let (binding, list) = header
            .split_once(" in ")
            .map(|(b, l)| (b.trim(), l.trim()))
            .filter(|(b, _)| is_identifier(b))
            .ok_or_else(|| {
                AuditDocError::rendering(format!("malformed loop '{{% for {header} %}}'"))
            })?;
        let list = parse_expr(list)?;
        let (body, _) = self.block(&["endfor"])?;
        Ok(Node::For {
            binding: binding.to_string(),
            list,
            body,
        })
    }
}

fn split_keyword(src: &str) -> (&str, &str) {
    match src.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (src, ""),
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub(crate) fn parse_cond(src: &str) -> Result<Cond> {
    let src = src.trim();
    if src.is_empty() {
        return Err(AuditDocError::rendering("empty condition"));
    }

    let any = split_outside_quotes(src, " or ");
    if any.len() > 1 {
        return Ok(Cond::Or(any.into_iter().map(parse_cond).collect::<Result<_>>()?));
    }
    let all = split_outside_quotes(src, " and ");
    if all.len() > 1 {
        return Ok(Cond::And(all.into_iter().map(parse_cond).collect::<Result<_>>()?));
    }

    if let Some(inner) = src.strip_prefix("not ") {
        return Ok(Cond::Not(Box::new(parse_cond(inner)?)));
    }
    if let [lhs, rhs] = split_outside_quotes(src, "!=").as_slice() {
        return Ok(Cond::Ne(parse_expr(lhs)?, parse_expr(rhs)?));
    }
    if let [lhs, rhs] = split_outside_quotes(src, "==").as_slice() {
        return Ok(Cond::Eq(parse_expr(lhs)?, parse_expr(rhs)?));
    }
    Ok(Cond::Truthy(parse_expr(src)?))
}

pub(crate) fn parse_expr(src: &str) -> Result<Expr> {
    let src = src.trim();

    for quote in ['"', '\''] {
        if let Some(inner) = src.strip_prefix(quote) {
            return inner
                .strip_suffix(quote)
                .filter(|body| !body.contains(quote))
                .map(|body| Expr::Literal(body.to_string()))
                .ok_or_else(|| AuditDocError::rendering(format!("malformed literal {src}")));
        }
    }

    if let Some((helper, rest)) = src.split_once('(') {
        let helper = helper.trim();
        let arg = rest
            .strip_suffix(')')
            .filter(|_| is_identifier(helper))
            .ok_or_else(|| AuditDocError::rendering(format!("malformed helper call '{src}'")))?;
        return Ok(Expr::Call {
            helper: helper.to_string(),
            arg: Box::new(parse_expr(arg)?),
        });
    }

    let segments: Vec<String> = src.split('.').map(|s| s.trim().to_string()).collect();
    if segments.iter().all(|s| is_identifier(s)) {
        Ok(Expr::Path(segments))
    } else {
        Err(AuditDocError::rendering(format!("malformed expression '{src}'")))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split on `sep` where it does not occur inside a quoted literal.
fn split_outside_quotes<'s>(src: &'s str, sep: &str) -> Vec<&'s str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut last = 0;
    let mut i = 0;

    while i < src.len() {
        let Some(ch) = src[i..].chars().next() else {
            break;
        };
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if src[i..].starts_with(sep) => {
                parts.push(&src[last..i]);
                i += sep.len();
                last = i;
                continue;
            }
            None => {}
        }
        i += ch.len_utf8();
    }
    parts.push(&src[last..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Expr {
        Expr::Path(p.split('.').map(String::from).collect())
    }

    #[test]
    fn text_and_fields() {
        let nodes = parse("Dear {{ recipientName }},").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("Dear ".into()),
                Node::Field(path("recipientName")),
                Node::Text(",".into()),
            ]
        );
    }

    #[test]
    fn helper_calls_and_literals() {
        assert_eq!(
            parse_expr("isAre(deficiencyCount)").unwrap(),
            Expr::Call {
                helper: "isAre".into(),
                arg: Box::new(path("deficiencyCount")),
            }
        );
        assert_eq!(parse_expr("'virtual'").unwrap(), Expr::Literal("virtual".into()));
        assert_eq!(parse_expr("row.deficiencyCode").unwrap(), path("row.deficiencyCode"));
        assert!(parse_expr("row.").is_err());
        assert!(parse_expr("\"open").is_err());
        assert!(parse_expr("1bad").is_err());
    }

    #[test]
    fn if_elif_else() {
        let nodes =
            parse("{% if isTriennial %}T{% elif not isStateManagement %}N{% else %}S{% endif %}")
                .unwrap();
        let Node::If {
            branches,
            otherwise,
        } = &nodes[0]
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(
            branches[1].0,
            Cond::Not(Box::new(Cond::Truthy(path("isStateManagement"))))
        );
        assert_eq!(otherwise, &vec![Node::Text("S".into())]);
    }

    #[test]
    fn comparisons_and_connectives() {
        assert_eq!(
            parse_cond(r#"exitFormat == "in-person""#).unwrap(),
            Cond::Eq(path("exitFormat"), Expr::Literal("in-person".into()))
        );
        assert_eq!(
            parse_cond(r#"a and b or c != "x and y""#).unwrap(),
            Cond::Or(vec![
                Cond::And(vec![Cond::Truthy(path("a")), Cond::Truthy(path("b"))]),
                Cond::Ne(path("c"), Expr::Literal("x and y".into())),
            ])
        );
    }

    #[test]
    fn for_loops() {
        let nodes = parse("{% for row in deficiencyTable %}{{ row.reviewArea }}{% endfor %}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::For {
                binding: "row".into(),
                list: path("deficiencyTable"),
                body: vec![Node::Field(path("row.reviewArea"))],
            }]
        );
    }

    #[test]
    fn structural_errors() {
        assert!(parse("{% if x %}open").is_err());
        assert!(parse("{% endif %}").is_err());
        assert!(parse("{% for in list %}{% endfor %}").is_err());
        assert!(parse("{% include other %}").is_err());
        assert!(parse("{{ unterminated").is_err());
    }
}
