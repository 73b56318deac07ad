//! Artifact execution.
//!
//! An artifact is literal text interleaved with `<?elle ... ?>` instructions.
//! [`Program::parse`] turns it into a node tree once per render and
//! [`Program::execute`] walks the tree against a [`Scope`].

use crate::compiler::lexer::{INSTRUCTION_CLOSE, INSTRUCTION_OPEN, TokenKind, tokenize};
use crate::error::{Result, ViewError};
use crate::expr::{Expr, ExprError, Interpolation, Lookup, LoopHead, read_string};
use crate::value::{Context, display, escape_html, is_truthy};
use serde_json::Value;

// ============================================================================
// Scope
// ============================================================================

/// Variables visible to a running template: the render data plus loop
/// bindings, innermost last.
pub struct Scope<'a> {
    data: &'a Context,
    frames: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    pub const fn new(data: &'a Context) -> Self {
        Self {
            data,
            frames: Vec::new(),
        }
    }

    /// Data plus every loop binding, as an included template sees it.
    pub fn flatten(&self) -> Context {
        let mut merged = self.data.clone();
        for (name, value) in &self.frames {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}

impl Lookup for Scope<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
            .or_else(|| self.data.get(name))
    }
}

/// Renders `include` instructions on behalf of a running program.
pub trait Include {
    fn include(&mut self, name: &str, scope: &Scope<'_>, out: &mut String) -> Result<()>;
}

// ============================================================================
// Program
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Echo(Interpolation),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Foreach {
        head: LoopHead,
        body: Vec<Node>,
    },
    Include(String),
}

/// A parsed artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    nodes: Vec<Node>,
}

impl Program {
    /// Parse artifact text. `name` is only used in error messages.
    pub fn parse(name: &str, artifact: &str) -> Result<Self> {
        let syntax = |message: String| ViewError::Syntax {
            name: name.to_owned(),
            message,
        };
        let pieces = split(artifact).map_err(syntax)?;
        let mut parser = Parser {
            pieces: pieces.into_iter(),
        };
        let (nodes, end) = parser.block().map_err(syntax)?;
        match end {
            None => Ok(Self { nodes }),
            Some(end) => Err(syntax(format!("unexpected `{}`", end.keyword()))),
        }
    }

    pub fn execute(
        &self,
        scope: &mut Scope<'_>,
        out: &mut String,
        includes: &mut dyn Include,
    ) -> Result<()> {
        run(&self.nodes, scope, out, includes)
    }
}

fn run(
    nodes: &[Node],
    scope: &mut Scope<'_>,
    out: &mut String,
    includes: &mut dyn Include,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Echo(interpolation) => {
                let value = interpolation.eval(&*scope);
                out.push_str(&escape_html(&display(&value)));
            }
            Node::If {
                branches,
                otherwise,
            } => {
                let taken = branches
                    .iter()
                    .find(|(cond, _)| is_truthy(&cond.eval(&*scope)))
                    .map(|(_, body)| body)
                    .or(otherwise.as_ref());
                if let Some(body) = taken {
                    run(body, scope, out, includes)?;
                }
            }
            Node::Foreach { head, body } => {
                let entries: Vec<(Value, Value)> = match head.source.resolve(&*scope) {
                    Some(Value::Array(items)) => items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| (Value::from(i), item.clone()))
                        .collect(),
                    Some(Value::Object(map)) => map
                        .iter()
                        .map(|(key, item)| (Value::String(key.clone()), item.clone()))
                        .collect(),
                    _ => Vec::new(),
                };

                let depth = scope.frames.len();
                for (key, item) in entries {
                    if let Some(key_name) = &head.key {
                        scope.frames.push((key_name.clone(), key));
                    }
                    scope.frames.push((head.item.clone(), item));
                    let result = run(body, scope, out, includes);
                    scope.frames.truncate(depth);
                    result?;
                }
            }
            Node::Include(name) => includes.include(name, scope, out)?,
        }
    }
    Ok(())
}

// ============================================================================
// Parsing
// ============================================================================

enum Piece<'a> {
    Text(&'a str),
    Instruction { keyword: &'a str, args: &'a str },
}

/// Split artifact text into literal text and instruction bodies.
fn split(artifact: &str) -> std::result::Result<Vec<Piece<'_>>, String> {
    let mut pieces = Vec::new();
    for token in tokenize(artifact) {
        if token.kind != TokenKind::Instruction {
            pieces.push(Piece::Text(token.raw));
            continue;
        }
        let body = token
            .raw
            .strip_prefix(INSTRUCTION_OPEN)
            .and_then(|b| b.strip_suffix(INSTRUCTION_CLOSE))
            .map(str::trim)
            .ok_or_else(|| format!("bad instruction `{}`", token.raw))?;
        let (keyword, args) = body
            .split_once(char::is_whitespace)
            .map_or((body, ""), |(k, a)| (k, a.trim()));
        pieces.push(Piece::Instruction { keyword, args });
    }
    Ok(pieces)
}

/// What closed a block.
enum End {
    ElseIf(Expr),
    Else,
    EndIf,
    EndForeach,
}

impl End {
    const fn keyword(&self) -> &'static str {
        match self {
            Self::ElseIf(_) => "elseif",
            Self::Else => "else",
            Self::EndIf => "endif",
            Self::EndForeach => "endforeach",
        }
    }
}

struct Parser<'a> {
    pieces: std::vec::IntoIter<Piece<'a>>,
}

type ParseResult<T> = std::result::Result<T, String>;

impl Parser<'_> {
    /// Parse nodes until a block terminator or the end of input.
    fn block(&mut self) -> ParseResult<(Vec<Node>, Option<End>)> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.next() {
            let (keyword, args) = match piece {
                Piece::Text(text) => {
                    push_text(&mut nodes, text);
                    continue;
                }
                Piece::Instruction { keyword, args } => (keyword, args),
            };
            let expr_err = |e: ExprError| format!("`{keyword} {args}`: {e}");
            match keyword {
                "echo" => nodes.push(Node::Echo(Interpolation::parse(args).map_err(expr_err)?)),
                "if" => {
                    let cond = Expr::parse(args).map_err(expr_err)?;
                    nodes.push(self.conditional(cond)?);
                }
                "foreach" => {
                    let head = LoopHead::parse(args).map_err(expr_err)?;
                    let (body, end) = self.block()?;
                    match end {
                        Some(End::EndForeach) => nodes.push(Node::Foreach { head, body }),
                        Some(end) => return Err(format!("unexpected `{}` in foreach", end.keyword())),
                        None => return Err("unterminated `foreach`".to_owned()),
                    }
                }
                "include" => nodes.push(Node::Include(quoted_name(keyword, args)?)),
                "uses" => {
                    quoted_name(keyword, args)?;
                }
                "elseif" => {
                    let cond = Expr::parse(args).map_err(expr_err)?;
                    return Ok((nodes, Some(End::ElseIf(cond))));
                }
                "else" => return Ok((nodes, Some(End::Else))),
                "endif" => return Ok((nodes, Some(End::EndIf))),
                "endforeach" => return Ok((nodes, Some(End::EndForeach))),
                other => return Err(format!("unknown instruction `{other}`")),
            }
        }
        Ok((nodes, None))
    }

    fn conditional(&mut self, cond: Expr) -> ParseResult<Node> {
        let mut branches = Vec::new();
        let mut cond = cond;
        loop {
            let (body, end) = self.block()?;
            branches.push((cond, body));
            match end {
                Some(End::ElseIf(next)) => cond = next,
                Some(End::EndIf) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: None,
                    });
                }
                Some(End::Else) => {
                    let (body, end) = self.block()?;
                    return match end {
                        Some(End::EndIf) => Ok(Node::If {
                            branches,
                            otherwise: Some(body),
                        }),
                        Some(end) => Err(format!("unexpected `{}` after else", end.keyword())),
                        None => Err("unterminated `if`".to_owned()),
                    };
                }
                Some(End::EndForeach) => return Err("unexpected `endforeach` in if".to_owned()),
                None => return Err("unterminated `if`".to_owned()),
            }
        }
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if let Some(Node::Text(last)) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_owned()));
    }
}

fn quoted_name(keyword: &str, args: &str) -> ParseResult<String> {
    match read_string(args) {
        Some((name, len)) if len == args.len() && !name.is_empty() => Ok(name),
        _ => Err(format!("`{keyword}` expects a quoted template name, got `{args}`")),
    }
}

/// Names listed by the leading `uses` instructions of an artifact.
pub fn dependencies(artifact: &str) -> Vec<String> {
    let mut names = Vec::new();
    for token in tokenize(artifact) {
        if token.kind != TokenKind::Instruction {
            break;
        }
        let Some(args) = token
            .raw
            .strip_prefix(INSTRUCTION_OPEN)
            .and_then(|b| b.strip_suffix(INSTRUCTION_CLOSE))
            .and_then(|b| b.trim().strip_prefix("uses "))
        else {
            break;
        };
        match quoted_name("uses", args.trim()) {
            Ok(name) => names.push(name),
            Err(_) => break,
        }
    }
    names
}

/// The `uses` header for a list of layout names.
pub fn dependency_header(names: &[String]) -> String {
    names
        .iter()
        .map(|name| {
            format!(
                "{INSTRUCTION_OPEN} uses {} {INSTRUCTION_CLOSE}",
                crate::expr::quote_literal(name)
            )
        })
        .collect()
}
