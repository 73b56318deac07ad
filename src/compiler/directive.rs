//! The directive set.
//!
//! Each directive the lexer recognizes becomes one [`Directive`] variant; the
//! code generator dispatches on the variant. Arguments are validated here so a
//! directive that does not parse never becomes a token and stays literal text.

use crate::expr::{Expr, Interpolation, LoopHead, parse_string_list};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    /// `{{ $x }}` or `{{ $x ?? expr }}`, holding the trimmed inner text.
    Echo(&'a str),
    /// `@if(cond)`, holding the trimmed condition.
    If(&'a str),
    ElseIf(&'a str),
    Else,
    EndIf,
    /// `@foreach(head)`, holding the trimmed loop head.
    Foreach(&'a str),
    EndForeach,
    Include(String),
    Extends(String),
    Section {
        name: String,
        inline: Option<String>,
    },
    EndSection,
    Yield {
        name: String,
        default: Option<String>,
    },
}

impl<'a> Directive<'a> {
    /// Parse the inner text of `{{ ... }}`.
    pub fn echo(inner: &'a str) -> Option<Self> {
        Interpolation::parse(inner).ok()?;
        Some(Self::Echo(inner.trim()))
    }

    /// Inheritance directives are left in place by the code generator and
    /// consumed later by the section extractor and layout composer.
    pub const fn is_inheritance(&self) -> bool {
        matches!(
            self,
            Self::Extends(_) | Self::Section { .. } | Self::EndSection | Self::Yield { .. }
        )
    }
}

/// The word following `@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    ElseIf,
    Else,
    EndIf,
    Foreach,
    EndForeach,
    Include,
    Extends,
    Section,
    EndSection,
    Yield,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "if" => Self::If,
            "elseif" => Self::ElseIf,
            "else" => Self::Else,
            "endif" => Self::EndIf,
            "foreach" => Self::Foreach,
            "endforeach" => Self::EndForeach,
            "include" => Self::Include,
            "extends" => Self::Extends,
            "section" => Self::Section,
            "endsection" => Self::EndSection,
            "yield" => Self::Yield,
            _ => return None,
        })
    }

    /// Whether the keyword must be followed by a parenthesized argument list.
    pub const fn takes_args(self) -> bool {
        !matches!(
            self,
            Self::Else | Self::EndIf | Self::EndForeach | Self::EndSection
        )
    }

    /// Build the directive from its argument text (the part inside the
    /// parentheses). Returns `None` when the arguments are malformed.
    pub fn build(self, args: &str) -> Option<Directive<'_>> {
        let trimmed = args.trim();
        match self {
            Self::If => {
                Expr::parse(trimmed).ok()?;
                Some(Directive::If(trimmed))
            }
            Self::ElseIf => {
                Expr::parse(trimmed).ok()?;
                Some(Directive::ElseIf(trimmed))
            }
            Self::Foreach => {
                LoopHead::parse(trimmed).ok()?;
                Some(Directive::Foreach(trimmed))
            }
            Self::Include => single_name(args).map(Directive::Include),
            Self::Extends => single_name(args).map(Directive::Extends),
            Self::Section => {
                let (name, inline) = name_and_value(args)?;
                Some(Directive::Section { name, inline })
            }
            Self::Yield => {
                let (name, default) = name_and_value(args)?;
                Some(Directive::Yield { name, default })
            }
            Self::Else => Some(Directive::Else),
            Self::EndIf => Some(Directive::EndIf),
            Self::EndForeach => Some(Directive::EndForeach),
            Self::EndSection => Some(Directive::EndSection),
        }
    }
}

fn single_name(args: &str) -> Option<String> {
    match parse_string_list(args)?.as_mut_slice() {
        [name] if !name.is_empty() => Some(std::mem::take(name)),
        _ => None,
    }
}

fn name_and_value(args: &str) -> Option<(String, Option<String>)> {
    let mut items = parse_string_list(args)?.into_iter();
    let name = items.next().filter(|n| !n.is_empty())?;
    let value = items.next();
    if items.next().is_some() {
        return None;
    }
    Some((name, value))
}
