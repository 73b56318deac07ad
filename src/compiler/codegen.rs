//! Token stream to artifact text.

use super::directive::Directive;
use super::lexer::{INSTRUCTION_CLOSE, INSTRUCTION_OPEN, Token, TokenKind};
use crate::expr::quote_literal;
use std::fmt::Write;

/// Emit artifact text for a token stream.
///
/// Text and existing instructions are copied unchanged, comments are dropped,
/// inheritance directives are kept verbatim for the section extractor.
pub fn generate(tokens: &[Token<'_>]) -> String {
    let capacity = tokens.iter().map(|t| t.raw.len()).sum::<usize>() + tokens.len() * 8;
    let mut out = String::with_capacity(capacity);

    for token in tokens {
        match &token.kind {
            TokenKind::Text | TokenKind::Instruction => out.push_str(token.raw),
            TokenKind::Comment => {}
            TokenKind::Directive(directive) if directive.is_inheritance() => {
                out.push_str(token.raw);
            }
            TokenKind::Directive(directive) => emit(&mut out, directive),
        }
    }
    out
}

fn emit(out: &mut String, directive: &Directive<'_>) {
    let body = match directive {
        Directive::Echo(inner) => format!("echo {inner}"),
        Directive::If(cond) => format!("if {cond}"),
        Directive::ElseIf(cond) => format!("elseif {cond}"),
        Directive::Else => "else".to_owned(),
        Directive::EndIf => "endif".to_owned(),
        Directive::Foreach(head) => format!("foreach {head}"),
        Directive::EndForeach => "endforeach".to_owned(),
        Directive::Include(name) => format!("include {}", quote_literal(name)),
        Directive::Extends(_)
        | Directive::Section { .. }
        | Directive::EndSection
        | Directive::Yield { .. } => return,
    };
    write!(out, "{INSTRUCTION_OPEN} {body} {INSTRUCTION_CLOSE}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::tokenize;

    fn gen_(source: &str) -> String {
        generate(&tokenize(source))
    }

    #[test]
    fn test_echo_forms() {
        assert_eq!(gen_("{{ $name }}"), "<?elle echo $name ?>");
        assert_eq!(gen_("{{$name ?? 'Guest'}}"), "<?elle echo $name ?? 'Guest' ?>");
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(
            gen_("@if($a)A@elseif($b)B@else C@endif"),
            "<?elle if $a ?>A<?elle elseif $b ?>B<?elle else ?> C<?elle endif ?>"
        );
        assert_eq!(
            gen_("@foreach($items as $item){{ $item }}@endforeach"),
            "<?elle foreach $items as $item ?><?elle echo $item ?><?elle endforeach ?>"
        );
    }

    #[test]
    fn test_include_is_requoted() {
        assert_eq!(gen_("@include(\"partials/nav\")"), "<?elle include 'partials/nav' ?>");
        assert_eq!(gen_("@include('it\\'s')"), "<?elle include 'it\\'s' ?>");
    }

    #[test]
    fn test_inheritance_left_verbatim() {
        let source = "@extends('app')@section('title', 'Home')@yield('x', 'y')@endsection";
        assert_eq!(gen_(source), source);
    }

    #[test]
    fn test_comments_removed() {
        assert_eq!(gen_("a{{-- {{ $secret }} --}}b"), "ab");
    }
}
