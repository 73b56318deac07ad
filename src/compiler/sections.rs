//! Section extraction.
//!
//! Works on compiled text, where only the inheritance directives are still
//! in their source form.

use super::compile;
use super::directive::Directive;
use super::lexer::{Token, tokenize};
use crate::value::escape_html;
use rustc_hash::FxHashMap;

/// Section name to compiled content.
pub type SectionMap = FxHashMap<String, String>;

/// A compiled document split into its inheritance parts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Target of the first `@extends`.
    pub layout: Option<String>,
    pub sections: SectionMap,
    /// The document with `@extends` and section spans removed.
    pub body: String,
}

/// Split compiled text into layout, sections and remaining body.
///
/// - Only the first `@extends` counts; later ones are dropped.
/// - `@section('n', 'v')` stores `v` HTML-escaped and closes itself. An
///   `@endsection` following it (across blank text) belongs to it.
/// - `@section('n') ... @endsection` stores the compiled text in between.
///   Sections do not nest; an unterminated one runs to end of input.
/// - The first definition of a name wins.
pub fn extract(compiled: &str) -> Extracted {
    let tokens = tokenize(compiled);
    let mut extracted = Extracted::default();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        i += 1;
        match token.directive() {
            Some(Directive::Extends(layout)) => {
                extracted.layout.get_or_insert_with(|| layout.clone());
            }
            Some(Directive::Section {
                name,
                inline: Some(value),
            }) => {
                insert_first(&mut extracted.sections, name, escape_html(value).into_owned());
                i = skip_inline_end(&tokens, i);
            }
            Some(Directive::Section { name, inline: None }) => {
                let end = tokens[i..]
                    .iter()
                    .position(|t| matches!(t.directive(), Some(Directive::EndSection)))
                    .map_or(tokens.len(), |offset| i + offset);
                let content: String = tokens[i..end].iter().map(|t| t.raw).collect();
                insert_first(&mut extracted.sections, name, compile(&content));
                i = (end + 1).min(tokens.len());
            }
            // stray
            Some(Directive::EndSection) => {}
            _ => extracted.body.push_str(token.raw),
        }
    }
    extracted
}

fn insert_first(sections: &mut SectionMap, name: &str, content: String) {
    sections.entry(name.to_owned()).or_insert(content);
}

/// Index after an `@endsection` closing an inline section, or `from` if
/// there is none.
fn skip_inline_end(tokens: &[Token<'_>], from: usize) -> usize {
    let next = tokens[from..]
        .iter()
        .position(|t| !t.is_blank_text())
        .map_or(tokens.len(), |offset| from + offset);
    match tokens.get(next).and_then(Token::directive) {
        Some(Directive::EndSection) => next + 1,
        _ => from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(extracted: &'a Extracted, name: &str) -> Option<&'a str> {
        extracted.sections.get(name).map(String::as_str)
    }

    #[test]
    fn test_extract_layout_and_sections() {
        let extracted = extract(
            "@extends('layouts/app')@section('title','Home')@endsection@section('content')Hi@endsection",
        );
        assert_eq!(extracted.layout.as_deref(), Some("layouts/app"));
        assert_eq!(get(&extracted, "title"), Some("Home"));
        assert_eq!(get(&extracted, "content"), Some("Hi"));
        assert_eq!(extracted.body, "");
    }

    #[test]
    fn test_first_extends_wins() {
        let extracted = extract("a@extends('one')b@extends('two')c");
        assert_eq!(extracted.layout.as_deref(), Some("one"));
        assert_eq!(extracted.body, "abc");
    }

    #[test]
    fn test_inline_value_escaped() {
        let extracted = extract("@section('title', 'Tom & \"Jerry\"')");
        assert_eq!(get(&extracted, "title"), Some("Tom &amp; &quot;Jerry&quot;"));
    }

    #[test]
    fn test_inline_then_block_is_not_absorbed_wrongly() {
        let extracted = extract("@section('a', 'x')\n@section('b')B@endsection");
        assert_eq!(get(&extracted, "a"), Some("x"));
        assert_eq!(get(&extracted, "b"), Some("B"));
    }

    #[test]
    fn test_inline_endsection_across_whitespace() {
        let extracted = extract("@section('a', 'x')\n  @endsection\nrest");
        assert_eq!(get(&extracted, "a"), Some("x"));
        assert_eq!(extracted.body, "\nrest");
    }

    #[test]
    fn test_first_definition_wins() {
        let extracted = extract("@section('a')one@endsection@section('a')two@endsection");
        assert_eq!(get(&extracted, "a"), Some("one"));
    }

    #[test]
    fn test_block_content_keeps_instructions() {
        let compiled = "@section('content')<?elle if $a ?>{<?elle echo $a ?>}<?elle endif ?>@endsection";
        let extracted = extract(compiled);
        assert_eq!(
            get(&extracted, "content"),
            Some("<?elle if $a ?>{<?elle echo $a ?>}<?elle endif ?>")
        );
    }

    #[test]
    fn test_unterminated_section_runs_to_end() {
        let extracted = extract("before@section('tail')after");
        assert_eq!(get(&extracted, "tail"), Some("after"));
        assert_eq!(extracted.body, "before");
    }

    #[test]
    fn test_stray_endsection_dropped_and_yield_kept() {
        let extracted = extract("x@endsection@yield('y')");
        assert_eq!(extracted.body, "x@yield('y')");
        assert!(extracted.sections.is_empty());
        assert_eq!(extracted.layout, None);
    }
}
