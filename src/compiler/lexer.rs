//! Tokenizer for template source.
//!
//! Splits source text at directive boundaries. Anything that is not a
//! well-formed directive stays in a `Text` token, so malformed input passes
//! through unchanged.
//!
//! # Recognized forms
//!
//! | Form               | Token                          |
//! |--------------------|--------------------------------|
//! | `<?elle ... ?>`    | `Instruction` (already compiled) |
//! | `{{-- ... --}}`    | `Comment`                      |
//! | `{{ ... }}`        | `Directive(Echo)`              |
//! | `@word(...)`       | `Directive(..)`                |
//!
//! Comments are matched before interpolation, and an interpolation is parsed
//! as a whole (`$x ?? expr` is one argument), so neither can be split by the
//! other.

use super::directive::{Directive, Keyword};

pub const INSTRUCTION_OPEN: &str = "<?elle";
pub const INSTRUCTION_CLOSE: &str = "?>";
const COMMENT_OPEN: &str = "{{--";
const COMMENT_CLOSE: &str = "--}}";
const ECHO_OPEN: &str = "{{";
const ECHO_CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Text,
    Comment,
    Instruction,
    Directive(Directive<'a>),
}

/// A token and the exact source slice it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub raw: &'a str,
}

impl<'a> Token<'a> {
    pub const fn directive(&self) -> Option<&Directive<'a>> {
        match &self.kind {
            TokenKind::Directive(directive) => Some(directive),
            _ => None,
        }
    }

    pub fn is_blank_text(&self) -> bool {
        matches!(self.kind, TokenKind::Text) && self.raw.trim().is_empty()
    }
}

pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Lexer {
        src: source,
        pos: 0,
        text_start: 0,
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    text_start: usize,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Vec<Token<'a>> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            let matched = match bytes[self.pos] {
                b'<' => self.instruction(),
                b'{' => self.comment().or_else(|| self.echo()),
                b'@' => self.directive(),
                _ => None,
            };
            match matched {
                Some((end, kind)) => self.push(end, kind),
                None => self.pos += 1,
            }
        }
        self.flush_text(self.src.len());
        self.tokens
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn push(&mut self, end: usize, kind: TokenKind<'a>) {
        self.flush_text(self.pos);
        self.tokens.push(Token {
            kind,
            raw: &self.src[self.pos..end],
        });
        self.pos = end;
        self.text_start = end;
    }

    fn flush_text(&mut self, end: usize) {
        if end > self.text_start {
            self.tokens.push(Token {
                kind: TokenKind::Text,
                raw: &self.src[self.text_start..end],
            });
        }
        self.text_start = end;
    }

    /// `<?elle ... ?>`: copied verbatim so compiling twice changes nothing.
    fn instruction(&self) -> Option<(usize, TokenKind<'a>)> {
        let rest = self.rest();
        let after = rest.strip_prefix(INSTRUCTION_OPEN)?;
        if !after.starts_with(char::is_whitespace) {
            return None;
        }
        let body_start = self.pos + INSTRUCTION_OPEN.len();
        let close = find_unquoted(self.src, body_start, INSTRUCTION_CLOSE)?;
        Some((close + INSTRUCTION_CLOSE.len(), TokenKind::Instruction))
    }

    fn comment(&self) -> Option<(usize, TokenKind<'a>)> {
        let body = self.rest().strip_prefix(COMMENT_OPEN)?;
        let offset = body.find(COMMENT_CLOSE)?;
        let end = self.pos + COMMENT_OPEN.len() + offset + COMMENT_CLOSE.len();
        Some((end, TokenKind::Comment))
    }

    fn echo(&self) -> Option<(usize, TokenKind<'a>)> {
        if !self.rest().starts_with(ECHO_OPEN) {
            return None;
        }
        let inner_start = self.pos + ECHO_OPEN.len();
        let close = find_unquoted(self.src, inner_start, ECHO_CLOSE)?;
        let directive = Directive::echo(&self.src[inner_start..close])?;
        Some((close + ECHO_CLOSE.len(), TokenKind::Directive(directive)))
    }

    fn directive(&self) -> Option<(usize, TokenKind<'a>)> {
        let bytes = self.src.as_bytes();
        let word_start = self.pos + 1;
        let word_len = bytes[word_start..]
            .iter()
            .take_while(|b| b.is_ascii_alphabetic())
            .count();
        let word_end = word_start + word_len;
        if bytes.get(word_end).is_some_and(|b| is_ident_byte(*b)) {
            return None;
        }
        let keyword = Keyword::from_word(&self.src[word_start..word_end])?;

        if !keyword.takes_args() {
            return Some((word_end, TokenKind::Directive(keyword.build("")?)));
        }

        let open = word_end
            + bytes[word_end..]
                .iter()
                .take_while(|b| **b == b' ' || **b == b'\t')
                .count();
        if bytes.get(open) != Some(&b'(') {
            return None;
        }
        let close = find_matching_paren(self.src, open)?;
        let directive = keyword.build(&self.src[open + 1..close])?;
        Some((close + 1, TokenKind::Directive(directive)))
    }
}

const fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offset of the first `pattern` at or after `from` that is not inside
/// a quoted string.
fn find_unquoted(src: &str, from: usize, pattern: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if bytes[i..].starts_with(pattern.as_bytes()) => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

/// Byte offset of the `)` closing the `(` at `open`, skipping quoted text.
fn find_matching_paren(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds<'a>(tokens: &'a [Token<'a>]) -> Vec<&'a TokenKind<'a>> {
        tokens.iter().map(|t| &t.kind).collect()
    }

    #[test]
    fn test_plain_text_is_one_token() {
        let tokens = tokenize("<p>Hello, world</p>");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Text);
    }

    #[test]
    fn test_echo_and_text() {
        let tokens = tokenize("Hello {{ $name }}!");
        assert_eq!(
            kinds(&tokens),
            vec![
                &TokenKind::Text,
                &TokenKind::Directive(Directive::Echo("$name")),
                &TokenKind::Text
            ]
        );
        assert_eq!(tokens[1].raw, "{{ $name }}");
    }

    #[test]
    fn test_echo_with_quoted_braces() {
        let tokens = tokenize("{{ $x ?? '}}' }}");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Directive(Directive::Echo("$x ?? '}}'")));
    }

    #[test]
    fn test_comment_hides_directives() {
        let tokens = tokenize("a{{-- {{ $x }} @if($y) --}}b");
        assert_eq!(
            kinds(&tokens),
            vec![&TokenKind::Text, &TokenKind::Comment, &TokenKind::Text]
        );
    }

    #[test]
    fn test_directive_with_nested_parens() {
        let tokens = tokenize("@if(count($items) > (1 + 1))x@endif");
        assert_eq!(
            tokens[0].kind,
            TokenKind::Directive(Directive::If("count($items) > (1 + 1)"))
        );
        assert_eq!(tokens[1].raw, "x");
        assert_eq!(tokens[2].kind, TokenKind::Directive(Directive::EndIf));
    }

    #[test]
    fn test_directive_allows_space_before_parens() {
        let tokens = tokenize("@foreach ($a as $b)");
        assert_eq!(tokens[0].kind, TokenKind::Directive(Directive::Foreach("$a as $b")));
    }

    #[test]
    fn test_else_is_not_elseif_prefix() {
        let tokens = tokenize("@else@elseif($a)");
        assert_eq!(tokens[0].kind, TokenKind::Directive(Directive::Else));
        assert_eq!(tokens[1].kind, TokenKind::Directive(Directive::ElseIf("$a")));
    }

    #[test]
    fn test_directive_glued_to_text() {
        let tokens = tokenize("Hi@endsection@section('a')");
        assert_eq!(
            kinds(&tokens),
            vec![
                &TokenKind::Text,
                &TokenKind::Directive(Directive::EndSection),
                &TokenKind::Directive(Directive::Section {
                    name: "a".into(),
                    inline: None
                })
            ]
        );
    }

    #[test]
    fn test_email_and_unknown_words_are_text() {
        let tokens = tokenize("mail me@example.com or @media screen or @iffy or @else2");
        assert_eq!(kinds(&tokens), vec![&TokenKind::Text]);
    }

    #[test]
    fn test_malformed_directives_are_text() {
        for source in ["@if", "@if(", "@if($a", "@include(nav)", "{{ $a", "{{ a }}", "{{-- open"] {
            let tokens = tokenize(source);
            assert!(
                tokens.iter().all(|t| t.kind == TokenKind::Text),
                "`{source}` should be text"
            );
            let joined: String = tokens.iter().map(|t| t.raw).collect();
            assert_eq!(joined, source);
        }
    }

    #[test]
    fn test_instruction_is_verbatim() {
        let tokens = tokenize("<?elle if $a == '?>' ?>yes");
        assert_eq!(tokens[0].kind, TokenKind::Instruction);
        assert_eq!(tokens[0].raw, "<?elle if $a == '?>' ?>");
        assert_eq!(tokens[1].raw, "yes");
    }

    #[test]
    fn test_other_processing_instructions_are_text() {
        let tokens = tokenize("<?xml version=\"1.0\"?><?elleecho ?>");
        assert_eq!(kinds(&tokens), vec![&TokenKind::Text]);
    }

    #[test]
    fn test_raw_slices_cover_source() {
        let source = "<h1>{{ $title }}</h1>@if($a)A@else B@endif{{-- c --}}@yield('x', 'y')";
        let joined: String = tokenize(source).iter().map(|t| t.raw).collect();
        assert_eq!(joined, source);
    }

    #[test]
    fn test_unicode_text_around_directives() {
        let tokens = tokenize("héllo {{ $nom }} wörld");
        assert_eq!(tokens[0].raw, "héllo ");
        assert_eq!(tokens[2].raw, " wörld");
    }
}
