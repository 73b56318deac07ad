//! Layout composition: fill `@yield` slots from a section map.

use super::compile;
use super::directive::Directive;
use super::lexer::tokenize;
use super::sections::SectionMap;
use crate::value::escape_html;

/// Compile `layout_source` and fill its yields, see [`fill_yields`].
pub fn compose(layout_source: &str, sections: &SectionMap) -> String {
    fill_yields(&compile(layout_source), sections)
}

/// Replace each `@yield('n', 'd')` in compiled text with `sections[n]`, else
/// the escaped default, else nothing. Nothing else is translated, so section
/// content and surrounding text are emitted as given.
pub fn fill_yields(compiled: &str, sections: &SectionMap) -> String {
    let mut out = String::with_capacity(compiled.len());

    for token in tokenize(compiled) {
        match token.directive() {
            Some(Directive::Yield { name, default }) => match sections.get(name) {
                Some(content) => out.push_str(content),
                None => {
                    if let Some(default) = default {
                        out.push_str(&escape_html(default));
                    }
                }
            },
            _ => out.push_str(token.raw),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections(pairs: &[(&str, &str)]) -> SectionMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_compose_fills_yields() {
        let layout = "<title>@yield('title')</title><main>@yield('content')</main>";
        let composed = compose(layout, &sections(&[("title", "Home"), ("content", "Hi")]));
        assert_eq!(composed, "<title>Home</title><main>Hi</main>");
    }

    #[test]
    fn test_compose_defaults() {
        let layout = "@yield('title', 'Fish & Chips')|@yield('missing')|";
        assert_eq!(compose(layout, &SectionMap::default()), "Fish &amp; Chips||");
    }

    #[test]
    fn test_section_overrides_default() {
        let composed = compose("@yield('title', 'Default')", &sections(&[("title", "Mine")]));
        assert_eq!(composed, "Mine");
    }

    #[test]
    fn test_layout_directives_compiled() {
        let composed = compose("<h1>{{ $title }}</h1>@yield('body')", &sections(&[("body", "b")]));
        assert_eq!(composed, "<h1><?elle echo $title ?></h1>b");
    }

    #[test]
    fn test_fill_yields_keeps_text_literal() {
        let compiled = "{{ $raw }}[@yield('t')]";
        let filled = fill_yields(compiled, &sections(&[("t", "@if(true) {{ $x }}")]));
        assert_eq!(filled, "{{ $raw }}[@if(true) {{ $x }}]");
    }
}
