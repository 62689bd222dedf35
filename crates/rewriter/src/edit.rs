//! A Clang-`Rewriter`-style text-splicing buffer: passes collect
//! `(byte_range, replacement)` edits keyed by `lang_c`'s parsed `Span`s
//! instead of regenerating source text from the AST, so that untouched
//! bytes survive a rewrite unchanged.

use lang_c::span::Span;

#[derive(Debug, Clone)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl Edit {
    pub fn new(span: Span, replacement: impl Into<String>) -> Self {
        Edit {
            start: span.start,
            end: span.end,
            replacement: replacement.into(),
        }
    }

    pub fn insert_before(span: Span, text: impl Into<String>) -> Self {
        Edit {
            start: span.start,
            end: span.start,
            replacement: text.into(),
        }
    }
}

/// Collects edits from every pass and applies them back-to-front over the
/// original source, so earlier edits' byte offsets stay valid while later
/// ones are spliced in.
#[derive(Debug, Default)]
pub struct EditBuffer {
    edits: Vec<Edit>,
}

impl EditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, edit: Edit) {
        self.edits.push(edit);
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Apply every collected edit to `source`, returning the rewritten text.
    /// Overlapping edits are rejected: two passes should never touch the
    /// same span twice in one run.
    pub fn apply(mut self, source: &str) -> String {
        self.edits.sort_by_key(|e| e.start);
        for pair in self.edits.windows(2) {
            debug_assert!(
                pair[0].end <= pair[1].start,
                "overlapping rewrite edits at byte {}",
                pair[1].start
            );
        }
        let mut out = String::with_capacity(source.len());
        let mut cursor = 0usize;
        for edit in &self.edits {
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.replacement);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    #[test]
    fn empty_buffer_is_byte_identical() {
        let src = "int main(void) { return 0; }";
        let buf = EditBuffer::new();
        assert_eq!(buf.apply(src), src);
    }

    #[test]
    fn single_replacement_splices_in_place() {
        let src = "foo(bar);";
        let mut buf = EditBuffer::new();
        buf.push(Edit::new(span(0, 3), "IA2_FN(foo)"));
        assert_eq!(buf.apply(src), "IA2_FN(foo)(bar);");
    }

    #[test]
    fn edits_applied_back_to_front_preserve_earlier_offsets() {
        let src = "a + b + c";
        let mut buf = EditBuffer::new();
        buf.push(Edit::new(span(0, 1), "AAAA"));
        buf.push(Edit::new(span(8, 9), "CCCC"));
        assert_eq!(buf.apply(src), "AAAA + b + CCCC");
    }
}
