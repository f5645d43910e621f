//! Diagnostic rendering against the markup a stream was compiled from.

use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind, Source};
use baml_records::SourceLocation;

use crate::error::{Diagnostic, ErrorKind};

impl Diagnostic {
    /// Render this diagnostic with ariadne, pointing into `source`, the
    /// markup text the stream was compiled from.
    pub fn render(&self, filename: &str, source: &str) -> String {
        let mut output = Vec::new();
        self.write_report(filename, source, &mut output);
        String::from_utf8(output).unwrap_or_else(|_| self.to_string())
    }

    /// Write the report to a writer.
    pub fn write_report<W: std::io::Write>(&self, filename: &str, source: &str, writer: W) {
        let range = self
            .location
            .map_or(0..0, |location| location_range(source, location));
        let report = self.build_report(filename, range);
        let _ = report.finish().write((filename, Source::from(source)), writer);
    }

    fn build_report<'a>(
        &self,
        filename: &'a str,
        range: Range<usize>,
    ) -> ariadne::ReportBuilder<'static, (&'a str, Range<usize>)> {
        let (label, help) = match &self.kind {
            ErrorKind::UnresolvedType { .. } => ("unknown type", None),
            ErrorKind::UnresolvedMember { .. } => (
                "unknown member",
                Some("the compiled stream may not match the loaded types"),
            ),
            ErrorKind::NoMatchingConstructor { .. } => ("no constructor for these arguments", None),
            ErrorKind::ConstructorInvocationFailed { .. } => ("constructor failed", None),
            ErrorKind::NoInsertionTarget { .. } => (
                "child content here",
                Some("the parent needs a content property, or must be a collection"),
            ),
            ErrorKind::MissingDictionaryKey { .. } => (
                "dictionary entry without a key",
                Some("add an x:Key, or give the type a dictionary key property"),
            ),
            ErrorKind::PropertyCollectionClosed { .. } => (
                "item after an explicit collection",
                Some("move the item inside the collection element"),
            ),
            ErrorKind::IncompatibleNullableAssignment { .. } => ("wrong value type", None),
            ErrorKind::TypeConversionFailed { .. } => ("cannot convert", None),
            ErrorKind::ResourceNotFound { .. } => (
                "resource referenced here",
                Some("resources must be declared in an enclosing dictionary"),
            ),
            ErrorKind::TruncatedStream { .. } => ("stream ends inside this element", None),
            _ => ("here", None),
        };
        let mut report = Report::build(ReportKind::Error, (filename, range.clone()))
            .with_message(self.kind.to_string())
            .with_label(
                Label::new((filename, range))
                    .with_message(label)
                    .with_color(Color::Red),
            );
        if let Some(help) = help {
            report = report.with_help(help);
        }
        if let Some(offset) = self.offset {
            let record = self
                .record
                .map_or_else(String::new, |record| format!("{record} "));
            report = report.with_note(format!("{record}record at stream offset {offset}"));
        }
        report
    }
}

/// Byte range of the word at a 1-based line and position.
fn location_range(source: &str, location: SourceLocation) -> Range<usize> {
    let Some(line_start) = line_start(source, location.line) else {
        return source.len()..source.len();
    };
    let line = source[line_start..].split('\n').next().unwrap_or("");
    let column = location.position.saturating_sub(1) as usize;
    let start = line
        .char_indices()
        .nth(column)
        .map_or(line.len(), |(index, _)| index);
    let len = line[start..]
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(line.len() - start)
        .max(1)
        .min(line.len().saturating_sub(start).max(1));
    let start = line_start + start;
    start..(start + len).min(source.len())
}

fn line_start(source: &str, line: u32) -> Option<usize> {
    if line <= 1 {
        return Some(0);
    }
    source
        .match_indices('\n')
        .nth(line as usize - 2)
        .map(|(index, _)| index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReadError;
    use baml_records::RecordKind;
    use facet_testhelpers::test;

    fn stripped(rendered: String) -> String {
        String::from_utf8(strip_ansi_escapes::strip(&rendered)).unwrap()
    }

    #[test]
    fn test_location_range_covers_the_word() {
        let source = "<Grid>\n  <Button Content=\"OK\" />\n</Grid>";
        let range = location_range(source, SourceLocation::new(2, 4));
        assert_eq!(&source[range], "Button");
        let range = location_range(source, SourceLocation::new(1, 1));
        assert_eq!(&source[range], "<Grid");
        let range = location_range(source, SourceLocation::new(7, 1));
        assert_eq!(range, source.len()..source.len());
    }

    #[test]
    fn test_render_missing_key() {
        let source = "<ResourceDictionary>\n  <SolidColorBrush Color=\"Red\" />\n</ResourceDictionary>";
        let error = ReadError::new(ErrorKind::MissingDictionaryKey {
            type_name: "SolidColorBrush".into(),
        })
        .at(Some(SourceLocation::new(2, 4)), 120, RecordKind::ElementEnd);
        let rendered = stripped(error.diagnostic().unwrap().render("theme.xaml", source));
        assert!(rendered.contains("dictionary entry of type 'SolidColorBrush' has no key"));
        assert!(rendered.contains("theme.xaml"));
        assert!(rendered.contains("add an x:Key"));
        assert!(rendered.contains("ElementEnd record at stream offset 120"));
    }

    #[test]
    fn test_render_without_location() {
        let error = ReadError::new(ErrorKind::ResourceNotFound { key: "Accent".into() });
        let rendered = stripped(error.diagnostic().unwrap().render("app.xaml", "<Window />"));
        assert!(rendered.contains("resource 'Accent' not found"));
    }
}
