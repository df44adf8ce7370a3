use crate::error::{Error, Result};
use crate::record::Record;
use memchr::{memchr, memchr2};
use std::fmt;
use std::path::PathBuf;

const ROW: &str = "row";
const ROW_NUMBER: &str = "row_number";

/// A compiled output path pattern such as `out/{row[id]}-{row_number:03}.pdf`.
///
/// The syntax follows Python's `str.format`: literal braces are doubled,
/// `{row[field]}` substitutes a record field, `{row_number}` the 1-based row
/// index, and an optional `:[[fill]align][0][width][type]` spec pads the
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPathTemplate {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    RowNumber(Spec),
    Field { name: String, spec: Spec },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<Align>,
    width: usize,
}

impl OutputPathTemplate {
    /// Parses `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathTemplate`] on unbalanced braces, positional or
    /// unknown placeholders, or an invalid format spec.
    pub fn parse(pattern: &str) -> Result<Self> {
        let fail = |reason: String| Error::path_template(pattern, None, reason);

        if pattern.is_empty() {
            return Err(fail("pattern is empty".to_string()));
        }

        let bytes = pattern.as_bytes();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut pos = 0;

        while let Some(offset) = memchr2(b'{', b'}', &bytes[pos..]) {
            let idx = pos + offset;
            literal.push_str(&pattern[pos..idx]);

            if bytes[idx] == b'}' {
                if bytes.get(idx + 1) == Some(&b'}') {
                    literal.push('}');
                    pos = idx + 2;
                    continue;
                }
                return Err(fail(format!("single '}}' at offset {idx}")));
            }

            if bytes.get(idx + 1) == Some(&b'{') {
                literal.push('{');
                pos = idx + 2;
                continue;
            }

            let close = memchr(b'}', &bytes[idx + 1..])
                .map(|o| idx + 1 + o)
                .ok_or_else(|| fail(format!("unclosed '{{' at offset {idx}")))?;
            let field = &pattern[idx + 1..close];
            if field.contains('{') {
                return Err(fail(format!(
                    "nested placeholders are not supported in '{{{field}}}'"
                )));
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_field(field).map_err(fail)?);
            pos = close + 1;
        }

        literal.push_str(&pattern[pos..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Names of the record fields the pattern references, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Substitutes `record` and `row_number` into the pattern.
    ///
    /// `record` is used verbatim; callers wanting safe paths pass a
    /// sanitized record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathTemplate`] if a referenced field is missing.
    pub fn format(&self, record: &Record, row_number: usize) -> Result<PathBuf> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::RowNumber(spec) => {
                    spec.pad(&row_number.to_string(), Align::Right, &mut out);
                }
                Segment::Field { name, spec } => {
                    let value = record.get(name).ok_or_else(|| {
                        Error::path_template(
                            &self.source,
                            Some(row_number),
                            format!("record has no field named '{name}'"),
                        )
                    })?;
                    spec.pad(value, Align::Left, &mut out);
                }
            }
        }
        Ok(PathBuf::from(out))
    }
}

impl fmt::Display for OutputPathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(field: &str) -> std::result::Result<Segment, String> {
    let (reference, spec) = split_spec(field);

    if reference.contains('!') {
        return Err(format!("conversions are not supported in '{{{field}}}'"));
    }

    if reference == ROW_NUMBER {
        let spec = spec.map_or(Ok(Spec::default()), |s| Spec::parse(s, 'd'))?;
        return Ok(Segment::RowNumber(spec));
    }

    if let Some(rest) = reference.strip_prefix(ROW) {
        if rest.is_empty() {
            return Err("'row' must be indexed by a field name, e.g. {row[name]}".to_string());
        }
        if let Some(inner) = rest.strip_prefix('[') {
            let end = inner
                .find(']')
                .ok_or_else(|| format!("missing ']' in '{{{field}}}'"))?;
            let (name, tail) = (&inner[..end], &inner[end + 1..]);
            if name.is_empty() {
                return Err(format!("empty field name in '{{{field}}}'"));
            }
            if !tail.is_empty() {
                return Err(format!("only one index is allowed in '{{{field}}}'"));
            }
            let spec = spec.map_or(Ok(Spec::default()), |s| Spec::parse(s, 's'))?;
            return Ok(Segment::Field {
                name: name.to_string(),
                spec,
            });
        }
        if rest.starts_with('.') {
            return Err(format!(
                "attribute access is not supported in '{{{field}}}', use {{row[name]}}"
            ));
        }
    }

    if reference.is_empty() || reference.bytes().all(|b| b.is_ascii_digit()) {
        return Err("positional placeholders are not supported; use {row[name]} or {row_number}"
            .to_string());
    }

    Err(format!(
        "unknown placeholder '{reference}'; expected 'row' or 'row_number'"
    ))
}

/// Splits `reference:spec`, ignoring colons inside a `[...]` index.
fn split_spec(field: &str) -> (&str, Option<&str>) {
    let mut in_index = false;
    for (idx, c) in field.char_indices() {
        match c {
            '[' => in_index = true,
            ']' => in_index = false,
            ':' if !in_index => return (&field[..idx], Some(&field[idx + 1..])),
            _ => {}
        }
    }
    (field, None)
}

impl Align {
    const fn from_char(c: char) -> Option<Self> {
        match c {
            '<' => Some(Self::Left),
            '>' => Some(Self::Right),
            '^' => Some(Self::Center),
            _ => None,
        }
    }
}

impl Spec {
    fn parse(spec: &str, type_char: char) -> std::result::Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = Self::default();
        let mut i = 0;

        if let Some(align) = chars.get(1).copied().and_then(Align::from_char) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(align);
            i = 2;
        } else if let Some(align) = chars.first().copied().and_then(Align::from_char) {
            parsed.align = Some(align);
            i = 1;
        }

        // The `0` flag only sets the fill; strings stay left-aligned.
        if chars.get(i) == Some(&'0') {
            if parsed.fill.is_none() {
                parsed.fill = Some('0');
            }
            i += 1;
        }

        let digits: String = chars[i..].iter().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            parsed.width = digits
                .parse()
                .map_err(|_| format!("width '{digits}' is too large"))?;
            i += digits.len();
        }

        if chars.get(i) == Some(&type_char) {
            i += 1;
        }

        if i != chars.len() {
            return Err(format!("invalid format spec '{spec}'"));
        }
        Ok(parsed)
    }

    fn pad(&self, value: &str, default_align: Align, out: &mut String) {
        let len = value.chars().count();
        let padding = self.width.saturating_sub(len);
        let fill = self.fill.unwrap_or(' ');
        let (before, after) = match self.align.unwrap_or(default_align) {
            Align::Left => (0, padding),
            Align::Right => (padding, 0),
            Align::Center => (padding / 2, padding - padding / 2),
        };
        out.extend(std::iter::repeat_n(fill, before));
        out.push_str(value);
        out.extend(std::iter::repeat_n(fill, after));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(pattern: &str, record: &Record, row: usize) -> Result<String> {
        OutputPathTemplate::parse(pattern)?
            .format(record, row)
            .map(|p| p.to_string_lossy().into_owned())
    }

    #[test]
    fn test_substitutes_fields_and_row_number() {
        let record = Record::from_pairs([("id", "42"), ("name", "Ada")]);
        assert_eq!(
            format("out/{row[id]}-{row[name]}-{row_number}.pdf", &record, 3).unwrap(),
            "out/42-Ada-3.pdf"
        );
    }

    #[test]
    fn test_escaped_braces() {
        let record = Record::from_pairs([("id", "7")]);
        assert_eq!(
            format("{{literal}}-{row[id]}", &record, 1).unwrap(),
            "{literal}-7"
        );
    }

    #[test]
    fn test_format_specs() {
        let record = Record::from_pairs([("id", "7")]);
        assert_eq!(format("{row_number:03}", &record, 5).unwrap(), "005");
        assert_eq!(format("{row_number:>4d}", &record, 12).unwrap(), "  12");
        assert_eq!(format("{row[id]:_<3}", &record, 1).unwrap(), "7__");
        assert_eq!(format("{row[id]:*^5s}", &record, 1).unwrap(), "**7**");
        assert_eq!(format("{row[id]:3}", &record, 1).unwrap(), "7  ");
    }

    #[test]
    fn test_zero_flag_keeps_fields_left_aligned() {
        let record = Record::from_pairs([("id", "7")]);
        assert_eq!(format("{row[id]:03}", &record, 1).unwrap(), "700");
        assert_eq!(format("{row[id]:>03}", &record, 1).unwrap(), "007");
        assert_eq!(format("{row_number:03d}", &record, 7).unwrap(), "007");
    }

    #[test]
    fn test_colon_inside_index_is_part_of_name() {
        let record = Record::from_pairs([("a:b", "x")]);
        assert_eq!(format("{row[a:b]}", &record, 1).unwrap(), "x");
    }

    #[test]
    fn test_missing_field_reports_row() {
        let record = Record::from_pairs([("id", "7")]);
        let err = format("{row[name]}.pdf", &record, 4).unwrap_err();
        assert!(matches!(err, Error::PathTemplate { row: Some(4), .. }));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_malformed_patterns() {
        for pattern in [
            "",
            "out/{row[id]",
            "out/}",
            "{}",
            "{0}",
            "{row}",
            "{row.id}",
            "{row[]}",
            "{row[id][x]}",
            "{name}",
            "{row[id]!r}",
            "{row_number:x}",
            "{row[id]:{w}}",
        ] {
            let err = OutputPathTemplate::parse(pattern).unwrap_err();
            assert!(
                matches!(err, Error::PathTemplate { row: None, .. }),
                "expected syntax error for {pattern:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_field_names() {
        let template = OutputPathTemplate::parse("{row[a]}/{row_number}/{row[b]}").unwrap();
        assert_eq!(template.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(template.to_string(), "{row[a]}/{row_number}/{row[b]}");
    }
}
