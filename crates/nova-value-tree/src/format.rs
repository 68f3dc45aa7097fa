//! Formatting requests and the default value/type renderers.

use crate::error::{ValueNodeError, ValueNodeResult};
use crate::language::Language;
use crate::node::{ImageName, ValueNode};
use crate::options::{NumberBase, TypeFormatterOptions, ValueFormatterOptions};
use crate::text::{FormattedText, SharedWriter, TextColor};
use crate::value::{RawValue, Value};

/// Up to four independent output sinks, each with its own options.
///
/// A request with no sinks at all is valid and completes without writing anything.
#[derive(Clone, Default)]
pub struct FormatRequest {
    name: Option<SharedWriter>,
    value: Option<(SharedWriter, ValueFormatterOptions)>,
    expected_type: Option<(SharedWriter, TypeFormatterOptions)>,
    actual_type: Option<(SharedWriter, TypeFormatterOptions)>,
}

impl std::fmt::Debug for FormatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRequest")
            .field("name", &self.name.is_some())
            .field("value", &self.value.as_ref().map(|(_, o)| o))
            .field("expected_type", &self.expected_type.as_ref().map(|(_, o)| o))
            .field("actual_type", &self.actual_type.as_ref().map(|(_, o)| o))
            .finish()
    }
}

impl FormatRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, output: SharedWriter) -> Self {
        self.name = Some(output);
        self
    }

    pub fn value(mut self, output: SharedWriter, options: ValueFormatterOptions) -> Self {
        self.value = Some((output, options));
        self
    }

    pub fn expected_type(mut self, output: SharedWriter, options: TypeFormatterOptions) -> Self {
        self.expected_type = Some((output, options));
        self
    }

    pub fn actual_type(mut self, output: SharedWriter, options: TypeFormatterOptions) -> Self {
        self.actual_type = Some((output, options));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.value.is_none()
            && self.expected_type.is_none()
            && self.actual_type.is_none()
    }

    /// Rejects sinks that can't accept output. Runs before anything is scheduled.
    pub(crate) fn validate(&self) -> ValueNodeResult<()> {
        let sinks = [
            ("name", self.name.as_ref()),
            ("value", self.value.as_ref().map(|(w, _)| w)),
            ("expected type", self.expected_type.as_ref().map(|(w, _)| w)),
            ("actual type", self.actual_type.as_ref().map(|(w, _)| w)),
        ];
        for (facet, sink) in sinks {
            if let Some(sink) = sink {
                if !sink.is_usable() {
                    return Err(ValueNodeError::invalid_argument(format!(
                        "{facet} output is not usable"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Splits the request into the sinks and the per-facet buffers handed to the evaluator.
    pub(crate) fn split(self) -> (FacetWriters, FacetBuffers) {
        let buffers = FacetBuffers {
            name: self.name.as_ref().map(|_| FormattedText::new()),
            value: self
                .value
                .as_ref()
                .map(|(_, options)| (FormattedText::new(), *options)),
            expected_type: self
                .expected_type
                .as_ref()
                .map(|(_, options)| (FormattedText::new(), *options)),
            actual_type: self
                .actual_type
                .as_ref()
                .map(|(_, options)| (FormattedText::new(), *options)),
        };
        let writers = FacetWriters {
            name: self.name,
            value: self.value.map(|(w, _)| w),
            expected_type: self.expected_type.map(|(w, _)| w),
            actual_type: self.actual_type.map(|(w, _)| w),
        };
        (writers, buffers)
    }
}

pub(crate) struct FacetWriters {
    name: Option<SharedWriter>,
    value: Option<SharedWriter>,
    expected_type: Option<SharedWriter>,
    actual_type: Option<SharedWriter>,
}

impl FacetWriters {
    /// Hands each facet to its sink in a single write.
    pub(crate) fn flush(self, buffers: FacetBuffers) {
        let pairs = [
            (self.name, buffers.name),
            (self.value, buffers.value.map(|(t, _)| t)),
            (self.expected_type, buffers.expected_type.map(|(t, _)| t)),
            (self.actual_type, buffers.actual_type.map(|(t, _)| t)),
        ];
        for (writer, text) in pairs {
            if let (Some(writer), Some(text)) = (writer, text) {
                writer.write_text(&text);
            }
        }
    }
}

/// Buffers for the facets requested by one [`FormatRequest`]. Facets that were not
/// requested are absent.
#[derive(Debug)]
pub struct FacetBuffers {
    name: Option<FormattedText>,
    value: Option<(FormattedText, ValueFormatterOptions)>,
    expected_type: Option<(FormattedText, TypeFormatterOptions)>,
    actual_type: Option<(FormattedText, TypeFormatterOptions)>,
}

impl FacetBuffers {
    pub fn name(&mut self) -> Option<&mut FormattedText> {
        self.name.as_mut()
    }

    pub fn value(&mut self) -> Option<(&mut FormattedText, ValueFormatterOptions)> {
        self.value.as_mut().map(|(text, options)| (text, *options))
    }

    pub fn expected_type(&mut self) -> Option<(&mut FormattedText, TypeFormatterOptions)> {
        self.expected_type
            .as_mut()
            .map(|(text, options)| (text, *options))
    }

    pub fn actual_type(&mut self) -> Option<(&mut FormattedText, TypeFormatterOptions)> {
        self.actual_type
            .as_mut()
            .map(|(text, options)| (text, *options))
    }
}

/// Writes the requested facets using the generic renderers.
pub fn format_default(language: &Language, node: &ValueNode, facets: &mut FacetBuffers) {
    if let Some(out) = facets.name() {
        out.write(name_color(node.image_name()), node.name());
    }
    if let Some((out, options)) = facets.value() {
        ValueFormatter::new(language, options).format(node.value(), out);
    }
    if let Some((out, options)) = facets.expected_type() {
        let expected = node.expected_type().unwrap_or(node.value().type_name());
        TypeFormatter::new(language, options).format(expected, out);
    }
    if let Some((out, options)) = facets.actual_type() {
        TypeFormatter::new(language, options).format(node.value().type_name(), out);
    }
}

fn name_color(image: ImageName) -> TextColor {
    match image {
        ImageName::Local => TextColor::Local,
        ImageName::Parameter => TextColor::Parameter,
        ImageName::Field | ImageName::StaticField => TextColor::Field,
        ImageName::Property | ImageName::StaticProperty => TextColor::Property,
        ImageName::ArrayElement => TextColor::ArrayElement,
        ImageName::Error => TextColor::Error,
        _ => TextColor::Text,
    }
}

/// Renders values without evaluating anything: only the payload already fetched is used.
pub struct ValueFormatter<'a> {
    language: &'a Language,
    options: ValueFormatterOptions,
}

impl<'a> ValueFormatter<'a> {
    pub fn new(language: &'a Language, options: ValueFormatterOptions) -> Self {
        Self { language, options }
    }

    pub fn format(&self, value: &Value, out: &mut FormattedText) {
        match value.raw() {
            RawValue::Null => out.write(TextColor::Keyword, "null"),
            RawValue::Boolean(b) => out.write(TextColor::Keyword, b.to_string()),
            RawValue::Char(c) => {
                let mut s = String::from("'");
                escape_into(&mut s, *c, '\'');
                s.push('\'');
                out.write(TextColor::Char, s);
            }
            RawValue::I8(v) => self.write_int(out, v.to_string(), format!("{v:02x}")),
            RawValue::I16(v) => self.write_int(out, v.to_string(), format!("{v:04x}")),
            RawValue::I32(v) => self.write_int(out, v.to_string(), format!("{v:08x}")),
            RawValue::I64(v) => self.write_int(out, v.to_string(), format!("{v:016x}")),
            RawValue::U8(v) => self.write_int(out, v.to_string(), format!("{v:02x}")),
            RawValue::U16(v) => self.write_int(out, v.to_string(), format!("{v:04x}")),
            RawValue::U32(v) => self.write_int(out, v.to_string(), format!("{v:08x}")),
            RawValue::U64(v) => self.write_int(out, v.to_string(), format!("{v:016x}")),
            RawValue::F32(v) => out.write(TextColor::Number, trim_float(f64::from(*v))),
            RawValue::F64(v) => out.write(TextColor::Number, trim_float(*v)),
            RawValue::String(s) => {
                let escaped = escape_string(s, self.options.max_string_len());
                if self.options.string_quotes() {
                    out.write(TextColor::String, format!("\"{escaped}\""));
                } else {
                    out.write(TextColor::String, escaped);
                }
            }
            RawValue::Reference { target } => {
                if *target == 0 {
                    out.write(TextColor::Keyword, "null");
                } else {
                    out.write(TextColor::Number, format!("0x{target:016x}"));
                }
            }
            RawValue::Array { length } => {
                let element = value
                    .type_name()
                    .strip_suffix("[]")
                    .unwrap_or(value.type_name());
                out.write(TextColor::Punctuation, "{");
                TypeFormatter::new(self.language, self.options.type_options())
                    .format(element, out);
                out.write(TextColor::Punctuation, "[");
                let (decimal, hex) = (length.to_string(), format!("{length:x}"));
                self.write_int(out, decimal, hex);
                out.write(TextColor::Punctuation, "]}");
            }
            RawValue::Object => {
                out.write(TextColor::Punctuation, "{");
                TypeFormatter::new(self.language, self.options.type_options())
                    .format(value.type_name(), out);
                out.write(TextColor::Punctuation, "}");
            }
        }
    }

    fn write_int(&self, out: &mut FormattedText, decimal: String, hex: String) {
        let text = match self.options.number_base() {
            NumberBase::Decimal if self.options.digit_separators() => group_digits(&decimal, 3),
            NumberBase::Decimal => decimal,
            NumberBase::Hexadecimal if self.options.digit_separators() => {
                format!("0x{}", group_digits(&hex, 4))
            }
            NumberBase::Hexadecimal => format!("0x{hex}"),
        };
        out.write(TextColor::Number, text);
    }
}

/// Renders (possibly generic) type names like `System.Collections.Generic.List<System.Int32>`.
pub struct TypeFormatter<'a> {
    language: &'a Language,
    options: TypeFormatterOptions,
}

impl<'a> TypeFormatter<'a> {
    pub fn new(language: &'a Language, options: TypeFormatterOptions) -> Self {
        Self { language, options }
    }

    pub fn format(&self, type_name: &str, out: &mut FormattedText) {
        let mut segment = String::new();
        let mut in_bounds = false;
        for ch in type_name.chars() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$' {
                segment.push(ch);
                continue;
            }
            self.write_segment(&segment, in_bounds, out);
            segment.clear();
            match ch {
                '[' => in_bounds = true,
                ']' => in_bounds = false,
                _ => {}
            }
            out.write(TextColor::Punctuation, ch.to_string());
        }
        self.write_segment(&segment, in_bounds, out);
    }

    /// Only array bounds are numbers; other digits (generic arity, `Outer$1`) are part of
    /// the name and kept verbatim.
    fn write_segment(&self, segment: &str, in_bounds: bool, out: &mut FormattedText) {
        if segment.is_empty() {
            return;
        }
        if segment.chars().all(|c| c.is_ascii_digit()) {
            let text = match (segment.parse::<u64>(), self.options.number_base()) {
                (Ok(n), NumberBase::Hexadecimal) if in_bounds => format!("0x{n:x}"),
                (Ok(n), NumberBase::Decimal) if in_bounds && self.options.digit_separators() => {
                    group_digits(&n.to_string(), 3)
                }
                _ => segment.to_owned(),
            };
            out.write(TextColor::Number, text);
            return;
        }
        if self.options.intrinsic_type_keywords() {
            if let Some(keyword) = self.language.type_keyword(segment) {
                out.write(TextColor::Keyword, keyword);
                return;
            }
        }
        match segment.rfind('.') {
            Some(idx) if self.options.namespaces() => {
                out.write(TextColor::Namespace, &segment[..=idx]);
                out.write(TextColor::Type, &segment[idx + 1..]);
            }
            Some(idx) => out.write(TextColor::Type, &segment[idx + 1..]),
            None => out.write(TextColor::Type, segment),
        }
    }
}

fn group_digits(digits: &str, group: usize) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / group);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % group == 0 {
            out.push('_');
        }
        out.push(ch);
    }
    format!("{sign}{out}")
}

fn trim_float(value: f64) -> String {
    if value.is_nan() || value.is_infinite() {
        return value.to_string();
    }
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}

fn escape_into(out: &mut String, ch: char, quote: char) {
    match ch {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\0' => out.push_str("\\0"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        c => out.push(c),
    }
}

fn escape_string(input: &str, max_len: usize) -> String {
    let mut out = String::new();
    for (used, ch) in input.chars().enumerate() {
        if max_len != 0 && used >= max_len {
            out.push('…');
            break;
        }
        escape_into(&mut out, ch, '"');
    }
    out
}
