//! Immutable option bundles controlling how values and type names are rendered.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberBase {
    #[default]
    Decimal,
    Hexadecimal,
}

/// Options for the value facet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueFormatterOptions {
    number_base: NumberBase,
    digit_separators: bool,
    string_quotes: bool,
    namespaces: bool,
    intrinsic_type_keywords: bool,
    max_string_len: usize,
}

impl Default for ValueFormatterOptions {
    fn default() -> Self {
        Self {
            number_base: NumberBase::Decimal,
            digit_separators: false,
            string_quotes: true,
            namespaces: true,
            intrinsic_type_keywords: true,
            max_string_len: 80,
        }
    }
}

impl ValueFormatterOptions {
    pub fn number_base(&self) -> NumberBase {
        self.number_base
    }

    pub fn digit_separators(&self) -> bool {
        self.digit_separators
    }

    pub fn string_quotes(&self) -> bool {
        self.string_quotes
    }

    pub fn namespaces(&self) -> bool {
        self.namespaces
    }

    pub fn intrinsic_type_keywords(&self) -> bool {
        self.intrinsic_type_keywords
    }

    pub fn max_string_len(&self) -> usize {
        self.max_string_len
    }

    pub fn with_number_base(mut self, base: NumberBase) -> Self {
        self.number_base = base;
        self
    }

    pub fn with_digit_separators(mut self, enabled: bool) -> Self {
        self.digit_separators = enabled;
        self
    }

    pub fn with_string_quotes(mut self, enabled: bool) -> Self {
        self.string_quotes = enabled;
        self
    }

    pub fn with_namespaces(mut self, enabled: bool) -> Self {
        self.namespaces = enabled;
        self
    }

    pub fn with_intrinsic_type_keywords(mut self, enabled: bool) -> Self {
        self.intrinsic_type_keywords = enabled;
        self
    }

    /// Strings longer than this many characters are truncated with `…`. Zero disables truncation.
    pub fn with_max_string_len(mut self, max: usize) -> Self {
        self.max_string_len = max;
        self
    }

    /// The type options implied by these value options, for types embedded in a value
    /// (e.g. `List<int>(size=3)`).
    pub fn type_options(&self) -> TypeFormatterOptions {
        TypeFormatterOptions::default()
            .with_namespaces(self.namespaces)
            .with_intrinsic_type_keywords(self.intrinsic_type_keywords)
            .with_number_base(self.number_base)
            .with_digit_separators(self.digit_separators)
    }
}

/// Options for the expected-type and actual-type facets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeFormatterOptions {
    namespaces: bool,
    intrinsic_type_keywords: bool,
    number_base: NumberBase,
    digit_separators: bool,
}

impl Default for TypeFormatterOptions {
    fn default() -> Self {
        Self {
            namespaces: true,
            intrinsic_type_keywords: true,
            number_base: NumberBase::Decimal,
            digit_separators: false,
        }
    }
}

impl TypeFormatterOptions {
    pub fn namespaces(&self) -> bool {
        self.namespaces
    }

    pub fn intrinsic_type_keywords(&self) -> bool {
        self.intrinsic_type_keywords
    }

    /// Base used for numbers appearing in type names (array bounds).
    pub fn number_base(&self) -> NumberBase {
        self.number_base
    }

    pub fn digit_separators(&self) -> bool {
        self.digit_separators
    }

    pub fn with_namespaces(mut self, enabled: bool) -> Self {
        self.namespaces = enabled;
        self
    }

    pub fn with_intrinsic_type_keywords(mut self, enabled: bool) -> Self {
        self.intrinsic_type_keywords = enabled;
        self
    }

    pub fn with_number_base(mut self, base: NumberBase) -> Self {
        self.number_base = base;
        self
    }

    pub fn with_digit_separators(mut self, enabled: bool) -> Self {
        self.digit_separators = enabled;
        self
    }
}
