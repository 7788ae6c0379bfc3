use bytes::Bytes;

/// Content of a single call parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Plain string, used for signing and form encoding
    String(String),
    /// Binary blob sent as a multipart file part
    Binary {
        content: Bytes,
        content_type: String,
        file_name: Option<String>,
    },
}

/// A named call parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: String,
    value: ParamValue,
}

impl Param {
    /// Create a string parameter
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Param {
            name: name.into(),
            value: ParamValue::String(value.into()),
        }
    }

    /// Create a binary parameter. Binary parameters always carry a content type.
    pub fn binary(
        name: impl Into<String>,
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        Param {
            name: name.into(),
            value: ParamValue::Binary {
                content: content.into(),
                content_type: content_type.into(),
                file_name: None,
            },
        }
    }

    /// Create a binary parameter with a file name for the multipart disposition
    pub fn file(
        name: impl Into<String>,
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Param {
            name: name.into(),
            value: ParamValue::Binary {
                content: content.into(),
                content_type: content_type.into(),
                file_name: Some(file_name.into()),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn is_string(&self) -> bool {
        matches!(self.value, ParamValue::String(_))
    }

    /// String content, `None` for binary parameters
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ParamValue::String(s) => Some(s),
            ParamValue::Binary { .. } => None,
        }
    }

    /// Raw content bytes regardless of kind
    pub fn content(&self) -> &[u8] {
        match &self.value {
            ParamValue::String(s) => s.as_bytes(),
            ParamValue::Binary { content, .. } => content,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match &self.value {
            ParamValue::String(_) => None,
            ParamValue::Binary { content_type, .. } => Some(content_type),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match &self.value {
            ParamValue::String(_) => None,
            ParamValue::Binary { file_name, .. } => file_name.as_deref(),
        }
    }
}

/// Ordered collection of call parameters.
///
/// Insertion order is kept for iteration. [`Params::add`] replaces an
/// existing parameter of the same name in place (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    items: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Add a parameter, replacing the first one with the same name
    pub fn add(&mut self, param: Param) {
        match self.items.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.items.push(param),
        }
    }

    /// Add a string parameter, replacing any with the same name
    pub fn add_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.add(Param::string(name, value));
    }

    /// Look up the first parameter with this name
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.items.iter().find(|p| p.name == name)
    }

    /// Remove and return the parameter with this name
    pub fn remove(&mut self, name: &str) -> Option<Param> {
        let pos = self.items.iter().position(|p| p.name == name)?;
        Some(self.items.remove(pos))
    }

    /// Remove every parameter matching the predicate, returning them in order
    pub fn drain_where<F>(&mut self, mut pred: F) -> Vec<Param>
    where
        F: FnMut(&Param) -> bool,
    {
        let (taken, kept): (Vec<Param>, Vec<Param>) =
            std::mem::take(&mut self.items).into_iter().partition(|p| pred(p));
        self.items = kept;
        taken
    }

    /// True when every parameter is a plain string (or the set is empty)
    pub fn are_strings(&self) -> bool {
        self.items.iter().all(Param::is_string)
    }

    /// Name/value pairs of the string parameters, in insertion order
    pub fn string_pairs(&self) -> Vec<(&str, &str)> {
        self.items
            .iter()
            .filter_map(|p| p.as_str().map(|v| (p.name.as_str(), v)))
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Param> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        let mut params = Params::new();
        for param in iter {
            params.add(param);
        }
        params
    }
}
