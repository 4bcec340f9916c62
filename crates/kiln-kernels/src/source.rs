//! Generic kernel sources and the named template library.
//!
//! A kernel source is CUDA C text in which the identifier `TYPE` stands
//! for the element type. Instantiating it for a [`DType`] replaces every
//! whole-word occurrence with the type's C spelling (`float`, `int`, ...).
//! The entry point of a source is the function named like the source.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use kiln_core::{DType, KilnError, Result};

/// The identifier replaced by the element type on instantiation.
pub const PLACEHOLDER: &str = "TYPE";

/// A named, type-generic kernel.
///
/// Equality and hashing use the name only: two sources with the same name
/// are the same cache key, whatever their text.
#[derive(Debug, Clone)]
pub struct KernelSource {
    name: Cow<'static, str>,
    template: Cow<'static, str>,
}

impl KernelSource {
    /// `*result = sum(vector[0..count])`, single thread.
    pub const SUM: KernelSource = KernelSource::from_static(
        "sum",
        r#"extern "C" __global__ void sum(TYPE *vector, long count, TYPE *result) {
    *result = 0;
    for (long i = 0; i < count; i++)
        *result += vector[i];
}
"#,
    );

    /// `*result = sum(|vector[0..count]|)`, single thread.
    pub const ASUM: KernelSource = KernelSource::from_static(
        "asum",
        r#"extern "C" __global__ void asum(TYPE *vector, long count, TYPE *result) {
    *result = 0;
    for (long i = 0; i < count; i++)
        *result += vector[i] < 0 ? -vector[i] : vector[i];
}
"#,
    );

    /// `vector[i] = value` for every `i < count`, grid-stride.
    pub const FILL: KernelSource = KernelSource::from_static(
        "fill",
        r#"extern "C" __global__ void fill(TYPE *vector, long count, TYPE value) {
    for (long i = blockIdx.x * blockDim.x + threadIdx.x; i < count; i += blockDim.x * gridDim.x)
        vector[i] = value;
}
"#,
    );

    /// `vector[i] *= alpha` for every `i < count`, grid-stride.
    pub const SCALE: KernelSource = KernelSource::from_static(
        "scale",
        r#"extern "C" __global__ void scale(TYPE *vector, long count, TYPE alpha) {
    for (long i = blockIdx.x * blockDim.x + threadIdx.x; i < count; i += blockDim.x * gridDim.x)
        vector[i] *= alpha;
}
"#,
    );

    /// The kernels every library starts with.
    pub fn builtins() -> [KernelSource; 4] {
        [Self::SUM, Self::ASUM, Self::FILL, Self::SCALE]
    }

    /// A source from static text, unchecked. Used for the built-ins.
    pub const fn from_static(name: &'static str, template: &'static str) -> Self {
        Self { name: Cow::Borrowed(name), template: Cow::Borrowed(template) }
    }

    /// A user-supplied source.
    ///
    /// The name must be a C identifier and the template must mention
    /// [`PLACEHOLDER`] at least once. Whether the template actually
    /// declares the entry point is left to the compiler.
    pub fn new(name: impl Into<Cow<'static, str>>, template: impl Into<Cow<'static, str>>) -> Result<Self> {
        let source = Self { name: name.into(), template: template.into() };
        if !is_identifier(&source.name) {
            return Err(KilnError::InvalidTemplate {
                name: source.name.into_owned(),
                reason: "name is not a C identifier".into(),
            });
        }
        check_placeholder(&source)?;
        Ok(source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Symbol launched from the compiled module.
    pub fn entry_point(&self) -> &str {
        &self.name
    }

    /// The template with every whole-word `TYPE` replaced by `dtype`'s C type.
    pub fn instantiate(&self, dtype: DType) -> String {
        let mut out = String::with_capacity(self.template.len() + 32);
        let mut ident = String::new();
        for c in self.template.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                continue;
            }
            flush_ident(&mut out, &mut ident, dtype);
            out.push(c);
        }
        flush_ident(&mut out, &mut ident, dtype);
        out
    }
}

fn flush_ident(out: &mut String, ident: &mut String, dtype: DType) {
    if ident == PLACEHOLDER {
        out.push_str(dtype.c_type());
    } else {
        out.push_str(ident);
    }
    ident.clear();
}

fn check_placeholder(source: &KernelSource) -> Result<()> {
    if identifiers(source.template()).any(|id| id == PLACEHOLDER) {
        return Ok(());
    }
    Err(KilnError::InvalidTemplate {
        name: source.name().to_string(),
        reason: format!("template never mentions {PLACEHOLDER}"),
    })
}

/// Maximal runs of identifier characters in `text`.
fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')).filter(|s| !s.is_empty())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PartialEq for KernelSource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for KernelSource {}

impl Hash for KernelSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for KernelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// KernelLibrary
// ============================================================================

/// Kernel sources addressable by name.
#[derive(Debug, Clone, Default)]
pub struct KernelLibrary {
    sources: BTreeMap<String, KernelSource>,
}

impl KernelLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// A library holding the built-in kernels.
    pub fn with_builtins() -> Self {
        let mut lib = Self::new();
        for source in KernelSource::builtins() {
            lib.sources.insert(source.name().to_string(), source);
        }
        lib
    }

    /// Add a source. Re-registering the identical template is a no-op;
    /// a different template under a taken name is `DuplicateKernel`.
    pub fn register(&mut self, source: KernelSource) -> Result<()> {
        check_placeholder(&source)?;
        match self.sources.get(source.name()) {
            Some(existing) if existing.template() == source.template() => Ok(()),
            Some(_) => Err(KilnError::DuplicateKernel(source.name().to_string())),
            None => {
                tracing::debug!("registered kernel '{}'", source.name());
                self.sources.insert(source.name().to_string(), source);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&KernelSource> {
        self.sources.get(name).ok_or_else(|| KilnError::UnknownKernel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Sources in name order.
    pub fn iter(&self) -> impl Iterator<Item = &KernelSource> {
        self.sources.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
