//! The match-pattern registry.
//!
//! Every built-in primitive registers its surface name, one or more
//! call-shape templates (e.g. `"argmin_d(_1, _2)"`), a factory, and a doc
//! string. The registry is process-wide state: built once at startup,
//! read-only thereafter. The compiler matches call expressions against the
//! templates; `_N` denotes a positional parameter, `__N` a trailing list
//! expansion, and `__arg(name, default)` a keyword parameter with a
//! default.

use std::sync::{Arc, OnceLock};

use ahash::AHashMap;

use crate::{
    distributed::Locality,
    error::Result,
    primitive::{NameParts, Primitive},
    values::Value,
};

/// Creates a primitive node of this pattern's kind from lowered operands.
pub type PrimitiveFactory = fn(Vec<Value>, NameParts, Arc<Locality>) -> Result<Primitive>;

/// A registered built-in primitive.
#[derive(Clone)]
pub struct MatchPattern {
    /// Surface (and primitive) name.
    pub name: &'static str,
    /// Call-shape templates, tried in order.
    pub templates: &'static [&'static str],
    pub factory: PrimitiveFactory,
    pub help: &'static str,
}

impl std::fmt::Debug for MatchPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchPattern")
            .field("name", &self.name)
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}

/// One parameter of a parsed call-shape template.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplateParam {
    Positional,
    /// `__N`: zero or more trailing arguments.
    VarArgs,
    /// `__arg(name, default)`.
    Keyword { name: String, default: Value },
}

/// A parsed call shape.
#[derive(Debug, Clone)]
pub(crate) struct CallShape {
    pub params: Vec<TemplateParam>,
}

impl CallShape {
    pub fn positional_count(&self) -> usize {
        self.params.iter().filter(|p| matches!(p, TemplateParam::Positional)).count()
    }

    pub fn has_varargs(&self) -> bool {
        self.params.iter().any(|p| matches!(p, TemplateParam::VarArgs))
    }

    pub fn keywords(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params.iter().filter_map(|p| match p {
            TemplateParam::Keyword { name, default } => Some((name.as_str(), default)),
            _ => None,
        })
    }

    /// Whether a call with `positional` plain arguments and the given
    /// keyword names selects this shape. Keyword parameters may also be
    /// filled positionally.
    pub fn matches(&self, positional: usize, keywords: &[&str]) -> bool {
        if !keywords.iter().all(|k| self.keywords().any(|(name, _)| name == *k)) {
            return false;
        }
        let required = self.positional_count();
        if self.has_varargs() {
            positional >= required
        } else {
            positional >= required && positional <= required + self.keywords().count()
        }
    }

    /// A human-readable arity description for arity-error messages.
    pub fn arity_text(&self) -> String {
        let required = self.positional_count();
        if self.has_varargs() {
            format!("at least {required}")
        } else {
            let max = required + self.keywords().count();
            if max == required {
                required.to_string()
            } else {
                format!("{required} to {max}")
            }
        }
    }
}

/// Parses `name(params...)` into the surface name and shape.
fn parse_template(template: &'static str) -> (String, CallShape) {
    let (name, rest) = template
        .split_once('(')
        .unwrap_or((template, ")"));
    let body = rest.trim_end().trim_end_matches(')');
    let mut params = Vec::new();
    for part in split_top_level(body) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(inner) = part.strip_prefix("__arg(").and_then(|p| p.strip_suffix(')')) {
            let (kw_name, default) = inner.split_once(',').unwrap_or((inner, "nil"));
            params.push(TemplateParam::Keyword {
                name: kw_name.trim().to_owned(),
                default: parse_default(default.trim()),
            });
        } else if part.starts_with("__") {
            params.push(TemplateParam::VarArgs);
        } else {
            params.push(TemplateParam::Positional);
        }
    }
    (name.trim().to_owned(), CallShape { params })
}

/// Splits on commas outside parentheses.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Parses a keyword default literal from a template string.
fn parse_default(text: &str) -> Value {
    match text {
        "nil" | "" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        quoted if quoted.starts_with('"') && quoted.ends_with('"') && quoted.len() >= 2 => {
            Value::from(&quoted[1..quoted.len() - 1])
        }
        other => other
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| other.parse::<f64>().map(Value::Double))
            .unwrap_or(Value::Nil),
    }
}

/// A registry entry: the pattern plus its parsed call shapes.
#[derive(Debug, Clone)]
pub(crate) struct PatternEntry {
    pub pattern: MatchPattern,
    pub shapes: Vec<CallShape>,
}

/// The process-wide pattern registry.
#[derive(Debug, Default)]
pub struct Registry {
    entries: AHashMap<String, PatternEntry>,
}

impl Registry {
    /// The global registry, built once on first use.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Self::build)
    }

    fn build() -> Self {
        let mut registry = Self::default();
        for pattern in crate::primitives::all_patterns() {
            registry.register(pattern);
        }
        registry
    }

    fn register(&mut self, pattern: MatchPattern) {
        let mut shapes = Vec::with_capacity(pattern.templates.len());
        for template in pattern.templates {
            let (name, shape) = parse_template(template);
            debug_assert_eq!(name, pattern.name, "template name must match the pattern name");
            shapes.push(shape);
        }
        self.entries
            .insert(pattern.name.to_owned(), PatternEntry { pattern, shapes });
    }

    pub(crate) fn get(&self, name: &str) -> Option<&PatternEntry> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered surface names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The doc string of a registered primitive.
    #[must_use]
    pub fn help(&self, name: &str) -> Option<&'static str> {
        self.entries.get(name).map(|entry| entry.pattern.help)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parsing() {
        let (name, shape) = parse_template("argmin_d(_1, _2)");
        assert_eq!(name, "argmin_d");
        assert_eq!(shape.positional_count(), 2);
        assert!(!shape.has_varargs());

        let (name, shape) = parse_template("block(__1)");
        assert_eq!(name, "block");
        assert!(shape.has_varargs());

        let (_, shape) = parse_template("random(_1, __arg(seed, nil))");
        assert_eq!(shape.positional_count(), 1);
        assert_eq!(shape.keywords().count(), 1);
        assert_eq!(shape.keywords().next().unwrap().0, "seed");
    }

    #[test]
    fn shape_matching() {
        let (_, shape) = parse_template("conv1d_d(_1, _2, __arg(padding, \"valid\"))");
        assert!(shape.matches(2, &[]));
        assert!(shape.matches(2, &["padding"]));
        assert!(shape.matches(3, &[]));
        assert!(!shape.matches(1, &[]));
        assert!(!shape.matches(4, &[]));
        assert!(!shape.matches(2, &["pad"]));
    }

    #[test]
    fn varargs_accept_any_surplus() {
        let (_, shape) = parse_template("list(__1)");
        assert!(shape.matches(0, &[]));
        assert!(shape.matches(7, &[]));
    }

    #[test]
    fn default_literals() {
        assert_eq!(parse_default("nil"), Value::Nil);
        assert_eq!(parse_default("42"), Value::Int(42));
        assert_eq!(parse_default("0.5"), Value::Double(0.5));
        assert_eq!(parse_default("\"valid\""), Value::from("valid"));
        assert_eq!(parse_default("false"), Value::Bool(false));
    }

    #[test]
    fn global_registry_has_the_core_set() {
        let registry = Registry::global();
        for name in ["block", "if", "while", "map", "dot", "all_gather", "cannon_product", "variable"] {
            assert!(registry.contains(name), "missing pattern '{name}'");
        }
    }
}
