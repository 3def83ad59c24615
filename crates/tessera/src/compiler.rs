//! The compiler: name resolution over a frame stack and bottom-up lowering
//! of the AST into the primitive graph.
//!
//! Literals stay ready operands in their parent's operand slot; identifiers
//! lower to `access-variable`/`access-argument`/`access-function` nodes
//! bound to their resolved target; calls match the pattern registry.
//! `define`, `lambda`, and `store` are compiler forms: they manipulate the
//! scope stack and then emit ordinary primitives.

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    ast::{CallArg, Expr, ExprKind, Literal},
    distributed::Locality,
    error::{Error, Result},
    parser::parse_program,
    patterns::{Registry, TemplateParam},
    primitive::{EvalContext, Frames, NameParts, Primitive, value_operand},
    primitives::invoke_function,
    topology::Topology,
    values::Value,
};

/// The default pattern bindings for a given locality: every program
/// compiled in this environment pins its primitives there.
#[derive(Debug, Clone)]
pub struct Environment {
    locality: Arc<Locality>,
}

impl Environment {
    #[must_use]
    pub fn new(locality: Arc<Locality>) -> Self {
        Self { locality }
    }

    /// A purely local environment on a fresh single-participant locality.
    #[must_use]
    pub fn local() -> Self {
        Self::new(Locality::solo())
    }

    #[must_use]
    pub fn locality(&self) -> &Arc<Locality> {
        &self.locality
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::local()
    }
}

/// What a resolved identifier lowers to.
#[derive(Debug, Clone)]
enum CompiledTarget {
    Variable(Primitive),
    Function(Primitive),
    Argument(usize),
    /// A name whose definition completes later in the same scope
    /// (self-recursive functions); resolves lazily through the context
    /// frames.
    Forward(String),
}

/// The snippet registry: compile-time state shared by successive `compile`
/// calls — name counters, globally-bound names, and the runtime scratchpad
/// frame all entry points share.
#[derive(Debug, Default)]
pub struct Snippets {
    next_compile_id: u64,
    sequences: AHashMap<String, u64>,
    globals: AHashMap<String, CompiledTarget>,
    scratchpad: Frames,
}

impl Snippets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_compile_id(&mut self) -> u64 {
        let id = self.next_compile_id;
        self.next_compile_id += 1;
        id
    }

    fn next_sequence(&mut self, kind: &str) -> u64 {
        let counter = self.sequences.entry(kind.to_owned()).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// A compiled program: an ordered list of entry points over a shared
/// scratchpad frame.
#[derive(Debug)]
pub struct CompiledProgram {
    name: String,
    source: String,
    entry_points: Vec<Value>,
    scratchpad: Frames,
}

#[derive(Serialize, Deserialize)]
struct ProgramImage {
    name: String,
    source: String,
}

impl CompiledProgram {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the entry points in order and returns the last value.
    pub async fn run(&self) -> Result<Value> {
        let ctx = EvalContext::new(self.scratchpad.clone());
        let mut last = Value::Nil;
        for entry in &self.entry_points {
            last = value_operand(entry, &[], &ctx).await?;
        }
        Ok(last)
    }

    /// Runs the program and, when it evaluates to a function, invokes it
    /// with `args`.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let ctx = EvalContext::new(self.scratchpad.clone());
        let mut last = Value::Nil;
        for entry in &self.entry_points {
            last = value_operand(entry, &[], &ctx).await?;
        }
        match &last {
            Value::Function(_) => invoke_function(&last, args, &ctx, "program call").await,
            _ if args.is_empty() => Ok(last),
            other => Err(Error::type_error(format!(
                "program evaluates to a {}, not a callable function",
                other.type_name()
            ))),
        }
    }

    /// The expression topology of the last entry point.
    #[must_use]
    pub fn topology(&self) -> Option<Topology> {
        match self.entry_points.last()? {
            Value::Handle(handle) => Some(handle.topology()),
            _ => None,
        }
    }

    /// Serializes the program. Only the source text and codename persist;
    /// `load` recompiles, and name determinism reattaches handles.
    pub fn dump(&self) -> Result<Vec<u8>> {
        let image = ProgramImage {
            name: self.name.clone(),
            source: self.source.clone(),
        };
        postcard::to_allocvec(&image).map_err(|e| Error::user(format!("cannot serialize program: {e}")))
    }

    /// Restores a serialized program by recompiling it against the given
    /// snippets and environment.
    pub fn load(bytes: &[u8], snippets: &mut Snippets, env: &Environment) -> Result<Self> {
        let image: ProgramImage =
            postcard::from_bytes(bytes).map_err(|e| Error::user(format!("cannot deserialize program: {e}")))?;
        compile(&image.name, &image.source, snippets, env)
    }
}

/// Compiles `source` into a program. `name` is the codename used in
/// diagnostics; `snippets` carries compile-time state across calls so
/// successive compilations share globals and never reuse a primitive name.
pub fn compile(name: &str, source: &str, snippets: &mut Snippets, env: &Environment) -> Result<CompiledProgram> {
    let span = tracing::debug_span!(target: "tessera::compiler", "compile", codename = name);
    let _guard = span.enter();

    let exprs = parse_program(source)?;
    let compile_id = snippets.allocate_compile_id();
    let mut compiler = Compiler {
        snippets,
        env,
        compile_id,
        scopes: Vec::new(),
    };
    let mut entry_points = Vec::with_capacity(exprs.len());
    for expr in &exprs {
        entry_points.push(compiler.lower(expr)?);
    }
    tracing::debug!(target: "tessera::compiler", codename = name, entries = entry_points.len(), "compiled");
    Ok(CompiledProgram {
        name: name.to_owned(),
        source: source.to_owned(),
        entry_points,
        scratchpad: snippets.scratchpad.clone(),
    })
}

struct Compiler<'a> {
    snippets: &'a mut Snippets,
    env: &'a Environment,
    compile_id: u64,
    scopes: Vec<AHashMap<String, CompiledTarget>>,
}

impl Compiler<'_> {
    fn resolve(&self, name: &str) -> Option<CompiledTarget> {
        for scope in self.scopes.iter().rev() {
            if let Some(target) = scope.get(name) {
                return Some(target.clone());
            }
        }
        self.snippets.globals.get(name).cloned()
    }

    fn bind(&mut self, name: &str, target: CompiledTarget) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_owned(), target);
            }
            None => {
                self.snippets.globals.insert(name.to_owned(), target);
            }
        }
    }

    fn make_node(&mut self, kind: &str, instance: Option<String>, operands: Vec<Value>, tag1: i64) -> Result<Primitive> {
        let entry = Registry::global()
            .get(kind)
            .ok_or_else(|| Error::name(format!("unknown primitive kind '{kind}'")))?;
        let parts = NameParts {
            locality: None,
            primitive: kind.to_owned(),
            sequence_number: self.snippets.next_sequence(kind),
            instance,
            compile_id: self.compile_id,
            tag1,
            tag2: -1,
        };
        (entry.pattern.factory)(operands, parts, Arc::clone(self.env.locality()))
    }

    fn lower(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(literal_value(literal)),
            ExprKind::ArrayLiteral(elements) => {
                let operands = elements.iter().map(|e| self.lower(e)).collect::<Result<Vec<_>>>()?;
                Ok(Value::Handle(self.make_node("hstack", None, operands, expr.tag1())?))
            }
            ExprKind::Identifier(name) => self.lower_identifier(name, expr),
            ExprKind::Unary { op, operand } => {
                let operands = vec![self.lower(operand)?];
                Ok(Value::Handle(self.make_node(op.primitive_kind(), None, operands, expr.tag1())?))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let operands = vec![self.lower(lhs)?, self.lower(rhs)?];
                Ok(Value::Handle(self.make_node(op.primitive_kind(), None, operands, expr.tag1())?))
            }
            ExprKind::Call { name, attr, args } => self.lower_call(expr, name, attr.as_deref(), args),
        }
    }

    fn lower_identifier(&mut self, name: &str, expr: &Expr) -> Result<Value> {
        let Some(target) = self.resolve(name) else {
            return Err(Error::name(format!("unresolved identifier '{name}'")).with_span(expr.span));
        };
        let node = match target {
            CompiledTarget::Variable(variable) => {
                self.make_node("access-variable", Some(name.to_owned()), vec![Value::Handle(variable)], expr.tag1())?
            }
            CompiledTarget::Function(function) => {
                self.make_node("access-function", Some(name.to_owned()), vec![Value::Handle(function)], expr.tag1())?
            }
            CompiledTarget::Argument(index) => {
                self.make_node("access-argument", Some(name.to_owned()), vec![Value::Int(index as i64)], expr.tag1())?
            }
            CompiledTarget::Forward(forward) => {
                self.make_node("target-reference", Some(name.to_owned()), vec![Value::from(forward)], expr.tag1())?
            }
        };
        Ok(Value::Handle(node))
    }

    fn lower_call(&mut self, expr: &Expr, name: &str, attr: Option<&str>, args: &[CallArg]) -> Result<Value> {
        // Compiler forms.
        match name {
            "define" => return self.lower_define(expr, args),
            "lambda" => return self.lower_lambda(expr, args),
            "store" => return self.lower_store(expr, args),
            "block" | "parallel_block" => {
                self.scopes.push(AHashMap::new());
                let lowered: Result<Vec<Value>> = args.iter().map(|arg| self.lower(&arg.value)).collect();
                self.scopes.pop();
                return Ok(Value::Handle(self.make_node(name, attr.map(str::to_owned), lowered?, expr.tag1())?));
            }
            _ => {}
        }

        // A user-defined callable shadows any registered pattern.
        if let Some(target) = self.resolve(name) {
            let callee = match target {
                CompiledTarget::Function(function) => Value::Handle(function),
                CompiledTarget::Variable(variable) => Value::Handle(self.make_node(
                    "access-variable",
                    Some(name.to_owned()),
                    vec![Value::Handle(variable)],
                    expr.tag1(),
                )?),
                CompiledTarget::Argument(index) => Value::Handle(self.make_node(
                    "access-argument",
                    Some(name.to_owned()),
                    vec![Value::Int(index as i64)],
                    expr.tag1(),
                )?),
                CompiledTarget::Forward(forward) => Value::Handle(self.make_node(
                    "target-reference",
                    Some(name.to_owned()),
                    vec![Value::from(forward)],
                    expr.tag1(),
                )?),
            };
            let mut operands = vec![callee];
            for arg in args {
                if arg.keyword.is_some() {
                    return Err(Error::type_error(format!(
                        "user function '{name}' takes no keyword arguments"
                    ))
                    .with_span(expr.span));
                }
                operands.push(self.lower(&arg.value)?);
            }
            return Ok(Value::Handle(self.make_node("call-function", Some(name.to_owned()), operands, expr.tag1())?));
        }

        // Registered patterns.
        let Some(entry) = Registry::global().get(name) else {
            return Err(Error::name(format!("unresolved identifier '{name}'")).with_span(expr.span));
        };
        let positional: Vec<&Expr> = args.iter().filter(|a| a.keyword.is_none()).map(|a| &a.value).collect();
        let keywords: AHashMap<&str, &Expr> = args
            .iter()
            .filter_map(|a| a.keyword.as_deref().map(|k| (k, &a.value)))
            .collect();
        let keyword_names: Vec<&str> = keywords.keys().copied().collect();

        let Some(shape) = entry
            .shapes
            .iter()
            .find(|shape| shape.matches(positional.len(), &keyword_names))
        else {
            let expected = entry
                .shapes
                .iter()
                .map(crate::patterns::CallShape::arity_text)
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(Error::arity(name, expected, args.len()).with_span(expr.span));
        };
        let shape = shape.clone();

        let mut operands = Vec::with_capacity(args.len());
        let mut remaining = positional.into_iter();
        for param in &shape.params {
            match param {
                TemplateParam::Positional => {
                    let arg = remaining
                        .next()
                        .ok_or_else(|| Error::arity(name, shape.arity_text(), args.len()))?;
                    operands.push(self.lower(arg)?);
                }
                TemplateParam::VarArgs => {
                    for arg in remaining.by_ref() {
                        operands.push(self.lower(arg)?);
                    }
                }
                TemplateParam::Keyword { name: keyword, default } => {
                    if let Some(arg) = keywords.get(keyword.as_str()) {
                        operands.push(self.lower(arg)?);
                    } else if let Some(arg) = remaining.next() {
                        operands.push(self.lower(arg)?);
                    } else {
                        operands.push(default.clone());
                    }
                }
            }
        }

        Ok(Value::Handle(self.make_node(name, attr.map(str::to_owned), operands, expr.tag1())?))
    }

    fn lower_define(&mut self, expr: &Expr, args: &[CallArg]) -> Result<Value> {
        if args.len() < 2 {
            return Err(Error::arity("define", "at least 2", args.len()).with_span(expr.span));
        }
        let name = identifier_of(&args[0].value, "define")?;

        if args.len() == 2 {
            // define(name, body): a variable.
            let body = self.lower(&args[1].value)?;
            let variable = self.make_node("variable", Some(name.to_owned()), vec![body], expr.tag1())?;
            self.bind(name, CompiledTarget::Variable(variable.clone()));
            return Ok(Value::Handle(variable));
        }

        // define(name, p1, ..., pn, body): a function.
        let params: Vec<&str> = args[1..args.len() - 1]
            .iter()
            .map(|arg| identifier_of(&arg.value, "define parameter"))
            .collect::<Result<_>>()?;
        let body_expr = &args[args.len() - 1].value;

        let mut scope = AHashMap::new();
        for (index, param) in params.iter().enumerate() {
            scope.insert((*param).to_owned(), CompiledTarget::Argument(index));
        }
        // The function may call itself; its name resolves lazily through
        // the context frames until the definition completes.
        scope.insert(name.to_owned(), CompiledTarget::Forward(name.to_owned()));
        self.scopes.push(scope);
        let body = self.lower(body_expr);
        self.scopes.pop();

        let function = self.make_node(
            "function",
            Some(name.to_owned()),
            vec![body?, Value::from(name)],
            expr.tag1(),
        )?;
        self.bind(name, CompiledTarget::Function(function.clone()));
        let define = self.make_node(
            "define-function",
            Some(name.to_owned()),
            vec![Value::Handle(function), Value::from(name)],
            expr.tag1(),
        )?;
        Ok(Value::Handle(define))
    }

    fn lower_lambda(&mut self, expr: &Expr, args: &[CallArg]) -> Result<Value> {
        if args.is_empty() {
            return Err(Error::arity("lambda", "at least 1", args.len()).with_span(expr.span));
        }
        let params: Vec<&str> = args[..args.len() - 1]
            .iter()
            .map(|arg| identifier_of(&arg.value, "lambda parameter"))
            .collect::<Result<_>>()?;
        let body_expr = &args[args.len() - 1].value;

        let mut scope = AHashMap::new();
        for (index, param) in params.iter().enumerate() {
            scope.insert((*param).to_owned(), CompiledTarget::Argument(index));
        }
        self.scopes.push(scope);
        let body = self.lower(body_expr);
        self.scopes.pop();

        let lambda = self.make_node("lambda", None, vec![body?], expr.tag1())?;
        let access = self.make_node("access-function", None, vec![Value::Handle(lambda)], expr.tag1())?;
        Ok(Value::Handle(access))
    }

    fn lower_store(&mut self, expr: &Expr, args: &[CallArg]) -> Result<Value> {
        if args.len() != 2 {
            return Err(Error::arity("store", 2, args.len()).with_span(expr.span));
        }
        let target = match &args[0].value.kind {
            ExprKind::Identifier(name) => match self.resolve(name) {
                Some(CompiledTarget::Variable(variable)) => Value::Handle(self.make_node(
                    "access-variable",
                    Some(name.clone()),
                    vec![Value::Handle(variable)],
                    args[0].value.tag1(),
                )?),
                Some(_) => {
                    return Err(Error::mutation(&format!("non-variable binding '{name}'")).with_span(expr.span));
                }
                None => {
                    return Err(Error::name(format!("unresolved identifier '{name}'")).with_span(args[0].value.span));
                }
            },
            ExprKind::Call { name, .. } if name == "slice" => self.lower(&args[0].value)?,
            _ => {
                return Err(Error::mutation("expression").with_span(expr.span));
            }
        };
        let value = self.lower(&args[1].value)?;
        Ok(Value::Handle(self.make_node("store", None, vec![target, value], expr.tag1())?))
    }
}

fn identifier_of<'e>(expr: &'e Expr, what: &str) -> Result<&'e str> {
    match &expr.kind {
        ExprKind::Identifier(name) => Ok(name),
        other => Err(Error::type_error(format!(
            "{what} expects an identifier, received {}",
            describe_expr(other)
        ))
        .with_span(expr.span)),
    }
}

fn describe_expr(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Literal(_) => "a literal",
        ExprKind::Identifier(_) => "an identifier",
        ExprKind::Unary { .. } => "a unary expression",
        ExprKind::Binary { .. } => "a binary expression",
        ExprKind::ArrayLiteral(_) => "an array literal",
        ExprKind::Call { .. } => "a call",
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Nil => Value::Nil,
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Int(v) => Value::Int(*v),
        Literal::Double(v) => Value::Double(*v),
        Literal::Str(v) => Value::from(v.as_str()),
    }
}
