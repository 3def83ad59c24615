//! The primitive fabric: graph nodes, their identity scheme, the evaluation
//! context, and the async contract every primitive implements.

use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    distributed::Locality,
    error::{Error, ErrorKind, Result},
    topology::Topology,
    values::Value,
};

/// Global switch for per-primitive eval tracing, toggled by the
/// `enable_tracing` primitive.
pub(crate) static EVAL_TRACING: AtomicBool = AtomicBool::new(false);

////////////////////////////////////////////////////////////////////////////
// Name scheme

/// The decomposed form of a primitive name:
/// `/tessera[$locality]/primitive$sequence[$instance]/compile_id$tag1[$tag2]`.
///
/// The name uniquely locates a node within a program, encodes its source
/// position (`tag1` is the primary source offset), and survives
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameParts {
    pub locality: Option<u32>,
    pub primitive: String,
    pub sequence_number: u64,
    pub instance: Option<String>,
    pub compile_id: u64,
    pub tag1: i64,
    /// Secondary tag; `-1` means absent.
    pub tag2: i64,
}

impl NameParts {
    #[must_use]
    pub fn new(primitive: impl Into<String>, sequence_number: u64, compile_id: u64, tag1: i64) -> Self {
        Self {
            locality: None,
            primitive: primitive.into(),
            sequence_number,
            instance: None,
            compile_id,
            tag1,
            tag2: -1,
        }
    }

    /// The name with the locality component stripped; identical on every
    /// locality of an SPMD program, which makes it usable as an exchange
    /// tag.
    #[must_use]
    pub fn tag_base(&self) -> String {
        let mut base = format!("{}${}", self.primitive, self.sequence_number);
        if let Some(instance) = &self.instance {
            base.push('$');
            base.push_str(instance);
        }
        base.push_str(&format!("/{}${}", self.compile_id, self.tag1));
        if self.tag2 >= 0 {
            base.push_str(&format!("${}", self.tag2));
        }
        base
    }
}

/// Composes the canonical string form of a primitive name.
#[must_use]
pub fn compose_primitive_name(parts: &NameParts) -> String {
    let mut name = String::from("/tessera");
    if let Some(locality) = parts.locality {
        name.push_str(&format!("${locality}"));
    }
    name.push('/');
    name.push_str(&parts.tag_base());
    name
}

/// Parses a composed primitive name back into its parts.
pub fn parse_primitive_name(name: &str) -> Result<NameParts> {
    let malformed = || Error::new(ErrorKind::NameError, format!("malformed primitive name '{name}'"));
    let mut segments = name.split('/');
    if !segments.next().is_some_and(str::is_empty) {
        return Err(malformed());
    }

    let head = segments.next().ok_or_else(malformed)?;
    let locality = match head.split_once('$') {
        Some(("tessera", loc)) => Some(loc.parse::<u32>().map_err(|_| malformed())?),
        None if head == "tessera" => None,
        _ => return Err(malformed()),
    };

    let middle = segments.next().ok_or_else(malformed)?;
    let mut fields = middle.split('$');
    let primitive = fields.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?.to_owned();
    let sequence_number = fields.next().ok_or_else(malformed)?.parse::<u64>().map_err(|_| malformed())?;
    let instance = fields.next().map(str::to_owned);
    if fields.next().is_some() {
        return Err(malformed());
    }

    let tail = segments.next().ok_or_else(malformed)?;
    if segments.next().is_some() {
        return Err(malformed());
    }
    let mut fields = tail.split('$');
    let compile_id = fields.next().ok_or_else(malformed)?.parse::<u64>().map_err(|_| malformed())?;
    let tag1 = fields.next().ok_or_else(malformed)?.parse::<i64>().map_err(|_| malformed())?;
    let tag2 = match fields.next() {
        Some(tag) => tag.parse::<i64>().map_err(|_| malformed())?,
        None => -1,
    };
    if fields.next().is_some() {
        return Err(malformed());
    }

    Ok(NameParts {
        locality,
        primitive,
        sequence_number,
        instance,
        compile_id,
        tag1,
        tag2,
    })
}

////////////////////////////////////////////////////////////////////////////
// Evaluation context

/// The evaluation mode bitset carried by the context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalMode(u8);

impl EvalMode {
    pub const DEFAULT: Self = Self(0);
    /// Prefer the synchronous fast path where a primitive supports it.
    pub const DIRECT: Self = Self(1);
    /// Evaluate function instances rather than wrapping them as values.
    pub const INSTANCE: Self = Self(2);
    /// Evaluation happens on behalf of a state snapshot.
    pub const SNAPSHOT: Self = Self(4);

    #[must_use]
    pub fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }

    #[must_use]
    pub fn with(self, flags: Self) -> Self {
        Self(self.0 | flags.0)
    }

    #[must_use]
    pub fn without(self, flags: Self) -> Self {
        Self(self.0 & !flags.0)
    }
}

/// One scope level: a name→value mapping shared by reference.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    vars: Arc<RwLock<AHashMap<String, Value>>>,
}

impl Frame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.read().ok()?.get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        if let Ok(mut vars) = self.vars.write() {
            vars.insert(name.to_owned(), value);
        }
    }
}

/// The frame stack. Cloning shares every frame; pushing shallow-copies the
/// stack so sibling subtrees never observe each other's pushes.
#[derive(Debug, Clone)]
pub struct Frames {
    stack: Arc<Vec<Frame>>,
}

impl Default for Frames {
    fn default() -> Self {
        Self {
            stack: Arc::new(vec![Frame::new()]),
        }
    }
}

impl Frames {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new stack sharing the existing frames with one fresh frame on top.
    #[must_use]
    pub fn push(&self) -> Self {
        let mut stack = self.stack.as_ref().clone();
        stack.push(Frame::new());
        Self { stack: Arc::new(stack) }
    }

    /// The base (scratchpad) frame shared by all entry points of a program.
    #[must_use]
    pub fn base(&self) -> &Frame {
        &self.stack[0]
    }

    #[must_use]
    pub fn top(&self) -> &Frame {
        self.stack.last().expect("the frame stack always has a base frame")
    }

    /// Looks a name up from the innermost frame outward.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.stack.iter().rev().find_map(|frame| frame.get(name))
    }
}

/// The evaluation context passed (by clone) through every `eval`.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    mode: EvalMode,
    frames: Frames,
    args: Arc<[Value]>,
}

impl EvalContext {
    #[must_use]
    pub fn new(frames: Frames) -> Self {
        Self {
            mode: EvalMode::DEFAULT,
            frames,
            args: Arc::from([]),
        }
    }

    #[must_use]
    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    #[must_use]
    pub fn with_mode(&self, mode: EvalMode) -> Self {
        let mut ctx = self.clone();
        ctx.mode = mode;
        ctx
    }

    /// A context whose top frame is fresh; enclosing frames stay shared.
    #[must_use]
    pub fn push_frame(&self) -> Self {
        let mut ctx = self.clone();
        ctx.frames = self.frames.push();
        ctx
    }

    /// A context carrying a new caller argument pack.
    #[must_use]
    pub fn with_args(&self, args: Vec<Value>) -> Self {
        let mut ctx = self.clone();
        ctx.args = Arc::from(args);
        ctx
    }

    /// A context whose frame stack is replaced wholesale (closure
    /// invocation restores the definition-site frames).
    #[must_use]
    pub fn with_frames(&self, frames: Frames) -> Self {
        let mut ctx = self.clone();
        ctx.frames = frames;
        ctx
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[must_use]
    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    /// Defines `name` in the innermost frame.
    pub fn define(&self, name: &str, value: Value) {
        self.frames.top().set(name, value);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.frames.lookup(name)
    }
}

////////////////////////////////////////////////////////////////////////////
// The primitive contract

/// The contract every primitive kind implements.
///
/// `eval` receives the owning node (operands, name, locality pin), the
/// caller's argument pack, and the context. Mutable per-node state lives
/// inside the op struct behind a lock that is never held across awaits.
#[async_trait]
pub trait PrimitiveOp: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value>;

    /// Writes through the primitive; only mutable kinds override this.
    async fn store(&self, node: &PrimitiveNode, _value: Value, _params: &[Value], _ctx: &EvalContext) -> Result<()> {
        Err(Error::mutation(self.kind()).with_primitive(node.name()))
    }

    /// Binds arguments to a function's parameter slots without evaluating;
    /// returns whether visible state changed.
    async fn bind(&self, _node: &PrimitiveNode, _params: &[Value], _ctx: &EvalContext) -> Result<bool> {
        Ok(false)
    }

    /// Whether the node supports the synchronous fast path.
    fn direct_eval(&self) -> bool {
        false
    }
}

/// A graph vertex: identity, locality pin, owned operands, and the op
/// implementing its behavior. Operands are read-only after construction.
pub struct PrimitiveNode {
    name_parts: NameParts,
    name: String,
    locality: Arc<Locality>,
    operands: Vec<Value>,
    op: Box<dyn PrimitiveOp>,
}

impl fmt::Debug for PrimitiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveNode")
            .field("name", &self.name)
            .field("operands", &self.operands.len())
            .finish_non_exhaustive()
    }
}

impl PrimitiveNode {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_parts(&self) -> &NameParts {
        &self.name_parts
    }

    #[must_use]
    pub fn locality(&self) -> &Arc<Locality> {
        &self.locality
    }

    #[must_use]
    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.op.kind()
    }
}

/// A cheap, clonable handle to a primitive node.
#[derive(Debug, Clone)]
pub struct Primitive(Arc<PrimitiveNode>);

impl Primitive {
    #[must_use]
    pub fn new(op: Box<dyn PrimitiveOp>, operands: Vec<Value>, mut name_parts: NameParts, locality: Arc<Locality>) -> Self {
        if name_parts.locality.is_none() && locality.num_localities() > 1 {
            name_parts.locality = Some(locality.id());
        }
        let name = compose_primitive_name(&name_parts);
        Self(Arc::new(PrimitiveNode {
            name_parts,
            name,
            locality,
            operands,
            op,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    #[must_use]
    pub fn name_parts(&self) -> &NameParts {
        self.0.name_parts()
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.0.kind()
    }

    #[must_use]
    pub fn operands(&self) -> &[Value] {
        self.0.operands()
    }

    #[must_use]
    pub fn locality(&self) -> &Arc<Locality> {
        &self.0.locality
    }

    /// Asynchronous evaluation: the future completes when all dataflow
    /// dependencies have been satisfied. Failures pick up this node's name
    /// unless an inner primitive already claimed them.
    pub async fn eval(&self, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        if EVAL_TRACING.load(Ordering::Relaxed) {
            tracing::trace!(target: "tessera::eval", primitive = %self.name(), kind = self.kind(), "eval");
        }
        self.0
            .op
            .eval(&self.0, params, ctx)
            .await
            .map_err(|e| e.with_primitive(self.name()))
    }

    pub async fn store(&self, value: Value, params: &[Value], ctx: &EvalContext) -> Result<()> {
        self.0
            .op
            .store(&self.0, value, params, ctx)
            .await
            .map_err(|e| e.with_primitive(self.name()))
    }

    pub async fn bind(&self, params: &[Value], ctx: &EvalContext) -> Result<bool> {
        self.0
            .op
            .bind(&self.0, params, ctx)
            .await
            .map_err(|e| e.with_primitive(self.name()))
    }

    #[must_use]
    pub fn direct_eval(&self) -> bool {
        self.0.op.direct_eval()
    }

    /// The `(children, name)` tree of this node and everything reachable
    /// from it. Function cycles are cut by tracking visited function names.
    #[must_use]
    pub fn topology(&self) -> Topology {
        let mut functions_seen = AHashSet::new();
        self.topology_with(&mut functions_seen)
    }

    pub(crate) fn topology_with(&self, functions_seen: &mut AHashSet<String>) -> Topology {
        let is_function = matches!(self.kind(), "function" | "lambda");
        if is_function && !functions_seen.insert(self.name().to_owned()) {
            return Topology::leaf(self.name());
        }
        let mut children = Vec::new();
        for operand in self.operands() {
            collect_topology(operand, functions_seen, &mut children);
        }
        Topology::new(self.name(), children)
    }
}

fn collect_topology(value: &Value, functions_seen: &mut AHashSet<String>, out: &mut Vec<Topology>) {
    match value {
        Value::Handle(p) => out.push(p.topology_with(functions_seen)),
        Value::Function(c) => out.push(c.target.topology_with(functions_seen)),
        Value::List(items) => {
            for item in items.iter() {
                collect_topology(item, functions_seen, out);
            }
        }
        _ => {}
    }
}

/// A first-class function value: the target node plus arguments bound ahead
/// of the call, and the frame stack of the definition site so names defined
/// there (the function's own, for recursion) stay resolvable after the
/// value escapes its block.
#[derive(Debug, Clone)]
pub struct Closure {
    pub target: Primitive,
    pub bound: Vec<Value>,
    frames: Option<Frames>,
}

impl Closure {
    #[must_use]
    pub fn new(target: Primitive) -> Self {
        Self {
            target,
            bound: Vec::new(),
            frames: None,
        }
    }

    #[must_use]
    pub fn with_frames(target: Primitive, frames: Frames) -> Self {
        Self {
            target,
            bound: Vec::new(),
            frames: Some(frames),
        }
    }

    #[must_use]
    pub fn frames(&self) -> Option<&Frames> {
        self.frames.as_ref()
    }
}

////////////////////////////////////////////////////////////////////////////
// Operand helpers

/// Evaluates one operand: handles evaluate through their node, ready values
/// pass through.
pub async fn value_operand(operand: &Value, params: &[Value], ctx: &EvalContext) -> Result<Value> {
    match operand {
        Value::Handle(p) => p.eval(params, ctx).await,
        other => Ok(other.clone()),
    }
}

/// Evaluates all operands concurrently, preserving order.
pub async fn eval_operands(operands: &[Value], params: &[Value], ctx: &EvalContext) -> Result<Vec<Value>> {
    join_all(operands.iter().map(|operand| value_operand(operand, params, ctx)))
        .await
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> NameParts {
        NameParts {
            locality: None,
            primitive: "add".to_owned(),
            sequence_number: 1,
            instance: None,
            compile_id: 2,
            tag1: 3,
            tag2: -1,
        }
    }

    #[test]
    fn compose_minimal_name() {
        assert_eq!(compose_primitive_name(&parts()), "/tessera/add$1/2$3");
    }

    #[test]
    fn compose_full_name() {
        let mut p = parts();
        p.locality = Some(1);
        p.instance = Some("test".to_owned());
        p.tag2 = 4;
        assert_eq!(compose_primitive_name(&p), "/tessera$1/add$1$test/2$3$4");
    }

    #[test]
    fn parse_is_the_inverse_of_compose() {
        for parts in [
            parts(),
            NameParts {
                locality: Some(0),
                instance: Some("test".to_owned()),
                ..parts()
            },
            NameParts {
                locality: Some(1),
                instance: Some("test".to_owned()),
                tag2: 4,
                ..parts()
            },
            NameParts { tag2: 4, ..parts() },
        ] {
            let name = compose_primitive_name(&parts);
            assert_eq!(parse_primitive_name(&name).unwrap(), parts);
        }
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for bad in ["", "/other/add$1/2$3", "/tessera/add/2$3", "/tessera/add$x/2$3", "tessera/add$1/2$3"] {
            assert!(parse_primitive_name(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn frames_shadow_and_share() {
        let frames = Frames::new();
        frames.base().set("x", Value::Int(1));
        let pushed = frames.push();
        assert_eq!(pushed.lookup("x"), Some(Value::Int(1)));
        pushed.top().set("x", Value::Int(2));
        assert_eq!(pushed.lookup("x"), Some(Value::Int(2)));
        // The outer stack never sees the inner frame.
        assert_eq!(frames.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn mode_bitset() {
        let mode = EvalMode::DEFAULT.with(EvalMode::DIRECT).with(EvalMode::SNAPSHOT);
        assert!(mode.contains(EvalMode::DIRECT));
        assert!(!mode.contains(EvalMode::INSTANCE));
        assert!(!mode.without(EvalMode::DIRECT).contains(EvalMode::DIRECT));
    }
}
