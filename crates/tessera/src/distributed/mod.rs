//! The in-process locality fabric.
//!
//! Localities are address-space participants of one program run, connected
//! by a mailbox exchange carrying tagged point-to-point messages. Sends
//! never block; receives suspend the evaluating task until the matching
//! message arrives. Collectives (retile, all-gather, Cannon, distributed
//! reductions) are built from these point-to-point futures alone — there is
//! no global barrier.

pub mod all_gather;
pub mod annotate;
pub mod argminmax;
pub mod cannon;
pub mod conv1d;
pub mod dot_d;
pub mod reductions;
pub mod retile;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use ahash::AHashMap;
use futures::future::join_all;
use tokio::sync::Notify;

use crate::{
    annotation::{LocalityInfo, Tiling},
    error::{Error, Result},
    values::{Tensor, Value},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MessageKey {
    from: u32,
    to: u32,
    tag: String,
}

/// The message exchange shared by all localities of one run.
#[derive(Debug)]
pub struct Fabric {
    num_localities: u32,
    mailboxes: Mutex<AHashMap<MessageKey, VecDeque<Value>>>,
    notify: Notify,
}

impl Fabric {
    #[must_use]
    pub fn new(num_localities: u32) -> Arc<Self> {
        Arc::new(Self {
            num_localities: num_localities.max(1),
            mailboxes: Mutex::new(AHashMap::new()),
            notify: Notify::new(),
        })
    }

    #[must_use]
    pub fn num_localities(&self) -> u32 {
        self.num_localities
    }

    /// One-way send; never blocks the caller.
    pub fn send(&self, from: u32, to: u32, tag: &str, value: Value) {
        tracing::debug!(target: "tessera::dist", from, to, tag, "send");
        let key = MessageKey { from, to, tag: tag.to_owned() };
        if let Ok(mut mailboxes) = self.mailboxes.lock() {
            mailboxes.entry(key).or_default().push_back(value);
        }
        self.notify.notify_waiters();
    }

    /// Receives the next message matching `(from, to, tag)`, suspending the
    /// task until one arrives.
    pub async fn recv(&self, from: u32, to: u32, tag: &str) -> Value {
        let key = MessageKey { from, to, tag: tag.to_owned() };
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the mailbox so a concurrent
            // send cannot slip between the check and the await.
            notified.as_mut().enable();
            if let Some(value) = self.try_take(&key) {
                tracing::debug!(target: "tessera::dist", from, to, tag, "recv");
                return value;
            }
            notified.await;
        }
    }

    fn try_take(&self, key: &MessageKey) -> Option<Value> {
        let mut mailboxes = self.mailboxes.lock().ok()?;
        let queue = mailboxes.get_mut(key)?;
        let value = queue.pop_front();
        if queue.is_empty() {
            mailboxes.remove(key);
        }
        value
    }
}

/// One participant of a program run. Every primitive node is pinned to the
/// locality it was compiled on.
#[derive(Debug)]
pub struct Locality {
    id: u32,
    fabric: Arc<Fabric>,
}

impl Locality {
    #[must_use]
    pub fn new(id: u32, fabric: Arc<Fabric>) -> Arc<Self> {
        Arc::new(Self { id, fabric })
    }

    /// The default single-participant locality used by purely local runs.
    #[must_use]
    pub fn solo() -> Arc<Self> {
        Self::new(0, Fabric::new(1))
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn num_localities(&self) -> u32 {
        self.fabric.num_localities()
    }

    #[must_use]
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    #[must_use]
    pub fn info(&self) -> LocalityInfo {
        LocalityInfo::new(self.id, self.num_localities())
    }
}

/// A tagged exchange scope for one collective invocation. The tag embeds the
/// primitive's locality-independent name and a per-node generation counter,
/// so repeated invocations of the same node never cross wires.
pub(crate) struct Exchange<'a> {
    locality: &'a Locality,
    tag: String,
}

impl<'a> Exchange<'a> {
    pub fn new(locality: &'a Locality, base: &str, generation: u64) -> Self {
        Self {
            locality,
            tag: format!("{base}#{generation}"),
        }
    }

    pub fn me(&self) -> u32 {
        self.locality.id()
    }

    pub fn peers(&self) -> u32 {
        self.locality.num_localities()
    }

    pub fn send(&self, to: u32, subtag: &str, value: Value) {
        self.locality
            .fabric
            .send(self.me(), to, &format!("{}/{subtag}", self.tag), value);
    }

    pub async fn recv(&self, from: u32, subtag: &str) -> Value {
        self.locality
            .fabric
            .recv(from, self.me(), &format!("{}/{subtag}", self.tag))
            .await
    }

    /// Sends `value` to every peer and collects one message from each, in
    /// locality order. The local contribution short-circuits the fabric.
    pub async fn all_to_all(&self, subtag: &str, value: Value) -> Vec<Value> {
        for peer in 0..self.peers() {
            if peer != self.me() {
                self.send(peer, subtag, value.clone());
            }
        }
        let mut gathered = Vec::with_capacity(self.peers() as usize);
        for peer in 0..self.peers() {
            if peer == self.me() {
                gathered.push(value.clone());
            } else {
                gathered.push(self.recv(peer, subtag).await);
            }
        }
        gathered
    }

    /// Exchanges tile annotations: every locality learns every tiling, in
    /// locality order.
    pub async fn gather_tilings(&self, subtag: &str, mine: &Tiling) -> Result<Vec<Tiling>> {
        let payload = Value::Tensor(Arc::new(
            Tensor::scalar_int(0).with_annotation(mine.as_annotation()),
        ));
        let gathered = self.all_to_all(subtag, payload).await;
        gathered
            .iter()
            .map(|value| match value {
                Value::Tensor(t) => t
                    .annotation()
                    .ok_or_else(|| Error::locality("peer supplied no tile annotation"))
                    .and_then(Tiling::from_annotation),
                _ => Err(Error::locality("peer supplied a non-annotation payload")),
            })
            .collect()
    }
}

/// Extracts the tensor and tiling of a distributed operand.
pub(crate) fn tiled_operand(value: &Value, what: &str) -> Result<(Arc<Tensor>, Tiling)> {
    let tensor = value.to_tensor()?;
    let annotation = tensor
        .annotation()
        .ok_or_else(|| Error::locality(format!("{what} carries no tile annotation")))?;
    let tiling = match annotation.name() {
        "tile" => Tiling::from_annotation(annotation)?,
        _ => annotation
            .get("tile")
            .ok_or_else(|| Error::locality(format!("{what} carries no tile annotation")))
            .and_then(Tiling::from_annotation)?,
    };
    Ok((tensor, tiling))
}

/// Slice description of a tiling's spans relative to origin `base` (one
/// start per axis).
pub(crate) fn tiling_slice_info(tiling: &Tiling, base: &[i64]) -> Result<Vec<ndarray::SliceInfoElem>> {
    let spans = tiling.spans()?;
    Ok(spans
        .iter()
        .zip(base.iter())
        .map(|(span, base)| ndarray::SliceInfoElem::Slice {
            start: (span.start - base) as isize,
            end: Some((span.stop - base) as isize),
            step: 1,
        })
        .collect())
}

/// Assembles per-locality blocks into one dense array of `shape`, placing
/// each block at its tiling's spans. Dtypes promote across blocks.
pub(crate) fn assemble_blocks(shape: &[usize], parts: &[(Tiling, Arc<Tensor>)]) -> Result<Tensor> {
    use crate::values::{DType, TensorData};
    use ndarray::{ArrayD, IxDyn};

    let origin: Vec<i64> = vec![0; shape.len()];
    let dtype = parts.iter().fold(DType::Bool, |acc, (_, t)| acc.promote(t.dtype()));
    match dtype {
        DType::Double => {
            let mut out = ArrayD::<f64>::zeros(IxDyn(shape));
            for (tiling, block) in parts {
                let info = tiling_slice_info(tiling, &origin)?;
                out.slice_mut(info.as_slice()).assign(&block.to_double_array());
            }
            Tensor::new(TensorData::Double(out))
        }
        _ => {
            let mut out = ArrayD::<i64>::zeros(IxDyn(shape));
            for (tiling, block) in parts {
                let info = tiling_slice_info(tiling, &origin)?;
                out.slice_mut(info.as_slice()).assign(&block.to_int_array());
            }
            Tensor::new(TensorData::Int64(out))
        }
    }
}

/// Gathers every locality's block and assembles the global array; the
/// caller supplies its own slab and tiling. Used by `all_gather` and the
/// gather-based dot fallback.
pub(crate) async fn gather_whole(
    exchange: &Exchange<'_>,
    subtag: &str,
    tensor: &Arc<Tensor>,
    tiling: &Tiling,
) -> Result<Tensor> {
    let tilings = exchange.gather_tilings(&format!("{subtag}/tiling"), tiling).await?;
    let shape = Tiling::check_cover(&tilings, false)?;
    let blocks = exchange.all_to_all(&format!("{subtag}/block"), Value::Tensor(Arc::clone(tensor))).await;

    let mut parts = Vec::with_capacity(blocks.len());
    for (peer_tiling, block) in tilings.into_iter().zip(blocks) {
        let block = block
            .to_tensor()
            .map_err(|_| Error::locality("peer supplied a non-array block"))?;
        if block.shape() != peer_tiling.local_shape()?.as_slice() {
            return Err(Error::locality("peer block does not match its declared tile"));
        }
        parts.push((peer_tiling, block));
    }
    assemble_blocks(&shape, &parts)
}

////////////////////////////////////////////////////////////////////////////
// SPMD harness

/// The localities of one distributed run, sharing a fabric.
#[derive(Debug)]
pub struct Runtime {
    fabric: Arc<Fabric>,
    localities: Vec<Arc<Locality>>,
}

impl Runtime {
    #[must_use]
    pub fn new(num_localities: u32) -> Self {
        let fabric = Fabric::new(num_localities);
        let localities = (0..fabric.num_localities())
            .map(|id| Locality::new(id, Arc::clone(&fabric)))
            .collect();
        Self { fabric, localities }
    }

    #[must_use]
    pub fn num_localities(&self) -> u32 {
        self.fabric.num_localities()
    }

    #[must_use]
    pub fn locality(&self, id: u32) -> Arc<Locality> {
        Arc::clone(&self.localities[id as usize])
    }

    #[must_use]
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }
}

/// Compiles and runs the same source on every locality of a fresh runtime,
/// returning the per-locality results in locality order. Errors surface the
/// lowest failing locality first.
pub async fn run_spmd(num_localities: u32, name: &str, source: &str) -> Result<Vec<Value>> {
    let runtime = Runtime::new(num_localities);
    let tasks: Vec<_> = (0..runtime.num_localities())
        .map(|id| {
            let locality = runtime.locality(id);
            let name = name.to_owned();
            let source = source.to_owned();
            tokio::spawn(async move {
                let mut snippets = crate::compiler::Snippets::default();
                let env = crate::compiler::Environment::new(locality);
                let program = crate::compiler::compile(&name, &source, &mut snippets, &env)?;
                program.run().await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(tasks.len());
    for (id, joined) in join_all(tasks).await.into_iter().enumerate() {
        let value = joined.map_err(|e| Error::user(format!("locality {id} aborted: {e}")))??;
        results.push(value);
    }
    Ok(results)
}
