//! The driver proper: inbound pipeline, per-height loop, decision commit.

use crate::config::DriverConfig;
use crate::oracle::OracleView;
use crate::timers::TimerManager;
use accord_consensus::{Algorithm, OracleError, Outcome, StartOutcome};
use accord_core::{
    BlockVerdict, BlockVerifier, Broadcaster, ChainContext, ChainError, Event, EvidenceKind,
    EvidenceSink, Signer, Timeout, ValueSource,
};
use accord_detector::run_rules;
use accord_store::MessageStore;
use accord_types::{Committee, ConsensusMessage, MessageBody, NodeId, Proof, Rule, Step, ValueId};
use accord_wire::{decode, encode, seal_proof, signing_hash};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors that cross the core boundary.
///
/// Protocol faults by remote validators never appear here — they become
/// evidence and the driver moves on. Only local invariant violations and
/// fatal bootstrap conditions abort the loop.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("event channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}

/// Builder for constructing a [`Driver`].
///
/// All collaborators are required; misconfiguration is fatal at startup
/// and `build` refuses to produce a driver.
pub struct DriverBuilder {
    node_id: NodeId,
    config: DriverConfig,
    chain: Option<Arc<dyn ChainContext>>,
    verifier: Option<Arc<dyn BlockVerifier>>,
    signer: Option<Arc<dyn Signer>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    evidence: Option<Arc<dyn EvidenceSink>>,
    value_source: Option<Arc<dyn ValueSource>>,
}

impl DriverBuilder {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            config: DriverConfig::default(),
            chain: None,
            verifier: None,
            signer: None,
            broadcaster: None,
            evidence: None,
            value_source: None,
        }
    }

    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chain(mut self, chain: Arc<dyn ChainContext>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn BlockVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn evidence(mut self, evidence: Arc<dyn EvidenceSink>) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn value_source(mut self, value_source: Arc<dyn ValueSource>) -> Self {
        self.value_source = Some(value_source);
        self
    }

    /// Construct the driver at the height above the current chain head.
    ///
    /// `event_tx` is the sender side of the driver's own event channel;
    /// timers post back through it.
    pub fn build(self, event_tx: mpsc::Sender<Event>) -> Result<Driver, DriverError> {
        let missing = |what: &str| DriverError::Bootstrap(format!("{what} not provided"));
        let chain = self.chain.ok_or_else(|| missing("chain context"))?;
        let verifier = self.verifier.ok_or_else(|| missing("block verifier"))?;
        let signer = self.signer.ok_or_else(|| missing("signer"))?;
        let broadcaster = self.broadcaster.ok_or_else(|| missing("broadcaster"))?;
        let evidence = self.evidence.ok_or_else(|| missing("evidence sink"))?;
        let value_source = self.value_source.ok_or_else(|| missing("value source"))?;

        let head = chain.head();
        let height = head.number + 1;
        let committee = head.committee.clone();
        let timers = TimerManager::new(self.config.timeouts.clone(), event_tx);

        info!(height, committee = committee.len(), "driver starting");

        Ok(Driver {
            node_id: self.node_id,
            chain,
            verifier,
            signer,
            broadcaster,
            evidence,
            value_source,
            store: MessageStore::new(),
            algorithm: Algorithm::new(self.node_id),
            height,
            committee,
            future: BTreeMap::new(),
            verdicts: RefCell::new(HashMap::new()),
            assembled: RefCell::new(HashMap::new()),
            timers,
        })
    }
}

/// Owns the algorithm, the message store and the fault detection cadence,
/// and executes every effect the algorithm returns.
pub struct Driver {
    node_id: NodeId,
    chain: Arc<dyn ChainContext>,
    verifier: Arc<dyn BlockVerifier>,
    signer: Arc<dyn Signer>,
    broadcaster: Arc<dyn Broadcaster>,
    evidence: Arc<dyn EvidenceSink>,
    value_source: Arc<dyn ValueSource>,

    store: MessageStore,
    algorithm: Algorithm,
    /// The height currently being decided: chain head + 1.
    height: u64,
    /// Committee for the current height, from the parent header.
    committee: Committee,

    /// Messages beyond the next height, keyed by height, replayed on head
    /// advance.
    future: BTreeMap<u64, Vec<ConsensusMessage>>,
    /// Verification verdicts per value for the current height.
    verdicts: RefCell<HashMap<ValueId, BlockVerdict>>,
    /// Payloads of values this node assembled for the current height.
    assembled: RefCell<HashMap<ValueId, Vec<u8>>>,

    timers: TimerManager,
}

impl Driver {
    pub fn builder(node_id: NodeId) -> DriverBuilder {
        DriverBuilder::new(node_id)
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> i64 {
        self.algorithm.round()
    }

    pub fn step(&self) -> Step {
        self.algorithm.step()
    }

    /// Read access for integration tests and operator tooling.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Enter round 0 of the starting height. Must run once before events
    /// are processed.
    pub fn begin(&mut self) -> Result<(), DriverError> {
        let mut queue = VecDeque::new();
        self.enter_round(0, &mut queue);
        self.drain(&mut queue)
    }

    /// Run the event loop until shutdown or a fatal error.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> Result<(), DriverError> {
        self.begin()?;
        while let Some(event) = events.recv().await {
            if !self.handle_event(event)? {
                break;
            }
        }
        self.timers.cancel_all();
        Ok(())
    }

    /// Process one event. Returns `false` when the loop should stop.
    pub fn handle_event(&mut self, event: Event) -> Result<bool, DriverError> {
        match event {
            Event::Inbound { bytes } => {
                self.on_inbound(&bytes)?;
            }
            Event::TimeoutFired { timeout } => {
                self.on_timeout(timeout)?;
            }
            Event::HeadAdvanced { height } => {
                self.on_head_advanced(height)?;
            }
            Event::Shutdown => {
                info!("shutdown requested");
                self.timers.cancel_all();
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Inbound pipeline
    // ------------------------------------------------------------------

    fn on_inbound(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        let msg = match decode(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                // Without a decodable envelope there is no attributable
                // sender, so this cannot become evidence.
                debug!(%err, "dropping undecodable message");
                return Ok(());
            }
        };
        let mut queue = VecDeque::from([msg]);
        self.drain(&mut queue)
    }

    fn drain(&mut self, queue: &mut VecDeque<ConsensusMessage>) -> Result<(), DriverError> {
        while let Some(msg) = queue.pop_front() {
            self.pipeline(msg, queue)?;
        }
        Ok(())
    }

    /// The inbound pipeline: classify, authenticate, auto-incriminate,
    /// store, then hand to the algorithm.
    fn pipeline(
        &mut self,
        msg: ConsensusMessage,
        queue: &mut VecDeque<ConsensusMessage>,
    ) -> Result<(), DriverError> {
        // 1. Height classification. Heights below the current one are
        // already decided and their state is gone; anything past the next
        // height cannot be checked against a committee yet.
        if msg.height < self.height {
            debug!(height = msg.height, current = self.height, "dropping stale message");
            return Ok(());
        }
        let head = self.chain.head().number;
        if msg.height > head + 1 {
            debug!(height = msg.height, head, "buffering future message");
            self.buffer_future(msg);
            return Ok(());
        }

        // 2. Signature and committee membership, against the committee in
        // the header at msg.height - 1.
        let Some(parent) = self.chain.header_at(msg.height.saturating_sub(1)) else {
            self.buffer_future(msg);
            return Ok(());
        };
        if !parent.committee.contains(&msg.sender) {
            debug!(sender = %msg.sender, height = msg.height, "dropping non-committee message");
            return Ok(());
        }
        let digest = signing_hash(&msg);
        if self.signer.recover(&digest, &msg.signature) != Some(msg.sender) {
            debug!(sender = %msg.sender, "dropping message with bad signature");
            return Ok(());
        }

        // 3. Auto-incrimination checks: a committee member vouched for
        // this message with their signature, so defects in it are
        // evidence.
        if msg.is_proposal() {
            match self.check_proposal(&msg) {
                ProposalCheck::Clean => {}
                ProposalCheck::Incriminate(rule) => {
                    self.submit_own_evidence(rule, &msg);
                    return Ok(());
                }
                ProposalCheck::Deferred => {
                    self.buffer_future(msg);
                    return Ok(());
                }
            }
        }

        // 4. Store; an occupied slot with different content is
        // equivocation evidence.
        if let Err(equivocation) = self.store.save(msg.clone()) {
            warn!(sender = %msg.sender, height = msg.height, "equivocation detected");
            let equivocation = *equivocation;
            let proof = Proof::misbehavior(
                Rule::Equivocation,
                equivocation.second,
                vec![equivocation.first],
            );
            self.evidence
                .submit(EvidenceKind::Misbehavior, vec![seal_proof(&proof)]);
            return Ok(());
        }

        // 5. Current-height messages drive the algorithm.
        if msg.height == self.height {
            self.dispatch(msg, queue)?;
        }
        Ok(())
    }

    /// Proposal auto-incrimination: garbage payload, wrong proposer,
    /// invalid block. Only settled verdicts are cached; Future and
    /// Transient defer the proposal for a retry after the chain moves.
    fn check_proposal(&mut self, msg: &ConsensusMessage) -> ProposalCheck {
        let block = msg.block().unwrap_or(&[]);
        if *blake3::hash(block).as_bytes() != msg.value.0 {
            return ProposalCheck::Incriminate(Rule::GarbageMessage);
        }
        if self.chain.proposer(msg.height, msg.round) != Some(msg.sender) {
            return ProposalCheck::Incriminate(Rule::InvalidProposer);
        }
        match self.verifier.verify(msg.height, block) {
            BlockVerdict::Valid => {
                self.verdicts
                    .borrow_mut()
                    .insert(msg.value, BlockVerdict::Valid);
                ProposalCheck::Clean
            }
            BlockVerdict::Invalid => {
                self.verdicts
                    .borrow_mut()
                    .insert(msg.value, BlockVerdict::Invalid);
                ProposalCheck::Incriminate(Rule::InvalidProposal)
            }
            BlockVerdict::Future | BlockVerdict::Transient => ProposalCheck::Deferred,
        }
    }

    /// A message that incriminates its own sender is its own evidence.
    fn submit_own_evidence(&self, rule: Rule, msg: &ConsensusMessage) {
        warn!(%rule, sender = %msg.sender, height = msg.height, "auto-incriminating message");
        let proof = Proof::misbehavior(rule, msg.clone(), vec![msg.clone()]);
        self.evidence
            .submit(EvidenceKind::Misbehavior, vec![seal_proof(&proof)]);
    }

    // ------------------------------------------------------------------
    // Algorithm dispatch
    // ------------------------------------------------------------------

    fn dispatch(
        &mut self,
        msg: ConsensusMessage,
        queue: &mut VecDeque<ConsensusMessage>,
    ) -> Result<(), DriverError> {
        let result = {
            let view = OracleView {
                height: self.height,
                committee: &self.committee,
                store: &self.store,
                chain: self.chain.as_ref(),
                verifier: self.verifier.as_ref(),
                value_source: self.value_source.as_ref(),
                verdicts: &self.verdicts,
                assembled: &self.assembled,
            };
            self.algorithm.receive_message(&msg, &view)
        };

        match result {
            Ok(Some(outcome)) => self.apply_outcome(outcome, queue),
            Ok(None) => Ok(()),
            Err(OracleError::FutureValue) | Err(OracleError::Transient(_)) => {
                // Retry once the chain moves; the store save is
                // idempotent on replay.
                debug!(height = msg.height, "buffering message pending verification");
                self.buffer_future(msg);
                Ok(())
            }
            Err(err @ OracleError::NoValue(_)) => {
                warn!(%err, "oracle failed while processing message");
                Ok(())
            }
        }
    }

    fn apply_outcome(
        &mut self,
        outcome: Outcome,
        queue: &mut VecDeque<ConsensusMessage>,
    ) -> Result<(), DriverError> {
        match outcome {
            Outcome::Broadcast(msg) => {
                self.broadcast(msg, queue);
                Ok(())
            }
            Outcome::Schedule(timeout) => {
                self.timers.schedule(timeout);
                Ok(())
            }
            Outcome::RoundChange { round } => {
                self.enter_round(round, queue);
                Ok(())
            }
            Outcome::Decide(proposal) => self.commit_decision(proposal, queue),
        }
    }

    /// Sign an outbound message, gossip it, and loop it back through our
    /// own pipeline — our votes count like anyone else's.
    fn broadcast(&mut self, mut msg: ConsensusMessage, queue: &mut VecDeque<ConsensusMessage>) {
        if let MessageBody::Propose { ref mut block, .. } = msg.body {
            match self.block_payload_for(&msg.value) {
                Some(payload) => *block = payload,
                None => {
                    warn!(value = %msg.value, "no payload for proposal value, not broadcasting");
                    return;
                }
            }
        }

        let digest = signing_hash(&msg);
        msg.signature = self.signer.sign(&digest);

        debug!(%msg, "broadcasting");
        self.broadcaster.broadcast(&self.committee, encode(&msg));
        queue.push_back(msg);
    }

    fn block_payload_for(&self, value: &ValueId) -> Option<Vec<u8>> {
        if let Some(block) = self.assembled.borrow().get(value) {
            return Some(block.clone());
        }
        self.store
            .get(self.height, |m| m.is_proposal() && m.value == *value)
            .into_iter()
            .find_map(|m| m.block().map(<[u8]>::to_vec))
    }

    // ------------------------------------------------------------------
    // Round and height transitions
    // ------------------------------------------------------------------

    fn enter_round(&mut self, round: i64, queue: &mut VecDeque<ConsensusMessage>) {
        debug!(height = self.height, round, "entering round");
        let start = {
            let view = OracleView {
                height: self.height,
                committee: &self.committee,
                store: &self.store,
                chain: self.chain.as_ref(),
                verifier: self.verifier.as_ref(),
                value_source: self.value_source.as_ref(),
                verdicts: &self.verdicts,
                assembled: &self.assembled,
            };
            self.algorithm.start_round(round, &view)
        };

        match start {
            Ok(StartOutcome::Broadcast(msg)) => self.broadcast(msg, queue),
            Ok(StartOutcome::Schedule(timeout)) => self.timers.schedule(timeout),
            Err(err) => {
                // Value assembly failed; fall back to following this
                // round so a peer proposal can still decide it.
                warn!(%err, round, "could not propose, falling back to propose timeout");
                self.timers
                    .schedule(Timeout::new(Step::Propose, self.height, round));
            }
        }
    }

    /// A decision: durably commit, run the fault detector over the
    /// decided height, drop its messages, then start the next height.
    fn commit_decision(
        &mut self,
        proposal: ConsensusMessage,
        queue: &mut VecDeque<ConsensusMessage>,
    ) -> Result<(), DriverError> {
        let decided = self.height;
        info!(height = decided, value = %proposal.value, "decision reached");

        self.chain.commit(&proposal)?;
        self.timers.cancel_all();

        let outcome = run_rules(&self.store, decided, &self.committee);
        if !outcome.proofs.is_empty() {
            self.evidence.submit(
                EvidenceKind::Misbehavior,
                outcome.proofs.iter().map(seal_proof).collect(),
            );
        }
        if !outcome.accusations.is_empty() {
            self.evidence.submit(
                EvidenceKind::Accusation,
                outcome.accusations.iter().map(seal_proof).collect(),
            );
        }
        self.store.delete_height(decided);

        self.advance_to(decided + 1, queue)
    }

    fn advance_to(
        &mut self,
        height: u64,
        queue: &mut VecDeque<ConsensusMessage>,
    ) -> Result<(), DriverError> {
        let parent = self
            .chain
            .header_at(height - 1)
            .ok_or(ChainError::MissingHeader(height - 1))?;

        self.height = height;
        self.committee = parent.committee;
        self.algorithm = Algorithm::new(self.node_id);
        self.verdicts.borrow_mut().clear();
        self.assembled.borrow_mut().clear();

        self.enter_round(0, queue);
        self.replay_future(queue);
        Ok(())
    }

    /// Drain buffered messages for the new current height; purge anything
    /// older, which is already decided.
    fn replay_future(&mut self, queue: &mut VecDeque<ConsensusMessage>) {
        let stale: Vec<u64> = self
            .future
            .range(..self.height)
            .map(|(h, _)| *h)
            .collect();
        for height in stale {
            self.future.remove(&height);
        }
        if let Some(msgs) = self.future.remove(&self.height) {
            debug!(height = self.height, count = msgs.len(), "replaying buffered messages");
            queue.extend(msgs);
        }
    }

    fn buffer_future(&mut self, msg: ConsensusMessage) {
        self.future.entry(msg.height).or_default().push(msg);
    }

    // ------------------------------------------------------------------
    // Timeouts and head advances
    // ------------------------------------------------------------------

    fn on_timeout(&mut self, timeout: Timeout) -> Result<(), DriverError> {
        if timeout.height != self.height {
            return Ok(());
        }
        let mut queue = VecDeque::new();

        let fired = {
            let view = OracleView {
                height: self.height,
                committee: &self.committee,
                store: &self.store,
                chain: self.chain.as_ref(),
                verifier: self.verifier.as_ref(),
                value_source: self.value_source.as_ref(),
                verdicts: &self.verdicts,
                assembled: &self.assembled,
            };
            match timeout.kind {
                Step::Propose => self
                    .algorithm
                    .on_timeout_propose(timeout.height, timeout.round, &view)
                    .map(TimeoutEffect::Broadcast),
                Step::Prevote => self
                    .algorithm
                    .on_timeout_prevote(timeout.height, timeout.round, &view)
                    .map(TimeoutEffect::Broadcast),
                Step::Precommit => self
                    .algorithm
                    .on_timeout_precommit(timeout.height, timeout.round, &view)
                    .map(TimeoutEffect::RoundChange),
            }
        };

        match fired {
            Some(TimeoutEffect::Broadcast(msg)) => self.broadcast(msg, &mut queue),
            Some(TimeoutEffect::RoundChange(round)) => self.enter_round(round, &mut queue),
            None => {}
        }
        self.drain(&mut queue)
    }

    /// The chain head moved (commit of our own decision is handled in
    /// `commit_decision`; this covers sync). Re-anchor if the chain has
    /// moved past the height we are deciding, then drain buffers.
    fn on_head_advanced(&mut self, head: u64) -> Result<(), DriverError> {
        let mut queue = VecDeque::new();
        if head + 1 > self.height {
            info!(head, height = self.height, "chain moved past current height, re-anchoring");
            self.timers.cancel_all();
            for height in self.height..=head {
                self.store.delete_height(height);
            }
            self.advance_to(head + 1, &mut queue)?;
        } else {
            self.replay_future(&mut queue);
        }
        self.drain(&mut queue)
    }
}

enum TimeoutEffect {
    Broadcast(ConsensusMessage),
    RoundChange(i64),
}

enum ProposalCheck {
    Clean,
    Incriminate(Rule),
    Deferred,
}
