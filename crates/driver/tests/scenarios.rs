//! End-to-end driver scenarios over fake chain, network, signer and
//! evidence collaborators.
//!
//! Committee: {A, B, C, D} = nodes 1..4, each with power 1, quorum 3,
//! fault threshold 2, deciding height 11 on top of a genesis head at 10.

use accord_core::{
    BlockVerdict, BlockVerifier, Broadcaster, ChainContext, ChainError, Event, EvidenceKind,
    EvidenceSink, Header, Signer, Timeout, ValueSource, ValueSourceError,
};
use accord_driver::Driver;
use accord_types::test_utils::{equal_committee, test_node, test_value};
use accord_types::{
    Committee, ConsensusMessage, NodeId, Rule, Signature, Step, ValueId,
};
use accord_wire::{decode, decode_raw_proof, encode, OnChainProof};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const HEIGHT: u64 = 11;

fn node_a() -> NodeId {
    test_node(1)
}
fn node_b() -> NodeId {
    test_node(2)
}
fn node_c() -> NodeId {
    test_node(3)
}
fn node_d() -> NodeId {
    test_node(4)
}

/// Test signature scheme: the signer address rides in the first 20 bytes.
fn sig_for(node: NodeId) -> Signature {
    let mut bytes = [0u8; 65];
    bytes[..20].copy_from_slice(node.as_bytes());
    Signature::from_bytes(bytes)
}

struct FakeChain {
    headers: Mutex<BTreeMap<u64, Header>>,
    committee: Committee,
}

impl FakeChain {
    fn new(committee: Committee) -> Self {
        let genesis = Header {
            number: HEIGHT - 1,
            hash: test_value(0xfe),
            committee: committee.clone(),
        };
        Self {
            headers: Mutex::new(BTreeMap::from([(genesis.number, genesis)])),
            committee,
        }
    }

    fn committed(&self) -> Vec<(u64, ValueId)> {
        self.headers
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.number >= HEIGHT)
            .map(|h| (h.number, h.hash))
            .collect()
    }
}

impl ChainContext for FakeChain {
    fn head(&self) -> Header {
        self.headers
            .lock()
            .unwrap()
            .values()
            .next_back()
            .expect("genesis present")
            .clone()
    }

    fn header_at(&self, number: u64) -> Option<Header> {
        self.headers.lock().unwrap().get(&number).cloned()
    }

    fn proposer(&self, _height: u64, round: i64) -> Option<NodeId> {
        Some(self.committee.round_robin_proposer(round))
    }

    fn commit(&self, proposal: &ConsensusMessage) -> Result<(), ChainError> {
        let header = Header {
            number: proposal.height,
            hash: proposal.value,
            committee: self.committee.clone(),
        };
        self.headers
            .lock()
            .unwrap()
            .insert(proposal.height, header);
        Ok(())
    }
}

#[derive(Default)]
struct FakeVerifier {
    verdicts: Mutex<HashMap<ValueId, BlockVerdict>>,
}

impl FakeVerifier {
    fn set(&self, value: ValueId, verdict: BlockVerdict) {
        self.verdicts.lock().unwrap().insert(value, verdict);
    }
}

impl BlockVerifier for FakeVerifier {
    fn verify(&self, _height: u64, block: &[u8]) -> BlockVerdict {
        let value = ValueId::from_bytes(*blake3::hash(block).as_bytes());
        self.verdicts
            .lock()
            .unwrap()
            .get(&value)
            .copied()
            .unwrap_or(BlockVerdict::Valid)
    }
}

struct FakeSigner {
    node: NodeId,
}

impl Signer for FakeSigner {
    fn sign(&self, _digest: &[u8; 32]) -> Signature {
        sig_for(self.node)
    }

    fn recover(&self, _digest: &[u8; 32], signature: &Signature) -> Option<NodeId> {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&signature.as_bytes()[..20]);
        Some(NodeId::from_bytes(bytes))
    }
}

#[derive(Default)]
struct FakeNet {
    sent: Mutex<Vec<ConsensusMessage>>,
}

impl FakeNet {
    fn sent(&self) -> Vec<ConsensusMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Broadcaster for FakeNet {
    fn broadcast(&self, _committee: &Committee, bytes: Vec<u8>) {
        let msg = decode(&bytes).expect("driver broadcasts well-formed messages");
        self.sent.lock().unwrap().push(msg);
    }
}

#[derive(Default)]
struct FakeEvidence {
    submissions: Mutex<Vec<(EvidenceKind, Vec<OnChainProof>)>>,
}

impl FakeEvidence {
    fn submissions(&self) -> Vec<(EvidenceKind, Vec<OnChainProof>)> {
        self.submissions.lock().unwrap().clone()
    }

    fn rules_submitted(&self) -> Vec<Rule> {
        self.submissions()
            .iter()
            .flat_map(|(_, proofs)| proofs.iter())
            .map(|p| decode_raw_proof(&p.raw_proof).unwrap().rule)
            .collect()
    }
}

impl EvidenceSink for FakeEvidence {
    fn submit(&self, kind: EvidenceKind, proofs: Vec<OnChainProof>) {
        self.submissions.lock().unwrap().push((kind, proofs));
    }
}

struct FakeValues;

impl ValueSource for FakeValues {
    fn assemble(&self, height: u64) -> Result<(ValueId, Vec<u8>), ValueSourceError> {
        let block = format!("block-{height}").into_bytes();
        let value = ValueId::from_bytes(*blake3::hash(&block).as_bytes());
        Ok((value, block))
    }
}

/// The value FakeValues assembles for a height.
fn assembled_value(height: u64) -> ValueId {
    let block = format!("block-{height}").into_bytes();
    ValueId::from_bytes(*blake3::hash(&block).as_bytes())
}

/// A block payload and its value id for peer proposals.
fn peer_block(seed: u8) -> (ValueId, Vec<u8>) {
    let block = vec![seed; 8];
    (ValueId::from_bytes(*blake3::hash(&block).as_bytes()), block)
}

struct Harness {
    driver: Driver,
    chain: Arc<FakeChain>,
    verifier: Arc<FakeVerifier>,
    net: Arc<FakeNet>,
    evidence: Arc<FakeEvidence>,
    _event_rx: mpsc::Receiver<Event>,
}

fn harness(local: NodeId) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let committee = equal_committee(4);
    let chain = Arc::new(FakeChain::new(committee));
    let verifier = Arc::new(FakeVerifier::default());
    let net = Arc::new(FakeNet::default());
    let evidence = Arc::new(FakeEvidence::default());
    let (event_tx, event_rx) = mpsc::channel(64);

    let driver = Driver::builder(local)
        .chain(chain.clone())
        .verifier(verifier.clone())
        .signer(Arc::new(FakeSigner { node: local }))
        .broadcaster(net.clone())
        .evidence(evidence.clone())
        .value_source(Arc::new(FakeValues))
        .build(event_tx)
        .expect("driver builds");

    Harness {
        driver,
        chain,
        verifier,
        net,
        evidence,
        _event_rx: event_rx,
    }
}

fn deliver(driver: &mut Driver, mut msg: ConsensusMessage) {
    msg.signature = sig_for(msg.sender);
    driver
        .handle_event(Event::Inbound {
            bytes: encode(&msg),
        })
        .expect("no fatal error");
}

#[tokio::test]
async fn proposer_happy_path_decides() {
    // Scenario: A proposes fresh at (11, 0), gathers prevotes and
    // precommits from B and C, and decides.
    let mut h = harness(node_a());
    h.driver.begin().unwrap();

    let x = assembled_value(HEIGHT);
    let sent = h.net.sent();
    assert!(sent.iter().any(|m| m.is_proposal()
        && m.value == x
        && m.valid_round() == Some(-1)));
    // Line 22 on self-delivery of the proposal: A prevotes its own value.
    assert!(sent.iter().any(|m| m.is_prevote() && m.value == x));

    deliver(
        &mut h.driver,
        ConsensusMessage::prevote(HEIGHT, 0, x, node_b()),
    );
    assert_eq!(h.driver.step(), Step::Prevote);

    // C's prevote completes the quorum: line 36 locks and precommits.
    deliver(
        &mut h.driver,
        ConsensusMessage::prevote(HEIGHT, 0, x, node_c()),
    );
    assert_eq!(h.driver.step(), Step::Precommit);
    assert!(h
        .net
        .sent()
        .iter()
        .any(|m| m.is_precommit() && m.value == x));

    deliver(
        &mut h.driver,
        ConsensusMessage::precommit(HEIGHT, 0, x, node_b()),
    );
    assert_eq!(h.driver.height(), HEIGHT);

    // C's precommit completes the quorum: line 49 decides.
    deliver(
        &mut h.driver,
        ConsensusMessage::precommit(HEIGHT, 0, x, node_c()),
    );
    assert_eq!(h.chain.committed(), vec![(HEIGHT, x)]);
    assert_eq!(h.driver.height(), HEIGHT + 1);

    // An honest height yields no evidence.
    assert!(h.evidence.submissions().is_empty());
}

#[tokio::test]
async fn follower_times_out_on_propose() {
    // Scenario: B at (11, 0); A never proposes. The propose timeout
    // produces a nil prevote.
    let mut h = harness(node_b());
    h.driver.begin().unwrap();
    assert!(h.net.sent().is_empty());

    h.driver
        .handle_event(Event::TimeoutFired {
            timeout: Timeout::new(Step::Propose, HEIGHT, 0),
        })
        .unwrap();

    let sent = h.net.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_prevote());
    assert!(sent[0].value.is_nil());
    assert_eq!(sent[0].sender, node_b());
    assert_eq!(h.driver.step(), Step::Prevote);
}

#[tokio::test]
async fn equivocation_produces_evidence() {
    // Scenario: A prevotes X then Y at the same (height, round).
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    let first = ConsensusMessage::prevote(HEIGHT, 0, test_value(1), node_a());
    let second = ConsensusMessage::prevote(HEIGHT, 0, test_value(2), node_a());
    deliver(&mut h.driver, first.clone());
    deliver(&mut h.driver, second.clone());

    let submissions = h.evidence.submissions();
    assert_eq!(submissions.len(), 1);
    let (kind, proofs) = &submissions[0];
    assert_eq!(*kind, EvidenceKind::Misbehavior);
    assert_eq!(proofs.len(), 1);
    assert_eq!(proofs[0].sender, node_a());

    let raw = decode_raw_proof(&proofs[0].raw_proof).unwrap();
    assert_eq!(raw.rule, Rule::Equivocation);
    // message = second vote, evidence = [first vote].
    assert_eq!(decode(&raw.message).unwrap().value, second.value);
    assert_eq!(raw.evidence.len(), 1);
    assert_eq!(decode(&raw.evidence[0]).unwrap().value, first.value);

    // The offending second vote never reaches the store.
    assert_eq!(h.driver.store().len_at(HEIGHT), 1);
}

#[tokio::test]
async fn round_skip_on_fault_threshold() {
    // Scenario: A at (11, 0) sees messages from two distinct validators
    // at round 5; combined power 2 ≥ F, so it skips to round 5.
    let mut h = harness(node_a());
    h.driver.begin().unwrap();
    assert_eq!(h.driver.round(), 0);

    deliver(
        &mut h.driver,
        ConsensusMessage::prevote(HEIGHT, 5, test_value(1), node_c()),
    );
    assert_eq!(h.driver.round(), 0);

    deliver(
        &mut h.driver,
        ConsensusMessage::precommit(HEIGHT, 5, test_value(1), node_d()),
    );
    assert_eq!(h.driver.round(), 5);
    assert_eq!(h.driver.step(), Step::Propose);
}

#[tokio::test]
async fn invalid_proposer_is_incriminated() {
    // C proposes at round 0 where A is the designated proposer.
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    let (value, block) = peer_block(7);
    deliver(
        &mut h.driver,
        ConsensusMessage::proposal(HEIGHT, 0, value, -1, block, node_c()),
    );

    assert_eq!(h.evidence.rules_submitted(), vec![Rule::InvalidProposer]);
    assert_eq!(h.driver.store().len_at(HEIGHT), 0);
}

#[tokio::test]
async fn garbage_proposal_is_incriminated() {
    // A's proposal payload does not hash to the claimed value.
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    deliver(
        &mut h.driver,
        ConsensusMessage::proposal(HEIGHT, 0, test_value(5), -1, vec![1, 2, 3], node_a()),
    );

    assert_eq!(h.evidence.rules_submitted(), vec![Rule::GarbageMessage]);
}

#[tokio::test]
async fn invalid_proposal_is_incriminated() {
    // The verifier rejects A's otherwise well-formed proposal.
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    let (value, block) = peer_block(9);
    h.verifier.set(value, BlockVerdict::Invalid);
    deliver(
        &mut h.driver,
        ConsensusMessage::proposal(HEIGHT, 0, value, -1, block, node_a()),
    );

    assert_eq!(h.evidence.rules_submitted(), vec![Rule::InvalidProposal]);
    assert_eq!(h.driver.store().len_at(HEIGHT), 0);
}

#[tokio::test]
async fn non_committee_messages_are_dropped() {
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    deliver(
        &mut h.driver,
        ConsensusMessage::prevote(HEIGHT, 0, test_value(1), test_node(9)),
    );

    assert!(h.evidence.submissions().is_empty());
    assert_eq!(h.driver.store().len_at(HEIGHT), 0);
}

#[tokio::test]
async fn future_messages_replay_after_decision() {
    // B buffers a message for height 12, then decides height 11; the
    // buffered message replays into the new height.
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    let future_vote = ConsensusMessage::prevote(HEIGHT + 1, 0, test_value(3), node_c());
    deliver(&mut h.driver, future_vote);
    assert_eq!(h.driver.store().len_at(HEIGHT + 1), 0);

    // Decide height 11: proposal from A plus prevote/precommit quorums.
    let (x, block) = peer_block(1);
    deliver(
        &mut h.driver,
        ConsensusMessage::proposal(HEIGHT, 0, x, -1, block, node_a()),
    );
    for node in [node_a(), node_c(), node_d()] {
        deliver(&mut h.driver, ConsensusMessage::prevote(HEIGHT, 0, x, node));
    }
    for node in [node_a(), node_c(), node_d()] {
        deliver(
            &mut h.driver,
            ConsensusMessage::precommit(HEIGHT, 0, x, node),
        );
    }

    assert_eq!(h.driver.height(), HEIGHT + 1);
    assert_eq!(h.chain.committed(), vec![(HEIGHT, x)]);
    // The buffered height-12 vote is now in the store.
    assert_eq!(h.driver.store().len_at(HEIGHT + 1), 1);
}

#[tokio::test]
async fn decided_height_is_garbage_collected() {
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    let (x, block) = peer_block(1);
    deliver(
        &mut h.driver,
        ConsensusMessage::proposal(HEIGHT, 0, x, -1, block, node_a()),
    );
    for node in [node_a(), node_c(), node_d()] {
        deliver(&mut h.driver, ConsensusMessage::prevote(HEIGHT, 0, x, node));
    }
    assert!(h.driver.store().len_at(HEIGHT) > 0);
    for node in [node_a(), node_c(), node_d()] {
        deliver(
            &mut h.driver,
            ConsensusMessage::precommit(HEIGHT, 0, x, node),
        );
    }

    assert_eq!(h.driver.height(), HEIGHT + 1);
    assert_eq!(h.driver.store().len_at(HEIGHT), 0);
}

#[tokio::test]
async fn precommit_timeout_advances_round() {
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    h.driver
        .handle_event(Event::TimeoutFired {
            timeout: Timeout::new(Step::Precommit, HEIGHT, 0),
        })
        .unwrap();

    assert_eq!(h.driver.round(), 1);
    assert_eq!(h.driver.step(), Step::Propose);
}

#[tokio::test]
async fn stale_timeouts_are_ignored() {
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    // A timeout for a different height does nothing.
    h.driver
        .handle_event(Event::TimeoutFired {
            timeout: Timeout::new(Step::Propose, HEIGHT + 5, 0),
        })
        .unwrap();
    assert!(h.net.sent().is_empty());
    assert_eq!(h.driver.round(), 0);
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let mut h = harness(node_b());
    h.driver.begin().unwrap();
    let keep_going = h.driver.handle_event(Event::Shutdown).unwrap();
    assert!(!keep_going);
}

#[tokio::test]
async fn locked_follower_reproposes_valid_value() {
    // B locks on X in round 0; after the precommit timeout moves it to
    // round 1, B is the proposer and must re-propose X with valid_round 0
    // instead of assembling a fresh value.
    let mut h = harness(node_b());
    h.driver.begin().unwrap();

    let (x, block) = peer_block(1);
    deliver(
        &mut h.driver,
        ConsensusMessage::proposal(HEIGHT, 0, x, -1, block, node_a()),
    );
    for node in [node_a(), node_c(), node_d()] {
        deliver(&mut h.driver, ConsensusMessage::prevote(HEIGHT, 0, x, node));
    }
    // Quorum reached: B locked X at round 0 and precommitted.
    assert!(h
        .net
        .sent()
        .iter()
        .any(|m| m.is_precommit() && m.value == x));

    // Precommit timeout moves B to round 1, where B itself proposes.
    // Force the round change via the timeout event.
    h.driver
        .handle_event(Event::TimeoutFired {
            timeout: Timeout::new(Step::Precommit, HEIGHT, 0),
        })
        .unwrap();
    assert_eq!(h.driver.round(), 1);

    // B is the round-1 proposer and holds valid value X, so it
    // re-proposes X with valid_round 0.
    let reproposal = h
        .net
        .sent()
        .into_iter()
        .filter(|m| m.is_proposal())
        .next_back()
        .expect("B re-proposes");
    assert_eq!(reproposal.sender, node_b());
    assert_eq!(reproposal.value, x);
    assert_eq!(reproposal.valid_round(), Some(0));
}
