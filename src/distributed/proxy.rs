use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow, bail, ensure};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info, warn};

use super::actor::{Actor, ActorHandle};
use super::message::{ActorMessage, GatheredRollOut, RollOutRequest, RollOutResult};
use crate::agent::Agent;
use crate::environment::{Environment, Performance};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyParams {
    pub group_name: String,
    pub expected_peers: usize,
    /// Address of the coordination store the group registers with.
    pub redis_address: String,
}

struct Peer {
    name: String,
    sender: Sender<ActorMessage>,
    handle: Option<JoinHandle<()>>,
}

/// Learner-side stand-in for a group of actor peers, each running on its own thread.
pub struct ActorProxy<M> {
    params: ProxyParams,
    peers: Vec<Peer>,
    results: Receiver<Result<RollOutResult<M>>>,
}

impl<M: Send + 'static> ActorProxy<M> {
    /// Starts `expected_peers` actors built by `factory` and waits until all of them are ready.
    pub fn new<E, A, F>(params: ProxyParams, factory: F) -> Result<Self>
    where
        E: Environment<Metrics = M> + 'static,
        A: Agent + 'static,
        F: Fn(usize) -> Result<Actor<E, A>> + Send + Sync + 'static,
    {
        ensure!(params.expected_peers > 0, "expected_peers must be positive");
        info!(
            "{}: starting {} actor peers (coordination store {})",
            params.group_name, params.expected_peers, params.redis_address
        );

        let factory = Arc::new(factory);
        let (result_tx, results) = unbounded();
        let (ready_tx, ready_rx) = unbounded::<Result<String>>();

        let mut peers = Vec::with_capacity(params.expected_peers);
        for index in 0..params.expected_peers {
            let name = format!("{}.actor_{index}", params.group_name);
            let (sender, inbox) = unbounded();
            let factory = Arc::clone(&factory);
            let result_tx = result_tx.clone();
            let ready_tx = ready_tx.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    run_peer::<E, A, F>(index, factory.as_ref(), inbox, result_tx, ready_tx)
                })
                .with_context(|| format!("failed to spawn {name}"))?;
            peers.push(Peer {
                name,
                sender,
                handle: Some(handle),
            });
        }
        drop(ready_tx);

        let mut proxy = ActorProxy {
            params,
            peers,
            results,
        };
        for _ in 0..proxy.params.expected_peers {
            let joined = ready_rx
                .recv()
                .map_err(|_| anyhow!("actor peers stopped before joining"))
                .and_then(|ready| ready);
            match joined {
                Ok(actor) => debug!("{}: {actor} joined", proxy.params.group_name),
                Err(e) => {
                    proxy.shutdown();
                    return Err(e.context(format!("{}: actor failed to start", proxy.params.group_name)));
                }
            }
        }
        info!("{}: all {} actor peers joined", proxy.params.group_name, proxy.peers.len());
        Ok(proxy)
    }
}

impl<M> ActorProxy<M> {
    pub fn params(&self) -> &ProxyParams {
        &self.params
    }

    pub fn peer_names(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(|p| p.name.as_str())
    }

    fn shutdown(&mut self) {
        for peer in &self.peers {
            // a peer that already stopped has dropped its inbox
            let _ = peer.sender.send(ActorMessage::Exit);
        }
        for peer in &mut self.peers {
            if let Some(handle) = peer.handle.take() {
                if handle.join().is_err() {
                    error!("{} panicked", peer.name);
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_peer<E, A, F>(
    index: usize,
    factory: &F,
    inbox: Receiver<ActorMessage>,
    results: Sender<Result<RollOutResult<E::Metrics>>>,
    ready: Sender<Result<String>>,
) where
    E: Environment,
    A: Agent,
    F: Fn(usize) -> Result<Actor<E, A>>,
{
    let built = panic::catch_unwind(AssertUnwindSafe(|| factory(index)))
        .unwrap_or_else(|payload| Err(anyhow!("factory panicked: {}", panic_message(payload))));
    let mut actor = match built {
        Ok(actor) => actor,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(actor.name().to_string())).is_err() {
        return;
    }
    drop(ready);

    let name = actor.name().to_string();
    let mut crash = None;
    for message in inbox.iter() {
        match message {
            ActorMessage::RollOut(request) => {
                match panic::catch_unwind(AssertUnwindSafe(|| actor.roll_out(&request))) {
                    Ok(result) => {
                        if results.send(result).is_err() {
                            break;
                        }
                    }
                    Err(payload) => {
                        crash = Some((request.episode, panic_message(payload)));
                        break;
                    }
                }
            }
            ActorMessage::Exit => break,
        }
    }
    // closed before replying, so later requests to this peer fail to send
    drop(inbox);
    drop(actor);
    if let Some((episode, reason)) = crash {
        error!("{name} panicked during episode {episode}: {reason}");
        let _ = results.send(Err(anyhow!("{name} panicked: {reason}")));
    }
    debug!("{name} exited");
}

impl<M: Performance + Debug + Send + 'static> ActorHandle for ActorProxy<M> {
    type Metrics = M;

    /// Scatters the request to every peer and gathers all replies.
    fn roll_out(&mut self, request: RollOutRequest) -> Result<GatheredRollOut<M>> {
        ensure!(!self.peers.is_empty(), "{}: no actor peers left", self.params.group_name);
        let mut first_error = None;
        let mut sent = 0;
        for peer in &self.peers {
            match peer.sender.send(ActorMessage::RollOut(request.clone())) {
                Ok(()) => sent += 1,
                Err(_) => {
                    first_error.get_or_insert(anyhow!("{} is gone", peer.name));
                }
            }
        }

        let mut replies = Vec::with_capacity(sent);
        for _ in 0..sent {
            match self.results.recv() {
                Ok(Ok(result)) => replies.push(result),
                Ok(Err(e)) => {
                    warn!("{}: roll-out {} failed: {e:#}", self.params.group_name, request.episode);
                    first_error.get_or_insert(e);
                }
                Err(_) => bail!("{}: actor peers disconnected", self.params.group_name),
            }
        }
        if let Some(e) = first_error {
            return Err(e.context(format!("roll-out of episode {} failed", request.episode)));
        }
        Ok(GatheredRollOut::gather(replies))
    }

    fn exit(&mut self) -> Result<()> {
        self.shutdown();
        self.peers.clear();
        info!("{}: actor peers stopped", self.params.group_name);
        Ok(())
    }
}

impl<M> Drop for ActorProxy<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::{AliveGuard, Failure, TOY_AGENT, TOY_SCORE, ToyMetrics, toy_actor};

    fn params(peers: usize) -> ProxyParams {
        ProxyParams {
            group_name: "toy_group".to_string(),
            expected_peers: peers,
            redis_address: "localhost:6379".to_string(),
        }
    }

    fn request(episode: usize) -> RollOutRequest {
        RollOutRequest {
            episode,
            parameters: None,
            epsilon: None,
            return_experiences: true,
        }
    }

    fn proxy(
        peers: usize,
        failure: impl Fn(usize) -> Failure + Send + Sync + 'static,
        alive: &Arc<AtomicUsize>,
    ) -> ActorProxy<ToyMetrics> {
        let alive = Arc::clone(alive);
        ActorProxy::new(params(peers), move |index| {
            Ok(toy_actor(
                &format!("toy_actor_{index}"),
                4,
                failure(index),
                Some(AliveGuard::new(&alive)),
            ))
        })
        .unwrap()
    }

    #[test]
    fn roll_out_gathers_one_reply_per_peer() {
        let alive = Arc::new(AtomicUsize::new(0));
        let mut proxy = proxy(3, |_| Failure::None, &alive);
        assert_eq!(alive.load(Ordering::SeqCst), 3);
        assert_eq!(proxy.peer_names().count(), 3);

        let gathered = proxy.roll_out(request(0)).unwrap();
        assert_eq!(gathered.metrics.len(), 3);
        assert!(gathered.metrics.values().all(|m| m.decisions == 4));
        assert_eq!(gathered.performance(), TOY_SCORE);
        let experiences = gathered.experiences.unwrap();
        assert_eq!(experiences[TOY_AGENT].len(), 3 * 3);
    }

    #[test]
    fn failing_factory_stops_every_started_peer() {
        let alive = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&alive);
        let result: Result<ActorProxy<ToyMetrics>> = ActorProxy::new(params(3), move |index| {
            if index == 1 {
                bail!("no environment for actor {index}");
            }
            Ok(toy_actor("toy_actor", 2, Failure::None, Some(AliveGuard::new(&counter))))
        });
        assert!(result.is_err());
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_peer_fails_the_roll_out_instead_of_hanging() {
        let alive = Arc::new(AtomicUsize::new(0));
        let failure = |index: usize| if index == 1 { Failure::PanicOn(1) } else { Failure::None };
        let mut proxy = proxy(2, failure, &alive);

        proxy.roll_out(request(0)).unwrap();
        let err = proxy.roll_out(request(1)).unwrap_err();
        assert!(format!("{err:#}").contains("panicked"));

        // the broken peer is gone for good, the healthy one still answers
        assert!(proxy.roll_out(request(2)).is_err());
        assert_eq!(alive.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn peer_error_fails_only_that_episode() {
        let alive = Arc::new(AtomicUsize::new(0));
        let failure = |index: usize| if index == 0 { Failure::ErrorOn(1) } else { Failure::None };
        let mut proxy = proxy(2, failure, &alive);

        proxy.roll_out(request(0)).unwrap();
        assert!(proxy.roll_out(request(1)).is_err());
        let gathered = proxy.roll_out(request(2)).unwrap();
        assert_eq!(gathered.metrics.len(), 2);
    }

    #[test]
    fn exit_stops_every_peer() {
        let alive = Arc::new(AtomicUsize::new(0));
        let mut proxy = proxy(2, |_| Failure::None, &alive);
        proxy.roll_out(request(0)).unwrap();

        proxy.exit().unwrap();
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert_eq!(proxy.peer_names().count(), 0);
        assert!(proxy.roll_out(request(1)).is_err());
    }

    #[test]
    fn dropping_the_proxy_joins_its_peers() {
        let alive = Arc::new(AtomicUsize::new(0));
        let proxy = proxy(2, |_| Failure::None, &alive);
        assert_eq!(alive.load(Ordering::SeqCst), 2);
        drop(proxy);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }
}
