//! Simulated network: one unbounded FIFO channel per ordered node pair.

use crate::fault_injector::FaultInjector;
use crate::task_counter::{TaskCounter, TaskGuard};
use crate::task_registry::{TaskKind, TaskRegistry};
use faultline_core::{MessageOrder, PartitionPredicate, Payload};
use faultline_types::{MessageId, NodeId, VectorClock};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A message in transit.
///
/// The envelope owns one unit of the quiescence counter until it is handled
/// or dropped.
#[derive(Debug)]
pub struct Envelope<M> {
    /// Sending node.
    pub sender: NodeId,
    /// Id shared by every copy of one send.
    pub id: MessageId,
    /// The payload.
    pub payload: M,
    /// Sender's clock at send time.
    pub clock: VectorClock,
    pub(crate) _guard: TaskGuard,
}

/// Outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The partition predicate separates the pair.
    Partitioned,
    /// The receiver is down.
    Unreachable,
    /// The network lost the message.
    Lost,
    /// `copies` copies were handed to the receiver.
    Sent {
        /// Id of the send.
        id: MessageId,
        /// Number of copies.
        copies: usize,
    },
}

/// The channel matrix of one invocation.
pub struct MessageTransport<M: Payload> {
    order: MessageOrder,
    partition: Option<PartitionPredicate>,
    /// `channels[receiver][sender]`; `None` while the receiver is down.
    channels: RwLock<Vec<Vec<Option<UnboundedSender<Envelope<M>>>>>>,
    /// Incarnation each receiver's channels were last opened for.
    incarnations: Vec<AtomicU32>,
    next_id: AtomicU64,
    counter: Arc<TaskCounter>,
    tasks: Arc<TaskRegistry>,
    shutdown: CancellationToken,
}

impl<M: Payload> MessageTransport<M> {
    /// Create a transport for `nodes` nodes with every channel closed.
    pub fn new(
        nodes: usize,
        order: MessageOrder,
        partition: Option<PartitionPredicate>,
        counter: Arc<TaskCounter>,
        tasks: Arc<TaskRegistry>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            order,
            partition,
            channels: RwLock::new(vec![vec![None; nodes]; nodes]),
            incarnations: (0..nodes).map(|_| AtomicU32::new(0)).collect(),
            next_id: AtomicU64::new(0),
            counter,
            tasks,
            shutdown,
        })
    }

    /// Number of nodes.
    pub fn nodes(&self) -> usize {
        self.channels.read().len()
    }

    /// Send `payload` from `sender` to `receiver`, consulting the sender's
    /// injector for loss and duplication.
    pub fn send(
        self: &Arc<Self>,
        sender: NodeId,
        receiver: NodeId,
        payload: M,
        clock: VectorClock,
        injector: &FaultInjector,
    ) -> Delivery {
        if let Some(partition) = &self.partition {
            if !partition(sender, receiver) {
                trace!(from = %sender, to = %receiver, "Message dropped by partition");
                return Delivery::Partitioned;
            }
        }
        if !self.is_open(sender, receiver) {
            trace!(from = %sender, to = %receiver, "Message to unreachable node dropped");
            return Delivery::Unreachable;
        }

        let copies = injector.duplication_rate();
        if copies == 0 {
            trace!(from = %sender, to = %receiver, "Message lost");
            return Delivery::Lost;
        }

        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        for _ in 0..copies {
            let envelope = Envelope {
                sender,
                id,
                payload: payload.clone(),
                clock: clock.clone(),
                _guard: self.counter.acquire(),
            };
            match self.order {
                MessageOrder::Fifo => self.push(receiver, envelope),
                MessageOrder::Asynchronous => {
                    self.schedule(receiver, envelope, injector.delivery_yields())
                }
            }
        }
        trace!(from = %sender, to = %receiver, %id, copies, "Message sent");
        Delivery::Sent { id, copies }
    }

    /// Drop every channel into `node`. Buffered envelopes stay with the
    /// receivers and are dropped with them.
    pub fn close(&self, node: NodeId) {
        let mut channels = self.channels.write();
        for sender in channels[node.index()].iter_mut() {
            *sender = None;
        }
    }

    /// Open fresh channels into `incarnation` of `node` and return their
    /// receivers, indexed by sender.
    pub fn reset(&self, node: NodeId, incarnation: u32) -> Vec<UnboundedReceiver<Envelope<M>>> {
        let mut channels = self.channels.write();
        self.incarnations[node.index()].store(incarnation, Ordering::Relaxed);
        channels[node.index()]
            .iter_mut()
            .map(|slot| {
                let (tx, rx) = mpsc::unbounded_channel();
                *slot = Some(tx);
                rx
            })
            .collect()
    }

    fn is_open(&self, sender: NodeId, receiver: NodeId) -> bool {
        self.channels
            .read()
            .get(receiver.index())
            .and_then(|row| row.get(sender.index()))
            .is_some_and(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
    }

    fn push(&self, receiver: NodeId, envelope: Envelope<M>) {
        let channels = self.channels.read();
        if let Some(tx) = &channels[receiver.index()][envelope.sender.index()] {
            // A failed send hands the envelope back; dropping it releases
            // its unit.
            let _ = tx.send(envelope);
        }
    }

    fn schedule(self: &Arc<Self>, receiver: NodeId, envelope: Envelope<M>, yields: usize) {
        let transport = self.clone();
        let shutdown = self.shutdown.clone();
        let incarnation = self.incarnations[receiver.index()].load(Ordering::Relaxed);
        let handle = self.tasks.register(
            receiver,
            TaskKind::Delivery {
                from: envelope.sender,
            },
            incarnation,
        );
        tokio::spawn(async move {
            let _handle = handle;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = async {
                    for _ in 0..yields {
                        tokio::task::yield_now().await;
                    }
                } => transport.push(receiver, envelope),
            }
        });
    }
}

impl<M: Payload> std::fmt::Debug for MessageTransport<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTransport")
            .field("order", &self.order)
            .field("nodes", &self.nodes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_injector::FaultConfig;
    use faultline_core::RecoveryMode;

    fn injector(network_reliable: bool, message_duplication: bool) -> FaultInjector {
        FaultInjector::new(
            NodeId(0),
            FaultConfig {
                network_reliable,
                message_duplication,
                recovery_mode: RecoveryMode::NoRecoveries,
                number_of_nodes: 2,
            },
            5,
        )
    }

    fn transport(
        order: MessageOrder,
        partition: Option<PartitionPredicate>,
    ) -> (Arc<MessageTransport<u32>>, Arc<TaskCounter>) {
        let (transport, counter, _tasks) = transport_with_tasks(order, partition);
        (transport, counter)
    }

    fn transport_with_tasks(
        order: MessageOrder,
        partition: Option<PartitionPredicate>,
    ) -> (Arc<MessageTransport<u32>>, Arc<TaskCounter>, Arc<TaskRegistry>) {
        let counter = TaskCounter::new();
        let tasks = TaskRegistry::new();
        let transport = MessageTransport::new(
            2,
            order,
            partition,
            counter.clone(),
            tasks.clone(),
            CancellationToken::new(),
        );
        (transport, counter, tasks)
    }

    #[tokio::test]
    async fn test_fifo_delivery_in_send_order() {
        let (transport, counter) = transport(MessageOrder::Fifo, None);
        let mut receivers = transport.reset(NodeId(1), 0);
        let injector = injector(true, false);

        for i in 0..10 {
            let delivery = transport.send(NodeId(0), NodeId(1), i, VectorClock::new(2), &injector);
            assert_eq!(
                delivery,
                Delivery::Sent {
                    id: MessageId(i as u64),
                    copies: 1
                }
            );
        }
        assert_eq!(counter.count(), 10);

        for i in 0..10 {
            let envelope = receivers[0].recv().await.unwrap();
            assert_eq!(envelope.payload, i);
            assert_eq!(envelope.sender, NodeId(0));
        }
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_unreachable() {
        let (transport, counter) = transport(MessageOrder::Fifo, None);
        let mut receivers = transport.reset(NodeId(1), 0);
        let injector = injector(true, false);

        transport.send(NodeId(0), NodeId(1), 1, VectorClock::new(2), &injector);
        transport.close(NodeId(1));
        assert_eq!(
            transport.send(NodeId(0), NodeId(1), 2, VectorClock::new(2), &injector),
            Delivery::Unreachable
        );

        // The buffered envelope is still delivered, then the channel ends.
        assert_eq!(receivers[0].recv().await.map(|e| e.payload), Some(1));
        assert!(receivers[0].recv().await.is_none());
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_partitioned_pair_is_dropped() {
        let partition: PartitionPredicate = Arc::new(|from: NodeId, to: NodeId| from == to);
        let (transport, counter) = transport(MessageOrder::Fifo, Some(partition));
        let _receivers = transport.reset(NodeId(1), 0);

        let delivery = transport.send(NodeId(0), NodeId(1), 1, VectorClock::new(2), &injector(true, false));
        assert_eq!(delivery, Delivery::Partitioned);
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_duplicates_share_an_id() {
        let (transport, _counter) = transport(MessageOrder::Fifo, None);
        let mut receivers = transport.reset(NodeId(1), 0);
        let injector = injector(true, true);

        let mut duplicated = None;
        for i in 0..200 {
            if let Delivery::Sent { id, copies: 2 } =
                transport.send(NodeId(0), NodeId(1), i, VectorClock::new(2), &injector)
            {
                duplicated = Some(id);
                break;
            }
        }
        let id = duplicated.expect("no duplicate in 200 sends");

        let mut copies = 0;
        while let Ok(envelope) = receivers[0].try_recv() {
            if envelope.id == id {
                copies += 1;
            }
        }
        assert_eq!(copies, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_asynchronous_delivery_delivers_every_copy() {
        let (transport, counter) = transport(MessageOrder::Asynchronous, None);
        let mut receivers = transport.reset(NodeId(1), 0);
        let injector = injector(true, false);

        for i in 0..20 {
            transport.send(NodeId(0), NodeId(1), i, VectorClock::new(2), &injector);
        }

        let mut received = Vec::new();
        for _ in 0..20 {
            received.push(receivers[0].recv().await.unwrap().payload);
        }
        received.sort_unstable();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_pending_delivery_names_receiver_incarnation() {
        let (transport, counter, tasks) = transport_with_tasks(MessageOrder::Asynchronous, None);
        let _first = transport.reset(NodeId(1), 0);
        transport.close(NodeId(1));
        let mut receivers = transport.reset(NodeId(1), 2);

        // Delivery tasks are registered before they first run.
        transport.send(NodeId(0), NodeId(1), 7, VectorClock::new(2), &injector(true, false));
        let pending = tasks.snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].node, NodeId(1));
        assert_eq!(pending[0].kind, TaskKind::Delivery { from: NodeId(0) });
        assert_eq!(pending[0].incarnation, 2);

        assert_eq!(receivers[0].recv().await.map(|e| e.payload), Some(7));
        assert_eq!(counter.count(), 0);
    }
}
