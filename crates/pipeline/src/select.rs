//! Ordered, non-blocking polling over several sequences.
//!
//! [`poll_in_order`] makes exactly one receive attempt per sequence, first to
//! last, and returns the first item found. It is a snapshot: a writer racing
//! the poll may fill an earlier sequence just after it was checked, so this is
//! a best-effort preference order, not a priority guarantee.

use crate::sequence::TryRecv;
use crate::Sequence;

/// Result of one [`poll_in_order`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    /// `item` came from `sources[index]`.
    Ready {
        /// Position of the sequence that had the item.
        index: usize,
        /// The received item.
        item: T,
    },
    /// At least one sequence is open, none had an item buffered.
    Empty,
    /// Every sequence is closed and drained (or there were none).
    Closed,
}

/// Tries each sequence once, in order, without waiting.
pub fn poll_in_order<T: Send + 'static>(sources: &mut [Sequence<T>]) -> Polled<T> {
    let mut any_open = false;
    for (index, source) in sources.iter_mut().enumerate() {
        match source.try_recv() {
            TryRecv::Item(item) => return Polled::Ready { index, item },
            TryRecv::Empty => any_open = true,
            TryRecv::Closed => {}
        }
    }
    if any_open {
        Polled::Empty
    } else {
        Polled::Closed
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn earlier_sequences_are_checked_first() {
        let (high_tx, high_rx) = mpsc::channel(4);
        let (low_tx, low_rx) = mpsc::channel(4);
        let mut sources = [Sequence::from_receiver(high_rx), Sequence::from_receiver(low_rx)];

        low_tx.send("from low").await.unwrap();
        assert_eq!(
            poll_in_order(&mut sources),
            Polled::Ready { index: 1, item: "from low" }
        );

        high_tx.send("from high").await.unwrap();
        low_tx.send("from low again").await.unwrap();
        assert_eq!(
            poll_in_order(&mut sources),
            Polled::Ready { index: 0, item: "from high" }
        );
        assert_eq!(
            poll_in_order(&mut sources),
            Polled::Ready { index: 1, item: "from low again" }
        );
        assert_eq!(poll_in_order(&mut sources), Polled::Empty);

        drop(high_tx);
        drop(low_tx);
        assert_eq!(poll_in_order(&mut sources), Polled::Closed);
    }

    #[test]
    fn no_sources_is_closed() {
        let mut sources: [Sequence<u8>; 0] = [];
        assert_eq!(poll_in_order(&mut sources), Polled::Closed);
    }
}
