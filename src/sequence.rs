//! Per-session sequence numbering.
//!
//! Each role owns one [`Sequencer`]. Outbound PDUs take the next number
//! (starting at 0, one per PDU sent); inbound PDUs are compared against the
//! number we expect next. A mismatch is only reported; the transport below is
//! assumed reliable and ordered, so nothing is reordered or dropped here.

#[derive(Debug, Default)]
pub struct Sequencer {
    next_out: u32,
    expected_in: u32,
}

/// Result of checking an inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    InOrder,
    OutOfOrder { expected: u32, got: u32 },
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the sequence number for the PDU about to be sent.
    pub fn next_outbound(&mut self) -> u32 {
        let seq = self.next_out;
        self.next_out = self.next_out.wrapping_add(1);
        seq
    }

    /// Check an inbound number. The expectation always moves to `seq + 1`,
    /// whether or not it matched.
    pub fn check_inbound(&mut self, seq: u32) -> SeqCheck {
        let expected = self.expected_in;
        self.expected_in = seq.wrapping_add(1);
        if seq == expected {
            SeqCheck::InOrder
        } else {
            SeqCheck::OutOfOrder { expected, got: seq }
        }
    }

    /// Number of PDUs sent so far.
    pub fn sent(&self) -> u32 {
        self.next_out
    }

    #[cfg(test)]
    fn expected_inbound(&self) -> u32 {
        self.expected_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_starts_at_zero_without_gaps() {
        let mut s = Sequencer::new();
        let seqs: Vec<u32> = (0..4).map(|_| s.next_outbound()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(s.sent(), 4);
    }

    #[test]
    fn inbound_mismatch_is_flagged_and_resyncs() {
        let mut s = Sequencer::new();
        assert_eq!(s.check_inbound(0), SeqCheck::InOrder);
        assert_eq!(s.check_inbound(5), SeqCheck::OutOfOrder { expected: 1, got: 5 });
        assert_eq!(s.expected_inbound(), 6);
        assert_eq!(s.check_inbound(6), SeqCheck::InOrder);
    }

    #[test]
    fn counters_are_independent() {
        let mut s = Sequencer::new();
        s.next_outbound();
        s.next_outbound();
        assert_eq!(s.check_inbound(0), SeqCheck::InOrder);
        assert_eq!(s.next_outbound(), 2);
    }
}
