//! Sending role: pushes one file through FILENAME, DATA* and COMPLETE, one
//! PDU per round trip, waiting for the server's ACK after each.

use std::path::Path;

use crate::{
    error::TransferError,
    pdu::{Message, Pdu},
    sequence::{SeqCheck, Sequencer},
    storage::{self, ChunkReader},
    transport::Channel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Init,
    AwaitFilenameAck,
    SendingData,
    AwaitDataAck,
    AwaitCompleteAck,
    Done,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct TransferReport {
    pub file_name: String,
    pub bytes_sent: u64,
    pub data_pdus: u32,
    pub sha256: [u8; 32],
}

/// One client session. Not reusable: make a new one per file.
#[derive(Debug)]
pub struct Sender {
    seq: Sequencer,
    state: SenderState,
    history: Vec<SenderState>,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

impl Sender {
    pub fn new() -> Self {
        Self { seq: Sequencer::new(), state: SenderState::Init, history: vec![SenderState::Init] }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Every state entered, in order.
    pub fn history(&self) -> &[SenderState] {
        &self.history
    }

    /// PDUs put on the wire so far.
    pub fn pdus_sent(&self) -> u32 {
        self.seq.sent()
    }

    fn enter(&mut self, state: SenderState) {
        if self.state != state {
            self.state = state;
            self.history.push(state);
        }
    }

    /// Transfer `path` over `channel`. The channel is disconnected on return,
    /// whether the transfer finished or aborted.
    pub async fn send_file(&mut self, channel: &mut Channel, path: &Path) -> Result<TransferReport, TransferError> {
        let result = self.run(channel, path).await;
        match &result {
            Ok(report) => {
                self.enter(SenderState::Done);
                log::info!("sent {} ({} bytes in {} data pdus)", report.file_name, report.bytes_sent, report.data_pdus);
            }
            Err(e) => {
                self.enter(SenderState::Aborted);
                log::error!("transfer of {} aborted: {}", path.display(), e);
                channel.disconnect().await;
            }
        }
        result
    }

    async fn run(&mut self, channel: &mut Channel, path: &Path) -> Result<TransferReport, TransferError> {
        let name = storage::bare_name(path).ok_or_else(|| TransferError::InvalidName(path.display().to_string()))?;
        let mut reader = ChunkReader::open(path)
            .await
            .map_err(|source| TransferError::LocalFile { path: path.to_path_buf(), source })?;

        let total_size = reader.total_size();
        log::info!("sending {} ({} bytes) to {}", name, total_size, channel.peer());
        self.exchange(channel, Message::Filename { name: name.clone(), total_size }, SenderState::AwaitFilenameAck)
            .await?;

        let mut data_pdus = 0u32;
        loop {
            self.enter(SenderState::SendingData);
            let chunk = reader.next_chunk().await?;
            if chunk.is_empty() { break; }
            self.exchange(channel, Message::Data(chunk), SenderState::AwaitDataAck).await?;
            data_pdus += 1;
        }

        self.exchange(channel, Message::Complete, SenderState::AwaitCompleteAck).await?;
        channel.disconnect().await;
        Ok(TransferReport { file_name: name, bytes_sent: reader.bytes_read(), data_pdus, sha256: reader.digest() })
    }

    /// Send one PDU and block for exactly one reply, which must be an ACK.
    async fn exchange(&mut self, channel: &mut Channel, message: Message, awaiting: SenderState) -> Result<(), TransferError> {
        let kind = message.msg_type();
        let pdu = Pdu::new(self.seq.next_outbound(), message);
        channel.send_pdu(&pdu).await?;
        self.enter(awaiting);

        let reply = channel.recv_pdu().await?.ok_or(TransferError::ClosedByPeer)?;
        if let SeqCheck::OutOfOrder { expected, got } = self.seq.check_inbound(reply.seq) {
            log::warn!("reply out of order: expected seq {expected}, got {got}");
        }
        match reply.message {
            Message::Ack => Ok(()),
            Message::Error(code) => {
                log::error!("server rejected {:?} seq={}: {}", kind, pdu.seq, code);
                Err(TransferError::Rejected(code))
            }
            other => Err(TransferError::UnexpectedReply(other.msg_type())),
        }
    }
}
